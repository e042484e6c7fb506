//! Single-threaded reactor loop
//!
//! The loop owns the [`Selector`], the pending operation table and the
//! timers. Each iteration:
//!
//! 1. derives the poll timeout from posted work, the nearest timer and the
//!    caller's bound;
//! 2. polls and performs the raw transfers for every ready descriptor;
//! 3. collects expired timers;
//! 4. releases its own state and only then settles promises and runs posted
//!    closures, so continuations may freely submit new work or cancel.

use super::reactor::{Completion, Op, PendingOps, Reactor, Transfer};
use super::selector::{Event, Interest, Selector};
use super::timer::{TimerId, TimerWheel};
use crate::buffer::ByteBuffer;
use crate::config::{EventLoopConfig, RuntimeConfig};
use crate::error::{Error, Result};
use crate::future::{pair, Future};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

struct LoopState {
    selector: Selector,
    reactor: Reactor,
    timers: TimerWheel,
    posted: VecDeque<Completion>,
    config: EventLoopConfig,
    stopped: bool,
    iterations: u64,
}

/// Handle to a reactor loop. Clones share the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<RefCell<LoopState>>,
}

/// Snapshot of the loop's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub registered_fds: usize,
    pub pending: PendingOps,
    pub pending_timers: usize,
    pub posted: usize,
    pub iterations: u64,
}

impl EventLoop {
    /// Loop with the default configuration (poll selector).
    pub fn new() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        let selector = Selector::from_config(&config.selector)?;
        debug!(?selector, "event loop created");
        Ok(Self {
            inner: Rc::new(RefCell::new(LoopState {
                selector,
                reactor: Reactor::new(),
                timers: TimerWheel::new(),
                posted: VecDeque::new(),
                config: config.event_loop,
                stopped: false,
                iterations: 0,
            })),
        })
    }

    /// Run a single poll-and-dispatch iteration.
    ///
    /// `timeout` bounds the wait; `None` uses the configured default. Returns
    /// the number of completions, timers and posted closures run.
    pub fn run_once(&self, timeout: Option<Duration>) -> Result<usize> {
        let mut ready = Vec::new();
        let (completions, posted) = {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            state.iterations += 1;

            let now = Instant::now();
            let mut wait = timeout.unwrap_or_else(|| state.config.poll_timeout());
            if let Some(until_timer) = state.timers.timeout_until_next(now) {
                wait = wait.min(until_timer);
            }
            if !state.posted.is_empty() {
                wait = Duration::ZERO;
            }

            ready.extend(state.selector.poll(to_timeout_ms(wait))?);
            trace!(ready = ready.len(), "loop iteration");

            let mut completions = Vec::new();
            for Event { fd, readiness, .. } in ready.drain(..) {
                let (done, interest) = state.reactor.dispatch(fd, readiness);
                completions.extend(done);
                update_registration(&mut state.selector, fd, interest);
            }

            for (id, promise) in state.timers.drain_expired(Instant::now()) {
                trace!(timer = id.0, "timer fired");
                completions.push(Box::new(move || {
                    let _ = promise.resolve(());
                }) as Completion);
            }

            (completions, std::mem::take(&mut state.posted))
        };

        let count = completions.len() + posted.len();
        for completion in completions {
            completion();
        }
        for closure in posted {
            closure();
        }
        Ok(count)
    }

    /// Run until [`stop`](Self::stop) is called or nothing is pending.
    pub fn run(&self) -> Result<()> {
        self.inner.borrow_mut().stopped = false;
        while !self.is_stopped() && self.has_work() {
            self.run_once(None)?;
        }
        Ok(())
    }

    /// Run for at most `duration`, or until stopped.
    pub fn run_for(&self, duration: Duration) -> Result<()> {
        self.inner.borrow_mut().stopped = false;
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline || self.is_stopped() {
                return Ok(());
            }
            self.run_once(Some(deadline - now))?;
        }
    }

    /// Run until `future` settles.
    ///
    /// Fails with [`Error::InvalidState`] if the loop runs out of work first,
    /// since the future could then never settle.
    pub fn run_until<T>(&self, future: &Future<T>) -> Result<()> {
        self.inner.borrow_mut().stopped = false;
        while !future.is_settled() {
            if self.is_stopped() {
                return Ok(());
            }
            if !self.has_work() {
                return Err(Error::InvalidState("event loop has no pending work"));
            }
            self.run_once(None)?;
        }
        Ok(())
    }

    /// Make the running `run*` call return after the current iteration.
    pub fn stop(&self) {
        self.inner.borrow_mut().stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.borrow().stopped
    }

    /// Queue `f` to run on the next iteration.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.borrow_mut().posted.push_back(Box::new(f));
    }

    /// Schedule a timer resolving after `delay`.
    pub fn schedule(&self, delay: Duration) -> (TimerId, Future<()>) {
        let (id, future) = self.inner.borrow_mut().timers.insert_after(delay);
        trace!(timer = id.0, ?delay, "timer scheduled");
        (id, future)
    }

    /// Cancel a pending timer, failing its future with
    /// [`Error::Cancelled`]. Returns false if it already fired.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let promise = self.inner.borrow_mut().timers.remove(id);
        match promise {
            Some(promise) => {
                let _ = promise.fail(Error::Cancelled);
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> LoopStats {
        let state = self.inner.borrow();
        LoopStats {
            registered_fds: state.selector.len(),
            pending: state.reactor.pending(),
            pending_timers: state.timers.len(),
            posted: state.posted.len(),
            iterations: state.iterations,
        }
    }

    /// True while any operation, timer or posted closure is outstanding.
    pub fn has_work(&self) -> bool {
        let state = self.inner.borrow();
        !state.reactor.is_empty() || !state.timers.is_empty() || !state.posted.is_empty()
    }

    pub(crate) fn submit_read(
        &self,
        fd: RawFd,
        buffer: ByteBuffer<'static>,
        count: usize,
    ) -> Result<Future<ByteBuffer<'static>>> {
        let (promise, future) = pair();
        let transfer = Transfer::new(buffer, count, promise);
        let mut state = self.inner.borrow_mut();
        let interest = state.reactor.submit_read(fd, transfer)?;
        register(&mut state, fd, interest, Op::Read)?;
        Ok(future)
    }

    pub(crate) fn submit_write(
        &self,
        fd: RawFd,
        buffer: ByteBuffer<'static>,
        count: usize,
    ) -> Result<Future<ByteBuffer<'static>>> {
        let (promise, future) = pair();
        let transfer = Transfer::new(buffer, count, promise);
        let mut state = self.inner.borrow_mut();
        let interest = state.reactor.submit_write(fd, transfer)?;
        register(&mut state, fd, interest, Op::Write)?;
        Ok(future)
    }

    pub(crate) fn submit_connect(&self, fd: RawFd) -> Result<Future<()>> {
        let (promise, future) = pair();
        let mut state = self.inner.borrow_mut();
        let interest = state.reactor.submit_connect(fd, promise)?;
        register(&mut state, fd, interest, Op::Connect)?;
        Ok(future)
    }

    /// Deregister `fd` and fail its pending operations with
    /// [`Error::Cancelled`].
    pub(crate) fn cancel(&self, fd: RawFd) {
        let completions = {
            let Ok(mut state) = self.inner.try_borrow_mut() else {
                warn!(fd, "cancel requested while the loop state is borrowed");
                return;
            };
            let completions = state.reactor.cancel(fd);
            if let Err(e) = state.selector.remove_fd(fd) {
                warn!(fd, error = %e, "failed to deregister descriptor");
            }
            completions
        };
        for completion in completions {
            completion();
        }
    }

    /// Pending interest of `fd` as tracked by the loop.
    pub(crate) fn interest(&self, fd: RawFd) -> Interest {
        self.inner.borrow().reactor.interest(fd)
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop").field("stats", &self.stats()).finish()
    }
}

impl Drop for LoopState {
    fn drop(&mut self) {
        let completions = self.reactor.cancel_all();
        let timers = self.timers.drain_all();
        if !completions.is_empty() || !timers.is_empty() {
            debug!(
                operations = completions.len(),
                timers = timers.len(),
                "event loop dropped with pending work"
            );
        }
        for completion in completions {
            completion();
        }
        for promise in timers {
            let _ = promise.fail(Error::Cancelled);
        }
    }
}

fn register(state: &mut LoopState, fd: RawFd, interest: Interest, op: Op) -> Result<()> {
    if let Err(e) = state.selector.add_fd(fd, interest, fd as u64) {
        state.reactor.retract(fd, op);
        return Err(e);
    }
    Ok(())
}

fn update_registration(selector: &mut Selector, fd: RawFd, interest: Interest) {
    let result = if interest.is_empty() {
        selector.remove_fd(fd)
    } else if selector.interest(fd) != Some(interest) {
        selector.add_fd(fd, interest, fd as u64)
    } else {
        Ok(())
    };
    if let Err(e) = result {
        warn!(fd, error = %e, "failed to update registration");
    }
}

/// Milliseconds for `poll`, rounded up so a pending timer never spins.
fn to_timeout_ms(wait: Duration) -> i32 {
    let mut ms = wait.as_millis();
    if wait.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    ms.min(i32::MAX as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_event_loop_creation() {
        let event_loop = EventLoop::new().unwrap();
        let stats = event_loop.stats();
        assert_eq!(stats.registered_fds, 0);
        assert_eq!(stats.pending_timers, 0);
        assert!(!event_loop.has_work());
    }

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(to_timeout_ms(Duration::ZERO), 0);
        assert_eq!(to_timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(to_timeout_ms(Duration::from_millis(5)), 5);
        assert_eq!(to_timeout_ms(Duration::from_secs(u64::MAX)), i32::MAX);
    }

    #[test]
    fn test_post_runs_next_iteration() {
        let event_loop = EventLoop::new().unwrap();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let handle = event_loop.clone();
        event_loop.post(move || {
            counter.set(counter.get() + 1);
            let counter = Rc::clone(&counter);
            handle.post(move || counter.set(counter.get() + 1));
        });

        assert_eq!(event_loop.run_once(Some(Duration::ZERO)).unwrap(), 1);
        assert_eq!(hits.get(), 1);
        assert_eq!(event_loop.stats().posted, 1);
        event_loop.run().unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_timer_fires_and_cancel() {
        let event_loop = EventLoop::new().unwrap();
        let (_, fired) = event_loop.schedule(Duration::from_millis(5));
        let (id, mut cancelled) = event_loop.schedule(Duration::from_secs(60));
        assert!(event_loop.cancel_timer(id));
        assert!(!event_loop.cancel_timer(id));
        assert!(cancelled.take_result().unwrap().unwrap_err().is_cancelled());

        event_loop.run_until(&fired).unwrap();
        assert!(fired.is_settled());
    }

    #[test]
    fn test_run_until_without_work() {
        let event_loop = EventLoop::new().unwrap();
        let (_promise, future) = pair::<()>();
        assert!(matches!(
            event_loop.run_until(&future),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_stop_from_continuation() {
        let event_loop = EventLoop::new().unwrap();
        let (_, tick) = event_loop.schedule(Duration::from_millis(1));
        let (_, later) = event_loop.schedule(Duration::from_secs(30));
        let handle = event_loop.clone();
        tick.on_complete(move |_| handle.stop());

        event_loop.run().unwrap();
        assert!(event_loop.is_stopped());
        assert!(!later.is_settled());
        assert_eq!(event_loop.stats().pending_timers, 1);
    }

    #[test]
    fn test_dropping_loop_cancels_timers() {
        let event_loop = EventLoop::new().unwrap();
        let (_, mut future) = event_loop.schedule(Duration::from_secs(30));
        drop(event_loop);
        assert!(future.take_result().unwrap().unwrap_err().is_cancelled());
    }
}
