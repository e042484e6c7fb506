//! Readiness multiplexer over `poll(2)` and, on Linux, `epoll(7)`.
//!
//! Both backends are level-triggered: a handle that is still ready shows up
//! again on the next [`Selector::poll`]. Each poll is independent; events
//! not consumed from an [`Events`] sequence are simply dropped.

use super::handle::Selectable;
use crate::config::{SelectorBackend, SelectorConfig};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use tracing::{debug, trace};

/// Interest and readiness flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(pub u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(0b0001);
    pub const WRITABLE: Interest = Interest(0b0010);
    pub const ERROR: Interest = Interest(0b0100);
    pub const HUP: Interest = Interest(0b1000);

    pub fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn is_error(&self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    pub fn is_hup(&self) -> bool {
        self.0 & Self::HUP.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if every flag in `other` is set.
    pub fn contains(&self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Interest {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Interest(self.0 & rhs.0)
    }
}

impl std::ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A ready handle reported by [`Selector::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub readiness: Interest,
    /// Opaque value supplied at registration.
    pub tag: u64,
}

/// File-descriptor multiplexer.
pub struct Selector {
    backend: Backend,
}

enum Backend {
    Poll(PollBackend),
    #[cfg(target_os = "linux")]
    Epoll(linux::EpollBackend),
}

impl Selector {
    /// `poll(2)` selector. `max_events` only sizes the initial tables.
    pub fn create_poll(max_events: usize) -> Result<Self> {
        debug!(max_events, "creating poll selector");
        Ok(Self {
            backend: Backend::Poll(PollBackend::with_capacity(max_events)),
        })
    }

    /// Level-triggered `epoll(7)` selector returning at most `max_events`
    /// events per poll.
    #[cfg(target_os = "linux")]
    pub fn create_epoll(max_events: usize) -> Result<Self> {
        if max_events == 0 {
            return Err(Error::invalid_argument("max_events must be positive"));
        }
        debug!(max_events, "creating epoll selector");
        Ok(Self {
            backend: Backend::Epoll(linux::EpollBackend::new(max_events)?),
        })
    }

    pub fn from_config(config: &SelectorConfig) -> Result<Self> {
        match config.backend {
            SelectorBackend::Poll => Self::create_poll(config.max_events),
            #[cfg(target_os = "linux")]
            SelectorBackend::Epoll => Self::create_epoll(config.max_events),
            #[cfg(not(target_os = "linux"))]
            SelectorBackend::Epoll => Err(Error::invalid_argument(
                "epoll selector is only available on Linux",
            )),
        }
    }

    /// Register `handle`, or replace its interest if already registered.
    pub fn add<H: Selectable + ?Sized>(&mut self, handle: &H, interest: Interest) -> Result<()> {
        self.add_fd(handle.select_id(), interest, 0)
    }

    pub fn add_with_tag<H: Selectable + ?Sized>(
        &mut self,
        handle: &H,
        interest: Interest,
        tag: u64,
    ) -> Result<()> {
        self.add_fd(handle.select_id(), interest, tag)
    }

    pub fn add_fd(&mut self, fd: RawFd, interest: Interest, tag: u64) -> Result<()> {
        if fd < 0 {
            return Err(Error::invalid_argument(format!("invalid descriptor {}", fd)));
        }
        trace!(fd, interest = interest.0, tag, "selector add");
        match &mut self.backend {
            Backend::Poll(poll) => {
                poll.add(fd, interest, tag);
                Ok(())
            }
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => Ok(epoll.add(fd, interest, tag)?),
        }
    }

    /// Deregister `handle`. Unknown handles are ignored.
    pub fn remove<H: Selectable + ?Sized>(&mut self, handle: &H) -> Result<()> {
        self.remove_fd(handle.select_id())
    }

    pub fn remove_fd(&mut self, fd: RawFd) -> Result<()> {
        trace!(fd, "selector remove");
        match &mut self.backend {
            Backend::Poll(poll) => {
                poll.remove(fd);
                Ok(())
            }
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => Ok(epoll.remove(fd)?),
        }
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Poll(poll) => poll.fds.len(),
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => epoll.registry.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        match &self.backend {
            Backend::Poll(poll) => poll.index.contains_key(&fd),
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => epoll.registry.contains_key(&fd),
        }
    }

    /// Current interest of `fd`, if registered.
    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        match &self.backend {
            Backend::Poll(poll) => poll
                .index
                .get(&fd)
                .map(|&i| events_to_interest(poll.fds[i].events)),
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => epoll.registry.get(&fd).map(|r| r.interest),
        }
    }

    /// Wait up to `timeout_ms` milliseconds for readiness.
    ///
    /// `0` returns immediately and a negative value blocks indefinitely. A
    /// timeout or an interrupted wait yields an empty sequence.
    pub fn poll(&mut self, timeout_ms: i32) -> Result<Events<'_>> {
        let (source, count) = match &mut self.backend {
            Backend::Poll(poll) => {
                let count = poll.wait(timeout_ms)?;
                (
                    Source::Poll {
                        fds: &poll.fds,
                        tags: &poll.tags,
                    },
                    count,
                )
            }
            #[cfg(target_os = "linux")]
            Backend::Epoll(epoll) => {
                let count = epoll.wait(timeout_ms)?;
                (
                    Source::Epoll {
                        events: &epoll.events[..count],
                        registry: &epoll.registry,
                    },
                    count,
                )
            }
        };
        trace!(timeout_ms, ready = count, "selector poll");
        Ok(Events {
            source,
            cursor: 0,
            yielded: 0,
            total: count,
        })
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Poll(_) => "poll",
            #[cfg(target_os = "linux")]
            Backend::Epoll(_) => "epoll",
        };
        f.debug_struct("Selector")
            .field("backend", &backend)
            .field("registered", &self.len())
            .finish()
    }
}

/// Ready events from a single [`Selector::poll`] call, produced lazily.
pub struct Events<'a> {
    source: Source<'a>,
    cursor: usize,
    yielded: usize,
    total: usize,
}

enum Source<'a> {
    Poll {
        fds: &'a [libc::pollfd],
        tags: &'a [u64],
    },
    #[cfg(target_os = "linux")]
    Epoll {
        events: &'a [libc::epoll_event],
        registry: &'a HashMap<RawFd, linux::Registration>,
    },
}

impl<'a> Events<'a> {
    /// True when nothing was ready.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Advance, failing with [`Error::OutOfRange`] past the end.
    pub fn try_next(&mut self) -> Result<Event> {
        let (yielded, total) = (self.yielded, self.total);
        self.next()
            .ok_or_else(|| Error::out_of_range(yielded, 0, total))
    }
}

impl Iterator for Events<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if self.yielded == self.total {
            return None;
        }
        match &self.source {
            Source::Poll { fds, tags } => {
                while self.cursor < fds.len() {
                    let i = self.cursor;
                    self.cursor += 1;
                    if fds[i].revents != 0 {
                        self.yielded += 1;
                        return Some(Event {
                            fd: fds[i].fd,
                            readiness: events_to_interest(fds[i].revents),
                            tag: tags[i],
                        });
                    }
                }
                self.yielded = self.total;
                None
            }
            #[cfg(target_os = "linux")]
            Source::Epoll { events, registry } => {
                let raw = events[self.cursor];
                self.cursor += 1;
                self.yielded += 1;
                let fd = raw.u64 as RawFd;
                Some(Event {
                    fd,
                    readiness: linux::epoll_to_interest(raw.events),
                    tag: registry.get(&fd).map(|r| r.tag).unwrap_or_default(),
                })
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.yielded;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Events<'_> {}

// =============================================================================
// poll(2)
// =============================================================================

struct PollBackend {
    fds: Vec<libc::pollfd>,
    tags: Vec<u64>,
    index: HashMap<RawFd, usize>,
}

impl PollBackend {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            tags: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    fn add(&mut self, fd: RawFd, interest: Interest, tag: u64) {
        let events = interest_to_events(interest);
        if let Some(&i) = self.index.get(&fd) {
            self.fds[i].events = events;
            self.tags[i] = tag;
            return;
        }
        self.index.insert(fd, self.fds.len());
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.tags.push(tag);
    }

    fn remove(&mut self, fd: RawFd) {
        let Some(i) = self.index.remove(&fd) else {
            return;
        };
        self.fds.swap_remove(i);
        self.tags.swap_remove(i);
        if let Some(moved) = self.fds.get(i) {
            self.index.insert(moved.fd, i);
        }
    }

    fn wait(&mut self, timeout_ms: i32) -> Result<usize> {
        for pfd in &mut self.fds {
            pfd.revents = 0;
        }
        let count = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if count < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                for pfd in &mut self.fds {
                    pfd.revents = 0;
                }
                return Ok(0);
            }
            return Err(err.into());
        }
        Ok(count as usize)
    }
}

fn interest_to_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

fn events_to_interest(events: libc::c_short) -> Interest {
    let mut interest = Interest::NONE;
    if events & libc::POLLIN != 0 {
        interest |= Interest::READABLE;
    }
    if events & libc::POLLOUT != 0 {
        interest |= Interest::WRITABLE;
    }
    if events & (libc::POLLERR | libc::POLLNVAL) != 0 {
        interest |= Interest::ERROR;
    }
    if events & libc::POLLHUP != 0 {
        interest |= Interest::HUP;
    }
    interest
}

// =============================================================================
// Linux: epoll(7)
// =============================================================================

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    pub(super) struct Registration {
        pub(super) interest: Interest,
        pub(super) tag: u64,
    }

    pub(super) struct EpollBackend {
        epoll_fd: RawFd,
        pub(super) events: Vec<libc::epoll_event>,
        pub(super) registry: HashMap<RawFd, Registration>,
    }

    impl EpollBackend {
        pub(super) fn new(max_events: usize) -> io::Result<Self> {
            let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if epoll_fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                epoll_fd,
                events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events],
                registry: HashMap::new(),
            })
        }

        pub(super) fn add(&mut self, fd: RawFd, interest: Interest, tag: u64) -> io::Result<()> {
            let op = if self.registry.contains_key(&fd) {
                libc::EPOLL_CTL_MOD
            } else {
                libc::EPOLL_CTL_ADD
            };
            let mut event = libc::epoll_event {
                events: interest_to_epoll(interest),
                u64: fd as u64,
            };
            let result = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) };
            if result < 0 {
                return Err(io::Error::last_os_error());
            }
            self.registry.insert(fd, Registration { interest, tag });
            Ok(())
        }

        pub(super) fn remove(&mut self, fd: RawFd) -> io::Result<()> {
            if self.registry.remove(&fd).is_none() {
                return Ok(());
            }
            let result = unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
            };
            if result < 0 {
                let err = io::Error::last_os_error();
                // Closing a descriptor drops it from the interest list already.
                if err.raw_os_error() == Some(libc::EBADF) || err.raw_os_error() == Some(libc::ENOENT) {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }

        pub(super) fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
            let count = unsafe {
                libc::epoll_wait(
                    self.epoll_fd,
                    self.events.as_mut_ptr(),
                    self.events.len() as i32,
                    timeout_ms,
                )
            };
            if count < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }
            Ok(count as usize)
        }
    }

    impl Drop for EpollBackend {
        fn drop(&mut self) {
            unsafe { libc::close(self.epoll_fd) };
        }
    }

    fn interest_to_epoll(interest: Interest) -> u32 {
        let mut events = 0u32;
        if interest.is_readable() {
            events |= libc::EPOLLIN as u32;
        }
        if interest.is_writable() {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }

    pub(super) fn epoll_to_interest(events: u32) -> Interest {
        let mut interest = Interest::NONE;
        if events & libc::EPOLLIN as u32 != 0 {
            interest |= Interest::READABLE;
        }
        if events & libc::EPOLLOUT as u32 != 0 {
            interest |= Interest::WRITABLE;
        }
        if events & libc::EPOLLERR as u32 != 0 {
            interest |= Interest::ERROR;
        }
        if events & libc::EPOLLHUP as u32 != 0 {
            interest |= Interest::HUP;
        }
        interest
    }
}
