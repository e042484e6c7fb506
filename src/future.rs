//! Single-assignment completion cell.
//!
//! [`pair`] creates a connected [`Promise`]/[`Future`]. The promise settles
//! the cell exactly once with a value or an [`Error`]; the future side
//! attaches continuations. Everything is single-threaded: continuations run
//! synchronously inside whichever call settles the promise, which for I/O
//! is the event loop's dispatch phase.
//!
//! Two kinds of continuation exist:
//! - observers ([`Future::observe`]) borrow the result; any number may be
//!   attached and they fire in attachment order;
//! - one consuming continuation ([`Future::then`] and the combinators built
//!   on it) takes the result by value and always runs after the observers.
//!
//! If the future is already settled when a continuation is attached, it runs
//! before the attaching call returns.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Observer<T> = Box<dyn FnOnce(&Result<T>)>;
type Consumer<T> = Box<dyn FnOnce(Result<T>)>;

enum State<T> {
    Pending,
    /// The result is held by the settling call while observers run.
    Dispatching,
    Settled(Result<T>),
    /// The result was handed to the consuming continuation or taken.
    Consumed,
}

struct Shared<T> {
    state: State<T>,
    observers: Vec<Observer<T>>,
    consumer: Option<Consumer<T>>,
}

/// Create a connected promise/future pair.
pub fn pair<T>() -> (Promise<T>, Future<T>) {
    let shared = Rc::new(RefCell::new(Shared {
        state: State::Pending,
        observers: Vec::new(),
        consumer: None,
    }));
    (
        Promise {
            shared: Rc::clone(&shared),
        },
        Future { shared },
    )
}

/// Producer side of the cell.
///
/// Dropping a promise that never settled fails its future with
/// [`Error::Cancelled`].
pub struct Promise<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Promise<T> {
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    pub fn fail(&self, error: Error) -> Result<()> {
        self.settle(Err(error))
    }

    /// Perform the single allowed transition and run continuations.
    ///
    /// A second call returns [`Error::InvalidState`] and leaves the first
    /// result in place.
    pub fn settle(&self, result: Result<T>) -> Result<()> {
        {
            let mut shared = self.shared.borrow_mut();
            if !matches!(shared.state, State::Pending) {
                return Err(Error::InvalidState("promise already settled"));
            }
            shared.state = State::Dispatching;
        }
        dispatch(&self.shared, result);
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.shared.borrow().state, State::Pending)
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.is_settled() {
            let _ = self.settle(Err(Error::Cancelled));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Run observers (including ones added while running), then hand the result
/// to the consumer or park it in the cell.
fn dispatch<T>(shared: &Rc<RefCell<Shared<T>>>, result: Result<T>) {
    loop {
        let observers = std::mem::take(&mut shared.borrow_mut().observers);
        if observers.is_empty() {
            break;
        }
        for observer in observers {
            observer(&result);
        }
    }

    let consumer = {
        let mut cell = shared.borrow_mut();
        match cell.consumer.take() {
            Some(consumer) => {
                cell.state = State::Consumed;
                consumer
            }
            None => {
                cell.state = State::Settled(result);
                return;
            }
        }
    };
    consumer(result);
}

/// Consumer side of the cell.
pub struct Future<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T: 'static> Future<T> {
    /// An already-resolved future.
    pub fn ready(value: T) -> Self {
        let (promise, future) = pair();
        let _ = promise.resolve(value);
        future
    }

    /// An already-failed future.
    pub fn failed(error: Error) -> Self {
        let (promise, future) = pair();
        let _ = promise.fail(error);
        future
    }

    /// Attach a non-consuming continuation.
    pub fn observe<F>(&self, f: F)
    where
        F: FnOnce(&Result<T>) + 'static,
    {
        let result = {
            let mut shared = self.shared.borrow_mut();
            match std::mem::replace(&mut shared.state, State::Dispatching) {
                State::Settled(result) => result,
                State::Consumed => {
                    shared.state = State::Consumed;
                    return;
                }
                other => {
                    shared.state = other;
                    shared.observers.push(Box::new(f));
                    return;
                }
            }
        };
        f(&result);
        dispatch(&self.shared, result);
    }

    /// Consume the result once it is available.
    pub fn on_complete<F>(self, f: F)
    where
        F: FnOnce(Result<T>) + 'static,
    {
        let result = {
            let mut shared = self.shared.borrow_mut();
            match std::mem::replace(&mut shared.state, State::Consumed) {
                State::Settled(result) => result,
                State::Consumed => return,
                other => {
                    shared.state = other;
                    shared.consumer = Some(Box::new(f));
                    return;
                }
            }
        };
        f(result);
    }

    /// Derive a future from this one's result.
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        U: 'static,
        F: FnOnce(Result<T>) -> Result<U> + 'static,
    {
        let (promise, future) = pair();
        self.on_complete(move |result| {
            let _ = promise.settle(f(result));
        });
        future
    }

    /// Transform a successful value; failures pass through untouched.
    pub fn map<U, F>(self, f: F) -> Future<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |result| result.map(f))
    }

    pub fn map_err<F>(self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> Error + 'static,
    {
        self.then(move |result| result.map_err(f))
    }

    /// Chain an operation that itself completes asynchronously.
    pub fn flat_map<U, F>(self, f: F) -> Future<U>
    where
        U: 'static,
        F: FnOnce(T) -> Future<U> + 'static,
    {
        let (promise, future) = pair();
        self.on_complete(move |result| match result {
            Ok(value) => f(value).on_complete(move |inner| {
                let _ = promise.settle(inner);
            }),
            Err(error) => {
                let _ = promise.fail(error);
            }
        });
        future
    }
}

impl<T> Future<T> {
    pub fn is_settled(&self) -> bool {
        !matches!(self.shared.borrow().state, State::Pending)
    }

    /// Take the result out if it is available and unconsumed.
    ///
    /// Observers attached afterwards never run.
    pub fn take_result(&mut self) -> Option<Result<T>> {
        let mut shared = self.shared.borrow_mut();
        match std::mem::replace(&mut shared.state, State::Consumed) {
            State::Settled(result) => Some(result),
            other => {
                shared.state = other;
                None
            }
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.borrow().state {
            State::Pending => "pending",
            State::Dispatching => "dispatching",
            State::Settled(Ok(_)) => "resolved",
            State::Settled(Err(_)) => "failed",
            State::Consumed => "consumed",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}
