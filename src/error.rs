//! Error taxonomy shared by every evio component.
//!
//! Bounds and argument violations are reported synchronously by the call that
//! detected them. I/O failures of asynchronous operations never surface here
//! directly: they settle the operation's [`Future`](crate::future::Future).

use std::io;
use thiserror::Error;

/// Errors produced by views, buffers, selectors, futures and the event loop.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed construction parameters or a request that can never succeed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An index, offset or range fell outside of `[min, max)`
    #[error("Index {index} is out of range [{min}, {max})")]
    OutOfRange { index: usize, min: usize, max: usize },

    /// The object is not in a state that permits the operation
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Transfer error reported by the underlying transport
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The operation was deregistered before it completed
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn out_of_range(index: usize, min: usize, max: usize) -> Self {
        Error::OutOfRange { index, min, max }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// True for [`Error::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The `io::ErrorKind` of an [`Error::Io`], if any.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Check that `index` lies in `[min, max)`.
pub(crate) fn check_index(index: usize, min: usize, max: usize) -> Result<()> {
    if index < min || index >= max {
        return Err(Error::out_of_range(index, min, max));
    }
    Ok(())
}

/// Check that `[from, to)` is a valid sub-range of `[0, size)`.
pub(crate) fn check_range(from: usize, to: usize, size: usize) -> Result<()> {
    if from > size {
        return Err(Error::out_of_range(from, 0, size + 1));
    }
    if to > size {
        return Err(Error::out_of_range(to, 0, size + 1));
    }
    if from > to {
        return Err(Error::out_of_range(from, 0, to + 1));
    }
    Ok(())
}
