//! Asynchronous byte channel over a pollable descriptor.

use super::event_loop::EventLoop;
use super::handle::set_nonblocking;
use super::selector::Interest;
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::future::Future;
use std::fmt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// A descriptor bound to an [`EventLoop`].
///
/// Buffers handed to [`async_read`](Self::async_read) and
/// [`async_write`](Self::async_write) belong to the pending operation until it
/// settles; on success the future yields the buffer back with its position
/// advanced by the transferred count. Dropping the channel cancels whatever is
/// still pending and closes the descriptor.
pub struct Channel {
    event_loop: EventLoop,
    fd: OwnedFd,
}

impl Channel {
    /// Take ownership of `fd` and switch it to non-blocking mode.
    pub fn new(event_loop: &EventLoop, fd: OwnedFd) -> Result<Self> {
        set_nonblocking(fd.as_raw_fd(), true)?;
        Ok(Self {
            event_loop: event_loop.clone(),
            fd,
        })
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// Read exactly `count` bytes into `buffer` at its position.
    ///
    /// Fails immediately with [`Error::InvalidArgument`] if the buffer cannot
    /// hold `count` bytes, or [`Error::InvalidState`] if a read is already
    /// pending. End of stream before `count` bytes fails the future with an
    /// `UnexpectedEof` I/O error.
    pub fn async_read(
        &self,
        buffer: ByteBuffer<'static>,
        count: usize,
    ) -> Result<Future<ByteBuffer<'static>>> {
        check_room(&buffer, count, "read")?;
        if count == 0 {
            return Ok(Future::ready(buffer));
        }
        self.event_loop.submit_read(self.fd.as_raw_fd(), buffer, count)
    }

    /// Read until the buffer's remaining space is full.
    pub fn async_read_full(&self, buffer: ByteBuffer<'static>) -> Result<Future<ByteBuffer<'static>>> {
        let count = buffer.remaining();
        self.async_read(buffer, count)
    }

    /// Write exactly `count` bytes from `buffer` at its position.
    pub fn async_write(
        &self,
        buffer: ByteBuffer<'static>,
        count: usize,
    ) -> Result<Future<ByteBuffer<'static>>> {
        check_room(&buffer, count, "write")?;
        if count == 0 {
            return Ok(Future::ready(buffer));
        }
        self.event_loop.submit_write(self.fd.as_raw_fd(), buffer, count)
    }

    /// Write everything between the buffer's position and limit.
    pub fn async_write_all(&self, buffer: ByteBuffer<'static>) -> Result<Future<ByteBuffer<'static>>> {
        let count = buffer.remaining();
        self.async_write(buffer, count)
    }

    /// Fail pending operations with [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.event_loop.cancel(self.fd.as_raw_fd());
    }

    /// Interest the loop is waiting on for this channel.
    pub fn pending_interest(&self) -> Interest {
        self.event_loop.interest(self.fd.as_raw_fd())
    }

    /// Cancel pending operations and close the descriptor.
    pub fn close(self) {
        drop(self);
    }
}

fn check_room(buffer: &ByteBuffer<'_>, count: usize, what: &str) -> Result<()> {
    if count > buffer.remaining() {
        return Err(Error::invalid_argument(format!(
            "{} of {} bytes exceeds the {} bytes remaining in the buffer",
            what,
            count,
            buffer.remaining()
        )));
    }
    Ok(())
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.event_loop.cancel(self.fd.as_raw_fd());
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Channel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("fd", &self.fd.as_raw_fd()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::async_io::pipe::Pipe;

    #[test]
    fn test_short_buffer_rejected_synchronously() {
        let event_loop = EventLoop::new().unwrap();
        let pipe = Pipe::new().unwrap();
        let (reader, _writer) = pipe.into_split();
        let channel = Channel::new(&event_loop, reader.into()).unwrap();

        let err = channel
            .async_read(ByteBuffer::with_capacity(4), 5)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(event_loop.stats().pending.reads, 0);
        assert!(channel.pending_interest().is_empty());
    }

    #[test]
    fn test_zero_count_resolves_immediately() {
        let event_loop = EventLoop::new().unwrap();
        let (reader, _writer) = Pipe::new().unwrap().into_split();
        let channel = Channel::new(&event_loop, reader.into()).unwrap();
        let mut future = channel.async_read(ByteBuffer::with_capacity(2), 0).unwrap();
        assert_eq!(future.take_result().unwrap().unwrap().position(), 0);
        assert!(!event_loop.has_work());
    }

    #[test]
    fn test_drop_cancels_pending() {
        let event_loop = EventLoop::new().unwrap();
        let (reader, _writer) = Pipe::new().unwrap().into_split();
        let channel = Channel::new(&event_loop, reader.into()).unwrap();
        let mut future = channel.async_read_full(ByteBuffer::with_capacity(8)).unwrap();
        assert_eq!(channel.pending_interest(), Interest::READABLE);
        assert_eq!(event_loop.stats().registered_fds, 1);

        channel.close();
        assert!(future.take_result().unwrap().unwrap_err().is_cancelled());
        assert_eq!(event_loop.stats().registered_fds, 0);
        assert!(!event_loop.has_work());
    }
}
