//! Anonymous pipes, synchronous and loop-driven.

use super::channel::Channel;
use super::event_loop::EventLoop;
use super::handle::{read_fd, set_nonblocking, write_fd};
use crate::error::Result;
use crate::memory::{MemoryView, MutableMemoryView};
use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// One end of a pipe.
#[derive(Debug)]
pub struct PipeEnd {
    fd: OwnedFd,
}

impl PipeEnd {
    /// Read up to `dest.len()` bytes, returning the count (0 at end of stream).
    pub fn read(&self, dest: &mut MutableMemoryView<'_>) -> Result<usize> {
        Ok(read_fd(self.fd.as_raw_fd(), dest.as_mut_slice())?)
    }

    /// Write up to `src.len()` bytes, returning the count.
    pub fn write(&self, src: &MemoryView<'_>) -> Result<usize> {
        Ok(write_fd(self.fd.as_raw_fd(), src.as_slice())?)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        Ok(set_nonblocking(self.fd.as_raw_fd(), nonblocking)?)
    }
}

impl AsRawFd for PipeEnd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for PipeEnd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl From<PipeEnd> for OwnedFd {
    fn from(end: PipeEnd) -> Self {
        end.fd
    }
}

/// A `pipe(2)` pair with close-on-exec set on both ends.
#[derive(Debug)]
pub struct Pipe {
    reader: PipeEnd,
    writer: PipeEnd,
}

impl Pipe {
    pub fn new() -> Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // Both descriptors are fresh and owned by nobody else.
        let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [&reader, &writer] {
            if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(Self {
            reader: PipeEnd { fd: reader },
            writer: PipeEnd { fd: writer },
        })
    }

    pub fn reader(&self) -> &PipeEnd {
        &self.reader
    }

    pub fn writer(&self) -> &PipeEnd {
        &self.writer
    }

    /// Read from the read end.
    pub fn read(&self, dest: &mut MutableMemoryView<'_>) -> Result<usize> {
        self.reader.read(dest)
    }

    /// Write into the write end.
    pub fn write(&self, src: &MemoryView<'_>) -> Result<usize> {
        self.writer.write(src)
    }

    /// Read end and write end.
    pub fn into_split(self) -> (PipeEnd, PipeEnd) {
        (self.reader, self.writer)
    }
}

/// A pipe whose ends are [`Channel`]s on the same loop.
#[derive(Debug)]
pub struct AsyncPipe {
    reader: Channel,
    writer: Channel,
}

impl AsyncPipe {
    pub fn new(event_loop: &EventLoop) -> Result<Self> {
        let (reader, writer) = Pipe::new()?.into_split();
        Ok(Self {
            reader: Channel::new(event_loop, reader.into())?,
            writer: Channel::new(event_loop, writer.into())?,
        })
    }

    pub fn reader(&self) -> &Channel {
        &self.reader
    }

    pub fn writer(&self) -> &Channel {
        &self.writer
    }

    pub fn into_split(self) -> (Channel, Channel) {
        (self.reader, self.writer)
    }
}
