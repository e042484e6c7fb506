//! Pollable handle abstraction and raw descriptor helpers.

use socket2::SockRef;
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};

/// Anything the selector can watch.
///
/// Implemented for every [`AsRawFd`] type, including bare `RawFd`s.
pub trait Selectable {
    /// Identifier passed to the multiplexing syscall.
    fn select_id(&self) -> RawFd;
}

impl<T: AsRawFd + ?Sized> Selectable for T {
    fn select_id(&self) -> RawFd {
        self.as_raw_fd()
    }
}

/// Put `fd` into non-blocking mode.
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `read(2)` into `buf`, retrying on `EINTR`.
pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let result =
            unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if result >= 0 {
            return Ok(result as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// `write(2)` from `buf`, retrying on `EINTR`.
pub fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        let result = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if result >= 0 {
            return Ok(result as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Fetch and clear the pending socket error (`SO_ERROR`).
pub fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    // SAFETY: the borrow lasts only for this call, while the caller holds `fd` open.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    SockRef::from(&fd).take_error()
}
