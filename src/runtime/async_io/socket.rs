//! Async stream sockets
//!
//! Provides non-blocking unix and TCP stream sockets layered on [`Channel`].

use super::channel::Channel;
use super::event_loop::EventLoop;
use super::handle::take_socket_error;
use super::selector::{Interest, Selector};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::future::Future;
use socket2::{Domain, SockAddr, SockRef, Socket, Type};
use std::cell::Cell;
use std::fmt;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Socket is idle
    Idle,
    /// Connect in progress
    Connecting,
    /// Socket is connected
    Connected,
    /// Last connect attempt failed
    Error,
    /// Both directions shut down
    Shutdown,
}

/// Address a stream socket connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Inet(SocketAddr),
}

impl Endpoint {
    fn to_sock_addr(&self) -> Result<SockAddr> {
        match self {
            Endpoint::Unix(path) => SockAddr::unix(path)
                .map_err(|e| Error::invalid_argument(format!("{}: {}", path.display(), e))),
            Endpoint::Inet(addr) => Ok(SockAddr::from(*addr)),
        }
    }

    fn from_sock_addr(addr: &SockAddr) -> Self {
        match addr.as_socket() {
            Some(inet) => Endpoint::Inet(inet),
            None => Endpoint::Unix(
                addr.as_pathname()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
            ),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Inet(addr)
    }
}

impl From<PathBuf> for Endpoint {
    fn from(path: PathBuf) -> Self {
        Endpoint::Unix(path)
    }
}

impl From<&Path> for Endpoint {
    fn from(path: &Path) -> Self {
        Endpoint::Unix(path.to_path_buf())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Inet(addr) => write!(f, "{}", addr),
        }
    }
}

/// Async socket wrapper
pub struct AsyncSocket {
    channel: Channel,
    state: Rc<Cell<SocketState>>,
}

impl AsyncSocket {
    /// Unix domain stream socket.
    pub fn unix(event_loop: &EventLoop) -> Result<Self> {
        Self::create(event_loop, Domain::UNIX)
    }

    /// IPv4 TCP socket.
    pub fn tcp_v4(event_loop: &EventLoop) -> Result<Self> {
        Self::create(event_loop, Domain::IPV4)
    }

    /// IPv6 TCP socket.
    pub fn tcp_v6(event_loop: &EventLoop) -> Result<Self> {
        Self::create(event_loop, Domain::IPV6)
    }

    /// A connected pair of unix stream sockets.
    pub fn pair(event_loop: &EventLoop) -> Result<(Self, Self)> {
        let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None)?;
        Ok((
            Self::wrap(event_loop, a.into(), SocketState::Connected)?,
            Self::wrap(event_loop, b.into(), SocketState::Connected)?,
        ))
    }

    /// Adopt an existing stream socket descriptor.
    pub fn from_fd(event_loop: &EventLoop, fd: OwnedFd) -> Result<Self> {
        let state = match SockRef::from(&fd).peer_addr() {
            Ok(_) => SocketState::Connected,
            Err(_) => SocketState::Idle,
        };
        Self::wrap(event_loop, fd, state)
    }

    fn create(event_loop: &EventLoop, domain: Domain) -> Result<Self> {
        let socket = Socket::new(domain, Type::STREAM, None)?;
        Self::wrap(event_loop, socket.into(), SocketState::Idle)
    }

    fn wrap(event_loop: &EventLoop, fd: OwnedFd, state: SocketState) -> Result<Self> {
        Ok(Self {
            channel: Channel::new(event_loop, fd)?,
            state: Rc::new(Cell::new(state)),
        })
    }

    pub fn state(&self) -> SocketState {
        self.state.get()
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn into_channel(self) -> Channel {
        self.channel
    }

    /// Connect, blocking the calling thread until the attempt finishes.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        if self.start_connect(endpoint)? {
            return Ok(());
        }

        let mut selector = Selector::create_poll(1)?;
        selector.add(&self.channel, Interest::WRITABLE)?;
        while selector.poll(-1)?.next().is_none() {}

        match take_socket_error(self.as_raw_fd()) {
            Ok(None) => {
                self.state.set(SocketState::Connected);
                debug!(fd = self.as_raw_fd(), %endpoint, "connected");
                Ok(())
            }
            Ok(Some(e)) | Err(e) => {
                self.state.set(SocketState::Error);
                Err(e.into())
            }
        }
    }

    /// Start connecting; the future settles once the attempt finishes.
    ///
    /// A malformed endpoint, or a socket already connecting or connected,
    /// fails synchronously. Refusals and other transport errors fail the
    /// future.
    pub fn async_connect(&self, endpoint: &Endpoint) -> Result<Future<()>> {
        match self.start_connect(endpoint) {
            Ok(true) => return Ok(Future::ready(())),
            Ok(false) => {}
            Err(Error::Io(e)) => return Ok(Future::failed(Error::Io(e))),
            Err(e) => return Err(e),
        }

        let future = self.channel.event_loop().submit_connect(self.as_raw_fd())?;
        let state = Rc::clone(&self.state);
        future.observe(move |result| {
            state.set(if result.is_ok() {
                SocketState::Connected
            } else {
                SocketState::Error
            });
        });
        Ok(future)
    }

    /// Issue `connect(2)`. `Ok(true)` if it completed immediately,
    /// `Ok(false)` if it is in progress.
    ///
    /// A socket that is connecting or connected is left untouched and the
    /// call fails with [`Error::InvalidState`].
    fn start_connect(&self, endpoint: &Endpoint) -> Result<bool> {
        match self.state() {
            SocketState::Connecting => {
                return Err(Error::InvalidState("connect already pending on socket"))
            }
            SocketState::Connected => return Err(Error::InvalidState("socket already connected")),
            _ => {}
        }
        let addr = endpoint.to_sock_addr()?;
        match SockRef::from(&self.channel).connect(&addr) {
            Ok(()) => {
                self.state.set(SocketState::Connected);
                debug!(fd = self.as_raw_fd(), %endpoint, "connected");
                Ok(true)
            }
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                self.state.set(SocketState::Connecting);
                debug!(fd = self.as_raw_fd(), %endpoint, "connect in progress");
                Ok(false)
            }
            Err(e) => {
                self.state.set(SocketState::Error);
                debug!(fd = self.as_raw_fd(), %endpoint, error = %e, "connect failed");
                Err(e.into())
            }
        }
    }

    pub fn async_read(
        &self,
        buffer: ByteBuffer<'static>,
        count: usize,
    ) -> Result<Future<ByteBuffer<'static>>> {
        self.channel.async_read(buffer, count)
    }

    pub fn async_read_full(&self, buffer: ByteBuffer<'static>) -> Result<Future<ByteBuffer<'static>>> {
        self.channel.async_read_full(buffer)
    }

    pub fn async_write(
        &self,
        buffer: ByteBuffer<'static>,
        count: usize,
    ) -> Result<Future<ByteBuffer<'static>>> {
        self.channel.async_write(buffer, count)
    }

    pub fn async_write_all(&self, buffer: ByteBuffer<'static>) -> Result<Future<ByteBuffer<'static>>> {
        self.channel.async_write_all(buffer)
    }

    pub fn cancel(&self) {
        self.channel.cancel();
    }

    /// Shutdown the socket
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        SockRef::from(&self.channel).shutdown(how)?;
        if how == Shutdown::Both {
            self.state.set(SocketState::Shutdown);
        }
        Ok(())
    }

    pub fn local_addr(&self) -> Result<Endpoint> {
        let addr = SockRef::from(&self.channel).local_addr()?;
        Ok(Endpoint::from_sock_addr(&addr))
    }

    pub fn peer_addr(&self) -> Result<Endpoint> {
        let addr = SockRef::from(&self.channel).peer_addr()?;
        Ok(Endpoint::from_sock_addr(&addr))
    }

    /// Enable TCP_NODELAY
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Ok(SockRef::from(&self.channel).set_nodelay(nodelay)?)
    }
}

impl AsRawFd for AsyncSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.channel.as_raw_fd()
    }
}

impl AsFd for AsyncSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.channel.as_fd()
    }
}

impl fmt::Debug for AsyncSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSocket")
            .field("fd", &self.as_raw_fd())
            .field("state", &self.state())
            .finish()
    }
}
