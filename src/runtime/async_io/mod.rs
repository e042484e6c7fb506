//! Async I/O runtime
//!
//! Single-threaded readiness-based I/O:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    ASYNC I/O RUNTIME                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Selector: poll(2) / epoll(7) readiness multiplexer             │
//! │  Reactor: pending read/write/connect records per descriptor     │
//! │  TimerWheel: deadlines feeding the poll timeout                 │
//! │  EventLoop: poll, transfer, settle futures, run continuations   │
//! │  Channel / AsyncPipe / AsyncSocket: future-returning I/O        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use evio::buffer::ByteBuffer;
//! use evio::runtime::async_io::{AsyncPipe, EventLoop};
//!
//! let event_loop = EventLoop::new()?;
//! let pipe = AsyncPipe::new(&event_loop)?;
//!
//! let sent = pipe.writer().async_write_all(ByteBuffer::copy_from(b"ping"))?;
//! let mut received = pipe.reader().async_read_full(ByteBuffer::with_capacity(4))?;
//!
//! event_loop.run_until(&received)?;
//! let mut buffer = received.take_result().expect("settled")?;
//! buffer.flip();
//! assert_eq!(buffer.view_remaining().as_slice(), b"ping");
//! assert!(sent.is_settled());
//! # Ok::<(), evio::Error>(())
//! ```

mod channel;
mod event_loop;
mod handle;
mod pipe;
mod reactor;
mod selector;
mod socket;
mod timer;

pub use channel::Channel;
pub use event_loop::{EventLoop, LoopStats};
pub use handle::{read_fd, set_nonblocking, take_socket_error, write_fd, Selectable};
pub use pipe::{AsyncPipe, Pipe, PipeEnd};
pub use reactor::PendingOps;
pub use selector::{Event, Events, Interest, Selector};
pub use socket::{AsyncSocket, Endpoint, SocketState};
pub use timer::{TimerId, TimerWheel};
