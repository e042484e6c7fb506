//! evio - bounds-checked memory views, byte buffers and a single-threaded
//! reactor for non-blocking pipe and socket I/O.
//!
//! # Features
//!
//! - **Memory views**: non-owning, bounds-checked windows over raw memory
//! - **Byte buffers**: position/limit/capacity cursors with endian-aware encoding
//! - **Selector**: level-triggered `poll(2)` multiplexer, `epoll(7)` on Linux
//! - **Future/Promise**: single-assignment completion cells with continuations
//! - **Event loop**: settles futures as descriptors become ready
//!
//! # Example
//!
//! ```rust
//! use evio::{ByteBuffer, EventLoop};
//! use evio::runtime::AsyncPipe;
//!
//! let event_loop = EventLoop::new().unwrap();
//! let pipe = AsyncPipe::new(&event_loop).unwrap();
//!
//! let mut out = ByteBuffer::with_capacity(8);
//! out.write_be(0xCAFE_F00Du32).unwrap();
//! out.flip();
//! pipe.writer().async_write_all(out).unwrap();
//!
//! let mut word = pipe
//!     .reader()
//!     .async_read(ByteBuffer::with_capacity(4), 4)
//!     .unwrap()
//!     .map(|mut buffer| {
//!         buffer.flip();
//!         buffer.read_be::<u32>()
//!     });
//!
//! event_loop.run_until(&word).unwrap();
//! assert_eq!(word.take_result().unwrap().unwrap().unwrap(), 0xCAFE_F00D);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Channel/Socket  │  async_read / async_write / async_connect
//! └────────┬────────┘
//!          │ ByteBuffer moved in, Future returned
//!          ▼
//! ┌─────────────────┐
//! │   EventLoop     │  poll → transfer → settle → continuations
//! └────────┬────────┘
//!          │
//!     ┌────┴────┐
//!     ▼         ▼
//! ┌────────┐ ┌─────────┐
//! │Selector│ │ Reactor │
//! └────────┘ └─────────┘
//! ```

#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod future;
pub mod memory;
pub mod runtime;

pub use buffer::ByteBuffer;
pub use config::{ConfigError, RuntimeConfig};
pub use error::{Error, Result};
pub use future::{pair, Future, Promise};
pub use memory::{wrap_memory, wrap_memory_mut, MemoryView, MutableMemoryView};
pub use runtime::async_io::{Channel, EventLoop, Interest, Selector};
