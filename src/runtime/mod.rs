//! Runtime module
//!
//! Contains the async I/O runtime: selector, event loop, and the channels
//! it drives.

pub mod async_io;

pub use async_io::{
    AsyncPipe, AsyncSocket, Channel, Endpoint, Event, EventLoop, Interest, Pipe, Selectable,
    Selector,
};
