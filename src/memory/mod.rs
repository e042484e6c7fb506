//! Raw memory access
//!
//! - [`MemoryView`] / [`MutableMemoryView`]: non-owning bounds-checked views
//! - [`endian`]: host-independent encoding of fixed-width numbers

pub mod endian;
mod view;

pub use endian::Scalar;
pub use view::{wrap_memory, wrap_memory_mut, wrap_pod, MemoryView, MutableMemoryView, Pod};
