//! Endian-aware encoding of fixed-width numbers.
//!
//! Little-endian functions store the least-significant byte first,
//! big-endian functions the most-significant byte first, independent of the
//! host byte order.

use super::view::{MemoryView, MutableMemoryView};
use crate::error::{check_range, Result};

/// Fixed-width integer and floating-point types that can be encoded.
///
/// These are the raw codecs behind the checked [`get_le`]/[`put_le`] family
/// and the [`ByteBuffer`](crate::buffer::ByteBuffer) typed accessors.
///
/// # Panics
///
/// Every `encode_*` and `decode_*` method panics if the slice is shorter
/// than [`WIDTH`](Self::WIDTH) bytes.
pub trait Scalar: Copy + Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode into `out[..WIDTH]`, least-significant byte first.
    fn encode_le(self, out: &mut [u8]);

    /// Encode into `out[..WIDTH]`, most-significant byte first.
    fn encode_be(self, out: &mut [u8]);

    /// Encode into `out[..WIDTH]` in host order.
    fn encode_ne(self, out: &mut [u8]);

    fn decode_le(bytes: &[u8]) -> Self;

    fn decode_be(bytes: &[u8]) -> Self;

    fn decode_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn encode_le(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }

            fn encode_be(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_be_bytes());
            }

            fn encode_ne(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_ne_bytes());
            }

            fn decode_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$t>::from_le_bytes(raw)
            }

            fn decode_be(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$t>::from_be_bytes(raw)
            }

            fn decode_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$t>::from_ne_bytes(raw)
            }
        }
    )*};
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64);

/// Decode a little-endian `T` at `offset`.
pub fn get_le<T: Scalar>(view: &MemoryView<'_>, offset: usize) -> Result<T> {
    check_range(offset, offset.saturating_add(T::WIDTH), view.len())?;
    Ok(T::decode_le(&view.as_slice()[offset..]))
}

/// Decode a big-endian `T` at `offset`.
pub fn get_be<T: Scalar>(view: &MemoryView<'_>, offset: usize) -> Result<T> {
    check_range(offset, offset.saturating_add(T::WIDTH), view.len())?;
    Ok(T::decode_be(&view.as_slice()[offset..]))
}

/// Encode `value` little-endian at `offset`.
pub fn put_le<T: Scalar>(view: &mut MutableMemoryView<'_>, offset: usize, value: T) -> Result<()> {
    check_range(offset, offset.saturating_add(T::WIDTH), view.len())?;
    value.encode_le(&mut view.as_mut_slice()[offset..]);
    Ok(())
}

/// Encode `value` big-endian at `offset`.
pub fn put_be<T: Scalar>(view: &mut MutableMemoryView<'_>, offset: usize, value: T) -> Result<()> {
    check_range(offset, offset.saturating_add(T::WIDTH), view.len())?;
    value.encode_be(&mut view.as_mut_slice()[offset..]);
    Ok(())
}
