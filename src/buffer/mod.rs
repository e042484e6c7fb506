//! Stream-style byte buffer with position/limit/capacity cursors.
//!
//! A [`ByteBuffer`] is a single cursor type used in both directions: writes
//! fill `[position, limit)` and advance `position`; after [`flip`] the same
//! buffer is read back from `0` up to the old position.
//!
//! Invariant: `0 <= position <= limit <= capacity`. Every operation checks
//! it has enough room before touching memory, so a rejected request never
//! leaves a partial write behind.
//!
//! [`flip`]: ByteBuffer::flip

mod storage;

use crate::error::{Error, Result};
use crate::memory::{MemoryView, MutableMemoryView, Scalar};
use std::fmt;
use storage::Storage;

/// Byte buffer over owned or borrowed storage.
#[derive(Default)]
pub struct ByteBuffer<'a> {
    storage: Storage<'a>,
    position: usize,
    limit: usize,
}

impl ByteBuffer<'static> {
    /// Owned, zero-filled buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(vec![0u8; capacity])
    }

    /// Owned buffer taking over `bytes`; the whole content is writable.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let limit = bytes.len();
        Self {
            storage: Storage::Owned(bytes.into_boxed_slice()),
            position: 0,
            limit,
        }
    }

    /// Owned buffer holding a copy of `bytes`, positioned for reading.
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }
}

impl<'a> ByteBuffer<'a> {
    /// Buffer over memory owned by someone else.
    pub fn wrap(view: MutableMemoryView<'a>) -> Self {
        let limit = view.len();
        Self {
            storage: Storage::Borrowed(view),
            position: 0,
            limit,
        }
    }

    /// True if the buffer frees its storage when dropped.
    pub fn is_owned(&self) -> bool {
        self.storage.is_owned()
    }

    /// Fixed size of the storage.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Change the limit. The position is pulled back if it lies beyond it.
    pub fn set_limit(&mut self, new_limit: usize) -> Result<&mut Self> {
        if new_limit > self.capacity() {
            return Err(Error::out_of_range(new_limit, 0, self.capacity() + 1));
        }
        self.limit = new_limit;
        self.position = self.position.min(new_limit);
        Ok(self)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor to `new_position`, which may not exceed the limit.
    pub fn set_position(&mut self, new_position: usize) -> Result<&mut Self> {
        if new_position > self.limit {
            return Err(Error::out_of_range(new_position, 0, self.limit + 1));
        }
        self.position = new_position;
        Ok(self)
    }

    /// Return to a position previously saved from [`position`](Self::position).
    pub fn reset(&mut self, mark: usize) -> Result<&mut Self> {
        self.set_position(mark)
    }

    /// Move the cursor forward by `increment` bytes.
    pub fn advance(&mut self, increment: usize) -> Result<&mut Self> {
        self.ensure_remaining(increment)?;
        self.position += increment;
        Ok(self)
    }

    /// Bytes between the position and the limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// `limit = capacity`, `position = 0`.
    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity();
        self
    }

    /// `limit = position`, `position = 0`.
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self
    }

    /// `position = 0`, limit unchanged.
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self
    }

    /// `[position, limit)` without copying.
    pub fn view_remaining(&self) -> MemoryView<'_> {
        MemoryView::new(&self.storage.as_slice()[self.position..self.limit])
    }

    pub fn view_remaining_mut(&mut self) -> MutableMemoryView<'_> {
        let (from, to) = (self.position, self.limit);
        MutableMemoryView::new(&mut self.storage.as_mut_slice()[from..to])
    }

    /// `[0, position)` without copying.
    pub fn view_written(&self) -> MemoryView<'_> {
        MemoryView::new(&self.storage.as_slice()[..self.position])
    }

    pub fn view_written_mut(&mut self) -> MutableMemoryView<'_> {
        let to = self.position;
        MutableMemoryView::new(&mut self.storage.as_mut_slice()[..to])
    }

    /// The whole storage regardless of cursors.
    pub fn view(&self) -> MemoryView<'_> {
        self.storage.view()
    }

    pub fn view_mut(&mut self) -> MutableMemoryView<'_> {
        self.storage.view_mut()
    }

    /// Copy `data` in at the position and advance past it.
    pub fn write(&mut self, data: &[u8]) -> Result<&mut Self> {
        self.ensure_remaining(data.len())?;
        let at = self.position;
        self.storage.as_mut_slice()[at..at + data.len()].copy_from_slice(data);
        self.position += data.len();
        Ok(self)
    }

    pub fn write_view(&mut self, data: &MemoryView<'_>) -> Result<&mut Self> {
        self.write(data.as_slice())
    }

    /// Copy the first `count` bytes of `data`.
    pub fn write_from(&mut self, data: &MemoryView<'_>, count: usize) -> Result<&mut Self> {
        if count > data.len() {
            return Err(Error::invalid_argument(format!(
                "requested {} bytes from a {} byte source",
                count,
                data.len()
            )));
        }
        self.write(&data.as_slice()[..count])
    }

    /// Write `value` in host byte order.
    pub fn put<T: Scalar>(&mut self, value: T) -> Result<&mut Self> {
        self.encode(value, T::encode_ne)
    }

    /// Write `value` least-significant byte first.
    pub fn write_le<T: Scalar>(&mut self, value: T) -> Result<&mut Self> {
        self.encode(value, T::encode_le)
    }

    /// Write `value` most-significant byte first.
    pub fn write_be<T: Scalar>(&mut self, value: T) -> Result<&mut Self> {
        self.encode(value, T::encode_be)
    }

    /// Fill `dest` from the position and advance past the copied bytes.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<&mut Self> {
        self.ensure_remaining(dest.len())?;
        let at = self.position;
        dest.copy_from_slice(&self.storage.as_slice()[at..at + dest.len()]);
        self.position += dest.len();
        Ok(self)
    }

    /// Copy `count` bytes into the start of `dest`.
    pub fn read_into(&mut self, dest: &mut MutableMemoryView<'_>, count: usize) -> Result<&mut Self> {
        if count > dest.len() {
            return Err(Error::invalid_argument(format!(
                "requested {} bytes into a {} byte destination",
                count,
                dest.len()
            )));
        }
        self.read(&mut dest.as_mut_slice()[..count])
    }

    /// Read a value in host byte order.
    pub fn get<T: Scalar>(&mut self) -> Result<T> {
        self.decode(T::decode_ne)
    }

    pub fn read_le<T: Scalar>(&mut self) -> Result<T> {
        self.decode(T::decode_le)
    }

    pub fn read_be<T: Scalar>(&mut self) -> Result<T> {
        self.decode(T::decode_be)
    }

    /// Move the buffer out, leaving an empty owned buffer behind.
    pub fn take(&mut self) -> ByteBuffer<'a> {
        std::mem::take(self)
    }

    fn encode<T: Scalar>(&mut self, value: T, f: fn(T, &mut [u8])) -> Result<&mut Self> {
        self.ensure_remaining(T::WIDTH)?;
        let at = self.position;
        f(value, &mut self.storage.as_mut_slice()[at..at + T::WIDTH]);
        self.position += T::WIDTH;
        Ok(self)
    }

    fn decode<T: Scalar>(&mut self, f: fn(&[u8]) -> T) -> Result<T> {
        self.ensure_remaining(T::WIDTH)?;
        let at = self.position;
        let value = f(&self.storage.as_slice()[at..at + T::WIDTH]);
        self.position += T::WIDTH;
        Ok(value)
    }

    fn ensure_remaining(&self, count: usize) -> Result<()> {
        if count > self.remaining() {
            return Err(Error::out_of_range(count, 0, self.remaining() + 1));
        }
        Ok(())
    }
}

impl<'a> From<MutableMemoryView<'a>> for ByteBuffer<'a> {
    fn from(view: MutableMemoryView<'a>) -> Self {
        Self::wrap(view)
    }
}

impl<'a> From<&'a mut [u8]> for ByteBuffer<'a> {
    fn from(bytes: &'a mut [u8]) -> Self {
        Self::wrap(MutableMemoryView::new(bytes))
    }
}

impl From<Vec<u8>> for ByteBuffer<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl fmt::Debug for ByteBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("owned", &self.is_owned())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::wrap_memory_mut;

    #[test]
    fn test_cursor_lifecycle() {
        let mut buffer = ByteBuffer::with_capacity(16);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.limit(), 16);
        assert_eq!(buffer.position(), 0);

        buffer.write(b"abcd").unwrap();
        assert_eq!(buffer.position(), 4);
        assert_eq!(buffer.remaining(), 12);

        buffer.flip();
        assert_eq!(buffer.limit(), 4);
        assert_eq!(buffer.position(), 0);

        let mut out = [0u8; 4];
        buffer.read(&mut out).unwrap();
        assert_eq!(&out, b"abcd");
        assert!(!buffer.has_remaining());

        buffer.rewind();
        assert_eq!(buffer.position(), 0);
        assert_eq!(buffer.limit(), 4);

        buffer.clear();
        buffer.clear();
        assert_eq!(buffer.position(), 0);
        assert_eq!(buffer.limit(), 16);

        buffer.flip();
        buffer.flip();
        assert_eq!(buffer.limit(), 0);
    }

    #[test]
    fn test_overflow_leaves_buffer_untouched() {
        let mut buffer = ByteBuffer::with_capacity(4);
        buffer.write(&[1, 2]).unwrap();
        assert!(matches!(buffer.write(&[3, 4, 5]), Err(Error::OutOfRange { .. })));
        assert_eq!(buffer.position(), 2);
        assert_eq!(buffer.view().as_slice(), &[1, 2, 0, 0]);

        assert!(buffer.write_le(0xAABB_CCDDu32).is_err());
        assert_eq!(buffer.position(), 2);
    }

    #[test]
    fn test_position_and_advance() {
        let mut buffer = ByteBuffer::with_capacity(8);
        buffer.set_limit(6).unwrap();
        assert!(buffer.set_position(7).is_err());
        buffer.set_position(6).unwrap();
        assert!(buffer.advance(1).is_err());
        buffer.reset(2).unwrap();
        buffer.advance(4).unwrap();
        assert_eq!(buffer.position(), 6);

        assert!(buffer.set_limit(9).is_err());
        buffer.set_limit(3).unwrap();
        assert_eq!(buffer.position(), 3);
    }

    #[test]
    fn test_endian_writes() {
        let mut buffer = ByteBuffer::with_capacity(8);
        buffer.write_le(0x0102_0304u32).unwrap();
        buffer.write_be(0x0102_0304u32).unwrap();
        assert_eq!(buffer.view_written().as_slice(), &[4, 3, 2, 1, 1, 2, 3, 4]);

        buffer.flip();
        assert_eq!(buffer.read_le::<u32>().unwrap(), 0x0102_0304);
        assert_eq!(buffer.read_be::<u32>().unwrap(), 0x0102_0304);
        assert!(buffer.read_le::<u8>().is_err());
    }

    #[test]
    fn test_native_round_trip() {
        let mut buffer = ByteBuffer::with_capacity(64);
        buffer
            .put(7u8)
            .and_then(|b| b.put(-3i16))
            .and_then(|b| b.put(0xDEAD_BEEFu32))
            .and_then(|b| b.put(-1i64))
            .and_then(|b| b.put(2.5f32))
            .and_then(|b| b.put(-0.125f64))
            .unwrap();
        buffer.flip();
        assert_eq!(buffer.get::<u8>().unwrap(), 7);
        assert_eq!(buffer.get::<i16>().unwrap(), -3);
        assert_eq!(buffer.get::<u32>().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buffer.get::<i64>().unwrap(), -1);
        assert_eq!(buffer.get::<f32>().unwrap(), 2.5);
        assert_eq!(buffer.get::<f64>().unwrap(), -0.125);
    }

    #[test]
    fn test_128_bit_round_trip() {
        let mut buffer = ByteBuffer::with_capacity(32);
        buffer.write_be(u128::MAX - 1).unwrap();
        buffer.write_le(i128::MIN).unwrap();
        assert_eq!(buffer.view_written().as_slice()[15], 0xFE);

        buffer.flip();
        assert_eq!(buffer.read_be::<u128>().unwrap(), u128::MAX - 1);
        assert_eq!(buffer.read_le::<i128>().unwrap(), i128::MIN);
        assert!(!buffer.has_remaining());
    }

    #[test]
    fn test_views() {
        let mut buffer = ByteBuffer::from_vec(vec![0u8; 10]);
        buffer.write(&[9, 8, 7]).unwrap();
        assert_eq!(buffer.view_written().as_slice(), &[9, 8, 7]);
        assert_eq!(buffer.view_remaining().len(), 7);

        buffer.view_remaining_mut().fill(5);
        assert_eq!(buffer.view().as_slice(), &[9, 8, 7, 5, 5, 5, 5, 5, 5, 5]);
        buffer.view_written_mut().fill(1);
        assert_eq!(&buffer.view().as_slice()[..3], &[1, 1, 1]);
    }

    #[test]
    fn test_borrowed_storage_survives_moves() {
        let mut backing = [0u8; 6];
        {
            let buffer = ByteBuffer::wrap(wrap_memory_mut(&mut backing));
            assert!(!buffer.is_owned());
            let mut moved = buffer;
            assert!(!moved.is_owned());
            moved.write(b"xyz").unwrap();

            let mut taken = moved.take();
            assert!(!taken.is_owned());
            assert!(moved.is_owned());
            assert_eq!(moved.capacity(), 0);
            taken.write(b"!").unwrap();
        }
        assert_eq!(&backing, b"xyz!\0\0");

        let owned = ByteBuffer::with_capacity(2);
        let moved = owned;
        assert!(moved.is_owned());
    }

    #[test]
    fn test_write_from_and_read_into() {
        let source = [1u8, 2, 3, 4];
        let mut buffer = ByteBuffer::with_capacity(8);
        assert!(matches!(
            buffer.write_from(&MemoryView::new(&source), 5),
            Err(Error::InvalidArgument(_))
        ));
        buffer.write_from(&MemoryView::new(&source), 3).unwrap();
        buffer.flip();

        let mut out = [0u8; 2];
        let mut dest = wrap_memory_mut(&mut out);
        assert!(buffer.read_into(&mut dest, 3).is_err());
        buffer.read_into(&mut dest, 2).unwrap();
        assert_eq!(out, [1, 2]);
    }
}
