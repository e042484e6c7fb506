//! Non-owning, bounds-checked views into contiguous memory.
//!
//! A view remembers a base address and a length and nothing else: the memory
//! it points at is owned elsewhere and is never freed by the view. The
//! lifetime parameter ties the view to that owner, so a safely constructed
//! view can never outlive its backing storage.
//!
//! Every access goes through a bounds check and reports
//! [`Error::OutOfRange`] instead of touching memory outside `[0, len)`.

use crate::error::{check_index, check_range, Error, Result};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;

/// Types that may be reinterpreted from arbitrary initialized bytes.
///
/// # Safety
///
/// Implementors must be `Copy`, contain no padding, and be valid for every
/// bit pattern.
pub unsafe trait Pod: Copy + 'static {}

macro_rules! impl_pod {
    ($($t:ty),*) => { $(unsafe impl Pod for $t {})* };
}

impl_pod!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, isize, f32, f64);

unsafe impl<T: Pod, const N: usize> Pod for [T; N] {}

/// Immutable view into a fixed-length memory region.
#[derive(Clone, Copy)]
pub struct MemoryView<'a> {
    base: *const u8,
    len: usize,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> MemoryView<'a> {
    /// An empty view that points nowhere.
    pub const fn empty() -> Self {
        Self {
            base: ptr::null(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// View the given slice.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            base: bytes.as_ptr(),
            len: bytes.len(),
            _marker: PhantomData,
        }
    }

    /// Wrap a raw address.
    ///
    /// Fails with [`Error::InvalidArgument`] if `base` is null while `len` is
    /// non-zero. A null, zero-length view is valid and empty.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads of `len` bytes for the whole of `'a`,
    /// and must not be written through a `&mut` reference while the view is
    /// in use.
    pub unsafe fn from_raw(base: *const u8, len: usize) -> Result<Self> {
        if base.is_null() && len > 0 {
            return Err(Error::invalid_argument(
                "null address with non-zero size",
            ));
        }
        Ok(Self {
            base,
            len,
            _marker: PhantomData,
        })
    }

    /// Size of the view in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Alias of [`len`](Self::len).
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the view.
    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    /// The viewed bytes as a slice.
    pub fn as_slice(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: construction guarantees `base` is valid for `len` bytes for 'a.
        unsafe { std::slice::from_raw_parts(self.base, self.len) }
    }

    pub fn iter(&self) -> std::slice::Iter<'a, u8> {
        self.as_slice().iter()
    }

    /// Byte at `index`.
    pub fn at(&self, index: usize) -> Result<u8> {
        check_index(index, 0, self.len)?;
        Ok(self.as_slice()[index])
    }

    /// Address of the byte at `offset`.
    pub fn data_address(&self, offset: usize) -> Result<*const u8> {
        check_index(offset, 0, self.len)?;
        // SAFETY: offset < len, so the result stays inside the viewed region.
        Ok(unsafe { self.base.add(offset) })
    }

    /// Read a `T` stored at `offset`, which need not be aligned.
    pub fn data_as<T: Pod>(&self, offset: usize) -> Result<T> {
        check_typed(offset, mem::size_of::<T>(), self.len)?;
        // SAFETY: the range [offset, offset + size_of::<T>()) was checked and T is Pod.
        Ok(unsafe { ptr::read_unaligned(self.base.add(offset) as *const T) })
    }

    /// Sub-view over `[from, to)`. `from == to` yields an empty view.
    pub fn slice(&self, from: usize, to: usize) -> Result<MemoryView<'a>> {
        check_range(from, to, self.len)?;
        Ok(MemoryView::new(&self.as_slice()[from..to]))
    }

    /// Copy `dest.len()` bytes from the start of this view into `dest`.
    pub fn read(&self, dest: &mut MutableMemoryView<'_>) -> Result<()> {
        let count = dest.len();
        self.read_at(dest, count, 0)
    }

    /// Copy `count` bytes starting at `offset` into the start of `dest`.
    ///
    /// Nothing is copied unless both sides can hold `count` bytes.
    pub fn read_at(&self, dest: &mut MutableMemoryView<'_>, count: usize, offset: usize) -> Result<()> {
        check_range(offset, offset.saturating_add(count), self.len)?;
        if count > dest.len() {
            return Err(Error::out_of_range(count, 0, dest.len() + 1));
        }
        if count > 0 {
            // SAFETY: both ranges were bounds-checked above; `copy` tolerates overlap.
            unsafe { ptr::copy(self.base.add(offset), dest.as_mut_ptr(), count) };
        }
        Ok(())
    }

    /// Move the view out, leaving this one empty.
    pub fn take(&mut self) -> MemoryView<'a> {
        mem::take(self)
    }

    /// Compare content with another view.
    pub fn equals(&self, other: &MemoryView<'_>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

// SAFETY: a view behaves like `&[u8]`.
unsafe impl Send for MemoryView<'_> {}
unsafe impl Sync for MemoryView<'_> {}

impl Default for MemoryView<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for MemoryView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for MemoryView<'_> {}

impl AsRef<[u8]> for MemoryView<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<'a> From<&'a [u8]> for MemoryView<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for MemoryView<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self::new(bytes)
    }
}

impl<'a> From<&'a str> for MemoryView<'a> {
    fn from(s: &'a str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl<'a> IntoIterator for MemoryView<'a> {
    type Item = &'a u8;
    type IntoIter = std::slice::Iter<'a, u8>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl fmt::Debug for MemoryView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryView")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

/// Mutable view into a fixed-length memory region.
///
/// Move-only: at most one safely constructed mutable view of a region exists
/// at a time. Use [`view`](Self::view) for a read-only alias.
pub struct MutableMemoryView<'a> {
    base: *mut u8,
    len: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> MutableMemoryView<'a> {
    pub const fn empty() -> Self {
        Self {
            base: ptr::null_mut(),
            len: 0,
            _marker: PhantomData,
        }
    }

    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            base: bytes.as_mut_ptr(),
            len: bytes.len(),
            _marker: PhantomData,
        }
    }

    /// Wrap a raw, writable address.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for the whole
    /// of `'a`. Other views of the same memory may exist (see
    /// [`write`](Self::write)) but no Rust reference to it may be live while
    /// this view writes.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Result<Self> {
        if base.is_null() && len > 0 {
            return Err(Error::invalid_argument(
                "null address with non-zero size",
            ));
        }
        Ok(Self {
            base,
            len,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.base
    }

    /// Read-only view of the same memory, borrowed from this one.
    pub fn view(&self) -> MemoryView<'_> {
        MemoryView {
            base: self.base,
            len: self.len,
            _marker: PhantomData,
        }
    }

    /// Give up write access, keeping the full lifetime.
    pub fn into_view(self) -> MemoryView<'a> {
        MemoryView {
            base: self.base,
            len: self.len,
            _marker: PhantomData,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.view().as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        // SAFETY: construction guarantees `base` is valid for `len` writable bytes.
        unsafe { std::slice::from_raw_parts_mut(self.base, self.len) }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, u8> {
        self.as_slice().iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, u8> {
        self.as_mut_slice().iter_mut()
    }

    pub fn at(&self, index: usize) -> Result<u8> {
        self.view().at(index)
    }

    /// Store `value` at `index`.
    pub fn set(&mut self, index: usize, value: u8) -> Result<()> {
        check_index(index, 0, self.len)?;
        self.as_mut_slice()[index] = value;
        Ok(())
    }

    pub fn data_address(&self, offset: usize) -> Result<*const u8> {
        self.view().data_address(offset)
    }

    pub fn data_address_mut(&mut self, offset: usize) -> Result<*mut u8> {
        check_index(offset, 0, self.len)?;
        // SAFETY: offset < len.
        Ok(unsafe { self.base.add(offset) })
    }

    pub fn data_as<T: Pod>(&self, offset: usize) -> Result<T> {
        self.view().data_as(offset)
    }

    /// Sub-view over `[from, to)`.
    pub fn slice(&self, from: usize, to: usize) -> Result<MemoryView<'_>> {
        check_range(from, to, self.len)?;
        Ok(MemoryView::new(&self.as_slice()[from..to]))
    }

    /// Writable sub-view over `[from, to)`, borrowed from this view.
    pub fn slice_mut(&mut self, from: usize, to: usize) -> Result<MutableMemoryView<'_>> {
        check_range(from, to, self.len)?;
        Ok(MutableMemoryView::new(&mut self.as_mut_slice()[from..to]))
    }

    /// Copy the whole of `source` into this view at `offset`.
    ///
    /// The copy has `memmove` semantics, so a source aliasing this view
    /// (constructible only through `from_raw`) is copied correctly, and a
    /// source identical to this view leaves the memory unchanged.
    pub fn write(&mut self, source: &MemoryView<'_>, offset: usize) -> Result<()> {
        let count = source.len();
        check_range(offset, offset.saturating_add(count), self.len)?;
        if count > 0 {
            // SAFETY: destination range checked above, source valid for its own len.
            unsafe { ptr::copy(source.as_ptr(), self.base.add(offset), count) };
        }
        Ok(())
    }

    /// Copy `dest.len()` bytes from the start of this view into `dest`.
    pub fn read(&self, dest: &mut MutableMemoryView<'_>) -> Result<()> {
        self.view().read(dest)
    }

    pub fn read_at(&self, dest: &mut MutableMemoryView<'_>, count: usize, offset: usize) -> Result<()> {
        self.view().read_at(dest, count, offset)
    }

    /// Copy `[from, to)` to `dest` inside this view; the ranges may overlap.
    pub fn copy_within(&mut self, from: usize, to: usize, dest: usize) -> Result<()> {
        check_range(from, to, self.len)?;
        check_range(dest, dest.saturating_add(to - from), self.len)?;
        self.as_mut_slice().copy_within(from..to, dest);
        Ok(())
    }

    /// Set every byte to `value`.
    pub fn fill(&mut self, value: u8) -> &mut Self {
        self.as_mut_slice().fill(value);
        self
    }

    /// Set bytes in `[from, to)` to `value`. Nothing is written on error.
    pub fn fill_range(&mut self, value: u8, from: usize, to: usize) -> Result<&mut Self> {
        check_range(from, to, self.len)?;
        self.as_mut_slice()[from..to].fill(value);
        Ok(self)
    }

    /// Place `value` at `offset`, which need not be aligned.
    ///
    /// The bytes `[offset, offset + size_of::<T>())` must lie inside the
    /// view. The value is not dropped by the view; reclaim it with
    /// [`destruct`](Self::destruct) or it is leaked.
    pub fn construct<T>(&mut self, offset: usize, value: T) -> Result<()> {
        check_typed(offset, mem::size_of::<T>(), self.len)?;
        // SAFETY: range checked; unaligned write tolerates any offset.
        unsafe { ptr::write_unaligned(self.base.add(offset) as *mut T, value) };
        Ok(())
    }

    /// Move a previously constructed `T` out of `offset`.
    ///
    /// # Safety
    ///
    /// A `T` must have been placed at `offset` by [`construct`](Self::construct)
    /// and not destructed since.
    pub unsafe fn destruct<T>(&mut self, offset: usize) -> Result<T> {
        check_typed(offset, mem::size_of::<T>(), self.len)?;
        Ok(ptr::read_unaligned(self.base.add(offset) as *const T))
    }

    /// Store a `Pod` value at `offset`.
    pub fn put<T: Pod>(&mut self, offset: usize, value: T) -> Result<()> {
        self.construct(offset, value)
    }

    /// Lock the pages backing this view into RAM.
    ///
    /// Locking works on whole pages: neighbouring memory on the same pages is
    /// locked too.
    pub fn lock(&mut self) -> Result<&mut Self> {
        if self.len > 0 {
            // SAFETY: the region is valid for `len` bytes.
            let rc = unsafe { libc::mlock(self.base as *const libc::c_void, self.len) };
            if rc != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(self)
    }

    /// Allow the pages backing this view to be swapped out again.
    pub fn unlock(&mut self) -> Result<&mut Self> {
        if self.len > 0 {
            // SAFETY: the region is valid for `len` bytes.
            let rc = unsafe { libc::munlock(self.base as *const libc::c_void, self.len) };
            if rc != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(self)
    }

    /// Move the view out, leaving this one empty.
    pub fn take(&mut self) -> MutableMemoryView<'a> {
        mem::take(self)
    }

    /// Reborrow as a shorter-lived mutable view.
    pub fn reborrow(&mut self) -> MutableMemoryView<'_> {
        MutableMemoryView {
            base: self.base,
            len: self.len,
            _marker: PhantomData,
        }
    }
}

// SAFETY: a mutable view behaves like `&mut [u8]`.
unsafe impl Send for MutableMemoryView<'_> {}
unsafe impl Sync for MutableMemoryView<'_> {}

impl Default for MutableMemoryView<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for MutableMemoryView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl PartialEq<MemoryView<'_>> for MutableMemoryView<'_> {
    fn eq(&self, other: &MemoryView<'_>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl AsRef<[u8]> for MutableMemoryView<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for MutableMemoryView<'_> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl<'a> From<&'a mut [u8]> for MutableMemoryView<'a> {
    fn from(bytes: &'a mut [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for MutableMemoryView<'a> {
    fn from(bytes: &'a mut [u8; N]) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for MutableMemoryView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableMemoryView")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

/// Wrap a byte slice into a read-only view.
pub fn wrap_memory(bytes: &[u8]) -> MemoryView<'_> {
    MemoryView::new(bytes)
}

/// Wrap a mutable byte slice into a writable view.
pub fn wrap_memory_mut(bytes: &mut [u8]) -> MutableMemoryView<'_> {
    MutableMemoryView::new(bytes)
}

/// View the bytes of a slice of plain values.
pub fn wrap_pod<T: Pod>(values: &[T]) -> MemoryView<'_> {
    // SAFETY: a Pod slice is readable as `size_of_val` initialized bytes.
    let bytes = unsafe {
        std::slice::from_raw_parts(values.as_ptr() as *const u8, mem::size_of_val(values))
    };
    MemoryView::new(bytes)
}

fn check_typed(offset: usize, width: usize, len: usize) -> Result<()> {
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(()),
        _ => Err(Error::out_of_range(offset, 0, (len + 1).saturating_sub(width))),
    }
}
