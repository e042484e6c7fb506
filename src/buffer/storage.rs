//! Backing storage of a [`ByteBuffer`](super::ByteBuffer).

use crate::memory::{MemoryView, MutableMemoryView};

/// Memory a buffer reads from and writes into.
///
/// `Owned` storage is freed with the buffer; `Borrowed` storage belongs to
/// whoever created the view and outlives the buffer.
pub(crate) enum Storage<'a> {
    Owned(Box<[u8]>),
    Borrowed(MutableMemoryView<'a>),
}

impl<'a> Storage<'a> {
    pub(crate) fn len(&self) -> usize {
        match self {
            Storage::Owned(bytes) => bytes.len(),
            Storage::Borrowed(view) => view.len(),
        }
    }

    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Storage::Owned(_))
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(bytes) => bytes,
            Storage::Borrowed(view) => view.as_slice(),
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(bytes) => bytes,
            Storage::Borrowed(view) => view.as_mut_slice(),
        }
    }

    pub(crate) fn view(&self) -> MemoryView<'_> {
        MemoryView::new(self.as_slice())
    }

    pub(crate) fn view_mut(&mut self) -> MutableMemoryView<'_> {
        MutableMemoryView::new(self.as_mut_slice())
    }
}

impl Default for Storage<'_> {
    fn default() -> Self {
        Storage::Owned(Box::default())
    }
}
