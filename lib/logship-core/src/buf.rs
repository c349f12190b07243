//! Byte buffers for serialized log items.

use bytes::{buf::UninitSlice, Buf, BufMut};

use crate::pooling::Clearable;

/// A fixed-capacity byte buffer.
///
/// This is a thin wrapper around a `Vec<u8>` that refuses to grow beyond its initial capacity:
/// once all available capacity has been consumed, further writes fail instead of reallocating.
/// This keeps pooled buffers at a stable size, so that a pool never accumulates oversized buffers
/// after a burst of large items.
///
/// Reading and writing happen through the [`Buf`] and [`BufMut`] traits. `ByteBlock` implements
/// [`Clearable`] so that it can be handed back to an item source pool and reused.
pub struct ByteBlock {
    read_idx: usize,
    data: Vec<u8>,
}

impl ByteBlock {
    /// Creates a new `ByteBlock` with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            read_idx: 0,
            data: Vec::with_capacity(capacity),
        }
    }

    /// Returns the total capacity of the buffer, in bytes.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Returns the number of bytes written to the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no bytes have been written to the buffer.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the written bytes as a slice, regardless of read position.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Clearable for ByteBlock {
    fn clear(&mut self) {
        self.read_idx = 0;
        self.data.clear();
    }
}

impl Buf for ByteBlock {
    fn remaining(&self) -> usize {
        self.data.len() - self.read_idx
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.read_idx..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(self.read_idx + cnt <= self.data.len());
        self.read_idx += cnt;
    }
}

unsafe impl BufMut for ByteBlock {
    fn remaining_mut(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        self.data.spare_capacity_mut().into()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        let new_len = self.data.len() + cnt;
        self.data.set_len(new_len);
    }
}
