//! Helpers for working with item sources outside of a pool.

use std::sync::Arc;

use super::{Clearable, ItemSource, ReclaimStrategy};

/// A reclaim strategy that simply drops items instead of pooling them.
struct DiscardStrategy;

impl<T: Clearable> ReclaimStrategy<T> for DiscardStrategy {
    fn reclaim(&self, _: T) {}
}

/// Creates a detached [`ItemSource`] that is not backed by any pool.
///
/// The buffer is dropped, not recycled, when the item source is released. Useful in tests and for
/// one-off items that bypass pooling entirely.
pub fn detached<T>(data: T) -> ItemSource<T>
where
    T: Clearable + Send + 'static,
{
    ItemSource::from_data(Arc::new(DiscardStrategy), data)
}

#[cfg(test)]
mod tests {
    use crate::buf::ByteBlock;

    use super::*;

    #[test]
    fn detached_source_is_usable_and_droppable() {
        use bytes::BufMut as _;

        let mut source = detached(ByteBlock::with_capacity(8));
        source.data_mut().put_slice(b"abc");
        assert_eq!(source.data().as_slice(), b"abc");
        source.release();
    }
}
