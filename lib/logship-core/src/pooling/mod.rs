//! Item source pooling.
//!
//! Serializing a log event produces a short-lived byte buffer; allocating one per event puts
//! avoidable pressure on the allocator under sustained load. This module provides the pooling
//! machinery for reusing those buffers: a wrapper type ([`ItemSource`]) that hands its buffer back
//! to the owning pool when dropped, an elastic pool implementation ([`ItemSourcePool`]), and
//! resize policies governing how the pool grows under pressure and shrinks when idle.

use std::sync::Arc;

use snafu::Snafu;

mod elastic;
pub use self::elastic::ItemSourcePool;

mod resize;
pub use self::resize::{LimitedResizePolicy, PoolOps, ResizePolicy, UnlimitedResizePolicy};

pub mod helpers;

/// An item that can be cleared.
///
/// Pools clear an item before making it available again, so that a reused buffer never exposes
/// residual content from its previous checkout.
pub trait Clearable {
    /// Clears the item.
    fn clear(&mut self) {}
}

/// A sink that accepts items being returned to their pool.
pub trait ReclaimStrategy<T: Clearable>: Send + Sync {
    /// Returns an item to the pool.
    fn reclaim(&self, data: T);
}

/// Error type for pool acquisition failures.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub))]
pub enum PoolError {
    /// The pool was empty and resizing did not produce an item within the retry budget.
    #[snafu(display("pool '{}' exhausted after {} resize attempts", pool_name, attempts))]
    Exhausted {
        /// Name of the pool.
        pool_name: String,
        /// Number of acquisition attempts made.
        attempts: usize,
    },

    /// The resize policy declined to grow the pool.
    #[snafu(display("resize policy could not grow pool '{}'", pool_name))]
    ResizeFailed {
        /// Name of the pool.
        pool_name: String,
    },

    /// The pool has been shut down.
    #[snafu(display("pool '{}' is shut down", pool_name))]
    ShutDown {
        /// Name of the pool.
        pool_name: String,
    },
}

/// A pooled, reusable buffer holding one serialized item.
///
/// `ItemSource` exclusively owns its buffer between checkout and release. Releasing happens on
/// drop: the buffer is cleared and handed back to the pool it came from. Because release consumes
/// the value, a released buffer cannot be written to again and double-release is impossible by
/// construction.
pub struct ItemSource<T: Clearable> {
    strategy: Arc<dyn ReclaimStrategy<T>>,
    data: Option<T>,
}

impl<T: Clearable> ItemSource<T> {
    /// Creates an `ItemSource` from a reclaim strategy and a buffer.
    pub fn from_data(strategy: Arc<dyn ReclaimStrategy<T>>, data: T) -> Self {
        Self {
            strategy,
            data: Some(data),
        }
    }

    /// Gets a reference to the underlying buffer.
    pub fn data(&self) -> &T {
        self.data.as_ref().expect("buffer present until drop")
    }

    /// Gets a mutable reference to the underlying buffer.
    pub fn data_mut(&mut self) -> &mut T {
        self.data.as_mut().expect("buffer present until drop")
    }

    /// Releases the buffer back to its pool.
    ///
    /// Dropping the `ItemSource` has the same effect; this method only exists to make the hand-off
    /// explicit at call sites where it matters.
    pub fn release(self) {}
}

impl<T: Clearable> Drop for ItemSource<T> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.strategy.reclaim(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder {
        reclaimed: Mutex<Vec<String>>,
    }

    impl ReclaimStrategy<String> for Recorder {
        fn reclaim(&self, mut data: String) {
            data.clear();
            self.reclaimed.lock().unwrap().push(data);
        }
    }

    impl Clearable for String {
        fn clear(&mut self) {
            String::clear(self);
        }
    }

    #[test]
    fn drop_reclaims_cleared_buffer() {
        let recorder = Arc::new(Recorder {
            reclaimed: Mutex::new(Vec::new()),
        });

        let source = ItemSource::from_data(Arc::clone(&recorder) as Arc<dyn ReclaimStrategy<String>>, "junk".to_string());
        assert_eq!(source.data(), "junk");
        source.release();

        let reclaimed = recorder.reclaimed.lock().unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert!(reclaimed[0].is_empty());
    }
}
