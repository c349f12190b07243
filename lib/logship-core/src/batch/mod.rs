//! Batching of items for delivery.
//!
//! An emitter accumulates items handed to it by producers and decides when the accumulated items
//! become a dispatch-ready [`Batch`]: either because the configured batch size was reached, or
//! because the delivery interval elapsed with items still pending. Built batches are handed to a
//! single [`BatchListener`], which is a pure hand-off point to whatever performs the actual
//! delivery.
//!
//! Two emitter implementations are provided:
//!
//! - [`BulkEmitter`]: a lock-free queue drained by a dedicated background task. Producers never
//!   pay delivery latency; reaching the batch size only pokes the background task awake. This is
//!   the implementation to reach for under high producer concurrency.
//! - [`IntervalEmitter`]: a mutex-guarded in-progress batch flushed by a periodic timer. Reaching
//!   the batch size flushes synchronously on the producing task, which keeps the implementation
//!   small but means one producer per batch absorbs the hand-off latency.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use logship_error::GenericError;
use metrics::{counter, Counter};
use snafu::Snafu;

mod bulk;
pub use self::bulk::BulkEmitter;

mod interval;
pub use self::interval::IntervalEmitter;

/// An ordered collection of items bundled for a single delivery attempt.
///
/// Ownership of the items transfers into the batch when it is built; dropping the batch releases
/// pooled items back to their pool.
pub struct Batch<I> {
    items: Vec<I>,
}

impl<I> Batch<I> {
    /// Returns the number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns an iterator over the items in the batch, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &I> {
        self.items.iter()
    }

    /// Consumes the batch, returning its items in insertion order.
    pub fn into_items(self) -> Vec<I> {
        self.items
    }
}

/// Accumulates items into a [`Batch`].
pub struct BatchBuilder<I> {
    items: Vec<I>,
}

impl<I> BatchBuilder<I> {
    /// Creates a new `BatchBuilder` with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Appends an item.
    pub fn add(&mut self, item: I) {
        self.items.push(item);
    }

    /// Returns the number of accumulated items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no items have been accumulated.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Builds the batch.
    pub fn build(self) -> Batch<I> {
        Batch { items: self.items }
    }
}

/// A sink for built batches.
///
/// The listener is a hand-off point: it attempts to dispatch the batch and reports whether the
/// attempt was made. Whether delivery ultimately succeeds is reported asynchronously through other
/// channels (typically a failover policy) and is not the emitter's concern.
pub trait BatchListener<I>: Send + Sync {
    /// Hands a built batch off for delivery.
    ///
    /// Returns whether the batch was dispatched.
    ///
    /// # Errors
    ///
    /// If the hand-off itself fails, an error is returned. The emitter logs the error and carries
    /// on; the batch is considered attempted.
    fn on_batch(&self, batch: Batch<I>) -> Result<bool, GenericError>;
}

impl<I, F> BatchListener<I> for F
where
    F: Fn(Batch<I>) -> Result<bool, GenericError> + Send + Sync,
{
    fn on_batch(&self, batch: Batch<I>) -> Result<bool, GenericError> {
        self(batch)
    }
}

/// Error type for emitter lifecycle misuse.
#[derive(Debug, Snafu, Eq, PartialEq)]
#[snafu(context(suffix(false)), visibility(pub))]
pub enum EmitterError {
    /// A listener is already registered.
    #[snafu(display("emitter '{}' already has a listener registered", name))]
    ListenerAlreadySet {
        /// Name of the emitter.
        name: String,
    },

    /// No listener is registered.
    #[snafu(display("emitter '{}' has no listener registered", name))]
    MissingListener {
        /// Name of the emitter.
        name: String,
    },

    /// The emitter is already running.
    #[snafu(display("emitter '{}' is already started", name))]
    AlreadyStarted {
        /// Name of the emitter.
        name: String,
    },
}

/// A size- and time-triggered batch scheduler.
#[async_trait]
pub trait BatchEmitter<I>: Send + Sync
where
    I: Send + 'static,
{
    /// Enqueues an item for batching.
    ///
    /// Never blocks on delivery. See the implementations for whether crossing the batch size
    /// threshold flushes synchronously on the calling task or wakes a background task.
    ///
    /// # Errors
    ///
    /// Implementations currently always accept the item; the `Result` leaves room for bounded
    /// implementations to report rejection.
    fn add(&self, item: I) -> Result<(), EmitterError>;

    /// Registers the delivery listener.
    ///
    /// Exactly one listener may be registered per emitter.
    ///
    /// # Errors
    ///
    /// If a listener is already registered, an error is returned.
    fn add_listener(&self, listener: Arc<dyn BatchListener<I>>) -> Result<(), EmitterError>;

    /// Starts the emitter's scheduling.
    ///
    /// # Errors
    ///
    /// If no listener is registered, or the emitter was already started, an error is returned.
    fn start(&self) -> Result<(), EmitterError>;

    /// Stops the emitter after a best-effort flush of pending items.
    ///
    /// New time-based triggers stop immediately, but one final flush of whatever is pending is
    /// attempted, waiting up to `timeout` for it to complete and reporting progress periodically.
    /// With `run_in_background` set, the flush-and-stop proceeds on a background task and this
    /// call returns immediately; otherwise it returns once shutdown has completed.
    async fn stop(&self, timeout: Duration, run_in_background: bool);
}

pub(crate) struct EmitterTelemetry {
    pub(crate) batches_emitted: Counter,
    pub(crate) items_emitted: Counter,
    pub(crate) listener_failures: Counter,
}

impl EmitterTelemetry {
    pub(crate) fn new(emitter_name: &str) -> Self {
        Self {
            batches_emitted: counter!("batch_emitter_batches_emitted_total", "emitter" => emitter_name.to_string()),
            items_emitted: counter!("batch_emitter_items_emitted_total", "emitter" => emitter_name.to_string()),
            listener_failures: counter!("batch_emitter_listener_failures_total", "emitter" => emitter_name.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_insertion_order() {
        let mut builder = BatchBuilder::with_capacity(4);
        assert!(builder.is_empty());

        for i in 0..4u32 {
            builder.add(i);
        }
        assert_eq!(builder.len(), 4);

        let batch = builder.build();
        assert_eq!(batch.len(), 4);
        assert!(!batch.is_empty());
        assert_eq!(batch.into_items(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn closures_are_listeners() {
        let listener: Arc<dyn BatchListener<u32>> =
            Arc::new(|batch: Batch<u32>| -> Result<bool, GenericError> { Ok(!batch.is_empty()) });

        let mut builder = BatchBuilder::with_capacity(1);
        builder.add(1);
        assert!(listener.on_batch(builder.build()).unwrap());
    }
}
