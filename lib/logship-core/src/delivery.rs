//! Batch delivery facade.
//!
//! [`BatchDelivery`] ties the pieces together for a wire client: events are serialized into
//! pooled buffers, enqueued on an emitter, and handed to the client's listener as batches. When
//! the client reports that a batch could not be delivered, the facade routes each of its items
//! into a [`FailoverPolicy`], which decides what happens to data the primary path gave up on.

use std::{sync::Arc, time::Duration};

use logship_error::{ErrorContext as _, GenericError};
use metrics::{counter, Counter};
use tracing::{debug, warn};

use crate::{
    batch::{Batch, BatchEmitter},
    buf::ByteBlock,
    pooling::ItemSource,
    serialize::{ItemSerializer, PooledItemFactory},
};

/// A sink for items that failed delivery.
///
/// The failover policy takes ownership of each failed item's buffer. Implementations might spool
/// items to disk, re-enqueue them for another attempt, or drop them; the facade does not care,
/// it only guarantees that every failed item reaches the sink exactly once.
pub trait FailoverPolicy: Send + Sync {
    /// Accepts one item that could not be delivered.
    fn deliver(&self, item: ItemSource<ByteBlock>);
}

/// A [`FailoverPolicy`] that drops failed items, keeping count.
pub struct NoopFailoverPolicy {
    dropped: Counter,
}

impl NoopFailoverPolicy {
    /// Creates a new `NoopFailoverPolicy`.
    pub fn new() -> Self {
        Self {
            dropped: counter!("failover_items_dropped_total"),
        }
    }
}

impl Default for NoopFailoverPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FailoverPolicy for NoopFailoverPolicy {
    fn deliver(&self, item: ItemSource<ByteBlock>) {
        self.dropped.increment(1);
        debug!("Dropping failed item.");
        item.release();
    }
}

/// The facade combining serialization, batching, and failover for one delivery pipeline.
///
/// Generic over the event type `T` and the emitter implementation `E`, so that a wire client can
/// choose between [`BulkEmitter`][crate::batch::BulkEmitter] and
/// [`IntervalEmitter`][crate::batch::IntervalEmitter] without changing anything else.
pub struct BatchDelivery<T, E>
where
    E: BatchEmitter<ItemSource<ByteBlock>>,
{
    factory: PooledItemFactory,
    serializer: Arc<dyn ItemSerializer<T>>,
    emitter: Arc<E>,
    failover: Arc<dyn FailoverPolicy>,
    items_dropped: Counter,
}

impl<T, E> BatchDelivery<T, E>
where
    E: BatchEmitter<ItemSource<ByteBlock>> + 'static,
{
    /// Creates a new `BatchDelivery` from its collaborators.
    ///
    /// The emitter's listener must already be registered (it is the wire client's hand-off
    /// point); the facade only drives the emitter's lifecycle.
    pub fn new(
        factory: PooledItemFactory, serializer: Arc<dyn ItemSerializer<T>>, emitter: Arc<E>,
        failover: Arc<dyn FailoverPolicy>,
    ) -> Self {
        Self {
            factory,
            serializer,
            emitter,
            failover,
            items_dropped: counter!("batch_delivery_items_dropped_total"),
        }
    }

    /// Serializes an event and enqueues it for batched delivery.
    ///
    /// If the buffer pool is exhausted under a drop-item exhaustion policy, the event is dropped
    /// (counted and logged) rather than failing the caller.
    ///
    /// # Errors
    ///
    /// If serialization fails, or the pool is exhausted under the fail exhaustion policy, an
    /// error is returned.
    pub async fn add(&self, event: &T) -> Result<(), GenericError> {
        let source = self
            .factory
            .create(event, &*self.serializer)
            .await
            .error_context("failed to create item source for event")?;

        match source {
            Some(source) => self
                .emitter
                .add(source)
                .error_context("failed to enqueue item for batching"),
            None => {
                self.items_dropped.increment(1);
                warn!("Buffer pool exhausted, dropping event.");
                Ok(())
            }
        }
    }

    /// Routes every item of a failed batch into the failover policy.
    pub fn failed_batch(&self, batch: Batch<ItemSource<ByteBlock>>) {
        let items = batch.into_items();
        warn!(items = items.len(), "Batch failed delivery, routing items to failover.");
        for item in items {
            self.failover.deliver(item);
        }
    }

    /// Starts the underlying emitter.
    ///
    /// # Errors
    ///
    /// If the emitter has no listener registered or was already started, an error is returned.
    pub fn start(&self) -> Result<(), GenericError> {
        self.emitter.start().error_context("failed to start batch emitter")
    }

    /// Stops the pipeline: flushes the emitter within `timeout`, then shuts down the buffer pool.
    ///
    /// With `run_in_background` set, shutdown proceeds on a background task and this call returns
    /// immediately.
    pub async fn stop(&self, timeout: Duration, run_in_background: bool) {
        if run_in_background {
            let emitter = Arc::clone(&self.emitter);
            let pool = self.factory.pool().clone();
            tokio::spawn(async move {
                emitter.stop(timeout, false).await;
                pool.shutdown();
            });
        } else {
            self.emitter.stop(timeout, false).await;
            self.factory.pool().shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    use serde::Serialize;
    use tokio::{sync::mpsc, time::timeout as tokio_timeout};

    use crate::{
        batch::BulkEmitter,
        config::{EmitterConfig, PoolConfig},
        pooling::{ItemSourcePool, UnlimitedResizePolicy},
        serialize::{ExhaustionPolicy, JsonSerializer},
    };

    use super::*;

    #[derive(Serialize)]
    struct Event {
        message: String,
    }

    fn byte_pool(initial_size: usize) -> ItemSourcePool<ByteBlock> {
        let config = PoolConfig {
            initial_size,
            ..PoolConfig::default()
        };
        let policy = Arc::new(UnlimitedResizePolicy::new(1.0).unwrap());
        let (pool, _recycler) = ItemSourcePool::create(config, policy, || ByteBlock::with_capacity(256)).unwrap();
        pool
    }

    struct CountingFailover {
        delivered: AtomicUsize,
    }

    impl FailoverPolicy for CountingFailover {
        fn deliver(&self, item: ItemSource<ByteBlock>) {
            self.delivered.fetch_add(1, SeqCst);
            item.release();
        }
    }

    #[tokio::test]
    async fn events_flow_through_to_listener_batches() {
        let pool = byte_pool(4);
        let factory = PooledItemFactory::new(pool, ExhaustionPolicy::Fail);

        let emitter = Arc::new(BulkEmitter::new(EmitterConfig::new(2, Duration::from_secs(3600))).unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = move |batch: Batch<ItemSource<ByteBlock>>| -> Result<bool, GenericError> {
            let payloads: Vec<Vec<u8>> = batch.iter().map(|item| item.data().as_slice().to_vec()).collect();
            tx.send(payloads).unwrap();
            Ok(true)
        };
        emitter.add_listener(Arc::new(listener)).unwrap();

        let delivery: BatchDelivery<Event, _> = BatchDelivery::new(
            factory,
            Arc::new(JsonSerializer),
            emitter,
            Arc::new(NoopFailoverPolicy::new()),
        );
        delivery.start().unwrap();

        for message in ["one", "two"] {
            delivery
                .add(&Event {
                    message: message.to_string(),
                })
                .await
                .unwrap();
        }

        let payloads = tokio_timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], br#"{"message":"one"}"#.to_vec());
        assert_eq!(payloads[1], br#"{"message":"two"}"#.to_vec());

        delivery.stop(Duration::from_secs(1), false).await;
    }

    #[tokio::test]
    async fn failed_batches_are_routed_to_failover() {
        let pool = byte_pool(4);
        let factory = PooledItemFactory::new(pool.clone(), ExhaustionPolicy::Fail);

        let emitter = Arc::new(BulkEmitter::new(EmitterConfig::default()).unwrap());
        let failover = Arc::new(CountingFailover {
            delivered: AtomicUsize::new(0),
        });
        let delivery: BatchDelivery<Event, _> = BatchDelivery::new(
            factory,
            Arc::new(JsonSerializer),
            emitter,
            Arc::clone(&failover) as Arc<dyn FailoverPolicy>,
        );

        // Build a batch by hand, as the wire client would have received it.
        let mut builder = crate::batch::BatchBuilder::with_capacity(3);
        for _ in 0..3 {
            builder.add(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.available_size(), 1);

        delivery.failed_batch(builder.build());
        assert_eq!(failover.delivered.load(SeqCst), 3);

        // Failover released every buffer back to the pool.
        assert_eq!(pool.available_size(), 4);
    }
}
