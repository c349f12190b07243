//! Item serialization into pooled buffers.

use bytes::BufMut as _;
use snafu::{ResultExt as _, Snafu};

use crate::{
    buf::ByteBlock,
    pooling::{ItemSource, ItemSourcePool, PoolError},
};

/// Error type for serialization failures.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub))]
pub enum SerializeError {
    /// The item could not be rendered as JSON.
    ///
    /// Also covers items too large for the pooled buffer, which surface as a failed write.
    #[snafu(display("failed to serialize item as JSON: {}", source))]
    Json {
        /// The underlying serializer error.
        source: serde_json::Error,
    },

    /// A custom serializer failed.
    #[snafu(display("serializer failed: {}", reason))]
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// Serializes one item into a pooled byte buffer.
pub trait ItemSerializer<T>: Send + Sync {
    /// Writes the serialized form of `item` into `block`.
    ///
    /// # Errors
    ///
    /// If the item cannot be serialized, or does not fit the buffer, an error is returned. The
    /// buffer may hold partially written bytes afterwards; callers are expected to discard it.
    fn serialize_into(&self, item: &T, block: &mut ByteBlock) -> Result<(), SerializeError>;

    /// Renders the serialized form of `item` as an owned string.
    ///
    /// Bypasses pooled buffers entirely; intended for diagnostics and for callers that need the
    /// payload outside of the batching pipeline.
    ///
    /// # Errors
    ///
    /// If the item cannot be serialized, an error is returned.
    fn serialize_to_string(&self, item: &T) -> Result<String, SerializeError>;
}

/// An [`ItemSerializer`] that renders items as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl<T: serde::Serialize> ItemSerializer<T> for JsonSerializer {
    fn serialize_into(&self, item: &T, block: &mut ByteBlock) -> Result<(), SerializeError> {
        serde_json::to_writer(block.writer(), item).context(Json)
    }

    fn serialize_to_string(&self, item: &T) -> Result<String, SerializeError> {
        serde_json::to_string(item).context(Json)
    }
}

/// Behavior when the buffer pool is exhausted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Exhaustion is a hard error: the pool retries resizing up to its configured bound and the
    /// failure propagates to the caller.
    #[default]
    Fail,

    /// Exhaustion drops the item: a single resize attempt is made, after which the factory
    /// reports `None` and the caller is expected to degrade gracefully.
    DropItem,
}

/// Creates item sources by serializing items into pooled buffers.
pub struct PooledItemFactory {
    pool: ItemSourcePool<ByteBlock>,
    exhaustion_policy: ExhaustionPolicy,
}

/// Error type for item source creation failures.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub))]
pub enum FactoryError {
    /// No pooled buffer could be obtained.
    #[snafu(display("failed to obtain a pooled buffer: {}", source))]
    Pool {
        /// The underlying pool error.
        source: PoolError,
    },

    /// The item could not be written into the buffer.
    #[snafu(display("failed to serialize item into pooled buffer: {}", source))]
    Serialize {
        /// The underlying serialization error.
        source: SerializeError,
    },
}

impl PooledItemFactory {
    /// Creates a new `PooledItemFactory` over the given pool.
    pub fn new(pool: ItemSourcePool<ByteBlock>, exhaustion_policy: ExhaustionPolicy) -> Self {
        Self {
            pool,
            exhaustion_policy,
        }
    }

    /// Returns the underlying buffer pool.
    pub fn pool(&self) -> &ItemSourcePool<ByteBlock> {
        &self.pool
    }

    /// Serializes `item` into a pooled buffer and returns the resulting item source.
    ///
    /// `Ok(None)` is only returned under the [`ExhaustionPolicy::DropItem`] policy, when the pool
    /// could not supply a buffer.
    ///
    /// # Errors
    ///
    /// If the pool is exhausted (under [`ExhaustionPolicy::Fail`]) or serialization fails, an
    /// error is returned. A buffer is never leaked on serialization failure: it is released back
    /// to the pool before the error propagates.
    pub async fn create<T>(
        &self, item: &T, serializer: &dyn ItemSerializer<T>,
    ) -> Result<Option<ItemSource<ByteBlock>>, FactoryError> {
        let mut source = match self.checkout().await? {
            Some(source) => source,
            None => return Ok(None),
        };

        match serializer.serialize_into(item, source.data_mut()) {
            Ok(()) => Ok(Some(source)),
            Err(e) => {
                // Hand the buffer straight back before surfacing the failure.
                source.release();
                Err(e).context(Serialize)
            }
        }
    }

    /// Returns an empty pooled buffer, for callers that serialize directly.
    ///
    /// Exhaustion behaves exactly as in [`create`][Self::create].
    ///
    /// # Errors
    ///
    /// If the pool is exhausted under the [`ExhaustionPolicy::Fail`] policy, an error is returned.
    pub async fn create_empty(&self) -> Result<Option<ItemSource<ByteBlock>>, FactoryError> {
        self.checkout().await
    }

    async fn checkout(&self) -> Result<Option<ItemSource<ByteBlock>>, FactoryError> {
        match self.exhaustion_policy {
            ExhaustionPolicy::Fail => self.pool.acquire().await.map(Some).context(Pool),
            ExhaustionPolicy::DropItem => Ok(self.pool.try_acquire().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        config::PoolConfig,
        pooling::{LimitedResizePolicy, ResizePolicy, UnlimitedResizePolicy},
    };

    use super::*;

    fn factory(initial_size: usize, policy: Arc<dyn ResizePolicy>, exhaustion: ExhaustionPolicy) -> PooledItemFactory {
        let config = PoolConfig {
            initial_size,
            ..PoolConfig::default()
        };
        let (pool, _recycler) = ItemSourcePool::create(config, policy, || ByteBlock::with_capacity(256)).unwrap();
        PooledItemFactory::new(pool, exhaustion)
    }

    fn unlimited() -> Arc<dyn ResizePolicy> {
        Arc::new(UnlimitedResizePolicy::new(1.0).unwrap())
    }

    #[derive(serde::Serialize)]
    struct Event<'a> {
        level: &'a str,
        message: &'a str,
    }

    #[test]
    fn json_serializer_renders_strings() {
        let event = Event {
            level: "WARN",
            message: "disk full",
        };

        let rendered = JsonSerializer.serialize_to_string(&event).unwrap();
        assert_eq!(rendered, r#"{"level":"WARN","message":"disk full"}"#);
    }

    #[tokio::test]
    async fn create_serializes_into_pooled_buffer() {
        let factory = factory(1, unlimited(), ExhaustionPolicy::Fail);
        let event = Event {
            level: "INFO",
            message: "hello",
        };

        let source = factory.create(&event, &JsonSerializer).await.unwrap().unwrap();
        assert_eq!(source.data().as_slice(), br#"{"level":"INFO","message":"hello"}"#);
    }

    struct FailingSerializer;

    impl ItemSerializer<u32> for FailingSerializer {
        fn serialize_into(&self, _: &u32, _: &mut ByteBlock) -> Result<(), SerializeError> {
            Err(SerializeError::Failed {
                reason: "broken".to_string(),
            })
        }

        fn serialize_to_string(&self, _: &u32) -> Result<String, SerializeError> {
            Err(SerializeError::Failed {
                reason: "broken".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn serialization_failure_releases_buffer() {
        let factory = factory(1, unlimited(), ExhaustionPolicy::Fail);

        let result = factory.create(&42u32, &FailingSerializer).await;
        assert!(matches!(result, Err(FactoryError::Serialize { .. })));

        // The buffer went back to the pool, not into the void.
        assert_eq!(factory.pool().available_size(), 1);
        assert_eq!(factory.pool().total_size(), 1);
    }

    #[tokio::test]
    async fn oversized_item_fails_serialization() {
        let factory = factory(1, unlimited(), ExhaustionPolicy::Fail);
        let event = Event {
            level: "INFO",
            message: &"x".repeat(512),
        };

        let result = factory.create(&event, &JsonSerializer).await;
        assert!(matches!(result, Err(FactoryError::Serialize { .. })));
        assert_eq!(factory.pool().available_size(), 1);
    }

    #[tokio::test]
    async fn exhaustion_policies_differ_on_empty_pool() {
        let capped: Arc<dyn ResizePolicy> = Arc::new(LimitedResizePolicy::new(1.0, 1).unwrap());

        let dropping = factory(1, Arc::clone(&capped), ExhaustionPolicy::DropItem);
        let held = dropping.create_empty().await.unwrap().unwrap();
        assert!(dropping.create_empty().await.unwrap().is_none());
        drop(held);

        let failing = factory(1, capped, ExhaustionPolicy::Fail);
        let held = failing.create_empty().await.unwrap().unwrap();
        assert!(matches!(failing.create_empty().await, Err(FactoryError::Pool { .. })));
        drop(held);
    }
}
