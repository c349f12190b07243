use std::{
    future::Future,
    sync::{
        atomic::{
            AtomicBool, AtomicUsize,
            Ordering::{AcqRel, Acquire, Release},
        },
        Arc,
    },
    time::Duration,
};

use crossbeam_queue::SegQueue;
use metrics::{counter, gauge, Counter, Gauge};
use tokio::{
    sync::Notify,
    time::{sleep, timeout},
};
use tracing::debug;

use crate::config::{ConfigError, PoolConfig};

use super::{Clearable, ItemSource, PoolError, PoolOps, ReclaimStrategy, ResizePolicy};

struct PoolTelemetry {
    created: Counter,
    deleted: Counter,
    acquired: Counter,
    released: Counter,
    in_use: Gauge,
}

impl PoolTelemetry {
    fn new(pool_name: &str) -> Self {
        Self {
            created: counter!("item_source_pool_created_total", "pool_name" => pool_name.to_string()),
            deleted: counter!("item_source_pool_deleted_total", "pool_name" => pool_name.to_string()),
            acquired: counter!("item_source_pool_acquired_total", "pool_name" => pool_name.to_string()),
            released: counter!("item_source_pool_released_total", "pool_name" => pool_name.to_string()),
            in_use: gauge!("item_source_pool_in_use", "pool_name" => pool_name.to_string()),
        }
    }
}

/// An elastic pool of reusable item buffers.
///
/// The pool is created with `initial_size` buffers and grows on demand: when a caller finds the
/// pool empty, the configured [`ResizePolicy`] is asked to add buffers. Exactly one resize runs at
/// a time; other callers contending for an empty pool wait (bounded by the configured resize
/// timeout) for the in-flight resize to complete and then retry, up to `max_retries` attempts.
///
/// A background recycler task, returned alongside the pool from [`create`][Self::create] and
/// spawned by the caller, periodically asks the policy to shrink the pool back towards its initial
/// size when buffers sit idle.
///
/// Buffers are returned to the pool by dropping the [`ItemSource`] that wraps them, and are
/// cleared before being handed out again.
pub struct ItemSourcePool<T>
where
    T: Clearable + Send + 'static,
{
    inner: Arc<Inner<T>>,
    policy: Arc<dyn ResizePolicy>,
    resize_timeout: Duration,
    max_retries: usize,
}

impl<T> Clone for ItemSourcePool<T>
where
    T: Clearable + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            policy: Arc::clone(&self.policy),
            resize_timeout: self.resize_timeout,
            max_retries: self.max_retries,
        }
    }
}

impl<T> ItemSourcePool<T>
where
    T: Clearable + Send + 'static,
{
    /// Creates a new `ItemSourcePool` along with its background recycler task.
    ///
    /// The pool is pre-populated with `initial_size` buffers, each built by `builder`. The
    /// returned future is the recycler, which the caller is responsible for spawning; it completes
    /// after [`shutdown`][Self::shutdown] is called.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the policy can never grow a pool of this initial size,
    /// an error is returned.
    pub fn create<B>(
        config: PoolConfig, policy: Arc<dyn ResizePolicy>, builder: B,
    ) -> Result<(Self, impl Future<Output = ()>), ConfigError>
    where
        B: Fn() -> T + Send + Sync + 'static,
    {
        config.validate()?;
        if !policy.can_grow_from(config.initial_size) {
            return Err(ConfigError::IneffectiveResize {
                pool_name: config.name,
            });
        }

        let telemetry = PoolTelemetry::new(&config.name);
        let inner = Arc::new(Inner {
            name: config.name,
            initial_size: config.initial_size,
            items: SegQueue::new(),
            total: AtomicUsize::new(0),
            builder: Box::new(builder),
            resizing: AtomicBool::new(false),
            resize_done: Notify::new(),
            shutdown: AtomicBool::new(false),
            telemetry,
        });
        inner.increment_size(config.initial_size);

        let recycler = run_recycler(
            Arc::clone(&inner),
            Arc::clone(&policy),
            config.recycler_initial_delay,
            config.recycler_interval,
        );

        Ok((
            Self {
                inner,
                policy,
                resize_timeout: config.resize_timeout,
                max_retries: config.max_retries,
            },
            recycler,
        ))
    }

    /// Acquires a buffer from the pool.
    ///
    /// When the pool is empty, a resize is attempted via the policy; if another caller already has
    /// a resize in flight, this caller waits for it to complete (bounded by the resize timeout)
    /// and retries. Retries are bounded: after `max_retries` failed attempts the pool reports
    /// exhaustion rather than retrying indefinitely.
    ///
    /// # Errors
    ///
    /// If the pool is shut down, the policy refuses to grow the pool, or the retry budget is
    /// consumed without obtaining a buffer, an error is returned.
    pub async fn acquire(&self) -> Result<ItemSource<T>, PoolError> {
        if self.inner.shutdown.load(Acquire) {
            return Err(PoolError::ShutDown {
                pool_name: self.inner.name.clone(),
            });
        }

        for _ in 0..self.max_retries {
            if let Some(data) = self.inner.checkout() {
                return Ok(ItemSource::from_data(self.reclaimer(), data));
            }

            self.resize_or_wait().await?;
        }

        Err(PoolError::Exhausted {
            pool_name: self.inner.name.clone(),
            attempts: self.max_retries,
        })
    }

    /// Acquires a buffer from the pool, returning `None` on exhaustion.
    ///
    /// Unlike [`acquire`][Self::acquire], at most one resize attempt is made, and exhaustion is
    /// reported as `None` instead of an error. Intended for call sites that prefer dropping an
    /// item over failing the operation.
    pub async fn try_acquire(&self) -> Option<ItemSource<T>> {
        if self.inner.shutdown.load(Acquire) {
            return None;
        }

        if let Some(data) = self.inner.checkout() {
            return Some(ItemSource::from_data(self.reclaimer(), data));
        }

        let _ = self.resize_or_wait().await;
        self.inner
            .checkout()
            .map(|data| ItemSource::from_data(self.reclaimer(), data))
    }

    /// Eagerly creates `delta` new buffers and makes them available.
    pub fn increment_size(&self, delta: usize) {
        self.inner.increment_size(delta);
    }

    /// Removes and destroys one available buffer.
    ///
    /// Returns `false` if no buffer was available to remove.
    pub fn remove(&self) -> bool {
        self.inner.remove()
    }

    /// Returns the name of the pool.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the number of buffers the pool was created with.
    pub fn initial_size(&self) -> usize {
        self.inner.initial_size
    }

    /// Returns the total number of buffers owned by the pool, available or checked out.
    pub fn total_size(&self) -> usize {
        self.inner.total_size()
    }

    /// Returns the number of buffers currently available for checkout.
    pub fn available_size(&self) -> usize {
        self.inner.available_size()
    }

    /// Shuts the pool down, destroying all available buffers.
    ///
    /// Checked-out buffers are destroyed as they are released. The background recycler exits on
    /// its next pass. Subsequent acquisitions fail.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Release);
        self.inner.purge_available();

        // Release any callers parked on an in-flight resize so they can observe the shutdown.
        self.inner.resize_done.notify_waiters();

        debug!(pool_name = %self.inner.name, "Pool shut down.");
    }

    fn reclaimer(&self) -> Arc<dyn ReclaimStrategy<T>> {
        Arc::clone(&self.inner) as Arc<dyn ReclaimStrategy<T>>
    }

    /// Attempts to grow the pool, or waits out a resize already in flight elsewhere.
    async fn resize_or_wait(&self) -> Result<(), PoolError> {
        if self.inner.resizing.compare_exchange(false, true, AcqRel, Acquire).is_ok() {
            // A shutdown may have won the race to the flag; growing now would strand fresh
            // buffers in a queue that has already been drained.
            if self.inner.shutdown.load(Acquire) {
                self.inner.resizing.store(false, Release);
                self.inner.resize_done.notify_waiters();
                return Err(PoolError::ShutDown {
                    pool_name: self.inner.name.clone(),
                });
            }

            let grown = self.policy.can_resize(&*self.inner) && self.policy.increase(&*self.inner);
            self.inner.resizing.store(false, Release);
            self.inner.resize_done.notify_waiters();

            // A shutdown that landed mid-resize already drained the queue; purge whatever the
            // resize pushed afterwards so no buffers outlive the pool.
            if self.inner.shutdown.load(Acquire) {
                self.inner.purge_available();
                return Err(PoolError::ShutDown {
                    pool_name: self.inner.name.clone(),
                });
            }

            if grown {
                Ok(())
            } else {
                Err(PoolError::ResizeFailed {
                    pool_name: self.inner.name.clone(),
                })
            }
        } else {
            // Another caller is resizing. Wait for it to finish (bounded, in case the notify and
            // the flag race) and have the caller retry the checkout.
            let _ = timeout(self.resize_timeout, self.inner.resize_done.notified()).await;
            Ok(())
        }
    }
}

struct Inner<T: Clearable> {
    name: String,
    initial_size: usize,
    items: SegQueue<T>,
    total: AtomicUsize,
    builder: Box<dyn Fn() -> T + Send + Sync>,
    resizing: AtomicBool,
    resize_done: Notify,
    shutdown: AtomicBool,
    telemetry: PoolTelemetry,
}

impl<T: Clearable> Inner<T> {
    fn checkout(&self) -> Option<T> {
        let data = self.items.pop()?;
        self.telemetry.acquired.increment(1);
        self.telemetry.in_use.increment(1.0);
        Some(data)
    }

    fn purge_available(&self) {
        while let Some(data) = self.items.pop() {
            drop(data);
            self.total.fetch_sub(1, AcqRel);
            self.telemetry.deleted.increment(1);
        }
    }
}

impl<T: Clearable> PoolOps for Inner<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_size(&self) -> usize {
        self.initial_size
    }

    fn total_size(&self) -> usize {
        self.total.load(Acquire)
    }

    fn available_size(&self) -> usize {
        self.items.len()
    }

    fn increment_size(&self, delta: usize) {
        // Bump the total before publishing any buffers, so a concurrent observer never sees more
        // available buffers than the pool claims to own.
        self.total.fetch_add(delta, AcqRel);
        for _ in 0..delta {
            self.items.push((self.builder)());
        }
        self.telemetry.created.increment(delta as u64);
    }

    fn remove(&self) -> bool {
        match self.items.pop() {
            Some(data) => {
                drop(data);
                self.total.fetch_sub(1, AcqRel);
                self.telemetry.deleted.increment(1);
                true
            }
            None => false,
        }
    }
}

impl<T> ReclaimStrategy<T> for Inner<T>
where
    T: Clearable + Send,
{
    fn reclaim(&self, mut data: T) {
        data.clear();
        self.telemetry.in_use.decrement(1.0);

        if self.shutdown.load(Acquire) {
            // The pool is gone; purge the buffer instead of recycling it.
            drop(data);
            self.total.fetch_sub(1, AcqRel);
            self.telemetry.deleted.increment(1);
        } else {
            self.items.push(data);
            self.telemetry.released.increment(1);
        }
    }
}

async fn run_recycler<T>(
    inner: Arc<Inner<T>>, policy: Arc<dyn ResizePolicy>, initial_delay: Duration, interval: Duration,
) where
    T: Clearable + Send,
{
    sleep(initial_delay).await;

    loop {
        if inner.shutdown.load(Acquire) {
            debug!(pool_name = %inner.name, "Pool shut down, stopping recycler.");
            break;
        }

        if policy.decrease(&*inner) {
            debug!(
                pool_name = %inner.name,
                total_size = inner.total_size(),
                "Recycler shrank pool towards initial size."
            );
        }

        sleep(interval).await;
    }
}
