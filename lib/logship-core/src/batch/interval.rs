use std::{
    sync::{
        atomic::{AtomicBool, Ordering::{Acquire, Release}},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tracing::{debug, error};

use crate::config::{ConfigError, EmitterConfig};

use super::{BatchBuilder, BatchEmitter, BatchListener, EmitterError, EmitterTelemetry};

/// A timer-based batch emitter that flushes on the producing task.
///
/// Items accumulate in a mutex-guarded in-progress batch. A periodic timer task flushes whatever
/// has accumulated every delivery interval; an `add` that pushes the batch to the configured size
/// flushes synchronously, on the calling task, before returning. That synchronous flush is the
/// trade-off against [`BulkEmitter`][super::BulkEmitter]: the implementation has no queue to
/// drain, but one producer per full batch absorbs the listener hand-off latency.
pub struct IntervalEmitter<I> {
    inner: Arc<Inner<I>>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<I> {
    config: EmitterConfig,
    current: Mutex<BatchBuilder<I>>,
    stopping: AtomicBool,
    listener: Mutex<Option<Arc<dyn BatchListener<I>>>>,
    telemetry: EmitterTelemetry,
}

impl<I> IntervalEmitter<I>
where
    I: Send + 'static,
{
    /// Creates a new `IntervalEmitter` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn new(config: EmitterConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let telemetry = EmitterTelemetry::new(&config.name);
        let current = Mutex::new(BatchBuilder::with_capacity(config.batch_size));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                current,
                stopping: AtomicBool::new(false),
                listener: Mutex::new(None),
                telemetry,
            }),
            timer_handle: Mutex::new(None),
        })
    }

    /// Stops the emitter using the configured shutdown timeout, blocking until complete.
    pub async fn stop_default(&self) {
        let flush_timeout = self.inner.config.shutdown_timeout;
        self.stop(flush_timeout, false).await;
    }
}

impl<I> Inner<I> {
    /// Flushes the in-progress batch to the listener, if it holds any items.
    ///
    /// Mutually exclusive: the in-progress batch stays locked across the listener hand-off, so
    /// concurrent flushes cannot reorder batches.
    fn notify_listener(&self) {
        let mut current = self.current.lock().unwrap();
        if current.is_empty() {
            return;
        }

        let listener = match self.listener.lock().unwrap().clone() {
            Some(listener) => listener,
            None => {
                // Nothing to hand off to yet; keep accumulating.
                debug!(emitter = %self.config.name, "No listener registered, holding batch.");
                return;
            }
        };

        let fresh = BatchBuilder::with_capacity(self.config.batch_size);
        let batch = std::mem::replace(&mut *current, fresh).build();

        self.telemetry.batches_emitted.increment(1);
        self.telemetry.items_emitted.increment(batch.len() as u64);

        match listener.on_batch(batch) {
            Ok(dispatched) => {
                if !dispatched {
                    debug!(emitter = %self.config.name, "Listener did not dispatch batch.");
                }
            }
            Err(e) => {
                self.telemetry.listener_failures.increment(1);
                error!(emitter = %self.config.name, error = %e, "Listener failed, batch dropped.");
            }
        }
    }
}

#[async_trait]
impl<I> BatchEmitter<I> for IntervalEmitter<I>
where
    I: Send + 'static,
{
    fn add(&self, item: I) -> Result<(), EmitterError> {
        let flush = {
            let mut current = self.inner.current.lock().unwrap();
            current.add(item);
            current.len() >= self.inner.config.batch_size
        };

        // Size trigger: flush synchronously on this task.
        if flush {
            self.inner.notify_listener();
        }
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn BatchListener<I>>) -> Result<(), EmitterError> {
        let mut slot = self.inner.listener.lock().unwrap();
        if slot.is_some() {
            return Err(EmitterError::ListenerAlreadySet {
                name: self.inner.config.name.clone(),
            });
        }
        *slot = Some(listener);
        Ok(())
    }

    fn start(&self) -> Result<(), EmitterError> {
        if self.inner.listener.lock().unwrap().is_none() {
            return Err(EmitterError::MissingListener {
                name: self.inner.config.name.clone(),
            });
        }

        let mut handle = self.timer_handle.lock().unwrap();
        if handle.is_some() {
            return Err(EmitterError::AlreadyStarted {
                name: self.inner.config.name.clone(),
            });
        }

        *handle = Some(tokio::spawn(run_flush_timer(Arc::clone(&self.inner))));
        debug!(emitter = %self.inner.config.name, "Flush timer started.");
        Ok(())
    }

    async fn stop(&self, timeout: Duration, run_in_background: bool) {
        // The final flush is synchronous, so the timeout only exists to satisfy the shared
        // contract; there is nothing asynchronous left to wait out.
        let _ = timeout;

        self.inner.stopping.store(true, Release);
        let timer_handle = self.timer_handle.lock().unwrap().take();

        let inner = Arc::clone(&self.inner);
        let finish = async move {
            if let Some(timer_handle) = timer_handle {
                timer_handle.abort();
            }
            inner.notify_listener();
            debug!(emitter = %inner.config.name, "Emitter stopped.");
        };

        if run_in_background {
            tokio::spawn(finish);
        } else {
            finish.await;
        }
    }
}

async fn run_flush_timer<I>(inner: Arc<Inner<I>>)
where
    I: Send + 'static,
{
    let delivery_interval = inner.config.delivery_interval;
    let mut ticker = interval_at(Instant::now() + delivery_interval, delivery_interval);

    loop {
        ticker.tick().await;
        if inner.stopping.load(Acquire) {
            break;
        }
        inner.notify_listener();
    }
}

#[cfg(test)]
mod tests {
    use logship_error::{generic_error, GenericError};
    use tokio::sync::mpsc;
    use tokio::time::timeout as tokio_timeout;

    use crate::batch::Batch;

    use super::*;

    const LONG_INTERVAL: Duration = Duration::from_secs(3600);

    fn emitter(batch_size: usize, interval: Duration) -> (IntervalEmitter<u32>, mpsc::UnboundedReceiver<Vec<u32>>) {
        let emitter = IntervalEmitter::new(EmitterConfig::new(batch_size, interval)).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = move |batch: Batch<u32>| -> Result<bool, GenericError> {
            tx.send(batch.into_items())
                .map_err(|_| generic_error!("batch receiver closed"))?;
            Ok(true)
        };
        emitter.add_listener(Arc::new(listener)).unwrap();
        (emitter, rx)
    }

    #[tokio::test]
    async fn size_trigger_flushes_synchronously() {
        let (emitter, mut rx) = emitter(3, LONG_INTERVAL);

        emitter.add(1).unwrap();
        emitter.add(2).unwrap();
        assert!(rx.try_recv().is_err());

        // The third add crosses the threshold and flushes before returning.
        emitter.add(3).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn time_trigger_flushes_partial_batch() {
        let (emitter, mut rx) = emitter(100, Duration::from_millis(100));
        emitter.start().unwrap();

        emitter.add(7).unwrap();
        let batch = tokio_timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for batch")
            .unwrap();
        assert_eq!(batch, vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_does_not_emit_empty_batches() {
        let (emitter, mut rx) = emitter(10, Duration::from_millis(10));
        emitter.start().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_flushes_remaining_items() {
        let (emitter, mut rx) = emitter(100, LONG_INTERVAL);
        emitter.start().unwrap();

        emitter.add(1).unwrap();
        emitter.add(2).unwrap();
        emitter.stop(Duration::from_secs(2), false).await;

        assert_eq!(rx.try_recv().unwrap(), vec![1, 2]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn background_stop_flushes_remaining_items() {
        let (emitter, mut rx) = emitter(100, LONG_INTERVAL);
        emitter.start().unwrap();

        emitter.add(1).unwrap();
        emitter.add(2).unwrap();
        emitter.stop(Duration::from_secs(2), true).await;

        // The final flush runs on a background task; it still reaches the listener.
        let batch = tokio_timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for batch")
            .unwrap();
        assert_eq!(batch, vec![1, 2]);
    }

    #[tokio::test]
    async fn order_is_preserved_across_batches() {
        let (emitter, mut rx) = emitter(4, LONG_INTERVAL);

        for i in 0..9 {
            emitter.add(i).unwrap();
        }
        emitter.stop_default().await;

        assert_eq!(rx.try_recv().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(rx.try_recv().unwrap(), vec![4, 5, 6, 7]);
        assert_eq!(rx.try_recv().unwrap(), vec![8]);
    }
}
