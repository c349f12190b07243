use std::{
    sync::{
        atomic::{
            AtomicBool, AtomicUsize,
            Ordering::{AcqRel, Acquire, Release},
        },
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use crossbeam_queue::SegQueue;
use tokio::{
    sync::oneshot,
    sync::Notify,
    task::JoinHandle,
    time::{timeout, Instant},
};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EmitterConfig};

use super::{BatchBuilder, BatchEmitter, BatchListener, EmitterError, EmitterTelemetry};

/// A queue-based batch emitter drained by a dedicated background task.
///
/// Items go into a lock-free queue; a single background task sleeps on a wakeable timer and
/// drains the queue into batches. The task wakes either because `add` pushed the pending count to
/// the batch size (an explicit poke) or because the delivery interval elapsed. On wake it emits
/// full batches while enough items are queued, and emits the remainder only once the delivery
/// interval has passed since the last emission (or shutdown is in progress), so that a busy
/// producer does not cause a stream of tiny batches.
///
/// `add` never blocks and never touches the listener: producers pay queue-push cost only. This is
/// the emitter to use when producer latency matters; see [`IntervalEmitter`][super::IntervalEmitter]
/// for the simpler flush-on-the-producer variant.
pub struct BulkEmitter<I> {
    inner: Arc<Inner<I>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    loop_done: Mutex<Option<oneshot::Receiver<()>>>,
}

struct Inner<I> {
    config: EmitterConfig,
    queue: SegQueue<I>,
    pending: AtomicUsize,
    wakeup: Notify,
    stopping: AtomicBool,
    listener: Mutex<Option<Arc<dyn BatchListener<I>>>>,
    telemetry: EmitterTelemetry,
}

impl<I> BulkEmitter<I>
where
    I: Send + 'static,
{
    /// Creates a new `BulkEmitter` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn new(config: EmitterConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let telemetry = EmitterTelemetry::new(&config.name);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                queue: SegQueue::new(),
                pending: AtomicUsize::new(0),
                wakeup: Notify::new(),
                stopping: AtomicBool::new(false),
                listener: Mutex::new(None),
                telemetry,
            }),
            loop_handle: Mutex::new(None),
            loop_done: Mutex::new(None),
        })
    }

    /// Returns the number of items currently pending emission.
    pub fn pending_items(&self) -> usize {
        self.inner.pending.load(Acquire)
    }

    /// Stops the emitter using the configured shutdown timeout, blocking until complete.
    pub async fn stop_default(&self) {
        let flush_timeout = self.inner.config.shutdown_timeout;
        self.stop(flush_timeout, false).await;
    }
}

#[async_trait]
impl<I> BatchEmitter<I> for BulkEmitter<I>
where
    I: Send + 'static,
{
    fn add(&self, item: I) -> Result<(), EmitterError> {
        self.inner.queue.push(item);
        let pending = self.inner.pending.fetch_add(1, AcqRel) + 1;
        if pending >= self.inner.config.batch_size {
            self.inner.wakeup.notify_one();
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
        let listener = self
            .inner
            .listener
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EmitterError::MissingListener {
                name: self.inner.config.name.clone(),
            })?;

        let mut handle = self.loop_handle.lock().unwrap();
        if handle.is_some() {
            return Err(EmitterError::AlreadyStarted {
                name: self.inner.config.name.clone(),
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        *handle = Some(tokio::spawn(run_emit_loop(Arc::clone(&self.inner), listener, done_tx)));
        *self.loop_done.lock().unwrap() = Some(done_rx);

        debug!(emitter = %self.inner.config.name, "Emit loop started.");
        Ok(())
    }

    async fn stop(&self, timeout: Duration, run_in_background: bool) {
        self.inner.stopping.store(true, Release);
        self.inner.wakeup.notify_one();

        let done_rx = self.loop_done.lock().unwrap().take();
        let loop_handle = self.loop_handle.lock().unwrap().take();
        let wait = wait_for_drain(Arc::clone(&self.inner), done_rx, loop_handle, timeout);

        if run_in_background {
            tokio::spawn(wait);
        } else {
            wait.await;
        }
    }
}

async fn wait_for_drain<I>(
    inner: Arc<Inner<I>>, done_rx: Option<oneshot::Receiver<()>>, loop_handle: Option<JoinHandle<()>>,
    flush_timeout: Duration,
) where
    I: Send + 'static,
{
    if let Some(mut done_rx) = done_rx {
        let poll_interval = inner.config.shutdown_poll_interval;
        let deadline = Instant::now() + flush_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    emitter = %inner.config.name,
                    pending = inner.pending.load(Acquire),
                    "Shutdown flush timed out, stopping emit loop."
                );
                break;
            }

            let step = poll_interval.min(deadline - now);
            match timeout(step, &mut done_rx).await {
                Ok(_) => {
                    debug!(emitter = %inner.config.name, "Emit loop flushed and stopped.");
                    break;
                }
                Err(_) => info!(
                    emitter = %inner.config.name,
                    pending = inner.pending.load(Acquire),
                    "Waiting for emit loop to flush pending items before shutdown."
                ),
            }
        }
    }

    if let Some(loop_handle) = loop_handle {
        loop_handle.abort();
    }
}

async fn run_emit_loop<I>(inner: Arc<Inner<I>>, listener: Arc<dyn BatchListener<I>>, done: oneshot::Sender<()>)
where
    I: Send + 'static,
{
    let batch_size = inner.config.batch_size;
    let interval = inner.config.delivery_interval;
    let mut last_emit = Instant::now();

    loop {
        let _ = timeout(interval, inner.wakeup.notified()).await;
        let stopping = inner.stopping.load(Acquire);

        while inner.pending.load(Acquire) >= batch_size {
            emit(&inner, &*listener, batch_size);
            last_emit = Instant::now();
        }

        // Emit a partial batch only once the delivery interval has passed, so that a steady
        // producer gets full batches instead of a trickle of small ones.
        if inner.pending.load(Acquire) > 0 && (stopping || last_emit.elapsed() >= interval) {
            emit(&inner, &*listener, inner.pending.load(Acquire));
            last_emit = Instant::now();
        }

        if stopping {
            break;
        }
    }

    debug!(emitter = %inner.config.name, "Emit loop stopped.");
    let _ = done.send(());
}

fn emit<I>(inner: &Inner<I>, listener: &dyn BatchListener<I>, count: usize) {
    let mut builder = BatchBuilder::with_capacity(count);
    for _ in 0..count {
        // The pending count is incremented after the push, so the queue always holds at least
        // as many items as the count we were asked to emit.
        match inner.queue.pop() {
            Some(item) => builder.add(item),
            None => break,
        }
    }

    let taken = builder.len();
    if taken == 0 {
        return;
    }
    inner.pending.fetch_sub(taken, AcqRel);

    inner.telemetry.batches_emitted.increment(1);
    inner.telemetry.items_emitted.increment(taken as u64);

    match listener.on_batch(builder.build()) {
        Ok(dispatched) => {
            if !dispatched {
                debug!(emitter = %inner.config.name, items = taken, "Listener did not dispatch batch.");
            }
        }
        Err(e) => {
            // The batch is considered attempted; redelivery is the listener's and the failover
            // policy's responsibility, not the emitter's.
            inner.telemetry.listener_failures.increment(1);
            error!(emitter = %inner.config.name, error = %e, items = taken, "Listener failed, batch dropped.");
        }
    }
}
