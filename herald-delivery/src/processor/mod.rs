//! Queue processor
//!
//! Drives the durable queue one message at a time: picks the oldest eligible
//! message, hands it to the adapter registered for its kind, and records the
//! outcome. A background task repeats this on an interval until stopped.

mod callbacks;

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use herald_common::{Signal, internal};
use herald_queue::{DurableQueue, MessageStatus, QueueError, QueuedMessage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

pub use callbacks::Callbacks;

use crate::{DeliveryError, adapter::Adapters};

/// A queue shared between producers and the processor.
///
/// The lock is only ever held for bookkeeping, never across a delivery.
pub type SharedQueue = Arc<Mutex<DurableQueue>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// How often the background task runs a cycle (in milliseconds)
    ///
    /// Default: 5000
    #[serde(default = "defaults::interval_ms")]
    pub interval_ms: u64,

    /// Deadline for a single delivery attempt (in seconds)
    ///
    /// An attempt that overruns it counts as a failed attempt.
    ///
    /// Default: 60
    #[serde(default = "defaults::delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval_ms: defaults::interval_ms(),
            delivery_timeout_secs: defaults::delivery_timeout_secs(),
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

mod defaults {
    pub const fn interval_ms() -> u64 {
        5000
    }

    pub const fn delivery_timeout_secs() -> u64 {
        60
    }
}

/// What happened to a message that was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    /// Failed and rescheduled.
    Failed,
    /// Failed for the last time.
    Dead,
}

/// Result of a single [`QueueProcessor::process_cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle or a drain was already running.
    Busy,
    /// Nothing was eligible.
    Idle,
    Delivered(Outcome),
}

/// Counts from a [`QueueProcessor::process_all`] drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub sent: usize,
    pub failed: usize,
}

struct Inner {
    queue: SharedQueue,
    adapters: Adapters,
    callbacks: Callbacks,
    delivery_timeout: Duration,
    /// Held while a message is being worked on; there is one worker per
    /// processor.
    worker: tokio::sync::Mutex<()>,
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: broadcast::Sender<Signal>,
}

pub struct QueueProcessor {
    inner: Arc<Inner>,
    task: Mutex<Option<Running>>,
}

impl QueueProcessor {
    #[must_use]
    pub fn new(queue: SharedQueue, adapters: Adapters, config: &ProcessorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                adapters,
                callbacks: Callbacks::default(),
                delivery_timeout: config.delivery_timeout(),
                worker: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Replaces the callbacks. Call this before [`Self::start`]; a task that
    /// is already running keeps the callbacks it started with.
    #[must_use]
    pub fn with_callbacks(self, callbacks: Callbacks) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Arc::clone(&self.inner.queue),
                adapters: self.inner.adapters.clone(),
                callbacks,
                delivery_timeout: self.inner.delivery_timeout,
                worker: tokio::sync::Mutex::new(()),
            }),
            task: self.task,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &SharedQueue {
        &self.inner.queue
    }

    /// Spawns the background task, which runs a cycle straight away and then
    /// once every `interval`. Does nothing if the task is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, interval: Duration) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return;
        }

        let (shutdown, receiver) = broadcast::channel(1);
        let handle = tokio::spawn(serve(Arc::clone(&self.inner), interval, receiver));
        *task = Some(Running { handle, shutdown });
    }

    /// Signals the background task to stop. A cycle that is in flight runs
    /// to completion; no further cycles start.
    pub fn stop(&self) {
        if let Some(running) = self.task.lock().take() {
            let _ = running.shutdown.send(Signal::Shutdown);
        }
    }

    /// Like [`Self::stop`], then waits for the background task to exit.
    pub async fn stop_and_wait(&self) {
        let running = self.task.lock().take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(Signal::Shutdown);
        if let Err(e) = running.handle.await {
            error!("Queue processor task failed: {e}");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Attempts at most one eligible message.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the outcome could not be persisted. Delivery
    /// failures are recorded on the message, not returned.
    pub async fn process_cycle(&self) -> Result<CycleOutcome, QueueError> {
        self.inner.process_cycle().await
    }

    /// Attempts eligible messages one after another until none are left,
    /// waiting first for any cycle that is in flight.
    ///
    /// A message whose retry comes due during the drain is attempted again
    /// in the same drain.
    ///
    /// # Errors
    ///
    /// Returns a queue error if an outcome could not be persisted.
    pub async fn process_all(&self) -> Result<ProcessSummary, QueueError> {
        self.inner.process_all().await
    }
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("adapters", &self.inner.adapters)
            .field("callbacks", &self.inner.callbacks)
            .field("delivery_timeout", &self.inner.delivery_timeout)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn process_cycle(&self) -> Result<CycleOutcome, QueueError> {
        let Ok(_worker) = self.worker.try_lock() else {
            return Ok(CycleOutcome::Busy);
        };

        let next = self.queue.lock().get_next_pending();
        let Some(message) = next else {
            return Ok(CycleOutcome::Idle);
        };

        Ok(self
            .process_message(&message)
            .await?
            .map_or(CycleOutcome::Idle, CycleOutcome::Delivered))
    }

    async fn process_all(&self) -> Result<ProcessSummary, QueueError> {
        let _worker = self.worker.lock().await;
        let mut summary = ProcessSummary::default();

        loop {
            let next = self.queue.lock().get_next_pending();
            let Some(message) = next else {
                break;
            };

            match self.process_message(&message).await? {
                Some(Outcome::Sent) => summary.sent += 1,
                Some(Outcome::Failed | Outcome::Dead) => summary.failed += 1,
                None => {}
            }
        }

        Ok(summary)
    }

    /// Runs one attempt for `message`. Returns `None` if the message was no
    /// longer pending when it was claimed.
    async fn process_message(&self, message: &QueuedMessage) -> Result<Option<Outcome>, QueueError> {
        let id = message.id;
        let claimed = self.queue.lock().mark_processing(&id)?;
        if !claimed {
            return Ok(None);
        }

        internal!(
            level = DEBUG,
            "Processing {id} ({} message, attempt {}/{})",
            message.kind(),
            message.attempts + 1,
            message.max_attempts
        );

        match self.attempt(message).await {
            Ok(()) => {
                let record = {
                    let mut queue = self.queue.lock();
                    queue.mark_sent(&id)?;
                    queue.get(&id).cloned()
                };

                info!(message_id = %id, "Message sent");
                if let Some(record) = record {
                    self.callbacks.sent(&record);
                }

                Ok(Some(Outcome::Sent))
            }
            Err(e) => {
                let reason = e.to_string();
                let record = {
                    let mut queue = self.queue.lock();
                    queue.mark_failed(&id, reason.clone())?;
                    queue.get(&id).cloned()
                };

                let Some(record) = record else {
                    return Ok(Some(Outcome::Failed));
                };

                if record.status == MessageStatus::Dead {
                    error!(message_id = %id, error = %reason, "Message moved to dead letters");
                    self.callbacks.dead(&record);
                    Ok(Some(Outcome::Dead))
                } else {
                    warn!(
                        message_id = %id,
                        error = %reason,
                        next_retry_at = ?record.next_retry_at,
                        "Delivery attempt failed"
                    );
                    self.callbacks.failed(&record, &reason);
                    Ok(Some(Outcome::Failed))
                }
            }
        }
    }

    async fn attempt(&self, message: &QueuedMessage) -> Result<(), DeliveryError> {
        let kind = message.kind();
        let Some(adapter) = self.adapters.get(kind) else {
            return Err(DeliveryError::NoAdapter(kind));
        };

        let delivery = AssertUnwindSafe(adapter.deliver(&message.payload)).catch_unwind();

        match tokio::time::timeout(self.delivery_timeout, delivery).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(DeliveryError::Panicked(panic_message(&*panic))),
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn serve(inner: Arc<Inner>, interval: Duration, mut shutdown: broadcast::Receiver<Signal>) {
    internal!("Queue processor starting, polling every {interval:?}");

    let mut timer = tokio::time::interval(interval.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match inner.process_cycle().await {
                    Ok(CycleOutcome::Delivered(outcome)) => {
                        debug!("Processor cycle finished: {outcome:?}");
                    }
                    Ok(CycleOutcome::Busy | CycleOutcome::Idle) => {}
                    Err(e) => {
                        error!("Error processing queue: {e}");
                    }
                }
            }
            sig = shutdown.recv() => {
                match sig {
                    Ok(Signal::Shutdown) => {
                        internal!("Queue processor received shutdown signal");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        internal!("Queue processor handle dropped, shutting down");
                    }
                    Err(e) => {
                        error!("Queue processor shutdown channel error: {e}");
                    }
                }
                break;
            }
        }
    }

    internal!("Queue processor stopped");
}
