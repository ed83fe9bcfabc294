use std::sync::Arc;

use herald_common::{internal, logging};
use herald_delivery::{Adapters, Callbacks, ProcessSummary, QueueProcessor, SharedQueue};
use herald_queue::DurableQueue;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::Herald;

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

/// Callbacks that report each outcome through the log.
fn logging_callbacks() -> Callbacks {
    Callbacks::new()
        .on_sent(|record| {
            info!(message_id = %record.id, kind = %record.kind(), "Delivered");
        })
        .on_failed(|record, reason| {
            warn!(
                message_id = %record.id,
                attempts = record.attempts,
                max_attempts = record.max_attempts,
                "Delivery failed, will retry: {reason}"
            );
        })
        .on_dead(|record| {
            error!(
                message_id = %record.id,
                attempts = record.attempts,
                "Giving up: {}",
                record.error.as_deref().unwrap_or("unknown error")
            );
        })
}

impl Herald {
    /// Opens the queue this configuration points at, holding its lock until
    /// the returned queue is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if another process has the queue open, or if the
    /// snapshot exists but cannot be read.
    pub fn open_queue(&self) -> anyhow::Result<SharedQueue> {
        let queue = DurableQueue::open(&self.queue)?;
        Ok(Arc::new(Mutex::new(queue)))
    }

    /// Reads the queue without locking it, for inspection while a processor
    /// may be running.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read.
    pub fn inspect_queue(&self) -> anyhow::Result<DurableQueue> {
        Ok(DurableQueue::open_read_only(&self.queue)?)
    }

    /// Builds a processor over `queue` with the standard adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if an adapter cannot be constructed.
    pub fn processor(&self, queue: SharedQueue) -> anyhow::Result<QueueProcessor> {
        let adapters = Adapters::standard(&self.chat, &self.smtp)?;

        Ok(QueueProcessor::new(queue, adapters, &self.processor).with_callbacks(logging_callbacks()))
    }

    /// Delivers every eligible message once and returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be opened or persisted.
    pub async fn flush(&self) -> anyhow::Result<ProcessSummary> {
        let processor = self.processor(self.open_queue()?)?;
        Ok(processor.process_all().await?)
    }

    /// Run the processor until the process is asked to stop.
    ///
    /// # Errors
    ///
    /// This function will return an error if the queue cannot be opened or the
    /// signal handlers cannot be installed.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init(&self.logging);

        let queue = self.open_queue()?;
        {
            let stats = queue.lock().stats();
            internal!(
                level = INFO,
                "Opened queue at {} ({} pending, {} dead)",
                self.queue.path.display(),
                stats.pending,
                stats.dead
            );
        }

        let processor = self.processor(queue)?;
        processor.start(self.processor.interval());

        internal!("Controller running");

        let ret = shutdown().await;

        internal!("Shutting down...");
        processor.stop_and_wait().await;
        internal!(level = INFO, "Queue processor stopped");

        ret
    }
}
