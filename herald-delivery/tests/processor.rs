//! Queue processor driving fake adapters over a real snapshot-backed queue.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_delivery::{
    Adapters, Callbacks, CycleOutcome, Deliver, DeliveryError, Outcome, ProcessSummary,
    ProcessorConfig, QueueProcessor, SharedQueue,
};
use herald_queue::{
    ChatPayload, DurableQueue, MessageKind, MessageStatus, Payload, QueueConfig,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

/// Fails every attempt with a 421 style rejection.
#[derive(Default)]
struct AlwaysFails {
    calls: AtomicUsize,
}

#[async_trait]
impl Deliver for AlwaysFails {
    async fn deliver(&self, _payload: &Payload) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::Rejected {
            status: 421,
            body: "try again later".to_string(),
        })
    }
}

/// Records the text of every chat payload it is given.
#[derive(Default, Clone)]
struct Records {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Deliver for Records {
    async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        if let Payload::Chat(chat) = payload {
            self.sent.lock().push(chat.text.clone().unwrap_or_default());
        }
        Ok(())
    }
}

/// Never finishes.
struct Hangs;

#[async_trait]
impl Deliver for Hangs {
    async fn deliver(&self, _payload: &Payload) -> Result<(), DeliveryError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Panics part way through every attempt.
struct Panics;

#[async_trait]
impl Deliver for Panics {
    async fn deliver(&self, _payload: &Payload) -> Result<(), DeliveryError> {
        tokio::task::yield_now().await;
        panic!("adapter blew up");
    }
}

/// Signals when an attempt starts, then waits to be released.
#[derive(Default, Clone)]
struct Gate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Deliver for Gate {
    async fn deliver(&self, _payload: &Payload) -> Result<(), DeliveryError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

fn shared_queue(path: &Path, max_attempts: u32) -> SharedQueue {
    let config = QueueConfig {
        max_attempts,
        base_retry_delay_ms: 0,
        ..QueueConfig::new(path)
    };
    Arc::new(Mutex::new(DurableQueue::open(&config).unwrap()))
}

fn chat(text: &str) -> Payload {
    Payload::Chat(ChatPayload {
        bot_token: "123:abc".to_string(),
        chat_id: "42".to_string(),
        text: Some(text.to_string()),
        photo: None,
        document: None,
    })
}

fn processor(queue: &SharedQueue, adapters: Adapters) -> QueueProcessor {
    QueueProcessor::new(Arc::clone(queue), adapters, &ProcessorConfig::default())
}

#[tokio::test]
async fn test_always_failing_adapter_dead_letters_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let id = queue.lock().add(chat("hello"), None).unwrap();

    let failed = Arc::new(AtomicUsize::new(0));
    let dead = Arc::new(AtomicUsize::new(0));
    let last_error = Arc::new(Mutex::new(String::new()));

    let callbacks = Callbacks::new()
        .on_failed({
            let failed = Arc::clone(&failed);
            let last_error = Arc::clone(&last_error);
            move |_, error| {
                failed.fetch_add(1, Ordering::SeqCst);
                *last_error.lock() = error.to_string();
            }
        })
        .on_dead({
            let dead = Arc::clone(&dead);
            move |record| {
                assert_eq!(record.status, MessageStatus::Dead);
                dead.fetch_add(1, Ordering::SeqCst);
            }
        });

    let processor = processor(
        &queue,
        Adapters::new().with(MessageKind::Chat, AlwaysFails::default()),
    )
    .with_callbacks(callbacks);

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(processor.process_cycle().await.unwrap());
    }

    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::Delivered(Outcome::Failed),
            CycleOutcome::Delivered(Outcome::Failed),
            CycleOutcome::Delivered(Outcome::Dead),
        ]
    );
    assert_eq!(failed.load(Ordering::SeqCst), 2);
    assert_eq!(dead.load(Ordering::SeqCst), 1);
    assert!(last_error.lock().contains("421"));

    let record = queue.lock().get(&id).cloned().unwrap();
    assert_eq!(record.status, MessageStatus::Dead);
    assert_eq!(record.attempts, 3);

    assert_eq!(processor.process_cycle().await.unwrap(), CycleOutcome::Idle);
}

#[tokio::test]
async fn test_process_all_sends_every_eligible_message() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let first = queue.lock().add(chat("first"), None).unwrap();
    let second = queue.lock().add(chat("second"), None).unwrap();

    let sent = Arc::new(AtomicUsize::new(0));
    let adapter = Records::default();
    let processor = processor(&queue, Adapters::new().with(MessageKind::Chat, adapter.clone()))
        .with_callbacks(Callbacks::new().on_sent({
            let sent = Arc::clone(&sent);
            move |_| {
                sent.fetch_add(1, Ordering::SeqCst);
            }
        }));

    let summary = processor.process_all().await.unwrap();

    assert_eq!(summary, ProcessSummary { sent: 2, failed: 0 });
    assert_eq!(sent.load(Ordering::SeqCst), 2);
    assert_eq!(*adapter.sent.lock(), vec!["first", "second"]);

    let queue = queue.lock();
    assert_eq!(queue.status(&first), Some(MessageStatus::Sent));
    assert_eq!(queue.status(&second), Some(MessageStatus::Sent));
    assert!(queue.get(&first).unwrap().completed_at.is_some());
}

#[tokio::test]
async fn test_process_all_counts_each_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 2);
    queue.lock().add(chat("doomed"), None).unwrap();

    let processor = processor(
        &queue,
        Adapters::new().with(MessageKind::Chat, AlwaysFails::default()),
    );

    let summary = processor.process_all().await.unwrap();

    assert_eq!(summary, ProcessSummary { sent: 0, failed: 2 });
    assert_eq!(queue.lock().stats().dead, 1);
}

#[tokio::test]
async fn test_empty_queue_is_idle() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let processor = processor(&queue, Adapters::new());

    assert_eq!(processor.process_cycle().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(
        processor.process_all().await.unwrap(),
        ProcessSummary::default()
    );
}

#[tokio::test]
async fn test_missing_adapter_is_a_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let id = queue.lock().add(chat("nobody home"), None).unwrap();

    let processor = processor(&queue, Adapters::new());
    let outcome = processor.process_cycle().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Delivered(Outcome::Failed));

    let record = queue.lock().get(&id).cloned().unwrap();
    assert_eq!(record.status, MessageStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert_eq!(
        record.error.as_deref(),
        Some("No adapter registered for chat messages")
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_delivery_times_out_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let id = queue.lock().add(chat("stuck"), None).unwrap();

    let processor = QueueProcessor::new(
        Arc::clone(&queue),
        Adapters::new().with(MessageKind::Chat, Hangs),
        &ProcessorConfig {
            delivery_timeout_secs: 1,
            ..ProcessorConfig::default()
        },
    );

    let outcome = processor.process_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Delivered(Outcome::Failed));

    let record = queue.lock().get(&id).cloned().unwrap();
    assert_eq!(record.status, MessageStatus::Pending);
    assert!(record.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_overlapping_cycle_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let first = queue.lock().add(chat("first"), None).unwrap();
    queue.lock().add(chat("second"), None).unwrap();

    let gate = Gate::default();
    let processor = Arc::new(processor(
        &queue,
        Adapters::new().with(MessageKind::Chat, gate.clone()),
    ));

    let in_flight = tokio::spawn({
        let processor = Arc::clone(&processor);
        async move { processor.process_cycle().await }
    });

    gate.started.notified().await;
    assert_eq!(queue.lock().status(&first), Some(MessageStatus::Processing));
    assert_eq!(processor.process_cycle().await.unwrap(), CycleOutcome::Busy);

    gate.release.notify_one();
    assert_eq!(
        in_flight.await.unwrap().unwrap(),
        CycleOutcome::Delivered(Outcome::Sent)
    );
    assert_eq!(queue.lock().stats().pending, 1);
}

#[tokio::test]
async fn test_panicking_adapter_is_a_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 2);
    let id = queue.lock().add(chat("hello"), None).unwrap();

    let processor = processor(&queue, Adapters::new().with(MessageKind::Chat, Panics));

    assert_eq!(
        processor.process_cycle().await.unwrap(),
        CycleOutcome::Delivered(Outcome::Failed)
    );
    let record = queue.lock().get(&id).cloned().unwrap();
    assert_eq!(record.status, MessageStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert!(record.error.unwrap().contains("adapter blew up"));

    // The worker is free again and the message runs out its attempts.
    assert_eq!(
        processor.process_all().await.unwrap(),
        ProcessSummary { sent: 0, failed: 1 }
    );
    assert_eq!(queue.lock().status(&id), Some(MessageStatus::Dead));
}

#[tokio::test]
async fn test_panicking_callback_does_not_fail_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let id = queue.lock().add(chat("hello"), None).unwrap();

    let processor = processor(
        &queue,
        Adapters::new().with(MessageKind::Chat, Records::default()),
    )
    .with_callbacks(Callbacks::new().on_sent(|_| panic!("listener blew up")));

    assert_eq!(
        processor.process_cycle().await.unwrap(),
        CycleOutcome::Delivered(Outcome::Sent)
    );
    assert_eq!(queue.lock().status(&id), Some(MessageStatus::Sent));
}

#[tokio::test]
async fn test_background_task_delivers_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let queue = shared_queue(&dir.path().join("queue.json"), 3);
    let first = queue.lock().add(chat("first"), None).unwrap();

    let delivered = Arc::new(Notify::new());
    let processor = processor(
        &queue,
        Adapters::new().with(MessageKind::Chat, Records::default()),
    )
    .with_callbacks(Callbacks::new().on_sent({
        let delivered = Arc::clone(&delivered);
        move |_| delivered.notify_one()
    }));

    assert!(!processor.is_running());
    processor.start(Duration::from_millis(10));
    processor.start(Duration::from_millis(10));
    assert!(processor.is_running());

    tokio::time::timeout(Duration::from_secs(5), delivered.notified())
        .await
        .unwrap();
    assert_eq!(queue.lock().status(&first), Some(MessageStatus::Sent));

    let second = queue.lock().add(chat("second"), None).unwrap();
    tokio::time::timeout(Duration::from_secs(5), delivered.notified())
        .await
        .unwrap();
    assert_eq!(queue.lock().status(&second), Some(MessageStatus::Sent));

    processor.stop_and_wait().await;
    assert!(!processor.is_running());

    let third = queue.lock().add(chat("third"), None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.lock().status(&third), Some(MessageStatus::Pending));

    processor.stop();
}
