use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use herald_queue::QueuedMessage;
use tracing::error;

type RecordHook = Arc<dyn Fn(&QueuedMessage) + Send + Sync>;
type FailureHook = Arc<dyn Fn(&QueuedMessage, &str) + Send + Sync>;

/// Notifications raised by the processor after each attempt.
///
/// Each hook receives the record as it stands after the attempt was
/// persisted. Hooks run on the processor's task, so they should return
/// quickly. A hook that panics is logged and otherwise ignored.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_sent: Option<RecordHook>,
    on_failed: Option<FailureHook>,
    on_dead: Option<RecordHook>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_sent(mut self, hook: impl Fn(&QueuedMessage) + Send + Sync + 'static) -> Self {
        self.on_sent = Some(Arc::new(hook));
        self
    }

    /// Called when an attempt fails and the message will be retried.
    #[must_use]
    pub fn on_failed(
        mut self,
        hook: impl Fn(&QueuedMessage, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_failed = Some(Arc::new(hook));
        self
    }

    /// Called when a message runs out of attempts.
    #[must_use]
    pub fn on_dead(mut self, hook: impl Fn(&QueuedMessage) + Send + Sync + 'static) -> Self {
        self.on_dead = Some(Arc::new(hook));
        self
    }

    pub(crate) fn sent(&self, record: &QueuedMessage) {
        if let Some(hook) = &self.on_sent {
            guarded("on_sent", record, || hook(record));
        }
    }

    pub(crate) fn failed(&self, record: &QueuedMessage, error: &str) {
        if let Some(hook) = &self.on_failed {
            guarded("on_failed", record, || hook(record, error));
        }
    }

    pub(crate) fn dead(&self, record: &QueuedMessage) {
        if let Some(hook) = &self.on_dead {
            guarded("on_dead", record, || hook(record));
        }
    }
}

fn guarded(name: &str, record: &QueuedMessage, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!(message_id = %record.id, "{name} callback panicked");
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_sent", &self.on_sent.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .field("on_dead", &self.on_dead.is_some())
            .finish()
    }
}
