//! The durable message queue.
//!
//! [`DurableQueue`] holds every message herald has been asked to deliver,
//! from the moment a producer adds it until it is removed. Each mutation is
//! written to a JSON snapshot before the call returns, so a restart resumes
//! exactly where the previous process stopped. Messages that were in flight
//! when the process died are offered again, which makes delivery
//! at-least-once.

mod error;
mod queue;
mod retry;
mod store;
mod types;

pub use error::{QueueError, Result};
pub use queue::{DurableQueue, QueueConfig};
pub use retry::RetryPolicy;
pub use store::{SnapshotLock, SnapshotStore};
pub use types::{
    Attachment, ChatPayload, EmailPayload, MessageId, MessageKind, MessageStatus, Payload,
    QueueStats, QueuedMessage,
};
