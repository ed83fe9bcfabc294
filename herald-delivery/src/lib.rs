//! Delivery for herald: the channel adapters and the processor that feeds
//! queued messages to them.

pub mod adapter;
mod error;
pub mod processor;

pub use adapter::{Adapters, ChatAdapter, ChatConfig, Deliver, EmailAdapter, SmtpConfig};
pub use error::DeliveryError;
pub use processor::{
    Callbacks, CycleOutcome, Outcome, ProcessSummary, ProcessorConfig, QueueProcessor, SharedQueue,
};
