//! Channel adapters.
//!
//! An adapter turns a [`Payload`] into whatever its channel speaks and runs
//! it to completion. The processor only sees success or a [`DeliveryError`].

mod chat;
mod email;

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use herald_queue::{MessageKind, Payload};

pub use chat::{ChatAdapter, ChatConfig};
pub use email::{EmailAdapter, SmtpConfig};

use crate::DeliveryError;

#[async_trait]
pub trait Deliver: Send + Sync {
    /// Delivers `payload` once.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` describing why the attempt failed.
    async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError>;
}

/// The adapter to use for each kind of message.
#[derive(Clone, Default)]
pub struct Adapters {
    adapters: HashMap<MessageKind, Arc<dyn Deliver>>,
}

impl Adapters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Email over SMTP and chat over the bot API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn standard(chat: &ChatConfig, smtp: &SmtpConfig) -> Result<Self, DeliveryError> {
        Ok(Self::new()
            .with(MessageKind::Chat, ChatAdapter::new(chat)?)
            .with(MessageKind::Email, EmailAdapter::new(smtp.clone())))
    }

    #[must_use]
    pub fn with(mut self, kind: MessageKind, adapter: impl Deliver + 'static) -> Self {
        self.register(kind, Arc::new(adapter));
        self
    }

    /// Registers `adapter` for `kind`, replacing any earlier one.
    pub fn register(&mut self, kind: MessageKind, adapter: Arc<dyn Deliver>) {
        self.adapters.insert(kind, adapter);
    }

    #[must_use]
    pub fn get(&self, kind: MessageKind) -> Option<Arc<dyn Deliver>> {
        self.adapters.get(&kind).cloned()
    }
}

impl fmt::Debug for Adapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.adapters.keys()).finish()
    }
}
