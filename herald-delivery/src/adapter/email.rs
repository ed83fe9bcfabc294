use async_trait::async_trait;
use herald_common::{ClientTimeouts, internal};
use herald_queue::{EmailPayload, Payload};
use herald_smtp::{Credentials, Envelope, MessageAttachment, MessageBuilder, Session};
use serde::{Deserialize, Serialize};

use super::Deliver;
use crate::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Name announced in `EHLO`.
    ///
    /// Default: `localhost`
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            helo_name: defaults::helo_name(),
            timeouts: ClientTimeouts::default(),
        }
    }
}

mod defaults {
    pub fn helo_name() -> String {
        "localhost".to_string()
    }
}

/// Sends email payloads through the relay each payload names, over implicit
/// TLS with `AUTH LOGIN`.
#[derive(Debug, Clone, Default)]
pub struct EmailAdapter {
    config: SmtpConfig,
}

impl EmailAdapter {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Builds the message text for `email`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Smtp` if the message cannot be built.
    pub fn build_message(email: &EmailPayload) -> Result<String, DeliveryError> {
        let attachments = email.attachments.iter().map(|attachment| MessageAttachment {
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            data: attachment.content.clone(),
        });

        MessageBuilder::new()
            .from(&email.from)
            .to(&email.to)
            .subject(&email.subject)
            .body(&email.body)
            .attachments(attachments)
            .build()
            .map_err(DeliveryError::from)
    }

    fn envelope(&self, email: &EmailPayload) -> Envelope {
        Envelope {
            helo_name: self.config.helo_name.clone(),
            sender: email.envelope_sender().to_string(),
            recipient: email.to.trim().to_string(),
        }
    }
}

#[async_trait]
impl Deliver for EmailAdapter {
    async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        let Payload::Email(email) = payload else {
            return Err(DeliveryError::InvalidPayload(format!(
                "email adapter cannot send {} messages",
                payload.kind()
            )));
        };

        let message = Self::build_message(email)?;
        let envelope = self.envelope(email);
        let credentials = Credentials {
            username: email.username.clone(),
            password: email.password.clone(),
        };

        internal!(
            level = DEBUG,
            "Submitting email to {} via {}:{}",
            envelope.recipient,
            email.host,
            email.port
        );

        let stream = herald_smtp::connect_tls(&email.host, email.port, &self.config.timeouts).await?;

        Session::new(stream, self.config.timeouts.clone())
            .submit(&credentials, &envelope, &message)
            .await?;

        Ok(())
    }
}
