use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Identifier for a queued message.
///
/// A ULID: unique, never reused, and lexicographically sortable by creation
/// time, so ordering by id is ordering by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(ulid::Ulid);

impl MessageId {
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|_| QueueError::InvalidId(s.to_string()))
    }
}

/// The delivery channel for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Chat,
    Email,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chat => "chat",
            Self::Email => "email",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting for its first attempt or for its retry time.
    Pending,
    /// An attempt is in flight.
    Processing,
    Sent,
    /// Reserved for reporting; no transition produces it.
    Failed,
    /// Out of attempts. Only a manual retry revives it.
    Dead,
}

impl MessageStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Sent,
        Self::Failed,
        Self::Dead,
    ];

    /// `true` once no further delivery attempt will happen on its own.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Dead => "dead",
        })
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown status '{s}'"))
    }
}

/// A file carried by a message. Stored on disk as base64 text.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    #[serde(rename = "contentBase64", with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Guessed from the filename extension when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content", &format_args!("<{} bytes>", self.content.len()))
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// A chat message for a bot API.
///
/// A photo takes precedence over a document; either one is sent with `text`
/// as its caption. Without either, `text` is sent as a plain message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Attachment>,
}

/// An email submitted through an authenticating SMTP relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Header value; may carry a display name, e.g. `Herald <noreply@example.com>`.
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl EmailPayload {
    /// The bare address for `MAIL FROM`: the part inside `<...>` of `from`
    /// when present, otherwise `from` itself.
    #[must_use]
    pub fn envelope_sender(&self) -> &str {
        self.from
            .split_once('<')
            .and_then(|(_, rest)| rest.split_once('>'))
            .map_or(self.from.as_str(), |(address, _)| address)
            .trim()
    }
}

/// What to deliver, keyed by channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Chat(ChatPayload),
    Email(EmailPayload),
}

impl Payload {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Chat(_) => MessageKind::Chat,
            Self::Email(_) => MessageKind::Email,
        }
    }

    /// Rejects payloads that could never be delivered.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidPayload` describing the first problem.
    pub fn validate(&self) -> Result<(), QueueError> {
        match self {
            Self::Chat(chat) => {
                require("botToken", &chat.bot_token)?;
                require("chatId", &chat.chat_id)?;

                let has_text = chat.text.as_deref().is_some_and(|t| !t.trim().is_empty());
                if !has_text && chat.photo.is_none() && chat.document.is_none() {
                    return Err(QueueError::InvalidPayload(
                        "chat message needs text, a photo or a document".to_string(),
                    ));
                }

                chat.photo.iter().chain(&chat.document).try_for_each(validate_attachment)
            }
            Self::Email(email) => {
                require("host", &email.host)?;
                require("from", &email.from)?;
                require("to", &email.to)?;

                if email.port == 0 {
                    return Err(QueueError::InvalidPayload("port must not be 0".to_string()));
                }

                for (name, value) in [
                    ("from", &email.from),
                    ("to", &email.to),
                    ("subject", &email.subject),
                ] {
                    if value.contains(['\r', '\n']) {
                        return Err(QueueError::InvalidPayload(format!(
                            "{name} must be a single line"
                        )));
                    }
                }

                if !email.to.contains('@') || email.envelope_sender().is_empty() {
                    return Err(QueueError::InvalidPayload(
                        "from and to must be email addresses".to_string(),
                    ));
                }

                email.attachments.iter().try_for_each(validate_attachment)
            }
        }
    }
}

fn require(name: &str, value: &str) -> Result<(), QueueError> {
    if value.trim().is_empty() {
        Err(QueueError::InvalidPayload(format!("{name} is required")))
    } else {
        Ok(())
    }
}

fn validate_attachment(attachment: &Attachment) -> Result<(), QueueError> {
    require("attachment filename", &attachment.filename)?;

    if attachment
        .content_type
        .as_deref()
        .is_some_and(|content_type| content_type.contains(['\r', '\n']))
    {
        return Err(QueueError::InvalidPayload(
            "attachment content type must be a single line".to_string(),
        ));
    }

    Ok(())
}

/// A message and its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: MessageId,
    pub payload: Payload,
    pub status: MessageStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueuedMessage {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// `true` when the message may be attempted at `now`.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Pending && self.next_retry_at.is_none_or(|at| at <= now)
    }
}

/// Message counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
    pub dead: usize,
}

impl QueueStats {
    pub(crate) const fn count(&mut self, status: MessageStatus) {
        self.total += 1;
        match status {
            MessageStatus::Pending => self.pending += 1,
            MessageStatus::Processing => self.processing += 1,
            MessageStatus::Sent => self.sent += 1,
            MessageStatus::Failed => self.failed += 1,
            MessageStatus::Dead => self.dead += 1,
        }
    }

    /// Number of messages with `status`.
    #[must_use]
    pub const fn with_status(&self, status: MessageStatus) -> usize {
        match status {
            MessageStatus::Pending => self.pending,
            MessageStatus::Processing => self.processing,
            MessageStatus::Sent => self.sent,
            MessageStatus::Failed => self.failed,
            MessageStatus::Dead => self.dead,
        }
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.trim()).map_err(D::Error::custom)
    }
}
