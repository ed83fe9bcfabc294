use std::time::Duration;

use async_trait::async_trait;
use herald_common::internal;
use herald_queue::{Attachment, ChatPayload, Payload};
use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};

use super::Deliver;
use crate::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL of the bot API.
    ///
    /// Default: `https://api.telegram.org`
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Timeout for a whole request, including the upload.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

mod defaults {
    pub fn api_base() -> String {
        "https://api.telegram.org".to_string()
    }

    pub const fn timeout_secs() -> u64 {
        30
    }
}

/// Which upload method a file goes through.
#[derive(Debug, Clone, Copy)]
enum Upload {
    Photo,
    Document,
}

impl Upload {
    const fn method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Document => "sendDocument",
        }
    }

    const fn field(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }

    /// Media type for the file part: explicit, else guessed from the
    /// filename, else the method's fallback.
    fn content_type(self, attachment: &Attachment) -> String {
        if let Some(content_type) = &attachment.content_type {
            return content_type.clone();
        }

        let guessed = herald_smtp::guess_content_type(&attachment.filename);
        match self {
            Self::Photo if !guessed.starts_with("image/") => "image/jpeg",
            _ => guessed,
        }
        .to_string()
    }
}

/// Sends chat payloads through a Telegram style bot API.
///
/// A photo is sent with `sendPhoto`, otherwise a document with
/// `sendDocument`, each with the text as caption. A payload with only text
/// goes through `sendMessage`. Only `200 OK` counts as delivered.
#[derive(Debug, Clone)]
pub struct ChatAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl ChatAdapter {
    /// # Errors
    ///
    /// Returns `DeliveryError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ChatConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token, method)
    }

    async fn send_message(&self, chat: &ChatPayload, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.method_url(&chat.bot_token, "sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat.chat_id,
                "text": text,
            }))
            .send()
            .await?;

        check(response).await
    }

    async fn send_file(
        &self,
        chat: &ChatPayload,
        upload: Upload,
        attachment: &Attachment,
    ) -> Result<(), DeliveryError> {
        let part = Part::bytes(attachment.content.clone())
            .file_name(attachment.filename.clone())
            .mime_str(&upload.content_type(attachment))
            .map_err(|e| DeliveryError::InvalidPayload(format!("bad media type: {e}")))?;

        let mut form = Form::new().text("chat_id", chat.chat_id.clone());
        if let Some(caption) = chat.text.as_ref().filter(|text| !text.is_empty()) {
            form = form.text("caption", caption.clone());
        }
        form = form.part(upload.field(), part);

        let response = self
            .client
            .post(self.method_url(&chat.bot_token, upload.method()))
            .multipart(form)
            .send()
            .await?;

        check(response).await
    }
}

async fn check(response: reqwest::Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Deliver for ChatAdapter {
    async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        let Payload::Chat(chat) = payload else {
            return Err(DeliveryError::InvalidPayload(format!(
                "chat adapter cannot send {} messages",
                payload.kind()
            )));
        };

        if let Some(photo) = &chat.photo {
            internal!(level = DEBUG, "Sending photo {} to chat {}", photo.filename, chat.chat_id);
            return self.send_file(chat, Upload::Photo, photo).await;
        }

        if let Some(document) = &chat.document {
            internal!(
                level = DEBUG,
                "Sending document {} to chat {}",
                document.filename,
                chat.chat_id
            );
            return self.send_file(chat, Upload::Document, document).await;
        }

        match chat.text.as_deref() {
            Some(text) if !text.is_empty() => {
                internal!(level = DEBUG, "Sending message to chat {}", chat.chat_id);
                self.send_message(chat, text).await
            }
            _ => Err(DeliveryError::InvalidPayload(
                "chat message has nothing to send".to_string(),
            )),
        }
    }
}
