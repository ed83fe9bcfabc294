//! Email message builder with support for MIME attachments.

use std::{fmt::Write, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::Rng;

use super::error::{ClientError, Result};

/// Width of base64 body lines in attachment parts.
const BASE64_LINE_WIDTH: usize = 76;

/// A file carried in a multipart message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttachment {
    pub filename: String,
    /// Guessed from the filename when absent.
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Builds the text of a message: headers, a blank line, then the body.
///
/// Messages without attachments are a single `text/plain` part. With
/// attachments the message becomes `multipart/mixed`, with the body as the
/// first part and each attachment base64 encoded after it.
///
/// ```
/// use herald_smtp::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("Herald <noreply@example.com>")
///     .to("someone@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("Subject: Hello\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    attachments: Vec<MessageAttachment>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header, verbatim (a display name is allowed).
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Sets the single recipient.
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn attach(mut self, attachment: MessageAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn attachments(mut self, attachments: impl IntoIterator<Item = MessageAttachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    /// Builds the final message text.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Builder` if the sender or recipient is missing,
    /// or if a header value contains a line break.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::Builder("missing sender".to_string()))?;
        let to = self
            .to
            .as_deref()
            .ok_or_else(|| ClientError::Builder("missing recipient".to_string()))?;
        let subject = self.subject.as_deref().unwrap_or_default();

        for (name, value) in [("From", from), ("To", to), ("Subject", subject)] {
            if value.contains(['\r', '\n']) {
                return Err(ClientError::Builder(format!(
                    "{name} header contains a line break"
                )));
            }
        }

        let mut message = String::with_capacity(1024);
        push_fmt(&mut message, format_args!("From: {from}\r\n"));
        push_fmt(&mut message, format_args!("To: <{to}>\r\n"));
        push_fmt(&mut message, format_args!("Subject: {subject}\r\n"));
        push_fmt(
            &mut message,
            format_args!("Date: {}\r\n", chrono::Utc::now().to_rfc2822()),
        );
        message.push_str("MIME-Version: 1.0\r\n");

        let body = self.body.as_deref().unwrap_or_default();

        if self.attachments.is_empty() {
            message.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
            message.push_str(body);
            return Ok(message);
        }

        let boundary = generate_boundary();
        push_fmt(
            &mut message,
            format_args!("Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n"),
        );
        message.push_str("\r\nThis is a multi-part message in MIME format.\r\n");

        push_fmt(&mut message, format_args!("\r\n--{boundary}\r\n"));
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
        message.push_str(body);
        message.push_str("\r\n");

        for attachment in &self.attachments {
            let content_type = attachment
                .content_type
                .as_deref()
                .unwrap_or_else(|| guess_content_type(&attachment.filename));
            if content_type.contains(['\r', '\n']) {
                return Err(ClientError::Builder(format!(
                    "Content-Type of {} contains a line break",
                    attachment.filename
                )));
            }
            let filename = attachment.filename.replace(['"', '\r', '\n'], "");

            push_fmt(&mut message, format_args!("\r\n--{boundary}\r\n"));
            push_fmt(
                &mut message,
                format_args!("Content-Type: {content_type}; name=\"{filename}\"\r\n"),
            );
            push_fmt(
                &mut message,
                format_args!("Content-Disposition: attachment; filename=\"{filename}\"\r\n"),
            );
            message.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
            message.push_str(&base64_wrapped(&attachment.data));
        }

        push_fmt(&mut message, format_args!("\r\n--{boundary}--\r\n"));

        Ok(message)
    }
}

fn push_fmt(message: &mut String, args: std::fmt::Arguments<'_>) {
    // Writing into a String cannot fail.
    let _ = message.write_fmt(args);
}

/// A boundary with 128 random bits, so it cannot plausibly occur in a part.
fn generate_boundary() -> String {
    format!("----=_Part_{:032x}", rand::rng().random::<u128>())
}

/// Base64 encodes `data`, one CRLF terminated line per 76 characters.
fn base64_wrapped(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH * 2 + 2);

    for chunk in encoded.as_bytes().chunks(BASE64_LINE_WIDTH) {
        // The base64 alphabet is ASCII.
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }

    wrapped
}

/// Guesses a media type from a filename's extension.
#[must_use]
pub fn guess_content_type(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "rar" => "application/x-rar-compressed",
        _ => "application/octet-stream",
    }
}
