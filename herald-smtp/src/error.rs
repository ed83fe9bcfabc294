//! Error types for the SMTP session.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A network wait exceeded its configured bound.
    #[error("Timed out during {step}")]
    Timeout { step: &'static str },

    #[error("TLS error: {0}")]
    Tls(String),

    /// The server sent bytes that are not a well formed reply.
    #[error("Failed to parse SMTP reply: {0}")]
    Parse(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// The server answered a step with a code other than the one required.
    #[error("SMTP error at {step}: expected {expected}, got {code}. Full response:\n{reply}")]
    UnexpectedReply {
        step: &'static str,
        expected: u16,
        code: u16,
        reply: String,
    },

    #[error("Invalid message: {0}")]
    Builder(String),
}

impl ClientError {
    /// The reply code the server sent, if the failure came from a reply.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedReply { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
