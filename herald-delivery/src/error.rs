//! Errors from a single delivery attempt.
//!
//! Every variant is treated as transient by the processor: the message is
//! rescheduled with backoff until it runs out of attempts.

use std::time::Duration;

use herald_queue::MessageKind;
use herald_smtp::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Smtp(#[from] ClientError),

    /// The HTTP request could not be made or its response not read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with something other than `200 OK`.
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The attempt did not finish within the delivery timeout.
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The payload cannot be sent by the adapter it was routed to.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No adapter registered for {0} messages")]
    NoAdapter(MessageKind),

    /// The adapter panicked during the attempt.
    #[error("Adapter panicked: {0}")]
    Panicked(String),
}

impl DeliveryError {
    /// The SMTP reply code or HTTP status behind this failure, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Smtp(err) => err.code(),
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_conversion_keeps_message() {
        let err = DeliveryError::from(ClientError::UnexpectedReply {
            step: "AUTH LOGIN password",
            expected: 235,
            code: 535,
            reply: "535 5.7.8 Bad credentials".to_string(),
        });

        assert_eq!(err.status(), Some(535));
        assert!(err.to_string().contains("AUTH LOGIN password"));
        assert!(err.to_string().contains("535 5.7.8 Bad credentials"));
    }

    #[test]
    fn test_rejected_status() {
        let err = DeliveryError::Rejected {
            status: 403,
            body: "Forbidden".to_string(),
        };
        assert_eq!(err.status(), Some(403));
        assert_eq!(DeliveryError::NoAdapter(MessageKind::Chat).status(), None);
    }
}
