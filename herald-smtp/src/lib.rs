//! Outbound SMTP for herald.
//!
//! A [`Session`] drives a single authenticated submission over an already
//! established stream, checking every reply against the code the protocol
//! requires at that step. [`MessageBuilder`] produces the message text and
//! [`connect_tls`] opens the implicitly encrypted stream a session runs over.

mod connection;
mod error;
mod message;
mod response;
mod session;

pub use connection::connect_tls;
pub use error::{ClientError, Result};
pub use message::{MessageAttachment, MessageBuilder, guess_content_type};
pub use session::{Credentials, Envelope, Session};
