//! herald: a durable outbound notification queue.
//!
//! Messages are accepted into a snapshot-backed queue and delivered in the
//! background over chat (bot API) or email (SMTP), with exponential backoff
//! and dead-lettering. This crate ties the pieces together behind a single
//! RON configuration file.

pub mod config;
pub mod controller;

pub use config::{Herald, find_config_file};
