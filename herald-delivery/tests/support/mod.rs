//! Test support for the delivery crate.

pub mod bot_api;

pub use bot_api::{BotRequest, MockBotApi};
