//! Pieces shared by every herald crate: logging, shutdown signalling and
//! client timeout configuration.

pub mod logging;
pub mod timeouts;

pub use logging::LoggingConfig;
pub use timeouts::ClientTimeouts;
pub use tracing;

/// Broadcast to long running tasks when the process is winding down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
