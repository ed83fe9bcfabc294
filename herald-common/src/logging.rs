use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Bytes we put on the wire.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Bytes we read off the wire.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Environment variable that overrides the configured level.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// How herald reports what it is doing.
///
/// ```ron
/// logging: (level: Some("debug"), ansi: false)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug` or `trace`.
    ///
    /// Default: `trace` in debug builds, `info` otherwise
    #[serde(default)]
    pub level: Option<String>,

    /// Colour the output.
    ///
    /// Default: true
    #[serde(default = "defaults::ansi")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            ansi: defaults::ansi(),
        }
    }
}

mod defaults {
    pub const fn ansi() -> bool {
        true
    }
}

const fn build_default() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Picks the level filter: `LOG_LEVEL` wins over the configured level, which
/// wins over `default`. A level that does not parse is reported and skipped.
fn resolve_level(
    env: Option<&str>,
    configured: Option<&str>,
    default: LevelFilter,
) -> LevelFilter {
    [(LOG_LEVEL_ENV, env), ("logging.level", configured)]
        .into_iter()
        .filter_map(|(source, level)| level.map(|level| (source, level)))
        .find_map(|(source, level)| {
            LevelFilter::from_str(level.trim())
                .inspect_err(|_| eprintln!("Invalid log level {level:?} in {source}, ignoring it"))
                .ok()
        })
        .unwrap_or(default)
}

/// Install the global subscriber.
///
/// Only events emitted from herald crates are printed. Calling this more than
/// once is harmless; later calls are ignored.
pub fn init(config: &LoggingConfig) {
    let env = std::env::var(LOG_LEVEL_ENV).ok();
    let level = resolve_level(env.as_deref(), config.level.as_deref(), build_default());

    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(config.ansi)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("herald")
                })),
        )
        .try_init();
}
