use std::path::{Path, PathBuf};

use anyhow::Context;
use herald_common::LoggingConfig;
use herald_delivery::{ChatConfig, ProcessorConfig, SmtpConfig};
use herald_queue::QueueConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Locations tried, in order, when neither `--config` nor `HERALD_CONFIG` is
/// given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./herald.config.ron", "/etc/herald/herald.config.ron"];

/// Top level configuration.
///
/// ```ron
/// Herald (
///     queue: (path: "/var/lib/herald/queue.json"),
///     processor: (interval_ms: 5000),
///     logging: (level: Some("info")),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Herald {
    pub queue: QueueConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Herald {
    /// Parses a configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        ron::from_str(content).context("Invalid configuration")
    }

    /// Reads and parses the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("In {}", path.display()))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit`, usually from `--config`
/// 2. `HERALD_CONFIG` environment variable
/// 3. ./herald.config.ron (current working directory)
/// 4. /etc/herald/herald.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if an explicitly named file does not exist, or if none
/// of the default locations hold one.
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let named = explicit
        .map(|path| (path, "--config"))
        .or_else(|| std::env::var_os(CONFIG_ENV).map(|path| (PathBuf::from(path), CONFIG_ENV)));

    if let Some((path, source)) = named {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{source} points to non-existent file: {}", path.display());
    }

    if let Some(path) = DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
    {
        return Ok(path);
    }

    let paths_tried = DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
