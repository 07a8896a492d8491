//! Logging setup for chunknet.
//!
//! Libraries in this workspace only emit `tracing` events. Binaries call
//! [`init_logging`] once at startup; tests call [`init_test_logging`].

use std::{fs::File, path::PathBuf, sync::Arc};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Verbosity applied to the `chunknet` crates.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Subscriber settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level for chunknet targets. Everything else logs at `info`.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Also append to this file.
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Default filter directives when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        format!("info,chunknet={}", self.level)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level. Fails if a subscriber is
/// already installed or the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig) -> eyre::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.directives())
            .wrap_err("invalid log filter directives")?,
    };

    let stdout = fmt::layer().with_ansi(true);
    let stdout = if config.json {
        stdout.json().boxed()
    } else {
        stdout.boxed()
    };

    let file = match &config.log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("failed to open log file {}", path.display()))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Arc::new(file));
            Some(if config.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .with(filter)
        .try_init()
        .wrap_err("failed to install the tracing subscriber")?;
    Ok(())
}

/// Route logs through the test harness's captured output.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LoggingConfig::default().directives()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
