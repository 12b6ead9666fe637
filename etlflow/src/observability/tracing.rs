//! Tracing subscriber setup.

use std::str::FromStr;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::ConfigError;

/// Environment variable selecting the log format.
pub const LOG_FORMAT_VAR: &str = "ETL_LOG_FORMAT";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Reads the format from [`LOG_FORMAT_VAR`]; absent means pretty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown format name.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(LOG_FORMAT_VAR) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::Pretty),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "plain" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::invalid(
                LOG_FORMAT_VAR,
                format!("unknown log format '{other}'"),
            )),
        }
    }
}

/// Installs the global subscriber: an `EnvFilter` from `RUST_LOG`
/// (default `info`) and a fmt layer in `format`.
///
/// Only the first call installs anything; later calls, or a subscriber
/// installed elsewhere, are left alone.
pub fn init_tracing(format: LogFormat) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        let installed = match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().flatten_event(true).with_target(false))
                .try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        };
        if let Err(err) = installed {
            tracing::debug!(error = %err, "Tracing subscriber already installed");
        }
    });
}
