//! Tracing setup for hosts embedding memtrust.
//!
//! [`TelemetryConfig`] is part of [`TrustConfig`](crate::config::TrustConfig),
//! so a host that loads its trust settings from TOML or `MEMTRUST_*`
//! variables gets its log format and filter from the same place:
//!
//! ```ignore
//! let config = TrustConfig::from_env()?;
//! telemetry::init_tracing(&config.telemetry)?;
//! ```
//!
//! `RUST_LOG`, when set and valid, overrides the configured filter.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{TrustError, TrustResult};

/// Filter used when neither the config nor `RUST_LOG` names one.
pub const DEFAULT_FILTER: &str = "memtrust_core=info,memtrust_merge=info,memtrust_state=warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    /// Newline-delimited JSON, one object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TrustError;

    fn from_str(s: &str) -> TrustResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TrustError::invalid(format!("unknown log format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `memtrust_merge=debug`.
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn json() -> Self {
        Self {
            format: LogFormat::Json,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Parse the configured directives, ignoring `RUST_LOG`.
    pub fn configured_filter(&self) -> TrustResult<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| TrustError::invalid(format!("telemetry.filter {:?}: {e}", self.filter)))
    }

    fn effective_filter(&self) -> TrustResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => self.configured_filter(),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Returns `Ok(false)` when a global subscriber was already installed; the
/// existing one stays in place. A malformed filter is a validation error.
pub fn init_tracing(config: &TelemetryConfig) -> TrustResult<bool> {
    let filter = config.effective_filter()?;
    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };
    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(TelemetryConfig::default().configured_filter().is_ok());
    }

    #[test]
    fn test_bad_filter_is_rejected() {
        let config = TelemetryConfig::default().with_filter("memtrust_core=loud");
        assert!(matches!(
            config.configured_filter(),
            Err(TrustError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let config = TelemetryConfig::json().with_filter("memtrust_core=debug");
        let first = init_tracing(&config).unwrap();
        let second = init_tracing(&config).unwrap();
        assert!(!(first && second));
        tracing::info!("still alive");
    }
}
