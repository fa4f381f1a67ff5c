//! Tracing setup shared by the coordinator and front processes.
//!
//! Both processes write to stderr; the front inherits the coordinator's
//! stderr, so their lines interleave in one log. Each process tags its
//! events with a `process` span set up by the caller.
//!
//! # Usage
//!
//! ```ignore
//! use bum_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::default())?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self as fmt_layer, format::FmtSpan},
    prelude::*,
};

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingOutputFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output (default).
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl FromStr for TracingOutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty, compact or json)")),
        }
    }
}

impl fmt::Display for TracingOutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the bum crates when `RUST_LOG` is not set.
    pub default_level: Level,
    pub output_format: TracingOutputFormat,
    /// Include file and line of the call site.
    pub include_location: bool,
    pub include_timestamp: bool,
    /// Log span open/close, useful to time individual requests.
    pub include_span_events: bool,
    /// Explicit filter directive, overriding both `RUST_LOG` and
    /// `default_level`.
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            output_format: TracingOutputFormat::Compact,
            include_location: false,
            include_timestamp: true,
            include_span_events: false,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Debug-level, compact output with call sites.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_location: true,
            ..Self::default()
        }
    }

    /// JSON output with request spans, for running under a supervisor.
    #[must_use]
    pub fn service() -> Self {
        Self {
            output_format: TracingOutputFormat::Json,
            include_location: true,
            include_span_events: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.output_format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter, TracingError> {
        if let Some(ref filter) = self.env_filter {
            return Ok(EnvFilter::try_new(filter)?);
        }
        Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("bum={}", self.default_level))))
    }
}

/// Installs the global subscriber.
///
/// Call once per process, before anything logs.
///
/// # Errors
///
/// Fails if a global subscriber is already set or the filter directive is
/// invalid.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let env_filter = config.filter()?;

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt_layer::layer()
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(span_events);

    let layer = match config.output_format {
        TracingOutputFormat::Pretty => base.pretty().boxed(),
        TracingOutputFormat::Json => base.json().boxed(),
        TracingOutputFormat::Compact if config.include_timestamp => base.compact().boxed(),
        TracingOutputFormat::Compact => base.compact().without_time().boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_compact_info() {
        let config = TracingConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert_eq!(config.output_format, TracingOutputFormat::Compact);
        assert!(config.include_timestamp);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn presets() {
        assert_eq!(TracingConfig::verbose().default_level, Level::DEBUG);
        let service = TracingConfig::service();
        assert_eq!(service.output_format, TracingOutputFormat::Json);
        assert!(service.include_span_events);
    }

    #[test]
    fn builder_methods() {
        let config = TracingConfig::default()
            .with_level(Level::WARN)
            .with_format(TracingOutputFormat::Json)
            .with_env_filter("bum_server=trace");

        assert_eq!(config.default_level, Level::WARN);
        assert_eq!(config.output_format, TracingOutputFormat::Json);
        assert_eq!(config.env_filter.as_deref(), Some("bum_server=trace"));
    }

    #[test]
    fn explicit_filter_wins() {
        let config = TracingConfig::default().with_env_filter("bum_server=trace,bum_front=warn");
        let filter = config.filter().unwrap();
        assert!(filter.to_string().contains("bum_front=warn"));
    }

    #[test]
    fn format_from_str() {
        assert_eq!("JSON".parse::<TracingOutputFormat>(), Ok(TracingOutputFormat::Json));
        assert_eq!("pretty".parse::<TracingOutputFormat>(), Ok(TracingOutputFormat::Pretty));
        assert!("xml".parse::<TracingOutputFormat>().is_err());
    }
}
