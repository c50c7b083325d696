//! # Logging & Tracing Infrastructure
//!
//! Structured logging built on the `tracing` crate.
//!
//! ## Overview
//!
//! Configures the `tracing-subscriber` stack for the vault process. Output
//! format and level come from an explicit [`LoggingConfig`] handed in by the
//! host; the `RUST_LOG` environment variable still wins when set, so
//! operators can raise verbosity per module without a config change.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! init_logging(LoggingConfig::default().with_format(LogFormat::Json))?;
//! tracing::info!("vault started");
//! ```

use crate::error::{Error, Result};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact format for production
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default directive applied when `RUST_LOG` is unset (e.g. `"info"`,
    /// `"core_sync=debug,info"`)
    pub default_directive: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_directive: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the directive used when `RUST_LOG` is unset.
    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Calling this twice returns an error from the underlying registry; tests
/// that need a subscriber should use `tracing::subscriber::with_default`
/// instead.
///
/// # Errors
///
/// Returns [`Error::Logging`] when the filter directive cannot be parsed or a
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_directive))
        .map_err(|e| Error::Logging(format!("invalid filter directive: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty())
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?,
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?,
        LogFormat::Compact => registry
            .with(fmt::layer().compact())
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?,
    }

    tracing::debug!(format = ?config.format, "logging initialized");
    Ok(())
}
