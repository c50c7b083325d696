//! # Core Runtime
//!
//! Shared configuration and logging for the file vault workspace.
//!
//! - [`config`]: `VaultConfig` builder with fail-fast validation
//! - [`logging`]: `tracing-subscriber` setup with pretty/JSON/compact output

pub mod config;
pub mod error;
pub mod logging;

pub use config::{VaultConfig, VaultConfigBuilder, WatcherSettings};
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat, LoggingConfig};
