//! # Core Configuration Module
//!
//! Configuration for the file vault and its sync engine.
//!
//! ## Overview
//!
//! `VaultConfig` holds every setting the storage and sync crates need: where
//! the metadata database and the blob directory live, upload limits, and the
//! tuning knobs of the background watcher. Construction goes through a
//! builder that validates fail-fast, so a misconfigured process refuses to
//! start instead of failing on its first upload.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::config::VaultConfig;
//!
//! let config = VaultConfig::builder()
//!     .database_path("/var/lib/vault/vault.db")
//!     .vault_dir("/var/lib/vault/files")
//!     .max_file_size_bytes(100 * 1024 * 1024)
//!     .allowed_extension("*")
//!     .build()?;
//! # Ok::<(), core_runtime::Error>(())
//! ```

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default maximum upload size (50 MB).
const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default extension allow-list applied when none is configured.
const DEFAULT_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "pdf", "txt", "md", "doc", "docx", "xls", "xlsx",
    "zip", "mp3", "mp4",
];

/// Settings for the background change watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSettings {
    /// How often the poller scans for recently modified files
    pub poll_interval: Duration,

    /// How often the retry scheduler scans for due retry items
    pub retry_interval: Duration,

    /// Base interval used by the quadratic retry backoff
    pub retry_base_interval: Duration,

    /// Attempts after which an item stops being retried automatically
    pub max_retry_attempts: u32,

    /// Number of sync worker tasks draining the queue
    pub sync_workers: usize,

    /// Capacity of the bounded sync queue; enqueues beyond it are rejected
    pub queue_capacity: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(10),
            retry_base_interval: Duration::from_secs(60),
            max_retry_attempts: 5,
            sync_workers: 2,
            queue_capacity: 100,
        }
    }
}

/// Configuration for the vault core.
///
/// Use [`VaultConfig::builder`] to construct instances.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Path to the SQLite metadata database
    pub database_path: PathBuf,

    /// Directory holding the content-addressed blobs
    pub vault_dir: PathBuf,

    /// Directory for in-flight temporary files (same filesystem as
    /// `vault_dir` keeps relocation a cheap rename)
    pub temp_dir: PathBuf,

    /// Maximum accepted upload size in bytes
    pub max_file_size_bytes: u64,

    /// Lower-cased extension allow-list; a `"*"` entry admits everything
    pub allowed_extensions: Vec<String>,

    /// Background watcher tuning
    pub watcher: WatcherSettings,
}

impl VaultConfig {
    /// Create a builder with defaults.
    pub fn builder() -> VaultConfigBuilder {
        VaultConfigBuilder::default()
    }

    /// Whether the given extension (without the dot, any case) is accepted.
    pub fn extension_allowed(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.allowed_extensions
            .iter()
            .any(|e| e == "*" || e == &ext)
    }
}

/// Builder for [`VaultConfig`].
#[derive(Debug, Default, Clone)]
pub struct VaultConfigBuilder {
    database_path: Option<PathBuf>,
    vault_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    max_file_size_bytes: Option<u64>,
    allowed_extensions: Vec<String>,
    watcher: Option<WatcherSettings>,
}

impl VaultConfigBuilder {
    /// Set the SQLite database path (required).
    pub fn database_path(mut self, path: impl AsRef<Path>) -> Self {
        self.database_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the blob directory (required).
    pub fn vault_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.vault_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the temporary-file directory. Defaults to `<vault_dir>/tmp`.
    pub fn temp_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.temp_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the maximum accepted upload size in bytes.
    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = Some(bytes);
        self
    }

    /// Add one allowed extension (without the dot). `"*"` admits everything.
    pub fn allowed_extension(mut self, ext: impl Into<String>) -> Self {
        self.allowed_extensions.push(ext.into().to_lowercase());
        self
    }

    /// Replace the whole extension allow-list.
    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = exts.into_iter().map(|e| e.into().to_lowercase()).collect();
        self
    }

    /// Override the watcher settings.
    pub fn watcher(mut self, settings: WatcherSettings) -> Self {
        self.watcher = Some(settings);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required setting is missing or a
    /// value is out of range.
    pub fn build(self) -> Result<VaultConfig> {
        let database_path = self
            .database_path
            .ok_or_else(|| Error::Config("database_path is required".to_string()))?;

        let vault_dir = self
            .vault_dir
            .ok_or_else(|| Error::Config("vault_dir is required".to_string()))?;

        let temp_dir = self.temp_dir.unwrap_or_else(|| vault_dir.join("tmp"));

        let max_file_size_bytes = self.max_file_size_bytes.unwrap_or(DEFAULT_MAX_FILE_SIZE);
        if max_file_size_bytes == 0 {
            return Err(Error::Config(
                "max_file_size_bytes must be greater than zero".to_string(),
            ));
        }

        let allowed_extensions = if self.allowed_extensions.is_empty() {
            DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
        } else {
            self.allowed_extensions
        };

        let watcher = self.watcher.unwrap_or_default();
        if watcher.sync_workers == 0 {
            return Err(Error::Config(
                "watcher.sync_workers must be at least 1".to_string(),
            ));
        }
        if watcher.queue_capacity == 0 {
            return Err(Error::Config(
                "watcher.queue_capacity must be at least 1".to_string(),
            ));
        }
        if watcher.max_retry_attempts == 0 {
            return Err(Error::Config(
                "watcher.max_retry_attempts must be at least 1".to_string(),
            ));
        }

        Ok(VaultConfig {
            database_path,
            vault_dir,
            temp_dir,
            max_file_size_bytes,
            allowed_extensions,
            watcher,
        })
    }
}
