//! # Sync Engine
//!
//! Asynchronous multi-cloud synchronization for the file vault.
//!
//! ## Components
//!
//! - **Config Store** (`config_store`): remote backend configurations with
//!   the single-active invariant
//! - **Sync Attempt** (`attempt`): audit record and state machine for every
//!   upload/download, with persisted quadratic-backoff retry state
//! - **Repository** (`repository`): the sync log; a partial unique index
//!   enforces one pending attempt per (file, config, direction)
//! - **Factory** (`factory`): builds the concrete provider connector for a
//!   configuration
//! - **Keys** (`keys`): deterministic remote key layout
//! - **Orchestrator** (`orchestrator`): accepts sync requests, performs the
//!   transfers on spawned tasks, reconciles the log
//! - **Watcher** (`watcher`): poller, worker pool, and retry scheduler over
//!   a bounded queue

pub mod attempt;
pub mod config_store;
pub mod error;
pub mod factory;
pub mod keys;
pub mod orchestrator;
pub mod repository;
pub mod watcher;

pub use attempt::{
    RetryPolicy, SyncAttempt, SyncAttemptId, SyncDirection, SyncStatus,
};
pub use config_store::{
    ConfigId, ConfigRepository, NewRemoteStorageConfig, RemoteStorageConfig,
    SqliteConfigRepository,
};
pub use error::{Result, SyncError};
pub use factory::create_provider;
pub use keys::remote_key;
pub use orchestrator::{ScanReport, SizeMismatch, SyncOrchestrator};
pub use repository::{LogFilter, SqliteSyncAttemptRepository, SyncAttemptRepository};
pub use watcher::ChangeWatcher;
