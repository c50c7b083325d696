use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Benign: cloud sync is simply not configured.
    #[error("No active remote storage configuration found")]
    NoActiveConfig,

    #[error("Sync already in progress for file {file_id}")]
    SyncInProgress { file_id: String },

    #[error("A remote download is already in progress")]
    DownloadInProgress,

    #[error("Sync attempt {attempt_id} not found")]
    AttemptNotFound { attempt_id: String },

    #[error("Remote storage configuration {config_id} not found")]
    ConfigNotFound { config_id: String },

    #[error("Configuration {config_id} is active and must be deactivated first")]
    ConfigActive { config_id: String },

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync direction: {0}")]
    InvalidDirection(String),

    #[error("Invalid ID: {0}")]
    InvalidId(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Change watcher already running")]
    AlreadyRunning,

    #[error("Change watcher is not running")]
    NotRunning,

    #[error("Sync queue is full")]
    QueueFull,

    #[error("Batch sync failed for {} file(s)", failures.len())]
    BatchFailed { failures: Vec<(String, String)> },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage provider error: {0}")]
    Provider(#[from] core_oss::OssError),

    #[error("Vault error: {0}")]
    Vault(#[from] core_vault::VaultError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Whether a sqlx error is a SQLite unique-index violation.
///
/// The partial unique indexes on `sync_attempts` and
/// `remote_storage_configs` surface contended writes this way; callers remap
/// the violation to the domain error (`SyncInProgress`, duplicate name).
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed")
    )
}
