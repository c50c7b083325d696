//! # Remote Storage Configuration Store
//!
//! Persistence and rules for cloud backend configurations.
//!
//! ## Invariants
//!
//! - **At most one configuration is active at a time.** Creating a config as
//!   active and `activate()` both deactivate every other row inside the same
//!   SQL transaction, so the invariant holds even with concurrent processes.
//! - An active configuration cannot be disabled or deleted; it must be
//!   deactivated first.
//! - Names are unique among live (non-deleted) rows.

use async_trait::async_trait;
use core_oss::ProviderKind;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{error::is_unique_violation, Result, SyncError};

// ============================================================================
// ID Type
// ============================================================================

/// Unique identifier for a remote storage configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigId(Uuid);

impl ConfigId {
    /// Create a new random config ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a config ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidId(e.to_string()))
    }

    /// Get the string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConfigId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Entity
// ============================================================================

/// One configured cloud backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStorageConfig {
    /// Unique identifier
    pub id: ConfigId,
    /// Display name, unique among live rows
    pub name: String,
    /// Which vendor this configuration talks to
    pub provider: ProviderKind,
    /// Vendor region (empty for providers that do not use one)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Access key / secret ID
    pub access_key: String,
    /// Secret key
    pub secret_key: String,
    /// Custom endpoint or download domain
    pub endpoint: Option<String>,
    /// Whether this is the single active configuration
    pub active: bool,
    /// Whether the configuration may be used at all
    pub enabled: bool,
    /// Whether the change watcher should sync automatically
    pub auto_sync: bool,
    /// Remote key prefix for synced objects
    pub sync_prefix: String,
    /// Mirror local names under the prefix instead of date sharding
    pub keep_structure: bool,
    /// Unix timestamp when created
    pub created_at: i64,
    /// Unix timestamp when last updated
    pub updated_at: i64,
    /// Soft-delete marker
    pub deleted_at: Option<i64>,
}

impl fmt::Debug for RemoteStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStorageConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("active", &self.active)
            .field("enabled", &self.enabled)
            .field("auto_sync", &self.auto_sync)
            .field("sync_prefix", &self.sync_prefix)
            .field("keep_structure", &self.keep_structure)
            .finish()
    }
}

/// Validated input for creating a configuration.
#[derive(Debug, Clone)]
pub struct NewRemoteStorageConfig {
    pub name: String,
    pub provider: ProviderKind,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: Option<String>,
    /// Create as the active configuration, deactivating all others
    pub activate: bool,
    pub auto_sync: bool,
    pub sync_prefix: String,
    pub keep_structure: bool,
}

impl NewRemoteStorageConfig {
    /// Validate required fields per provider.
    pub fn validate(&self) -> Result<()> {
        let require = |field: &str, value: &str| -> Result<()> {
            if value.trim().is_empty() {
                return Err(SyncError::InvalidInput {
                    field: field.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            Ok(())
        };

        require("name", &self.name)?;
        require("bucket", &self.bucket)?;
        require("access_key", &self.access_key)?;
        require("secret_key", &self.secret_key)?;

        match self.provider {
            ProviderKind::AliyunOss | ProviderKind::TencentCos => {
                require("region", &self.region)?;
            }
            ProviderKind::QiniuKodo => {
                // Kodo serves downloads from a bucket-bound domain.
                if self.endpoint.as_deref().map_or(true, |e| e.trim().is_empty()) {
                    return Err(SyncError::InvalidInput {
                        field: "endpoint".to_string(),
                        message: "Qiniu Kodo requires a download domain".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Repository interface for remote storage configurations.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Validate and create a configuration.
    async fn create(&self, new: NewRemoteStorageConfig) -> Result<RemoteStorageConfig>;

    /// Find a live configuration by ID.
    async fn find_by_id(&self, id: ConfigId) -> Result<Option<RemoteStorageConfig>>;

    /// The single active configuration, if any. Absence is a normal state.
    async fn find_active(&self) -> Result<Option<RemoteStorageConfig>>;

    /// All live configurations, newest first.
    async fn list(&self) -> Result<Vec<RemoteStorageConfig>>;

    /// Make `id` the single active configuration (and enable it).
    async fn activate(&self, id: ConfigId) -> Result<()>;

    /// Clear the active flag of `id`.
    async fn deactivate(&self, id: ConfigId) -> Result<()>;

    /// Enable or disable a configuration. Disabling the active one is
    /// rejected.
    async fn set_enabled(&self, id: ConfigId, enabled: bool) -> Result<()>;

    /// Toggle automatic background sync.
    async fn set_auto_sync(&self, id: ConfigId, auto_sync: bool) -> Result<()>;

    /// Update mutable settings (everything except the active flag).
    async fn update(&self, config: &RemoteStorageConfig) -> Result<()>;

    /// Soft-delete an inactive configuration.
    async fn delete(&self, id: ConfigId) -> Result<()>;
}

/// SQLite implementation of [`ConfigRepository`].
pub struct SqliteConfigRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "id, name, provider, region, bucket, access_key, secret_key, \
                              endpoint, active, enabled, auto_sync, sync_prefix, \
                              keep_structure, created_at, updated_at, deleted_at";

impl SqliteConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `remote_storage_configs` table and indexes if missing.
    ///
    /// Must run before `SqliteSyncAttemptRepository::initialize`, which
    /// declares a foreign key into this table.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remote_storage_configs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                region TEXT NOT NULL,
                bucket TEXT NOT NULL,
                access_key TEXT NOT NULL,
                secret_key TEXT NOT NULL,
                endpoint TEXT,
                active INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                auto_sync INTEGER NOT NULL DEFAULT 0,
                sync_prefix TEXT NOT NULL DEFAULT 'sync',
                keep_structure INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_remote_configs_name_live
            ON remote_storage_configs(name) WHERE deleted_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_remote_configs_active
            ON remote_storage_configs(active) WHERE deleted_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<RemoteStorageConfig> {
        let provider_str: String = row.get("provider");
        let provider = ProviderKind::from_str(&provider_str)
            .map_err(|_| SyncError::UnsupportedProvider(provider_str))?;

        Ok(RemoteStorageConfig {
            id: ConfigId::from_string(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            provider,
            region: row.get("region"),
            bucket: row.get("bucket"),
            access_key: row.get("access_key"),
            secret_key: row.get("secret_key"),
            endpoint: row.get("endpoint"),
            active: row.get::<i64, _>("active") != 0,
            enabled: row.get::<i64, _>("enabled") != 0,
            auto_sync: row.get::<i64, _>("auto_sync") != 0,
            sync_prefix: row.get("sync_prefix"),
            keep_structure: row.get::<i64, _>("keep_structure") != 0,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    async fn require_live(&self, id: ConfigId) -> Result<RemoteStorageConfig> {
        self.find_by_id(id).await?.ok_or(SyncError::ConfigNotFound {
            config_id: id.to_string(),
        })
    }
}

#[async_trait]
impl ConfigRepository for SqliteConfigRepository {
    async fn create(&self, new: NewRemoteStorageConfig) -> Result<RemoteStorageConfig> {
        new.validate()?;

        let now = chrono::Utc::now().timestamp();
        let config = RemoteStorageConfig {
            id: ConfigId::new(),
            name: new.name,
            provider: new.provider,
            region: new.region,
            bucket: new.bucket,
            access_key: new.access_key,
            secret_key: new.secret_key,
            endpoint: new.endpoint,
            active: new.activate,
            enabled: true,
            auto_sync: new.auto_sync,
            sync_prefix: new.sync_prefix,
            keep_structure: new.keep_structure,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut tx = self.pool.begin().await?;

        if config.active {
            sqlx::query(
                "UPDATE remote_storage_configs SET active = 0, updated_at = ? \
                 WHERE active = 1 AND deleted_at IS NULL",
            )
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let insert = sqlx::query(
            r#"
            INSERT INTO remote_storage_configs (
                id, name, provider, region, bucket, access_key, secret_key,
                endpoint, active, enabled, auto_sync, sync_prefix,
                keep_structure, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(config.id.as_str())
        .bind(&config.name)
        .bind(config.provider.as_str())
        .bind(&config.region)
        .bind(&config.bucket)
        .bind(&config.access_key)
        .bind(&config.secret_key)
        .bind(&config.endpoint)
        .bind(config.active as i64)
        .bind(config.enabled as i64)
        .bind(config.auto_sync as i64)
        .bind(&config.sync_prefix)
        .bind(config.keep_structure as i64)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(SyncError::InvalidInput {
                    field: "name".to_string(),
                    message: format!("configuration named '{}' already exists", config.name),
                });
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;

        info!(
            config_id = %config.id,
            provider = %config.provider,
            active = config.active,
            "Remote storage configuration created"
        );

        Ok(config)
    }

    async fn find_by_id(&self, id: ConfigId) -> Result<Option<RemoteStorageConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM remote_storage_configs WHERE id = ? AND deleted_at IS NULL",
            SELECT_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_active(&self) -> Result<Option<RemoteStorageConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM remote_storage_configs \
             WHERE active = 1 AND deleted_at IS NULL",
            SELECT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self) -> Result<Vec<RemoteStorageConfig>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM remote_storage_configs \
             WHERE deleted_at IS NULL ORDER BY created_at DESC, id",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn activate(&self, id: ConfigId) -> Result<()> {
        self.require_live(id).await?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE remote_storage_configs SET active = 0, updated_at = ? \
             WHERE active = 1 AND deleted_at IS NULL",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE remote_storage_configs SET active = 1, enabled = 1, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(config_id = %id, "Remote storage configuration activated");
        Ok(())
    }

    async fn deactivate(&self, id: ConfigId) -> Result<()> {
        self.require_live(id).await?;

        sqlx::query(
            "UPDATE remote_storage_configs SET active = 0, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        debug!(config_id = %id, "Remote storage configuration deactivated");
        Ok(())
    }

    async fn set_enabled(&self, id: ConfigId, enabled: bool) -> Result<()> {
        let config = self.require_live(id).await?;

        if !enabled && config.active {
            return Err(SyncError::ConfigActive {
                config_id: id.to_string(),
            });
        }

        sqlx::query(
            "UPDATE remote_storage_configs SET enabled = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(enabled as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_auto_sync(&self, id: ConfigId, auto_sync: bool) -> Result<()> {
        self.require_live(id).await?;

        sqlx::query(
            "UPDATE remote_storage_configs SET auto_sync = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(auto_sync as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, config: &RemoteStorageConfig) -> Result<()> {
        self.require_live(config.id).await?;

        let result = sqlx::query(
            r#"
            UPDATE remote_storage_configs SET
                name = ?,
                region = ?,
                bucket = ?,
                access_key = ?,
                secret_key = ?,
                endpoint = ?,
                auto_sync = ?,
                sync_prefix = ?,
                keep_structure = ?,
                updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&config.name)
        .bind(&config.region)
        .bind(&config.bucket)
        .bind(&config.access_key)
        .bind(&config.secret_key)
        .bind(&config.endpoint)
        .bind(config.auto_sync as i64)
        .bind(&config.sync_prefix)
        .bind(config.keep_structure as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(config.id.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(SyncError::InvalidInput {
                field: "name".to_string(),
                message: format!("configuration named '{}' already exists", config.name),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: ConfigId) -> Result<()> {
        let config = self.require_live(id).await?;

        if config.active {
            return Err(SyncError::ConfigActive {
                config_id: id.to_string(),
            });
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE remote_storage_configs SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        info!(config_id = %id, "Remote storage configuration deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_vault::create_test_pool;

    async fn setup() -> SqliteConfigRepository {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteConfigRepository::new(pool);
        repo.initialize().await.unwrap();
        repo
    }

    fn new_config(name: &str, activate: bool) -> NewRemoteStorageConfig {
        NewRemoteStorageConfig {
            name: name.to_string(),
            provider: ProviderKind::AliyunOss,
            region: "oss-cn-hangzhou".to_string(),
            bucket: "notes".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            endpoint: None,
            activate,
            auto_sync: false,
            sync_prefix: "sync".to_string(),
            keep_structure: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = setup().await;
        let config = repo.create(new_config("primary", true)).await.unwrap();

        let found = repo.find_by_id(config.id).await.unwrap().unwrap();
        assert_eq!(found.name, "primary");
        assert!(found.active);
        assert!(found.enabled);
    }

    #[tokio::test]
    async fn test_validation_rejects_missing_fields() {
        let repo = setup().await;

        let mut invalid = new_config("x", false);
        invalid.bucket = String::new();
        assert!(matches!(
            repo.create(invalid).await,
            Err(SyncError::InvalidInput { .. })
        ));

        let mut qiniu = new_config("q", false);
        qiniu.provider = ProviderKind::QiniuKodo;
        qiniu.endpoint = None;
        assert!(matches!(
            repo.create(qiniu).await,
            Err(SyncError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let repo = setup().await;
        repo.create(new_config("primary", false)).await.unwrap();

        assert!(matches!(
            repo.create(new_config("primary", false)).await,
            Err(SyncError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_active_invariant() {
        let repo = setup().await;
        let a = repo.create(new_config("a", true)).await.unwrap();
        let b = repo.create(new_config("b", true)).await.unwrap();

        let active = repo.find_active().await.unwrap().unwrap();
        assert_eq!(active.id, b.id);
        assert!(!repo.find_by_id(a.id).await.unwrap().unwrap().active);

        // Activating A flips it back, again leaving exactly one active row.
        repo.activate(a.id).await.unwrap();
        let configs = repo.list().await.unwrap();
        let active_count = configs.iter().filter(|c| c.active).count();
        assert_eq!(active_count, 1);
        assert!(configs.iter().find(|c| c.id == a.id).unwrap().active);
    }

    #[tokio::test]
    async fn test_active_config_cannot_be_disabled_or_deleted() {
        let repo = setup().await;
        let config = repo.create(new_config("primary", true)).await.unwrap();

        assert!(matches!(
            repo.set_enabled(config.id, false).await,
            Err(SyncError::ConfigActive { .. })
        ));
        assert!(matches!(
            repo.delete(config.id).await,
            Err(SyncError::ConfigActive { .. })
        ));

        repo.deactivate(config.id).await.unwrap();
        repo.set_enabled(config.id, false).await.unwrap();
        repo.delete(config.id).await.unwrap();
        assert!(repo.find_by_id(config.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_name_is_reusable() {
        let repo = setup().await;
        let config = repo.create(new_config("primary", false)).await.unwrap();
        repo.delete(config.id).await.unwrap();

        repo.create(new_config("primary", false)).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_auto_sync_and_update() {
        let repo = setup().await;
        let mut config = repo.create(new_config("primary", false)).await.unwrap();

        repo.set_auto_sync(config.id, true).await.unwrap();
        assert!(repo.find_by_id(config.id).await.unwrap().unwrap().auto_sync);

        config.sync_prefix = "attachments".to_string();
        config.keep_structure = true;
        repo.update(&config).await.unwrap();

        let found = repo.find_by_id(config.id).await.unwrap().unwrap();
        assert_eq!(found.sync_prefix, "attachments");
        assert!(found.keep_structure);
    }

    #[tokio::test]
    async fn test_missing_config_errors() {
        let repo = setup().await;
        let ghost = ConfigId::new();

        assert!(matches!(
            repo.activate(ghost).await,
            Err(SyncError::ConfigNotFound { .. })
        ));
        assert!(repo.find_active().await.unwrap().is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = RemoteStorageConfig {
            id: ConfigId::new(),
            name: "x".to_string(),
            provider: ProviderKind::AliyunOss,
            region: "r".to_string(),
            bucket: "b".to_string(),
            access_key: "ak".to_string(),
            secret_key: "super-secret".to_string(),
            endpoint: None,
            active: false,
            enabled: true,
            auto_sync: false,
            sync_prefix: "sync".to_string(),
            keep_structure: false,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        };

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
