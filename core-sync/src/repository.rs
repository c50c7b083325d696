//! Sync attempt repository.
//!
//! The append-only, queryable sync log. The partial unique index on
//! `(file_id, config_id, direction) WHERE status = 'pending'` is the
//! system's concurrency guard: a second sync request for the same tuple
//! while one is in flight fails the insert, which callers surface as
//! `SyncInProgress`. Being a database constraint, it holds across processes
//! without in-process locks.
//!
//! Rows reference configurations by foreign key but deliberately not files:
//! the log outlives the files it describes.

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use core_vault::{FileId, Page, PageRequest};

use crate::attempt::{SyncAttempt, SyncAttemptId, SyncDirection, SyncStatus};
use crate::config_store::ConfigId;
use crate::error::is_unique_violation;
use crate::{Result, SyncError};

/// Filter for paging through the sync log.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub file_id: Option<FileId>,
    pub config_id: Option<ConfigId>,
    pub status: Option<SyncStatus>,
    pub direction: Option<SyncDirection>,
}

/// Repository interface for sync attempts.
#[async_trait]
pub trait SyncAttemptRepository: Send + Sync {
    /// Insert a new attempt.
    ///
    /// Returns [`SyncError::SyncInProgress`] when a pending attempt already
    /// exists for the same (file, config, direction).
    async fn insert(&self, attempt: &SyncAttempt) -> Result<()>;

    /// Persist a state transition (all mutable columns).
    ///
    /// Returns [`SyncError::SyncInProgress`] when flipping a row back to
    /// pending would collide with another pending attempt.
    async fn update(&self, attempt: &SyncAttempt) -> Result<()>;

    /// Find an attempt by ID.
    async fn find_by_id(&self, id: SyncAttemptId) -> Result<Option<SyncAttempt>>;

    /// Most recent attempt for a file, any direction.
    async fn latest_for_file(&self, file_id: FileId) -> Result<Option<SyncAttempt>>;

    /// Most recent successful attempt for a (file, config, direction).
    async fn find_last_success(
        &self,
        file_id: FileId,
        config_id: ConfigId,
        direction: SyncDirection,
    ) -> Result<Option<SyncAttempt>>;

    /// Page through the log, newest first, with optional filters.
    async fn list(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<SyncAttempt>>;

    /// Retry items whose `next_retry_at` is due, oldest first.
    async fn due_retries(&self, now: i64, limit: u32) -> Result<Vec<SyncAttempt>>;

    /// Number of pending attempts in a direction, system-wide.
    async fn count_pending(&self, direction: SyncDirection) -> Result<u64>;
}

/// SQLite implementation of [`SyncAttemptRepository`].
pub struct SqliteSyncAttemptRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "id, file_id, config_id, direction, status, remote_path, bytes, \
                              duration_ms, error_message, retry_count, next_retry_at, \
                              created_at, updated_at";

impl SqliteSyncAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `sync_attempts` table and indexes if missing.
    ///
    /// Requires the `remote_storage_configs` table (run
    /// `SqliteConfigRepository::initialize` first).
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_attempts (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                config_id TEXT NOT NULL REFERENCES remote_storage_configs(id),
                direction TEXT NOT NULL,
                status TEXT NOT NULL,
                remote_path TEXT NOT NULL,
                bytes INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_retry_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One in-flight attempt per (file, config, direction).
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_attempts_single_pending
            ON sync_attempts(file_id, config_id, direction) WHERE status = 'pending'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_attempts_retry_due
            ON sync_attempts(status, next_retry_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_attempts_file
            ON sync_attempts(file_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<SyncAttempt> {
        Ok(SyncAttempt {
            id: SyncAttemptId::from_string(&row.get::<String, _>("id"))?,
            file_id: FileId::from_string(&row.get::<String, _>("file_id"))
                .map_err(|e| SyncError::InvalidId(e.to_string()))?,
            config_id: ConfigId::from_string(&row.get::<String, _>("config_id"))?,
            direction: row.get::<String, _>("direction").parse()?,
            status: row.get::<String, _>("status").parse()?,
            remote_path: row.get("remote_path"),
            bytes: row.get("bytes"),
            duration_ms: row.get("duration_ms"),
            error_message: row.get("error_message"),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            next_retry_at: row.get("next_retry_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SyncAttemptRepository for SqliteSyncAttemptRepository {
    async fn insert(&self, attempt: &SyncAttempt) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_attempts (
                id, file_id, config_id, direction, status, remote_path, bytes,
                duration_ms, error_message, retry_count, next_retry_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.id.as_str())
        .bind(attempt.file_id.as_str())
        .bind(attempt.config_id.as_str())
        .bind(attempt.direction.as_str())
        .bind(attempt.status.as_str())
        .bind(&attempt.remote_path)
        .bind(attempt.bytes)
        .bind(attempt.duration_ms)
        .bind(&attempt.error_message)
        .bind(attempt.retry_count as i64)
        .bind(attempt.next_retry_at)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(SyncError::SyncInProgress {
                file_id: attempt.file_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, attempt: &SyncAttempt) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_attempts SET
                file_id = ?,
                status = ?,
                remote_path = ?,
                bytes = ?,
                duration_ms = ?,
                error_message = ?,
                retry_count = ?,
                next_retry_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempt.file_id.as_str())
        .bind(attempt.status.as_str())
        .bind(&attempt.remote_path)
        .bind(attempt.bytes)
        .bind(attempt.duration_ms)
        .bind(&attempt.error_message)
        .bind(attempt.retry_count as i64)
        .bind(attempt.next_retry_at)
        .bind(attempt.updated_at)
        .bind(attempt.id.as_str())
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(e) if is_unique_violation(&e) => {
                return Err(SyncError::SyncInProgress {
                    file_id: attempt.file_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if result.rows_affected() == 0 {
            return Err(SyncError::AttemptNotFound {
                attempt_id: attempt.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: SyncAttemptId) -> Result<Option<SyncAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_attempts WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn latest_for_file(&self, file_id: FileId) -> Result<Option<SyncAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_attempts WHERE file_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(file_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_last_success(
        &self,
        file_id: FileId,
        config_id: ConfigId,
        direction: SyncDirection,
    ) -> Result<Option<SyncAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_attempts \
             WHERE file_id = ? AND config_id = ? AND direction = ? AND status = 'success' \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(file_id.as_str())
        .bind(config_id.as_str())
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<SyncAttempt>> {
        let mut conditions = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(file_id) = filter.file_id {
            conditions.push("file_id = ?");
            binds.push(file_id.as_str());
        }
        if let Some(config_id) = filter.config_id {
            conditions.push("config_id = ?");
            binds.push(config_id.as_str());
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(direction) = filter.direction {
            conditions.push("direction = ?");
            binds.push(direction.as_str().to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM sync_attempts {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let rows_sql = format!(
            "SELECT {} FROM sync_attempts {} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );
        let mut rows_query = sqlx::query(&rows_sql);
        for bind in &binds {
            rows_query = rows_query.bind(bind);
        }
        let rows = rows_query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(Self::map_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total as u64, page))
    }

    async fn due_retries(&self, now: i64, limit: u32) -> Result<Vec<SyncAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sync_attempts \
             WHERE status = 'pending_retry' AND next_retry_at IS NOT NULL AND next_retry_at <= ? \
             ORDER BY next_retry_at ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn count_pending(&self, direction: SyncDirection) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_attempts WHERE status = 'pending' AND direction = ?",
        )
        .bind(direction.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::RetryPolicy;
    use crate::config_store::{ConfigRepository, NewRemoteStorageConfig, SqliteConfigRepository};
    use core_oss::ProviderKind;
    use core_vault::create_test_pool;
    use std::time::Duration;

    async fn setup() -> (SqliteSyncAttemptRepository, ConfigId) {
        let pool = create_test_pool().await.unwrap();

        let configs = SqliteConfigRepository::new(pool.clone());
        configs.initialize().await.unwrap();
        let config = configs
            .create(NewRemoteStorageConfig {
                name: "primary".to_string(),
                provider: ProviderKind::AliyunOss,
                region: "oss-cn-hangzhou".to_string(),
                bucket: "notes".to_string(),
                access_key: "ak".to_string(),
                secret_key: "sk".to_string(),
                endpoint: None,
                activate: true,
                auto_sync: false,
                sync_prefix: "sync".to_string(),
                keep_structure: false,
            })
            .await
            .unwrap();

        let repo = SqliteSyncAttemptRepository::new(pool);
        repo.initialize().await.unwrap();
        (repo, config.id)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (repo, config_id) = setup().await;
        let attempt = SyncAttempt::new_upload(FileId::new(), config_id, "sync/a.txt", 5);

        repo.insert(&attempt).await.unwrap();
        let found = repo.find_by_id(attempt.id).await.unwrap().unwrap();
        assert_eq!(found, attempt);
    }

    #[tokio::test]
    async fn test_no_double_pending() {
        let (repo, config_id) = setup().await;
        let file_id = FileId::new();

        let first = SyncAttempt::new_upload(file_id, config_id, "sync/a.txt", 5);
        repo.insert(&first).await.unwrap();

        let second = SyncAttempt::new_upload(file_id, config_id, "sync/a.txt", 5);
        assert!(matches!(
            repo.insert(&second).await,
            Err(SyncError::SyncInProgress { .. })
        ));

        // A download for the same file is a different tuple and is allowed.
        let download = SyncAttempt::new_download(file_id, config_id, "sync/a.txt", 5);
        repo.insert(&download).await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_frees_after_transition() {
        let (repo, config_id) = setup().await;
        let file_id = FileId::new();

        let first = SyncAttempt::new_upload(file_id, config_id, "sync/a.txt", 5);
        repo.insert(&first).await.unwrap();
        repo.update(&first.succeed(10).unwrap()).await.unwrap();

        let second = SyncAttempt::new_upload(file_id, config_id, "sync/a.txt", 5);
        repo.insert(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_last_success() {
        let (repo, config_id) = setup().await;
        let file_id = FileId::new();

        let mut first = SyncAttempt::new_upload(file_id, config_id, "sync/old.txt", 5);
        first.created_at = 1000;
        repo.insert(&first).await.unwrap();
        repo.update(&first.succeed(10).unwrap()).await.unwrap();

        let mut second = SyncAttempt::new_upload(file_id, config_id, "sync/new.txt", 5);
        second.created_at = 2000;
        repo.insert(&second).await.unwrap();
        repo.update(&second.succeed(10).unwrap()).await.unwrap();

        let last = repo
            .find_last_success(file_id, config_id, SyncDirection::Upload)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.remote_path, "sync/new.txt");

        assert!(repo
            .find_last_success(file_id, config_id, SyncDirection::Download)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (repo, config_id) = setup().await;
        let file_a = FileId::new();
        let file_b = FileId::new();

        let up = SyncAttempt::new_upload(file_a, config_id, "sync/a.txt", 5);
        repo.insert(&up).await.unwrap();
        repo.update(&up.succeed(10).unwrap()).await.unwrap();

        let down = SyncAttempt::new_download(file_b, config_id, "sync/b.txt", 7);
        repo.insert(&down).await.unwrap();

        let all = repo
            .list(&LogFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);

        let uploads = repo
            .list(
                &LogFilter {
                    direction: Some(SyncDirection::Upload),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(uploads.total, 1);
        assert_eq!(uploads.items[0].file_id, file_a);

        let pending = repo
            .list(
                &LogFilter {
                    status: Some(SyncStatus::Pending),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(pending.total, 1);
        assert_eq!(pending.items[0].file_id, file_b);
    }

    #[tokio::test]
    async fn test_due_retries() {
        let (repo, config_id) = setup().await;
        let policy = RetryPolicy {
            base_interval: Duration::ZERO,
            max_attempts: 5,
        };

        let failing = SyncAttempt::new_upload(FileId::new(), config_id, "sync/a.txt", 5);
        repo.insert(&failing).await.unwrap();
        repo.update(&failing.clone().fail_transient("timeout", &policy).unwrap())
            .await
            .unwrap();

        let waiting = SyncAttempt::new_upload(FileId::new(), config_id, "sync/b.txt", 5);
        repo.insert(&waiting).await.unwrap();
        let mut not_due = waiting.clone().fail_transient("timeout", &policy).unwrap();
        not_due.next_retry_at = Some(chrono::Utc::now().timestamp() + 3600);
        repo.update(&not_due).await.unwrap();

        let due = repo
            .due_retries(chrono::Utc::now().timestamp(), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, failing.id);
    }

    #[tokio::test]
    async fn test_count_pending() {
        let (repo, config_id) = setup().await;

        repo.insert(&SyncAttempt::new_download(
            FileId::new(),
            config_id,
            "sync/a.txt",
            5,
        ))
        .await
        .unwrap();

        assert_eq!(repo.count_pending(SyncDirection::Download).await.unwrap(), 1);
        assert_eq!(repo.count_pending(SyncDirection::Upload).await.unwrap(), 0);
    }
}
