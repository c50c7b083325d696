//! File metadata repository.
//!
//! Persistence for [`FileRecord`] rows. Soft-deleted rows are invisible to
//! every query except [`FileRepository::restore`]; the partial unique index
//! on `hash` is what enforces the content-addressed dedup invariant, even
//! across processes.

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

use crate::models::{FileId, FileRecord, FormatCount, VaultStats};
use crate::pagination::{Page, PageRequest};
use crate::{Result, VaultError};

/// Repository interface for file metadata.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert a new record.
    ///
    /// Fails when a non-deleted record with the same hash already exists
    /// (the caller resolves this through [`find_by_hash`](Self::find_by_hash)).
    async fn insert(&self, record: &FileRecord) -> Result<()>;

    /// Update hash, size, storage path, and counters of an existing record.
    async fn update(&self, record: &FileRecord) -> Result<()>;

    /// Find a non-deleted record by ID.
    async fn find_by_id(&self, id: FileId) -> Result<Option<FileRecord>>;

    /// Find a non-deleted record by content hash.
    async fn find_by_hash(&self, hash: &str) -> Result<Option<FileRecord>>;

    /// Mark a record deleted. Returns `false` when no live row matched.
    async fn soft_delete(&self, id: FileId) -> Result<bool>;

    /// Clear the soft-delete marker (rollback path of a failed delete).
    async fn restore(&self, id: FileId) -> Result<()>;

    /// Increment the view counter without touching `updated_at`.
    async fn increment_view_count(&self, id: FileId) -> Result<()>;

    /// Page through non-deleted records, newest first.
    async fn list(&self, page: PageRequest) -> Result<Page<FileRecord>>;

    /// Page through non-deleted records whose name contains `query`.
    async fn search(&self, query: &str, page: PageRequest) -> Result<Page<FileRecord>>;

    /// Non-deleted records updated strictly after `since` (Unix seconds).
    async fn find_modified_since(&self, since: i64) -> Result<Vec<FileRecord>>;

    /// Aggregate statistics over non-deleted records.
    async fn stats(&self) -> Result<VaultStats>;
}

/// SQLite implementation of [`FileRepository`].
pub struct SqliteFileRepository {
    pool: SqlitePool,
}

impl SqliteFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `files` table and its indexes if missing.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                hash TEXT NOT NULL,
                format TEXT NOT NULL,
                size INTEGER NOT NULL,
                storage_path TEXT NOT NULL,
                view_count INTEGER NOT NULL DEFAULT 0,
                modify_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Hash uniqueness only holds among live rows; a deleted record may
        // be re-uploaded.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_files_hash_live
            ON files(hash) WHERE deleted_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_files_updated_at
            ON files(updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<FileRecord> {
        Ok(FileRecord {
            id: FileId::from_string(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            hash: row.get("hash"),
            format: row.get("format"),
            size: row.get("size"),
            storage_path: row.get("storage_path"),
            view_count: row.get("view_count"),
            modify_count: row.get("modify_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }
}

const SELECT_COLUMNS: &str = "id, name, hash, format, size, storage_path, view_count, \
                              modify_count, created_at, updated_at, deleted_at";

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn insert(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                id, name, hash, format, size, storage_path, view_count,
                modify_count, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.name)
        .bind(&record.hash)
        .bind(&record.format)
        .bind(record.size)
        .bind(&record.storage_path)
        .bind(record.view_count)
        .bind(record.modify_count)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, record: &FileRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE files SET
                name = ?,
                hash = ?,
                format = ?,
                size = ?,
                storage_path = ?,
                modify_count = ?,
                updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&record.name)
        .bind(&record.hash)
        .bind(&record.format)
        .bind(record.size)
        .bind(&record.storage_path)
        .bind(record.modify_count)
        .bind(record.updated_at)
        .bind(record.id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound {
                id: record.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: FileId) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM files WHERE id = ? AND deleted_at IS NULL",
            SELECT_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM files WHERE hash = ? AND deleted_at IS NULL",
            SELECT_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn soft_delete(&self, id: FileId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE files SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn restore(&self, id: FileId) -> Result<()> {
        sqlx::query("UPDATE files SET deleted_at = NULL WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        debug!(file_id = %id, "Soft delete reverted");
        Ok(())
    }

    async fn increment_view_count(&self, id: FileId) -> Result<()> {
        sqlx::query("UPDATE files SET view_count = view_count + 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list(&self, page: PageRequest) -> Result<Page<FileRecord>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE deleted_at IS NULL \
             ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        ))
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

    async fn search(&self, query: &str, page: PageRequest) -> Result<Page<FileRecord>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files \
             WHERE deleted_at IS NULL AND name LIKE ? ESCAPE '\\'",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM files \
             WHERE deleted_at IS NULL AND name LIKE ? ESCAPE '\\' \
             ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        ))
        .bind(&pattern)
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

    async fn find_modified_since(&self, since: i64) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files \
             WHERE deleted_at IS NULL AND updated_at > ? \
             ORDER BY updated_at ASC",
            SELECT_COLUMNS
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn stats(&self) -> Result<VaultStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_files, \
                    COALESCE(SUM(size), 0) AS total_bytes, \
                    COALESCE(SUM(view_count), 0) AS total_views \
             FROM files WHERE deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let total_files: i64 = row.get("total_files");
        let total_bytes: i64 = row.get("total_bytes");
        let total_views: i64 = row.get("total_views");

        let format_rows = sqlx::query(
            "SELECT format, COUNT(*) AS count, COALESCE(SUM(size), 0) AS bytes \
             FROM files WHERE deleted_at IS NULL \
             GROUP BY format ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_format = format_rows
            .iter()
            .map(|row| FormatCount {
                format: row.get("format"),
                count: row.get::<i64, _>("count") as u64,
                bytes: row.get::<i64, _>("bytes") as u64,
            })
            .collect();

        Ok(VaultStats {
            total_files: total_files as u64,
            total_bytes: total_bytes as u64,
            total_views: total_views as u64,
            by_format,
        })
    }
}
