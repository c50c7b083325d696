//! Vault data models.

use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Create a new random file ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a file ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| VaultError::InvalidId(e.to_string()))
    }

    /// Get the string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for FileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One locally stored file.
///
/// The content hash is the identity of the bytes: among non-deleted records
/// it is unique, which is what makes the store content-addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Unique identifier
    pub id: FileId,
    /// Original upload name
    pub name: String,
    /// SHA-256 of the content, lower-case hex
    pub hash: String,
    /// Lower-cased extension without the dot; empty when the name has none
    pub format: String,
    /// Content size in bytes
    pub size: i64,
    /// Blob location relative to the vault directory
    pub storage_path: String,
    /// Number of reads served
    pub view_count: i64,
    /// Number of content replacements
    pub modify_count: i64,
    /// Unix timestamp when created
    pub created_at: i64,
    /// Unix timestamp when last updated
    pub updated_at: i64,
    /// Soft-delete marker; `Some` rows are invisible to normal queries
    pub deleted_at: Option<i64>,
}

impl FileRecord {
    /// Create a new record for freshly stored content.
    pub fn new(
        name: impl Into<String>,
        hash: impl Into<String>,
        format: impl Into<String>,
        size: i64,
        storage_path: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: FileId::new(),
            name: name.into(),
            hash: hash.into(),
            format: format.into(),
            size,
            storage_path: storage_path.into(),
            view_count: 0,
            modify_count: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the record is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Per-format slice of the vault statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatCount {
    pub format: String,
    pub count: u64,
    pub bytes: u64,
}

/// Aggregate statistics over all non-deleted files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStats {
    pub total_files: u64,
    pub total_bytes: u64,
    pub total_views: u64,
    pub by_format: Vec<FormatCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_round_trip() {
        let id = FileId::new();
        let parsed = FileId::from_string(&id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_file_id_invalid() {
        assert!(FileId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_file_record_new() {
        let record = FileRecord::new("a.txt", "abc123", "txt", 5, "ab/abc123");
        assert_eq!(record.size, 5);
        assert_eq!(record.view_count, 0);
        assert_eq!(record.modify_count, 0);
        assert!(!record.is_deleted());
        assert_eq!(record.created_at, record.updated_at);
    }
}
