//! # Vault Store
//!
//! The local content store: owns the on-disk bytes, computes content hashes,
//! deduplicates by hash, and keeps metadata and disk state consistent.
//!
//! ## Overview
//!
//! Blobs live under the vault directory in a content-addressed layout
//! (`<first two hash chars>/<hash>`), so identical content occupies exactly
//! one file regardless of how many times or under how many names it is
//! uploaded. Metadata lives in SQLite through [`FileRepository`]; every
//! operation that touches both sides rolls the other back on partial
//! failure.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_vault::{SqliteFileRepository, VaultStore};
//!
//! let store = VaultStore::new(&config, Arc::new(repository)).await?;
//! let record = store.put("notes.pdf", reader).await?;
//! let mut file = store.open(record.id).await?;
//! ```

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use core_runtime::VaultConfig;

use crate::models::{FileId, FileRecord, VaultStats};
use crate::pagination::{Page, PageRequest};
use crate::repository::FileRepository;
use crate::{Result, VaultError};

/// Read buffer size for streaming uploads.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Content-addressed file store over a blob directory and a metadata
/// repository.
pub struct VaultStore {
    repository: Arc<dyn FileRepository>,
    vault_dir: PathBuf,
    temp_dir: PathBuf,
    max_file_size_bytes: u64,
    allowed_extensions: Vec<String>,
}

/// Result of spooling an upload to a temporary file.
struct SpooledFile {
    temp_path: PathBuf,
    hash: String,
    size: u64,
}

impl VaultStore {
    /// Create a store, ensuring the blob and temp directories exist.
    pub async fn new(config: &VaultConfig, repository: Arc<dyn FileRepository>) -> Result<Self> {
        fs::create_dir_all(&config.vault_dir).await?;
        fs::create_dir_all(&config.temp_dir).await?;

        Ok(Self {
            repository,
            vault_dir: config.vault_dir.clone(),
            temp_dir: config.temp_dir.clone(),
            max_file_size_bytes: config.max_file_size_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
        })
    }

    /// Store uploaded content.
    ///
    /// Streams `reader` to a temporary file while hashing, then either
    /// returns the existing record for already-known content or relocates
    /// the temp file into the vault and persists new metadata.
    ///
    /// # Errors
    ///
    /// - [`VaultError::ExtensionNotAllowed`] before any byte is read
    /// - [`VaultError::FileTooLarge`] as soon as the limit is crossed
    /// - [`VaultError::Database`] when metadata persistence fails; the
    ///   relocated blob is removed again so no orphaned bytes remain
    pub async fn put<R>(&self, name: &str, reader: R) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin + Send,
    {
        let format = extension_of(name);
        if !self.extension_allowed(&format) {
            return Err(VaultError::ExtensionNotAllowed(format));
        }

        let spooled = self.spool(reader).await?;

        // Content already known: the temp copy is surplus.
        if let Some(existing) = self.repository.find_by_hash(&spooled.hash).await? {
            debug!(
                file_id = %existing.id,
                hash = %spooled.hash,
                "Upload deduplicated against existing record"
            );
            remove_quietly(&spooled.temp_path).await;
            return Ok(existing);
        }

        let relative = blob_path(&spooled.hash);
        let absolute = self.vault_dir.join(&relative);
        self.relocate(&spooled.temp_path, &absolute).await?;

        let record = FileRecord::new(
            name,
            &spooled.hash,
            &format,
            spooled.size as i64,
            relative.to_string_lossy(),
        );

        if let Err(e) = self.repository.insert(&record).await {
            // A concurrent upload of the same bytes may have won the race;
            // in that case its blob and row are the ones to keep.
            if let Some(existing) = self.repository.find_by_hash(&spooled.hash).await? {
                return Ok(existing);
            }
            remove_quietly(&absolute).await;
            return Err(e);
        }

        info!(
            file_id = %record.id,
            name = %record.name,
            size = record.size,
            "File stored"
        );

        Ok(record)
    }

    /// Fetch a record by ID.
    pub async fn get(&self, id: FileId) -> Result<FileRecord> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| VaultError::NotFound { id: id.to_string() })
    }

    /// Open a file's content for reading.
    ///
    /// Detects metadata/disk divergence: a record whose blob is missing
    /// reports `NotFound` instead of a raw IO error. The view counter is
    /// incremented on a spawned task so the read is never delayed.
    pub async fn open(&self, id: FileId) -> Result<fs::File> {
        let record = self.get(id).await?;
        let path = self.vault_dir.join(&record.storage_path);

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    file_id = %id,
                    path = %path.display(),
                    "Metadata exists but blob is missing on disk"
                );
                return Err(VaultError::NotFound { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        };

        let repository = Arc::clone(&self.repository);
        tokio::spawn(async move {
            if let Err(e) = repository.increment_view_count(id).await {
                warn!(file_id = %id, error = %e, "Failed to increment view count");
            }
        });

        Ok(file)
    }

    /// Replace a file's content.
    ///
    /// Byte-identical content is a no-op returning the unchanged record.
    /// Otherwise the old blob is kept as a backup until the metadata update
    /// commits; any failure restores it.
    pub async fn replace<R>(&self, id: FileId, reader: R) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin + Send,
    {
        let record = self.get(id).await?;
        let spooled = self.spool(reader).await?;

        if spooled.hash == record.hash {
            debug!(file_id = %id, "Replacement content identical, nothing to do");
            remove_quietly(&spooled.temp_path).await;
            return Ok(record);
        }

        if let Some(other) = self.repository.find_by_hash(&spooled.hash).await? {
            remove_quietly(&spooled.temp_path).await;
            return Err(VaultError::InvalidInput {
                field: "content".to_string(),
                message: format!("identical content already stored as file {}", other.id),
            });
        }

        let old_absolute = self.vault_dir.join(&record.storage_path);
        let backup = old_absolute.with_extension("bak");
        fs::rename(&old_absolute, &backup).await?;

        let new_relative = blob_path(&spooled.hash);
        let new_absolute = self.vault_dir.join(&new_relative);

        let mut updated = record.clone();
        updated.hash = spooled.hash.clone();
        updated.size = spooled.size as i64;
        updated.storage_path = new_relative.to_string_lossy().to_string();
        updated.modify_count += 1;
        updated.updated_at = chrono::Utc::now().timestamp();

        let outcome = async {
            self.relocate(&spooled.temp_path, &new_absolute).await?;
            self.repository.update(&updated).await
        }
        .await;

        match outcome {
            Ok(()) => {
                remove_quietly(&backup).await;
                info!(
                    file_id = %id,
                    modify_count = updated.modify_count,
                    "File content replaced"
                );
                Ok(updated)
            }
            Err(e) => {
                remove_quietly(&new_absolute).await;
                if let Err(restore_err) = fs::rename(&backup, &old_absolute).await {
                    warn!(
                        file_id = %id,
                        error = %restore_err,
                        "Failed to restore backup after replace failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Delete a file: soft-delete the metadata, then remove the blob.
    ///
    /// A failed blob removal reverts the soft delete so metadata and disk
    /// stay consistent. A blob already missing counts as removed.
    pub async fn delete(&self, id: FileId) -> Result<()> {
        let record = self.get(id).await?;

        if !self.repository.soft_delete(id).await? {
            return Err(VaultError::NotFound { id: id.to_string() });
        }

        let path = self.vault_dir.join(&record.storage_path);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file_id = %id, "Blob was already missing during delete");
            }
            Err(e) => {
                self.repository.restore(id).await?;
                return Err(e.into());
            }
        }

        info!(file_id = %id, "File deleted");
        Ok(())
    }

    /// Page through stored files, newest first.
    pub async fn list(&self, page: PageRequest) -> Result<Page<FileRecord>> {
        self.repository.list(page).await
    }

    /// Page through files whose name contains `query`.
    pub async fn search(&self, query: &str, page: PageRequest) -> Result<Page<FileRecord>> {
        self.repository.search(query, page).await
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> Result<VaultStats> {
        self.repository.stats().await
    }

    /// Records updated after `since` (the watcher's change feed).
    pub async fn find_modified_since(&self, since: i64) -> Result<Vec<FileRecord>> {
        self.repository.find_modified_since(since).await
    }

    /// Absolute blob path for a record.
    pub fn blob_path_for(&self, record: &FileRecord) -> PathBuf {
        self.vault_dir.join(&record.storage_path)
    }

    fn extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == "*" || e == ext)
    }

    /// Stream `reader` to a fresh temp file, hashing and size-checking on
    /// the way through.
    async fn spool<R>(&self, mut reader: R) -> Result<SpooledFile>
    where
        R: AsyncRead + Unpin + Send,
    {
        let temp_path = self.temp_dir.join(format!("{}.part", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut size: u64 = 0;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    remove_quietly(&temp_path).await;
                    return Err(e.into());
                }
            };

            size += n as u64;
            if size > self.max_file_size_bytes {
                remove_quietly(&temp_path).await;
                return Err(VaultError::FileTooLarge {
                    size,
                    max: self.max_file_size_bytes,
                });
            }

            hasher.update(&buf[..n]);
            if let Err(e) = file.write_all(&buf[..n]).await {
                remove_quietly(&temp_path).await;
                return Err(e.into());
            }
        }

        if let Err(e) = file.flush().await {
            remove_quietly(&temp_path).await;
            return Err(e.into());
        }
        drop(file);

        Ok(SpooledFile {
            temp_path,
            hash: hex::encode(hasher.finalize()),
            size,
        })
    }

    /// Move a temp file into the vault: rename when possible, copy+delete
    /// across filesystem boundaries.
    async fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(_) => {
                fs::copy(from, to).await?;
                remove_quietly(from).await;
                Ok(())
            }
        }
    }
}

/// Relative content-addressed location for a hash.
fn blob_path(hash: &str) -> PathBuf {
    PathBuf::from(&hash[..2]).join(hash)
}

/// Lower-cased extension of an upload name, empty when absent.
fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

/// Best-effort removal used on cleanup paths.
async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}
