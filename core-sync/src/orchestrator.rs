//! # Sync Orchestrator
//!
//! Drives sync requests through the active storage provider and the sync
//! log.
//!
//! ## Overview
//!
//! The orchestrator accepts sync requests (single file, batch, full remote
//! pull, diff scan), resolves the active [`RemoteStorageConfig`], writes the
//! `Pending` [`SyncAttempt`], and performs the transfer on a spawned task.
//! The attempt row is the only completion signal: transfer failures are
//! recorded as `PendingRetry` (or `Failed` after exhaustion) and are never
//! surfaced to the caller that triggered the sync.
//!
//! The absence of an active configuration is a normal state, reported as
//! [`SyncError::NoActiveConfig`] and logged at debug level only; cloud sync
//! is an optional feature.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use core_oss::{HttpClient, ObjectStat, ObjectStorage, ProviderKind};
use core_vault::{FileId, FileRecord, Page, PageRequest, VaultStore};

use crate::attempt::{RetryPolicy, SyncAttempt, SyncAttemptId, SyncDirection};
use crate::config_store::{ConfigId, ConfigRepository, RemoteStorageConfig};
use crate::factory;
use crate::keys;
use crate::repository::{LogFilter, SyncAttemptRepository};
use crate::{Result, SyncError};

/// Cap on objects fetched per remote listing.
const LIST_LIMIT: u32 = 1000;

/// Page size used when walking the local store for a diff scan.
const SCAN_PAGE_SIZE: u32 = 500;

/// Remote object with no local counterpart, or a size disagreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeMismatch {
    pub remote: ObjectStat,
    pub file_id: FileId,
    pub local_size: i64,
}

/// Result of [`SyncOrchestrator::scan_and_compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Remote objects with no local record of the same name
    pub missing_locally: Vec<ObjectStat>,
    /// Name-matched pairs whose sizes disagree
    pub size_mismatches: Vec<SizeMismatch>,
}

/// Orchestrates uploads, downloads, and the sync log.
pub struct SyncOrchestrator {
    files: Arc<VaultStore>,
    configs: Arc<dyn ConfigRepository>,
    attempts: Arc<dyn SyncAttemptRepository>,
    http_client: Arc<dyn HttpClient>,
    /// Registered provider overrides; when empty, connectors come from the
    /// factory. Embedders and tests inject instances here.
    providers: Arc<RwLock<HashMap<ProviderKind, Arc<dyn ObjectStorage>>>>,
    retry_policy: RetryPolicy,
}

impl SyncOrchestrator {
    pub fn new(
        files: Arc<VaultStore>,
        configs: Arc<dyn ConfigRepository>,
        attempts: Arc<dyn SyncAttemptRepository>,
        http_client: Arc<dyn HttpClient>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            files,
            configs,
            attempts,
            http_client,
            providers: Arc::new(RwLock::new(HashMap::new())),
            retry_policy,
        }
    }

    /// Register a provider instance, overriding factory construction for its
    /// kind.
    pub async fn register_provider(&self, kind: ProviderKind, provider: Arc<dyn ObjectStorage>) {
        let mut providers = self.providers.write().await;
        providers.insert(kind, provider);
        info!(provider = %kind, "Registered storage provider");
    }

    /// Clone for a spawned transfer task.
    fn clone_for_task(&self) -> Self {
        Self {
            files: Arc::clone(&self.files),
            configs: Arc::clone(&self.configs),
            attempts: Arc::clone(&self.attempts),
            http_client: Arc::clone(&self.http_client),
            providers: Arc::clone(&self.providers),
            retry_policy: self.retry_policy,
        }
    }

    async fn resolve_provider(
        &self,
        config: &RemoteStorageConfig,
    ) -> Result<Arc<dyn ObjectStorage>> {
        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(&config.provider) {
                return Ok(Arc::clone(provider));
            }
        }
        factory::create_provider(config, Arc::clone(&self.http_client))
    }

    async fn active_config(&self) -> Result<RemoteStorageConfig> {
        match self.configs.find_active().await? {
            Some(config) => Ok(config),
            None => {
                debug!("No active remote storage configuration, sync skipped");
                Err(SyncError::NoActiveConfig)
            }
        }
    }

    /// Queue an upload of a local file to the active configuration.
    ///
    /// Returns as soon as the `Pending` attempt is written; the transfer
    /// itself runs on a spawned task and reconciles the attempt row.
    #[instrument(skip(self), fields(file_id = %file_id))]
    pub async fn sync_up(&self, file_id: FileId) -> Result<SyncAttemptId> {
        let config = self.active_config().await?;
        let record = self.files.get(file_id).await?;
        let provider = self.resolve_provider(&config).await?;

        // A file keeps the remote key of its last successful upload.
        let remote_path = match self
            .attempts
            .find_last_success(file_id, config.id, SyncDirection::Upload)
            .await?
        {
            Some(previous) => previous.remote_path,
            None => keys::remote_key(&config, &record),
        };

        let attempt = SyncAttempt::new_upload(file_id, config.id, remote_path, record.size);
        let attempt_id = attempt.id;
        self.attempts.insert(&attempt).await?;

        info!(attempt_id = %attempt_id, remote_path = %attempt.remote_path, "Upload queued");

        let this = self.clone_for_task();
        tokio::spawn(async move {
            this.perform_upload(attempt, record, provider).await;
        });

        Ok(attempt_id)
    }

    /// Sequential fan-out of [`sync_up`](Self::sync_up), collecting per-file
    /// errors without aborting the batch.
    pub async fn batch_sync_up(&self, file_ids: &[FileId]) -> Result<Vec<SyncAttemptId>> {
        let mut queued = Vec::new();
        let mut failures = Vec::new();

        for &file_id in file_ids {
            match self.sync_up(file_id).await {
                Ok(attempt_id) => queued.push(attempt_id),
                Err(e) => failures.push((file_id.to_string(), e.to_string())),
            }
        }

        if failures.is_empty() {
            Ok(queued)
        } else {
            Err(SyncError::BatchFailed { failures })
        }
    }

    /// Queue a download of a remote object into the vault.
    ///
    /// Verifies remote existence first; a missing object is a synchronous
    /// error. `file_id` binds the attempt to a known local file; pass `None`
    /// for objects not stored locally yet, and the attempt is rebound to the
    /// record the vault assigns (or deduplicates to) after the download.
    #[instrument(skip(self), fields(remote_key = %remote_key))]
    pub async fn sync_down(
        &self,
        file_id: Option<FileId>,
        remote_key: &str,
    ) -> Result<SyncAttemptId> {
        let config = self.active_config().await?;
        let provider = self.resolve_provider(&config).await?;

        let stat = provider.stat(remote_key).await?;

        let attempt = SyncAttempt::new_download(
            file_id.unwrap_or_else(FileId::new),
            config.id,
            remote_key,
            stat.size as i64,
        );
        let attempt_id = attempt.id;
        self.attempts.insert(&attempt).await?;

        info!(attempt_id = %attempt_id, "Download queued");

        let this = self.clone_for_task();
        tokio::spawn(async move {
            this.perform_download(attempt, provider).await;
        });

        Ok(attempt_id)
    }

    /// Pull every remote object under the active configuration's prefix.
    ///
    /// Rejected while any download attempt is pending system-wide.
    #[instrument(skip(self))]
    pub async fn sync_all_down(&self) -> Result<Vec<SyncAttemptId>> {
        let config = self.active_config().await?;
        let provider = self.resolve_provider(&config).await?;

        if self.attempts.count_pending(SyncDirection::Download).await? > 0 {
            return Err(SyncError::DownloadInProgress);
        }

        let objects = provider.list(&config.sync_prefix, LIST_LIMIT).await?;
        info!(count = objects.len(), "Starting full remote pull");

        let mut queued = Vec::new();
        for object in objects {
            if object.key.ends_with('/') {
                continue;
            }

            let attempt =
                SyncAttempt::new_download(FileId::new(), config.id, &object.key, object.size as i64);
            let attempt_id = attempt.id;

            match self.attempts.insert(&attempt).await {
                Ok(()) => {}
                Err(SyncError::SyncInProgress { .. }) => {
                    debug!(key = %object.key, "Download already pending, skipped");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let this = self.clone_for_task();
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                this.perform_download(attempt, provider).await;
            });

            queued.push(attempt_id);
        }

        Ok(queued)
    }

    /// Compare the remote prefix against the local store.
    ///
    /// Remote objects are matched to local records by file name (the key's
    /// final path segment).
    #[instrument(skip(self))]
    pub async fn scan_and_compare(&self) -> Result<ScanReport> {
        let config = self.active_config().await?;
        let provider = self.resolve_provider(&config).await?;

        let objects = provider.list(&config.sync_prefix, LIST_LIMIT).await?;

        let mut by_name: HashMap<String, (FileId, i64)> = HashMap::new();
        let mut page = PageRequest::new(0, SCAN_PAGE_SIZE);
        loop {
            let batch = self.files.list(page).await?;
            for record in &batch.items {
                by_name
                    .entry(record.name.clone())
                    .or_insert((record.id, record.size));
            }
            if !batch.has_next() {
                break;
            }
            page.page += 1;
        }

        let mut report = ScanReport::default();
        for object in objects {
            if object.key.ends_with('/') {
                continue;
            }

            match by_name.get(object.file_name()) {
                None => report.missing_locally.push(object),
                Some(&(file_id, local_size)) if local_size as u64 != object.size => {
                    report.size_mismatches.push(SizeMismatch {
                        remote: object,
                        file_id,
                        local_size,
                    });
                }
                Some(_) => {}
            }
        }

        info!(
            missing = report.missing_locally.len(),
            mismatched = report.size_mismatches.len(),
            "Remote scan complete"
        );

        Ok(report)
    }

    /// Operator retry of a terminally failed attempt.
    ///
    /// Resets the attempt to `Pending` and re-dispatches it in its original
    /// direction.
    #[instrument(skip(self), fields(attempt_id = %attempt_id))]
    pub async fn retry_sync(&self, attempt_id: SyncAttemptId) -> Result<()> {
        let attempt = self
            .attempts
            .find_by_id(attempt_id)
            .await?
            .ok_or(SyncError::AttemptNotFound {
                attempt_id: attempt_id.to_string(),
            })?;

        let pending = attempt.retry_manual()?;
        self.attempts.update(&pending).await?;

        info!("Attempt reset for manual retry");
        self.dispatch(pending).await
    }

    /// Re-dispatch retry items whose backoff has elapsed.
    ///
    /// Called periodically by the change watcher's retry scheduler. Items
    /// whose configuration or file has meanwhile disappeared are marked
    /// failed instead of being retried forever.
    pub async fn redispatch_due_retries(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let due = self.attempts.due_retries(now, 50).await?;
        let count = due.len();

        for attempt in due {
            let attempt_id = attempt.id;
            let pending = match attempt.redispatch() {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(attempt_id = %attempt_id, error = %e, "Retry item in unexpected state");
                    continue;
                }
            };

            match self.attempts.update(&pending).await {
                Ok(()) => {}
                Err(SyncError::SyncInProgress { .. }) => {
                    debug!(attempt_id = %attempt_id, "Newer attempt already pending, retry dropped");
                    continue;
                }
                Err(e) => {
                    warn!(attempt_id = %attempt_id, error = %e, "Failed to re-dispatch retry item");
                    continue;
                }
            }

            if let Err(e) = self.dispatch(pending.clone()).await {
                warn!(attempt_id = %attempt_id, error = %e, "Retry dispatch failed");
                match pending.mark_failed(e.to_string()) {
                    Ok(failed) => {
                        if let Err(update_err) = self.attempts.update(&failed).await {
                            error!(attempt_id = %attempt_id, error = %update_err, "Failed to record dispatch failure");
                        }
                    }
                    Err(transition_err) => {
                        error!(attempt_id = %attempt_id, error = %transition_err, "Failed to mark attempt failed");
                    }
                }
            }
        }

        Ok(count)
    }

    /// Page through the sync log.
    pub async fn sync_logs(&self, filter: &LogFilter, page: PageRequest) -> Result<Page<SyncAttempt>> {
        self.attempts.list(filter, page).await
    }

    /// Most recent attempt for a file, if any.
    pub async fn file_sync_status(&self, file_id: FileId) -> Result<Option<SyncAttempt>> {
        self.attempts.latest_for_file(file_id).await
    }

    /// Validate a stored configuration by probing its bucket.
    pub async fn test_config(&self, config_id: ConfigId) -> Result<()> {
        let config = self
            .configs
            .find_by_id(config_id)
            .await?
            .ok_or(SyncError::ConfigNotFound {
                config_id: config_id.to_string(),
            })?;

        let provider = self.resolve_provider(&config).await?;
        provider.test_connection().await?;
        Ok(())
    }

    /// Spawn the transfer for an already-pending attempt.
    async fn dispatch(&self, attempt: SyncAttempt) -> Result<()> {
        let config = self
            .configs
            .find_by_id(attempt.config_id)
            .await?
            .ok_or(SyncError::ConfigNotFound {
                config_id: attempt.config_id.to_string(),
            })?;
        let provider = self.resolve_provider(&config).await?;

        match attempt.direction {
            SyncDirection::Upload => {
                let record = self.files.get(attempt.file_id).await?;
                let this = self.clone_for_task();
                tokio::spawn(async move {
                    this.perform_upload(attempt, record, provider).await;
                });
            }
            SyncDirection::Download => {
                let this = self.clone_for_task();
                tokio::spawn(async move {
                    this.perform_download(attempt, provider).await;
                });
            }
        }

        Ok(())
    }

    /// Run an upload and reconcile the attempt row. Never returns an error;
    /// all failure information lands in the sync log.
    async fn perform_upload(
        &self,
        attempt: SyncAttempt,
        record: FileRecord,
        provider: Arc<dyn ObjectStorage>,
    ) {
        let started = Instant::now();

        let result: Result<()> = async {
            let path = self.files.blob_path_for(&record);
            let data = tokio::fs::read(&path).await.map_err(core_vault::VaultError::from)?;
            provider
                .upload(
                    &attempt.remote_path,
                    Bytes::from(data),
                    content_type_for(&record.format),
                )
                .await?;
            Ok(())
        }
        .await;

        self.reconcile(attempt, result.map(|_| None), started).await;
    }

    /// Run a download, hand the bytes to the vault, and reconcile.
    async fn perform_download(&self, attempt: SyncAttempt, provider: Arc<dyn ObjectStorage>) {
        let started = Instant::now();

        let result: Result<Option<FileRecord>> = async {
            let data = provider.download(&attempt.remote_path).await?;
            let name = attempt
                .remote_path
                .rsplit('/')
                .next()
                .unwrap_or(&attempt.remote_path)
                .to_string();
            let record = self.files.put(&name, Cursor::new(data)).await?;
            Ok(Some(record))
        }
        .await;

        self.reconcile(attempt, result, started).await;
    }

    /// Apply a transfer outcome to the attempt row.
    async fn reconcile(
        &self,
        mut attempt: SyncAttempt,
        result: Result<Option<FileRecord>>,
        started: Instant,
    ) {
        let attempt_id = attempt.id;

        let transition = match result {
            Ok(stored) => {
                // Downloads rebind the attempt to the record the vault
                // assigned (possibly an existing one via dedup).
                if let Some(record) = stored {
                    attempt.file_id = record.id;
                    attempt.bytes = record.size;
                }
                let duration_ms = started.elapsed().as_millis() as i64;
                attempt.succeed(duration_ms)
            }
            Err(e) => {
                warn!(attempt_id = %attempt_id, error = %e, "Transfer failed");
                attempt.fail_transient(e.to_string(), &self.retry_policy)
            }
        };

        match transition {
            Ok(updated) => {
                let status = updated.status;
                if let Err(e) = self.attempts.update(&updated).await {
                    error!(attempt_id = %attempt_id, error = %e, "Failed to persist attempt state");
                } else {
                    debug!(attempt_id = %attempt_id, status = %status, "Attempt reconciled");
                }
            }
            Err(e) => {
                error!(attempt_id = %attempt_id, error = %e, "Invalid attempt transition");
            }
        }
    }
}

/// MIME type for a vault format (lower-cased extension).
fn content_type_for(format: &str) -> &'static str {
    match format {
        "txt" | "md" => "text/plain",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "json" => "application/json",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
