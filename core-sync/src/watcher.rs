//! # Change Watcher
//!
//! Background loops feeding the sync orchestrator.
//!
//! ## Overview
//!
//! A running watcher owns three cooperative loops sharing one cancellation
//! token:
//!
//! 1. **Poller** — every `poll_interval`, enqueues files modified since the
//!    last poll. Skipped entirely (and silently) unless an active, enabled,
//!    auto-sync configuration exists; missing configuration is a normal
//!    state, not an error.
//! 2. **Sync workers** — a fixed pool draining the bounded queue into
//!    `SyncOrchestrator::sync_up`.
//! 3. **Retry scheduler** — periodically re-dispatches persisted retry items
//!    whose backoff has elapsed.
//!
//! The queue is a bounded `mpsc` channel (capacity ~100); producers never
//! block on it. A full queue drops the enqueue ([`SyncError::QueueFull`] for
//! explicit triggers, a warning for the poller), trading completeness for
//! backpressure safety — the next poll picks the file up again.
//!
//! ## Lifecycle
//!
//! `stopped → running → stopped`. `start()` on a running watcher fails with
//! [`SyncError::AlreadyRunning`]; `stop()` cancels the token, waits for all
//! loops to exit, and is idempotent. In-flight transfers are not
//! interrupted, only not re-entered.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use core_runtime::WatcherSettings;
use core_vault::{FileId, VaultStore};

use crate::config_store::ConfigRepository;
use crate::orchestrator::SyncOrchestrator;
use crate::{Result, SyncError};

/// Handles of a running watcher.
struct Running {
    cancel: CancellationToken,
    queue: mpsc::Sender<FileId>,
    tasks: Vec<JoinHandle<()>>,
}

/// Polls the vault for changes and keeps the retry schedule moving.
pub struct ChangeWatcher {
    orchestrator: Arc<SyncOrchestrator>,
    files: Arc<VaultStore>,
    configs: Arc<dyn ConfigRepository>,
    settings: WatcherSettings,
    state: Mutex<Option<Running>>,
}

impl ChangeWatcher {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        files: Arc<VaultStore>,
        configs: Arc<dyn ConfigRepository>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            orchestrator,
            files,
            configs,
            settings,
            state: Mutex::new(None),
        }
    }

    /// Spawn the poller, worker pool, and retry scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRunning`] when the watcher is running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<FileId>(self.settings.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(poll_loop(
            cancel.clone(),
            tx.clone(),
            Arc::clone(&self.files),
            Arc::clone(&self.configs),
            self.settings.poll_interval,
        )));

        for worker in 0..self.settings.sync_workers {
            tasks.push(tokio::spawn(worker_loop(
                worker,
                cancel.clone(),
                Arc::clone(&rx),
                Arc::clone(&self.orchestrator),
            )));
        }

        tasks.push(tokio::spawn(retry_loop(
            cancel.clone(),
            Arc::clone(&self.orchestrator),
            self.settings.retry_interval,
        )));

        *state = Some(Running {
            cancel,
            queue: tx,
            tasks,
        });

        info!(
            workers = self.settings.sync_workers,
            queue_capacity = self.settings.queue_capacity,
            "Change watcher started"
        );

        Ok(())
    }

    /// Signal all loops to stop and wait for them to exit. Idempotent.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.state.lock().await;
            state.take()
        };

        let Some(running) = running else {
            debug!("Change watcher already stopped");
            return;
        };

        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Watcher task panicked during shutdown");
            }
        }

        info!("Change watcher stopped");
    }

    /// Whether the watcher is currently running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Enqueue a file immediately, bypassing the poller.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotRunning`] when the watcher is stopped
    /// - [`SyncError::QueueFull`] when the bounded queue is at capacity;
    ///   the caller is never blocked
    pub async fn trigger_sync(&self, file_id: FileId) -> Result<()> {
        let state = self.state.lock().await;
        let running = state.as_ref().ok_or(SyncError::NotRunning)?;

        running.queue.try_send(file_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SyncError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SyncError::NotRunning,
        })
    }
}

/// Enqueue recently modified files while an auto-sync config is active.
async fn poll_loop(
    cancel: CancellationToken,
    queue: mpsc::Sender<FileId>,
    files: Arc<VaultStore>,
    configs: Arc<dyn ConfigRepository>,
    interval: Duration,
) {
    let mut last_poll = chrono::Utc::now().timestamp();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match configs.find_active().await {
            Ok(Some(config)) if config.enabled && config.auto_sync => {}
            Ok(_) => {
                // Auto-sync not configured; not an error, just nothing to do.
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Poller failed to read configuration");
                continue;
            }
        }

        let since = last_poll;
        last_poll = chrono::Utc::now().timestamp();

        let changed = match files.find_modified_since(since).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(error = %e, "Poller failed to query modified files");
                continue;
            }
        };

        for record in changed {
            match queue.try_send(record.id) {
                Ok(()) => debug!(file_id = %record.id, "Change enqueued"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Dropped, the next poll will see the file again.
                    warn!(file_id = %record.id, "Sync queue full, change dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}

/// Drain the queue into the orchestrator.
async fn worker_loop(
    worker: usize,
    cancel: CancellationToken,
    queue: Arc<Mutex<mpsc::Receiver<FileId>>>,
    orchestrator: Arc<SyncOrchestrator>,
) {
    loop {
        let file_id = tokio::select! {
            _ = cancel.cancelled() => break,
            received = async { queue.lock().await.recv().await } => {
                match received {
                    Some(file_id) => file_id,
                    None => break,
                }
            }
        };

        match orchestrator.sync_up(file_id).await {
            Ok(attempt_id) => {
                debug!(worker, file_id = %file_id, attempt_id = %attempt_id, "Sync dispatched")
            }
            // Benign: sync unconfigured or already in flight.
            Err(SyncError::NoActiveConfig) | Err(SyncError::SyncInProgress { .. }) => {
                debug!(worker, file_id = %file_id, "Sync skipped")
            }
            Err(e) => warn!(worker, file_id = %file_id, error = %e, "Sync dispatch failed"),
        }
    }
}

/// Periodically re-dispatch due retry items.
async fn retry_loop(
    cancel: CancellationToken,
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match orchestrator.redispatch_due_retries().await {
            Ok(0) => {}
            Ok(count) => debug!(count, "Re-dispatched retry items"),
            Err(e) => warn!(error = %e, "Retry scheduler pass failed"),
        }
    }
}
