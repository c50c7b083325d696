//! # Sync Attempt State Machine
//!
//! One row per sync operation, with validated state transitions.
//!
//! ## Overview
//!
//! A [`SyncAttempt`] is both the audit record and the retry source of truth
//! for one upload or download. Rows persist across restarts, including the
//! retry bookkeeping (`retry_count`, `next_retry_at`), so a crashed process
//! resumes exactly where the log says it was.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Success
//! Pending → PendingRetry → Pending   (automatic re-dispatch)
//! PendingRetry → Failed              (retry exhaustion)
//! Pending → Failed                   (manual marking)
//! Failed → Pending                   (explicit operator retry)
//! ```
//!
//! Failures while an attempt is in flight never reach the caller that
//! triggered it; they only move this state machine.

use crate::config_store::ConfigId;
use crate::{Result, SyncError};
use core_vault::FileId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// ID Type
// ============================================================================

/// Unique identifier for a sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncAttemptId(Uuid);

impl SyncAttemptId {
    /// Create a new random attempt ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an attempt ID from a string
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

impl Default for SyncAttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Direction & Status
// ============================================================================

/// Direction of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Local file pushed to the remote bucket
    Upload,
    /// Remote object pulled into the local vault
    Download,
}

impl SyncDirection {
    /// String representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Upload => "upload",
            SyncDirection::Download => "download",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upload" => Ok(SyncDirection::Upload),
            "download" => Ok(SyncDirection::Download),
            _ => Err(SyncError::InvalidDirection(s.to_string())),
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Dispatched, I/O not yet reconciled
    Pending,
    /// Completed successfully
    Success,
    /// Transient failure, eligible for automatic retry
    PendingRetry,
    /// Terminal failure; only an explicit operator retry revives it
    Failed,
}

impl SyncStatus {
    /// String representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Success => "success",
            SyncStatus::PendingRetry => "pending_retry",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether no further automatic work will happen on this attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Failed)
    }

    /// Whether the attempt is still moving through the pipeline
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::PendingRetry)
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "success" => Ok(SyncStatus::Success),
            "pending_retry" => Ok(SyncStatus::PendingRetry),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Automatic retry policy with quadratic backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base interval multiplied by the squared attempt count
    pub base_interval: Duration,
    /// Failures after which the attempt parks in `Failed`
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `attempt² × base`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.base_interval * attempt.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

// ============================================================================
// Sync Attempt Entity
// ============================================================================

/// One sync operation's audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttempt {
    /// Unique identifier
    pub id: SyncAttemptId,
    /// Local file this attempt moves; downloads of unknown objects carry a
    /// provisional ID until the vault assigns the real record
    pub file_id: FileId,
    /// Configuration the attempt targets
    pub config_id: ConfigId,
    /// Operation direction
    pub direction: SyncDirection,
    /// Current status
    pub status: SyncStatus,
    /// Remote object key
    pub remote_path: String,
    /// Payload size in bytes
    pub bytes: i64,
    /// Wall-clock duration of the successful transfer
    pub duration_ms: Option<i64>,
    /// Error text of the most recent failure
    pub error_message: Option<String>,
    /// Number of failures so far
    pub retry_count: u32,
    /// Unix timestamp when the next automatic retry is due
    pub next_retry_at: Option<i64>,
    /// Unix timestamp when created
    pub created_at: i64,
    /// Unix timestamp when last updated
    pub updated_at: i64,
}

impl SyncAttempt {
    fn new(
        file_id: FileId,
        config_id: ConfigId,
        direction: SyncDirection,
        remote_path: impl Into<String>,
        bytes: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: SyncAttemptId::new(),
            file_id,
            config_id,
            direction,
            status: SyncStatus::Pending,
            remote_path: remote_path.into(),
            bytes,
            duration_ms: None,
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a pending upload attempt.
    pub fn new_upload(
        file_id: FileId,
        config_id: ConfigId,
        remote_path: impl Into<String>,
        bytes: i64,
    ) -> Self {
        Self::new(file_id, config_id, SyncDirection::Upload, remote_path, bytes)
    }

    /// Create a pending download attempt.
    pub fn new_download(
        file_id: FileId,
        config_id: ConfigId,
        remote_path: impl Into<String>,
        bytes: i64,
    ) -> Self {
        Self::new(
            file_id,
            config_id,
            SyncDirection::Download,
            remote_path,
            bytes,
        )
    }

    /// Mark the transfer successful.
    pub fn succeed(mut self, duration_ms: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Success)?;
        self.status = SyncStatus::Success;
        self.duration_ms = Some(duration_ms);
        self.error_message = None;
        self.next_retry_at = None;
        self.updated_at = chrono::Utc::now().timestamp();
        Ok(self)
    }

    /// Record a transient failure.
    ///
    /// Increments the failure count and either schedules the next automatic
    /// retry (`PendingRetry` with `next_retry_at`) or, once the policy's
    /// attempt cap is reached, parks the row in `Failed`.
    pub fn fail_transient(mut self, error: impl Into<String>, policy: &RetryPolicy) -> Result<Self> {
        let now = chrono::Utc::now().timestamp();
        self.retry_count += 1;
        self.error_message = Some(error.into());
        self.updated_at = now;

        if self.retry_count >= policy.max_attempts {
            self.validate_transition(SyncStatus::Failed)?;
            self.status = SyncStatus::Failed;
            self.next_retry_at = None;
        } else {
            self.validate_transition(SyncStatus::PendingRetry)?;
            self.status = SyncStatus::PendingRetry;
            self.next_retry_at = Some(now + policy.retry_delay(self.retry_count).as_secs() as i64);
        }

        Ok(self)
    }

    /// Move a due retry item back to `Pending` for re-dispatch.
    pub fn redispatch(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Pending)?;
        self.status = SyncStatus::Pending;
        self.next_retry_at = None;
        self.updated_at = chrono::Utc::now().timestamp();
        Ok(self)
    }

    /// Mark a pending attempt failed without retry (manual marking).
    pub fn mark_failed(mut self, reason: impl Into<String>) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.error_message = Some(reason.into());
        self.next_retry_at = None;
        self.updated_at = chrono::Utc::now().timestamp();
        Ok(self)
    }

    /// Operator retry of a terminally failed attempt.
    ///
    /// Resets the failure counter; the attempt starts a fresh retry budget.
    pub fn retry_manual(mut self) -> Result<Self> {
        if self.status != SyncStatus::Failed {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: SyncStatus::Pending.as_str().to_string(),
                reason: "only failed attempts can be retried manually".to_string(),
            });
        }
        self.status = SyncStatus::Pending;
        self.retry_count = 0;
        self.error_message = None;
        self.next_retry_at = None;
        self.updated_at = chrono::Utc::now().timestamp();
        Ok(self)
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (SyncStatus::Pending, SyncStatus::Success)
                | (SyncStatus::Pending, SyncStatus::PendingRetry)
                | (SyncStatus::Pending, SyncStatus::Failed)
                | (SyncStatus::PendingRetry, SyncStatus::Pending)
                | (SyncStatus::PendingRetry, SyncStatus::Failed)
                | (SyncStatus::Failed, SyncStatus::Pending)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> SyncAttempt {
        SyncAttempt::new_upload(FileId::new(), ConfigId::new(), "sync/a.txt", 5)
    }

    fn policy(base_secs: u64, max: u32) -> RetryPolicy {
        RetryPolicy {
            base_interval: Duration::from_secs(base_secs),
            max_attempts: max,
        }
    }

    #[test]
    fn test_new_attempt_is_pending() {
        let a = attempt();
        assert_eq!(a.status, SyncStatus::Pending);
        assert_eq!(a.retry_count, 0);
        assert!(a.next_retry_at.is_none());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Success,
            SyncStatus::PendingRetry,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_direction_round_trip() {
        assert_eq!(
            "upload".parse::<SyncDirection>().unwrap(),
            SyncDirection::Upload
        );
        assert!("sideways".parse::<SyncDirection>().is_err());
    }

    #[test]
    fn test_succeed() {
        let a = attempt().succeed(120).unwrap();
        assert_eq!(a.status, SyncStatus::Success);
        assert_eq!(a.duration_ms, Some(120));
    }

    #[test]
    fn test_succeed_twice_rejected() {
        let a = attempt().succeed(120).unwrap();
        assert!(a.succeed(120).is_err());
    }

    #[test]
    fn test_fail_transient_schedules_retry() {
        let a = attempt().fail_transient("timeout", &policy(60, 5)).unwrap();
        assert_eq!(a.status, SyncStatus::PendingRetry);
        assert_eq!(a.retry_count, 1);
        assert_eq!(a.error_message.as_deref(), Some("timeout"));
        assert!(a.next_retry_at.is_some());
    }

    #[test]
    fn test_backoff_is_quadratic_and_monotonic() {
        let p = policy(60, 5);
        assert_eq!(p.retry_delay(1), Duration::from_secs(60));
        assert_eq!(p.retry_delay(2), Duration::from_secs(240));
        assert_eq!(p.retry_delay(3), Duration::from_secs(540));

        let mut previous = Duration::ZERO;
        for n in 1..=10 {
            let delay = p.retry_delay(n);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_retry_exhaustion_parks_failed() {
        let p = policy(0, 5);
        let mut a = attempt();

        for expected in 1..=4u32 {
            a = a.fail_transient("transport error", &p).unwrap();
            assert_eq!(a.retry_count, expected);
            assert_eq!(a.status, SyncStatus::PendingRetry);
            a = a.redispatch().unwrap();
        }

        a = a.fail_transient("transport error", &p).unwrap();
        assert_eq!(a.retry_count, 5);
        assert_eq!(a.status, SyncStatus::Failed);
        assert!(a.next_retry_at.is_none());
    }

    #[test]
    fn test_redispatch_only_from_pending_retry() {
        assert!(attempt().redispatch().is_err());

        let a = attempt().fail_transient("x", &policy(1, 5)).unwrap();
        let a = a.redispatch().unwrap();
        assert_eq!(a.status, SyncStatus::Pending);
        assert!(a.next_retry_at.is_none());
    }

    #[test]
    fn test_manual_retry_resets_budget() {
        let a = attempt().mark_failed("gone").unwrap();
        assert_eq!(a.status, SyncStatus::Failed);

        let a = a.retry_manual().unwrap();
        assert_eq!(a.status, SyncStatus::Pending);
        assert_eq!(a.retry_count, 0);
        assert!(a.error_message.is_none());
    }

    #[test]
    fn test_manual_retry_requires_failed() {
        assert!(attempt().retry_manual().is_err());
        let success = attempt().succeed(1).unwrap();
        assert!(success.retry_manual().is_err());
    }

    #[test]
    fn test_terminal_success_is_final() {
        let a = attempt().succeed(1).unwrap();
        assert!(a.clone().fail_transient("x", &policy(1, 5)).is_err());
        assert!(a.clone().mark_failed("x").is_err());
        assert!(a.redispatch().is_err());
    }
}
