//! Refresh queue entries, the attempt history, and analytics rollups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::Priority;
use super::version::DetectionMethod;

/// Lifecycle status of a queue entry.
///
/// `pending → processing → {completed, failed}`; failed with retries
/// remaining returns to pending after a backoff delay; `cancelled` is set
/// when a force refresh replaces a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    /// Pending or processing. At most one active entry may exist per item.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }

    /// Completed, failed, or cancelled. Terminal entries are retained
    /// for audit until pruned by the retention sweep.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// One unit of refresh work in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshQueueEntry {
    /// Monotonic entry identifier
    pub id: u64,

    /// Item this entry refreshes
    pub item_id: String,

    /// Claim ordering priority
    pub priority: Priority,

    /// Earliest time this entry may be claimed
    pub scheduled_at: DateTime<Utc>,

    /// When a worker claimed this entry
    pub started_at: Option<DateTime<Utc>>,

    /// When the entry reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Current status
    pub status: QueueStatus,

    /// Worker holding the claim
    pub worker_id: Option<String>,

    /// Failed attempts so far
    pub retry_count: u32,

    /// Retry ceiling for transient failures
    pub max_retries: u32,

    /// Last error message, if any
    pub error: Option<String>,

    /// Advisory grouping for reporting; entries are still claimed and
    /// completed individually
    pub batch_id: Option<String>,
}

/// Immutable log of one executed refresh attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshHistoryEntry {
    /// Queue entry that ran
    pub entry_id: u64,

    /// Item that was refreshed
    pub item_id: String,

    /// Whether the attempt succeeded
    pub success: bool,

    /// Whether a content change was detected
    pub changed: bool,

    /// Weighted change magnitude, 0-100
    pub change_score: f64,

    /// Detection method for the change, if any
    pub detection_method: Option<DetectionMethod>,

    /// Wall-clock duration of the attempt in milliseconds
    pub duration_ms: u64,

    /// Error message for failed attempts
    pub error: Option<String>,

    /// When the attempt finished
    pub recorded_at: DateTime<Utc>,
}

/// Aggregation window granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Hourly,
    Daily,
    Weekly,
}

/// Per-period aggregate over the refresh history.
///
/// Keyed by `(period_start, period_end, period_type)`; rollups upsert by
/// that key and are safe to re-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessAnalyticsRow {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_type: PeriodType,

    /// Attempts in the window
    pub attempted: u64,

    /// Successful attempts
    pub succeeded: u64,

    /// Failed attempts
    pub failed: u64,

    /// Attempts that detected a change
    pub changes_detected: u64,

    /// Mean attempt duration in milliseconds
    pub avg_duration_ms: f64,

    /// Median attempt duration in milliseconds
    pub median_duration_ms: f64,

    /// When this row was (re)computed
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(QueueStatus::Pending.is_active());
        assert!(QueueStatus::Processing.is_active());
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
        assert!(QueueStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&QueueStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
