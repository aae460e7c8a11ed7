//! Per-item freshness record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PriorityWeights;

/// Freshness lifecycle status of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    /// Content confirmed current (staleness below 50)
    Fresh,
    /// Overdue for a recheck (staleness 50-90)
    Stale,
    /// Past the absolute expiry ceiling or staleness above 90
    Expired,
    /// A refresh for this item is currently in flight
    Processing,
    /// Refresh attempts exhausted; needs attention
    Failed,
}

/// Refresh priority. Ordering is ascending urgency, so `max`/sorting
/// naturally puts critical items first when reversed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Staleness multiplier for this priority from the configured weights.
    pub fn weight(&self, weights: &PriorityWeights) -> f64 {
        match self {
            Priority::Low => weights.low,
            Priority::Normal => weights.normal,
            Priority::High => weights.high,
            Priority::Critical => weights.critical,
        }
    }
}

/// Freshness state for one tracked item (unique by `item_id`).
///
/// Created atomically when the owning item is created, mutated only by
/// the tracker after a check cycle, removed when the item is destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessRecord {
    /// Owning item identifier
    pub item_id: String,

    /// URL the item's metadata was extracted from
    pub source_url: String,

    /// Current lifecycle status
    pub status: FreshnessStatus,

    /// When the last successful check completed
    pub last_checked_at: DateTime<Utc>,

    /// When content last actually changed
    pub last_updated_at: DateTime<Utc>,

    /// Next scheduled check; None only when auto-refresh is disabled
    pub next_check_at: Option<DateTime<Utc>>,

    /// Digest of normalized title + description
    pub content_hash: String,

    /// Digest of metadata fields (tags)
    pub metadata_hash: String,

    /// Digest of the image URL list
    pub images_hash: String,

    /// Monotonic version counter, starts at 1
    pub content_version: u32,

    /// Normalized 0-100 measure of how overdue a check is
    pub staleness_score: f64,

    /// Recheck interval in hours
    pub refresh_interval_hours: u32,

    /// Refresh priority
    pub priority: Priority,

    /// Whether the periodic tick schedules this item
    pub auto_refresh_enabled: bool,

    /// Total successful checks
    pub check_count: u64,

    /// Total checks that detected a change
    pub update_count: u64,

    /// Consecutive failed attempts since the last success
    pub consecutive_failures: u32,
}

impl FreshnessRecord {
    /// Whether this record is eligible for the periodic tick at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.auto_refresh_enabled
            && self.next_check_at.is_some_and(|at| at <= now)
    }
}
