//! Freshness tracking service.
//!
//! Owns each record's freshness state and staleness score, and decides
//! when a recheck is due. Mutations happen only here, after a check
//! cycle completes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::detect::{ChangeDetector, ChangeReport};
use crate::error::Result;
use crate::models::{ContentSnapshot, FreshnessRecord, FreshnessStatus, Priority};
use crate::services::versions::VersionStore;
use crate::store::StateStore;

/// Staleness score at which a record turns stale.
const STALE_SCORE: f64 = 50.0;
/// Staleness score above which a record is expired.
const EXPIRED_SCORE: f64 = 90.0;

/// Result of one executed check, reported back by the scheduler.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// Fetch succeeded and no hash differed
    Unchanged,
    /// Fetch succeeded and a new version was recorded
    Changed {
        report: ChangeReport,
        new_version: u32,
    },
    /// Fetch failed
    Failed { error: String, exhausted: bool },
}

/// Service owning freshness records and their staleness lifecycle.
pub struct FreshnessTracker {
    store: Arc<StateStore>,
    versions: Arc<VersionStore>,
    config: Arc<Config>,
}

impl FreshnessTracker {
    /// Create a tracker over the shared state.
    pub fn new(store: Arc<StateStore>, versions: Arc<VersionStore>, config: Arc<Config>) -> Self {
        Self {
            store,
            versions,
            config,
        }
    }

    /// Seed the freshness record and initial version for a newly created
    /// item. Called from the submission-created lifecycle hook.
    pub fn initialize(
        &self,
        item_id: &str,
        source_url: &str,
        snapshot: &ContentSnapshot,
    ) -> Result<FreshnessRecord> {
        let now = Utc::now();
        let detector = ChangeDetector::new(self.config.detection.sensitivity);
        let report = detector.initial(snapshot);
        let interval = self.config.freshness.default_refresh_interval_hours;

        let record = FreshnessRecord {
            item_id: item_id.to_string(),
            source_url: source_url.to_string(),
            status: FreshnessStatus::Fresh,
            last_checked_at: now,
            last_updated_at: now,
            next_check_at: Some(now + Duration::hours(i64::from(interval))),
            content_hash: report.new_hashes.content.clone(),
            metadata_hash: report.new_hashes.metadata.clone(),
            images_hash: report.new_hashes.images.clone(),
            content_version: 1,
            staleness_score: 0.0,
            refresh_interval_hours: interval,
            priority: Priority::Normal,
            auto_refresh_enabled: true,
            check_count: 0,
            update_count: 0,
            consecutive_failures: 0,
        };

        self.store.insert_record(record.clone())?;
        self.versions.append(item_id, snapshot, &report, None)?;

        log::info!("Initialized freshness tracking for item {item_id}");
        Ok(record)
    }

    /// Normalized 0-100 measure of how overdue a record's check is:
    /// time-based decay scaled by the priority weight, clamped to range.
    pub fn staleness_score(&self, record: &FreshnessRecord, now: DateTime<Utc>) -> f64 {
        let hours = (now - record.last_checked_at).num_minutes() as f64 / 60.0;
        let threshold = f64::from(self.config.freshness.staleness_threshold_hours);
        let base = (hours / threshold * 100.0).min(100.0);
        let weighted = base * record.priority.weight(&self.config.priority_weights);
        weighted.clamp(0.0, 100.0)
    }

    /// Status implied by a record's staleness at `now`. The expiry
    /// threshold is an absolute ceiling: past it a record is expired even
    /// if priority weighting kept the score under 90.
    pub fn status_for(&self, record: &FreshnessRecord, now: DateTime<Utc>) -> FreshnessStatus {
        let age_hours = (now - record.last_checked_at).num_hours();
        if age_hours >= i64::from(self.config.freshness.expiry_threshold_hours) {
            return FreshnessStatus::Expired;
        }
        let score = self.staleness_score(record, now);
        if score > EXPIRED_SCORE {
            FreshnessStatus::Expired
        } else if score >= STALE_SCORE {
            FreshnessStatus::Stale
        } else {
            FreshnessStatus::Fresh
        }
    }

    /// Apply the outcome of a completed check cycle to the record.
    ///
    /// A confirmed no-change resets the time-based clock: staleness goes
    /// to zero and the next check is rescheduled a full interval out. A
    /// failure leaves `last_checked_at` untouched and defers the next
    /// attempt per the backoff policy.
    pub fn mark_checked(&self, item_id: &str, outcome: &CheckOutcome) -> Result<FreshnessRecord> {
        let now = Utc::now();
        let retry = self.config.retry.clone();

        self.store.update_record(item_id, |record| match outcome {
            CheckOutcome::Unchanged => {
                record.check_count += 1;
                record.last_checked_at = now;
                record.staleness_score = 0.0;
                record.status = FreshnessStatus::Fresh;
                record.consecutive_failures = 0;
                record.next_check_at = record.auto_refresh_enabled.then(|| {
                    now + Duration::hours(i64::from(record.refresh_interval_hours))
                });
            }
            CheckOutcome::Changed {
                report,
                new_version,
            } => {
                record.check_count += 1;
                record.update_count += 1;
                record.last_checked_at = now;
                record.last_updated_at = now;
                record.content_version = *new_version;
                record.content_hash = report.new_hashes.content.clone();
                record.metadata_hash = report.new_hashes.metadata.clone();
                record.images_hash = report.new_hashes.images.clone();
                record.staleness_score = 0.0;
                record.status = FreshnessStatus::Fresh;
                record.consecutive_failures = 0;
                record.next_check_at = record.auto_refresh_enabled.then(|| {
                    now + Duration::hours(i64::from(record.refresh_interval_hours))
                });
            }
            CheckOutcome::Failed { exhausted, .. } => {
                record.consecutive_failures += 1;
                if *exhausted {
                    record.status = FreshnessStatus::Failed;
                } else {
                    // The claim marked the record processing; with the entry
                    // back in the queue no worker holds it, so report the
                    // clock-derived status during the backoff window.
                    record.status = self.status_for(record, now);
                }
                record.next_check_at = record
                    .auto_refresh_enabled
                    .then(|| now + retry.delay_for(record.consecutive_failures));
            }
        })
    }

    /// Recompute staleness and status from the clock, e.g. after a
    /// reclaimed lease left the record marked processing. A failed status
    /// stays sticky until the next successful check.
    pub fn recompute_status(&self, item_id: &str, now: DateTime<Utc>) -> Result<FreshnessRecord> {
        let current = self
            .store
            .get_record(item_id)
            .ok_or_else(|| crate::error::AppError::not_found("record", item_id))?;
        let score = self.staleness_score(&current, now);
        let status = self.status_for(&current, now);

        self.store.update_record(item_id, |record| {
            record.staleness_score = score;
            if record.status != FreshnessStatus::Failed {
                record.status = status;
            }
        })
    }

    /// One page of records due for a check at `now`, ordered by priority
    /// then staleness score descending. Returns the page and the offset
    /// to restart from, if more remain.
    pub fn due_for_check(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> (Vec<FreshnessRecord>, Option<usize>) {
        let mut due: Vec<(FreshnessRecord, f64)> = self
            .store
            .all_records()
            .into_iter()
            .filter(|r| r.is_due(now))
            .map(|r| {
                let score = self.staleness_score(&r, now);
                (r, score)
            })
            .collect();

        due.sort_by(|(ra, sa), (rb, sb)| {
            rb.priority
                .cmp(&ra.priority)
                .then(sb.partial_cmp(sa).unwrap_or(std::cmp::Ordering::Equal))
        });

        let total = due.len();
        let page: Vec<FreshnessRecord> = due
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(r, _)| r)
            .collect();

        let consumed = offset + page.len();
        let next = (consumed < total).then_some(consumed);
        (page, next)
    }

    /// Enable or disable the periodic tick for one item. Disabling clears
    /// `next_check_at`; re-enabling schedules a full interval out.
    pub fn set_auto_refresh(&self, item_id: &str, enabled: bool) -> Result<FreshnessRecord> {
        let now = Utc::now();
        self.store.update_record(item_id, |record| {
            record.auto_refresh_enabled = enabled;
            record.next_check_at = enabled.then(|| {
                record
                    .next_check_at
                    .unwrap_or(now + Duration::hours(i64::from(record.refresh_interval_hours)))
            });
        })
    }

    /// Change an item's refresh priority.
    pub fn set_priority(&self, item_id: &str, priority: Priority) -> Result<FreshnessRecord> {
        self.store
            .update_record(item_id, |record| record.priority = priority)
    }

    /// Cascade hook for item destruction: drops the record, its version
    /// history, and any active queue entry.
    pub fn remove(&self, item_id: &str) -> Result<()> {
        self.store.remove_record(item_id)?;
        log::info!("Removed freshness tracking for item {item_id}");
        Ok(())
    }
}
