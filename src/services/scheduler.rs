//! Refresh scheduling: the priority work queue.
//!
//! Workers claim pending entries, execute the refresh outside any lock,
//! and report back through [`RefreshScheduler::complete`]. Transient
//! failures are retried with exponential backoff up to the configured
//! attempt ceiling; crashed or hung workers are recovered by the lease
//! reclaim. The queue enforces at most one active entry per item.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::Config;
use crate::detect::ChangeReport;
use crate::error::{AppError, Result};
use crate::models::{Priority, QueueStatus, RefreshHistoryEntry, RefreshQueueEntry};
use crate::services::alerts::{Alert, AlertSink};
use crate::services::tracker::{CheckOutcome, FreshnessTracker};
use crate::store::{EnqueueOutcome, StateStore};

/// Reclaims for one item before the repeated-reclaim alert fires.
const REPEATED_RECLAIM_THRESHOLD: u32 = 3;

/// Outcome of one executed refresh attempt, reported by a worker.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// Fetch succeeded; no hash differed
    Unchanged { duration_ms: u64 },
    /// Fetch succeeded; a new version was appended
    Changed {
        report: ChangeReport,
        new_version: u32,
        duration_ms: u64,
    },
    /// Fetch (or processing) failed
    Failed {
        error: String,
        transient: bool,
        duration_ms: u64,
    },
}

/// Priority work queue driving refresh execution.
pub struct RefreshScheduler {
    store: Arc<StateStore>,
    tracker: Arc<FreshnessTracker>,
    config: Arc<Config>,
    alerts: Arc<dyn AlertSink>,
}

impl RefreshScheduler {
    /// Create a scheduler over the shared state.
    pub fn new(
        store: Arc<StateStore>,
        tracker: Arc<FreshnessTracker>,
        config: Arc<Config>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            tracker,
            config,
            alerts,
        }
    }

    /// Enqueue a refresh for an item. A no-op if the item already has a
    /// pending or processing entry.
    pub fn enqueue(
        &self,
        item_id: &str,
        priority: Priority,
        scheduled_at: chrono::DateTime<Utc>,
        batch_id: Option<String>,
    ) -> EnqueueOutcome {
        let outcome = self.store.enqueue(
            item_id,
            priority,
            scheduled_at,
            self.config.retry.max_attempts,
            batch_id,
        );
        match &outcome {
            EnqueueOutcome::Enqueued(entry) => {
                log::debug!("Enqueued entry {} for item {item_id}", entry.id);
            }
            EnqueueOutcome::AlreadyQueued(id) => {
                log::debug!("Item {item_id} already queued as entry {id}; skipping");
            }
        }
        outcome
    }

    /// Operator-triggered refresh: cancels an existing pending entry and
    /// re-enqueues at high priority for immediate execution. Refuses while
    /// a worker is processing the item; only the lease reclaim can recover
    /// an in-flight run.
    pub fn force_refresh(&self, item_id: &str) -> Result<RefreshQueueEntry> {
        if self.store.get_record(item_id).is_none() {
            return Err(AppError::not_found("record", item_id));
        }

        if let Some(cancelled) = self.store.cancel_pending(item_id)? {
            log::info!("Force refresh for item {item_id}: cancelled pending entry {cancelled}");
        }

        match self.store.enqueue(
            item_id,
            Priority::High,
            Utc::now(),
            self.config.retry.max_attempts,
            None,
        ) {
            EnqueueOutcome::Enqueued(entry) => {
                log::info!("Force refresh enqueued entry {} for item {item_id}", entry.id);
                Ok(entry)
            }
            EnqueueOutcome::AlreadyQueued(_) => Err(AppError::conflict("entry", item_id)),
        }
    }

    /// Atomically claim up to `batch_size` due entries for a worker and
    /// mark the affected records as processing.
    pub fn claim_next(&self, worker_id: &str, batch_size: usize) -> Vec<RefreshQueueEntry> {
        let claimed = self.store.claim(worker_id, batch_size, Utc::now());
        for entry in &claimed {
            // Record may be gone if the item was destroyed mid-flight
            let _ = self.store.update_record(&entry.item_id, |record| {
                record.status = crate::models::FreshnessStatus::Processing;
            });
        }
        if !claimed.is_empty() {
            log::info!("Worker {worker_id} claimed {} entries", claimed.len());
        }
        claimed
    }

    /// Report the outcome of a claimed entry. On success the entry
    /// completes and the tracker clock resets; on transient failure the
    /// entry returns to pending after backoff until retries run out.
    pub fn complete(&self, entry_id: u64, outcome: &AttemptOutcome) -> Result<RefreshQueueEntry> {
        let now = Utc::now();

        let entry = match outcome {
            AttemptOutcome::Unchanged { .. } | AttemptOutcome::Changed { .. } => self
                .store
                .transition_entry(entry_id, QueueStatus::Processing, |entry| {
                    entry.status = QueueStatus::Completed;
                    entry.completed_at = Some(now);
                    entry.error = None;
                })?,
            AttemptOutcome::Failed {
                error, transient, ..
            } => {
                let retry = self.config.retry.clone();
                self.store
                    .transition_entry(entry_id, QueueStatus::Processing, |entry| {
                        entry.retry_count += 1;
                        entry.error = Some(error.clone());
                        if *transient && entry.retry_count < entry.max_retries {
                            entry.status = QueueStatus::Pending;
                            entry.scheduled_at = now + retry.delay_for(entry.retry_count);
                            entry.worker_id = None;
                            entry.started_at = None;
                        } else {
                            entry.status = QueueStatus::Failed;
                            entry.completed_at = Some(now);
                        }
                    })?
            }
        };

        self.store.append_history(history_for(&entry, outcome, now));

        match outcome {
            AttemptOutcome::Unchanged { .. } => {
                self.tracker
                    .mark_checked(&entry.item_id, &CheckOutcome::Unchanged)?;
            }
            AttemptOutcome::Changed {
                report,
                new_version,
                ..
            } => {
                self.tracker.mark_checked(
                    &entry.item_id,
                    &CheckOutcome::Changed {
                        report: report.clone(),
                        new_version: *new_version,
                    },
                )?;
            }
            AttemptOutcome::Failed { error, .. } => {
                let exhausted = entry.status == QueueStatus::Failed;
                if exhausted {
                    log::error!(
                        "Entry {} for item {} terminally failed after {} attempts",
                        entry.id,
                        entry.item_id,
                        entry.retry_count
                    );
                    self.alerts.emit(&Alert::RetriesExhausted {
                        item_id: entry.item_id.clone(),
                        entry_id: entry.id,
                        error: error.clone(),
                    });
                } else {
                    log::warn!(
                        "Entry {} for item {} failed (attempt {}/{}): {}",
                        entry.id,
                        entry.item_id,
                        entry.retry_count,
                        entry.max_retries,
                        error
                    );
                }
                self.tracker.mark_checked(
                    &entry.item_id,
                    &CheckOutcome::Failed {
                        error: error.clone(),
                        exhausted,
                    },
                )?;
            }
        }

        Ok(entry)
    }

    /// Recover entries whose worker crashed or hung: processing entries
    /// past the lease timeout return to pending. Repeated reclaims for
    /// one item raise an alert.
    pub fn reclaim_abandoned(&self) -> usize {
        let lease = Duration::seconds(self.config.scheduler.lease_timeout_secs as i64);
        let now = Utc::now();
        let reclaimed = self.store.reclaim_expired(lease, now);

        for (entry, count) in &reclaimed {
            log::warn!(
                "Reclaimed abandoned entry {} for item {} (reclaim #{count})",
                entry.id,
                entry.item_id
            );
            let _ = self.tracker.recompute_status(&entry.item_id, now);
            if *count >= REPEATED_RECLAIM_THRESHOLD {
                self.alerts.emit(&Alert::RepeatedReclaim {
                    item_id: entry.item_id.clone(),
                    count: *count,
                });
            }
        }
        reclaimed.len()
    }

    /// Retention sweep: drop terminal entries completed before the cutoff.
    pub fn prune_completed(&self, before: chrono::DateTime<Utc>) -> usize {
        let pruned = self.store.prune_terminal(before);
        if pruned > 0 {
            log::info!("Pruned {pruned} terminal queue entries");
        }
        pruned
    }
}

/// Build the immutable history row for one attempt.
fn history_for(
    entry: &RefreshQueueEntry,
    outcome: &AttemptOutcome,
    now: chrono::DateTime<Utc>,
) -> RefreshHistoryEntry {
    let (success, changed, change_score, detection_method, duration_ms, error) = match outcome {
        AttemptOutcome::Unchanged { duration_ms } => (true, false, 0.0, None, *duration_ms, None),
        AttemptOutcome::Changed {
            report,
            duration_ms,
            ..
        } => (
            true,
            true,
            report.change_score,
            report.detection_method,
            *duration_ms,
            None,
        ),
        AttemptOutcome::Failed {
            error, duration_ms, ..
        } => (false, false, 0.0, None, *duration_ms, Some(error.clone())),
    };

    RefreshHistoryEntry {
        entry_id: entry.id,
        item_id: entry.item_id.clone(),
        success,
        changed,
        change_score,
        detection_method,
        duration_ms,
        error,
        recorded_at: now,
    }
}
