//! Shared mutable state for the freshness subsystem.
//!
//! [`StateStore`] holds the freshness records, version history, refresh
//! queue, attempt history, and analytics rows behind per-collection locks.
//! There is no global lock: every mutation is a conditional transition
//! (expected-old-state → new-state) held for a short, non-blocking
//! critical section, so lost updates are impossible and two workers can
//! never claim the same queue entry. Blocking work (fetching, rewriting)
//! always happens outside these locks, between claim and complete.
//!
//! The two correctness-critical operations live here:
//! - [`StateStore::claim`]: single atomic selection-and-transition of
//!   pending entries to processing.
//! - [`StateStore::append_version`]: conditional write keyed on the
//!   expected current max version per item.

pub mod local;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{
    ContentVersion, FreshnessAnalyticsRow, FreshnessRecord, PeriodType, Priority, QueueStatus,
    RefreshHistoryEntry, RefreshQueueEntry,
};

pub use local::{LocalStorage, SnapshotStorage};

/// Result of an enqueue attempt.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A new pending entry was created
    Enqueued(RefreshQueueEntry),
    /// An active entry already exists for the item; nothing was done
    AlreadyQueued(u64),
}

/// Queue state guarded by one lock: the entries plus the active-entry
/// index enforcing the one-in-flight-per-item invariant.
#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<u64, RefreshQueueEntry>,
    /// item_id -> entry id with status in {pending, processing}
    active_by_item: HashMap<String, u64>,
    /// item_id -> times a claimed entry was reclaimed from a dead worker
    reclaim_counts: HashMap<String, u32>,
}

/// Serializable snapshot of the whole store, for persistence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreState {
    pub records: Vec<FreshnessRecord>,
    pub versions: Vec<ContentVersion>,
    pub queue_entries: Vec<RefreshQueueEntry>,
    pub history: Vec<RefreshHistoryEntry>,
    pub analytics: Vec<FreshnessAnalyticsRow>,
    pub next_entry_id: u64,
}

/// In-memory store for all freshness subsystem state.
#[derive(Debug, Default)]
pub struct StateStore {
    records: Mutex<HashMap<String, FreshnessRecord>>,
    versions: Mutex<HashMap<String, Vec<ContentVersion>>>,
    queue: Mutex<QueueState>,
    history: Mutex<Vec<RefreshHistoryEntry>>,
    analytics: Mutex<HashMap<(DateTime<Utc>, DateTime<Utc>, PeriodType), FreshnessAnalyticsRow>>,
    next_entry_id: AtomicU64,
}

/// Lock a mutex, recovering the inner state if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            next_entry_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    // --- Freshness records ---

    /// Insert a new record. Fails if the item is already tracked.
    pub fn insert_record(&self, record: FreshnessRecord) -> Result<()> {
        let mut records = lock(&self.records);
        if records.contains_key(&record.item_id) {
            return Err(AppError::conflict("record", record.item_id));
        }
        records.insert(record.item_id.clone(), record);
        Ok(())
    }

    /// Fetch a copy of a record.
    pub fn get_record(&self, item_id: &str) -> Option<FreshnessRecord> {
        lock(&self.records).get(item_id).cloned()
    }

    /// Mutate a record under the lock. The closure runs as one atomic
    /// transition; it must not block.
    pub fn update_record<F>(&self, item_id: &str, apply: F) -> Result<FreshnessRecord>
    where
        F: FnOnce(&mut FreshnessRecord),
    {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(item_id)
            .ok_or_else(|| AppError::not_found("record", item_id))?;
        apply(record);
        Ok(record.clone())
    }

    /// Remove a record and cascade: drop its version history and cancel
    /// any active queue entry.
    pub fn remove_record(&self, item_id: &str) -> Result<()> {
        let removed = lock(&self.records).remove(item_id);
        if removed.is_none() {
            return Err(AppError::not_found("record", item_id));
        }
        lock(&self.versions).remove(item_id);

        let mut queue = lock(&self.queue);
        if let Some(entry_id) = queue.active_by_item.remove(item_id) {
            if let Some(entry) = queue.entries.get_mut(&entry_id) {
                entry.status = QueueStatus::Cancelled;
                entry.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    /// Copies of all records, for due scanning and status reporting.
    pub fn all_records(&self) -> Vec<FreshnessRecord> {
        lock(&self.records).values().cloned().collect()
    }

    // --- Version history ---

    /// Current max version number for an item (0 when none).
    pub fn current_version(&self, item_id: &str) -> u32 {
        lock(&self.versions)
            .get(item_id)
            .and_then(|v| v.last())
            .map(|v| v.version_number)
            .unwrap_or(0)
    }

    /// Conditionally append a version: succeeds only if
    /// `version.version_number == current max + 1`. Two concurrent appends
    /// for the same item can never both succeed with the same number.
    pub fn append_version(&self, version: ContentVersion) -> Result<()> {
        let mut versions = lock(&self.versions);
        let list = versions.entry(version.item_id.clone()).or_default();
        let current = list.last().map(|v| v.version_number).unwrap_or(0);
        if version.version_number != current + 1 {
            return Err(AppError::conflict("version", version.item_id));
        }
        list.push(version);
        Ok(())
    }

    /// Newest-first page of an item's versions. `before_version` restarts
    /// the sequence below a previously returned version number.
    pub fn versions_page(
        &self,
        item_id: &str,
        limit: usize,
        before_version: Option<u32>,
    ) -> Vec<ContentVersion> {
        let versions = lock(&self.versions);
        let Some(list) = versions.get(item_id) else {
            return Vec::new();
        };
        list.iter()
            .rev()
            .filter(|v| before_version.is_none_or(|b| v.version_number < b))
            .take(limit)
            .cloned()
            .collect()
    }

    // --- Refresh queue ---

    /// Create a pending entry unless the item already has an active one.
    pub fn enqueue(
        &self,
        item_id: &str,
        priority: Priority,
        scheduled_at: DateTime<Utc>,
        max_retries: u32,
        batch_id: Option<String>,
    ) -> EnqueueOutcome {
        let mut queue = lock(&self.queue);
        if let Some(&existing) = queue.active_by_item.get(item_id) {
            return EnqueueOutcome::AlreadyQueued(existing);
        }

        let id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        let entry = RefreshQueueEntry {
            id,
            item_id: item_id.to_string(),
            priority,
            scheduled_at,
            started_at: None,
            completed_at: None,
            status: QueueStatus::Pending,
            worker_id: None,
            retry_count: 0,
            max_retries,
            error: None,
            batch_id,
        };
        queue.entries.insert(id, entry.clone());
        queue.active_by_item.insert(item_id.to_string(), id);
        EnqueueOutcome::Enqueued(entry)
    }

    /// Cancel the item's active entry if it is still pending. Returns the
    /// cancelled entry id. Processing entries cannot be cancelled here;
    /// only the lease reclaim recovers those.
    pub fn cancel_pending(&self, item_id: &str) -> Result<Option<u64>> {
        let mut queue = lock(&self.queue);
        let Some(&entry_id) = queue.active_by_item.get(item_id) else {
            return Ok(None);
        };
        let entry = queue
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| AppError::not_found("entry", entry_id.to_string()))?;
        if entry.status != QueueStatus::Pending {
            return Err(AppError::conflict("entry", entry_id.to_string()));
        }
        entry.status = QueueStatus::Cancelled;
        entry.completed_at = Some(Utc::now());
        queue.active_by_item.remove(item_id);
        Ok(Some(entry_id))
    }

    /// Atomically claim up to `batch_size` due pending entries for a
    /// worker: selection and the pending → processing transition happen
    /// under one lock acquisition, so concurrent callers never claim
    /// overlapping sets.
    pub fn claim(
        &self,
        worker_id: &str,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Vec<RefreshQueueEntry> {
        let mut queue = lock(&self.queue);

        let mut due: Vec<u64> = queue
            .entries
            .values()
            .filter(|e| e.status == QueueStatus::Pending && e.scheduled_at <= now)
            .map(|e| e.id)
            .collect();
        due.sort_by(|a, b| {
            let ea = &queue.entries[a];
            let eb = &queue.entries[b];
            eb.priority
                .cmp(&ea.priority)
                .then(ea.scheduled_at.cmp(&eb.scheduled_at))
        });
        due.truncate(batch_size);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = queue.entries.get_mut(&id) {
                entry.status = QueueStatus::Processing;
                entry.worker_id = Some(worker_id.to_string());
                entry.started_at = Some(now);
                claimed.push(entry.clone());
            }
        }
        claimed
    }

    /// Conditional transition of one entry: the closure is applied only if
    /// the entry currently has `expected` status, otherwise the caller
    /// lost a race and gets `ConcurrencyConflict`.
    pub fn transition_entry<F>(
        &self,
        entry_id: u64,
        expected: QueueStatus,
        apply: F,
    ) -> Result<RefreshQueueEntry>
    where
        F: FnOnce(&mut RefreshQueueEntry),
    {
        let mut queue = lock(&self.queue);
        let entry = queue
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| AppError::not_found("entry", entry_id.to_string()))?;
        if entry.status != expected {
            return Err(AppError::conflict("entry", entry_id.to_string()));
        }
        apply(entry);
        let snapshot = entry.clone();
        if snapshot.status.is_terminal() {
            queue.active_by_item.remove(&snapshot.item_id);
        }
        Ok(snapshot)
    }

    /// Fetch a copy of one entry.
    pub fn get_entry(&self, entry_id: u64) -> Option<RefreshQueueEntry> {
        lock(&self.queue).entries.get(&entry_id).cloned()
    }

    /// The item's active (pending/processing) entry, if any.
    pub fn active_entry(&self, item_id: &str) -> Option<RefreshQueueEntry> {
        let queue = lock(&self.queue);
        let id = queue.active_by_item.get(item_id)?;
        queue.entries.get(id).cloned()
    }

    /// Copies of all queue entries.
    pub fn all_entries(&self) -> Vec<RefreshQueueEntry> {
        lock(&self.queue).entries.values().cloned().collect()
    }

    /// Reset processing entries whose lease expired back to pending.
    /// Returns the reclaimed entries paired with how many times each item
    /// has been reclaimed so far (for repeated-reclaim alerting).
    pub fn reclaim_expired(
        &self,
        lease_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<(RefreshQueueEntry, u32)> {
        let mut queue = lock(&self.queue);
        let expired: Vec<u64> = queue
            .entries
            .values()
            .filter(|e| {
                e.status == QueueStatus::Processing
                    && e.started_at.is_some_and(|t| t + lease_timeout <= now)
            })
            .map(|e| e.id)
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = queue.entries.get_mut(&id) {
                entry.status = QueueStatus::Pending;
                entry.worker_id = None;
                entry.started_at = None;
                let snapshot = entry.clone();
                let count = queue
                    .reclaim_counts
                    .entry(snapshot.item_id.clone())
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
                reclaimed.push((snapshot, *count));
            }
        }
        reclaimed
    }

    /// Drop terminal entries completed before the cutoff. Active entries
    /// are never pruned.
    pub fn prune_terminal(&self, before: DateTime<Utc>) -> usize {
        let mut queue = lock(&self.queue);
        let doomed: Vec<u64> = queue
            .entries
            .values()
            .filter(|e| {
                e.status.is_terminal() && e.completed_at.is_some_and(|t| t < before)
            })
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            queue.entries.remove(id);
        }
        doomed.len()
    }

    // --- Refresh history ---

    /// Append one attempt to the immutable history log.
    pub fn append_history(&self, entry: RefreshHistoryEntry) {
        lock(&self.history).push(entry);
    }

    /// History entries recorded within `[start, end)`.
    pub fn history_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<RefreshHistoryEntry> {
        lock(&self.history)
            .iter()
            .filter(|h| h.recorded_at >= start && h.recorded_at < end)
            .cloned()
            .collect()
    }

    /// Most recent history entries, newest first.
    pub fn recent_history(&self, limit: usize) -> Vec<RefreshHistoryEntry> {
        let history = lock(&self.history);
        history.iter().rev().take(limit).cloned().collect()
    }

    // --- Analytics ---

    /// Insert or replace the row for its period key. Idempotent.
    pub fn upsert_analytics(&self, row: FreshnessAnalyticsRow) {
        lock(&self.analytics).insert(
            (row.period_start, row.period_end, row.period_type),
            row,
        );
    }

    /// Rows for one period type, newest window first.
    pub fn analytics_rows(&self, period_type: PeriodType, limit: usize) -> Vec<FreshnessAnalyticsRow> {
        let analytics = lock(&self.analytics);
        let mut rows: Vec<_> = analytics
            .values()
            .filter(|r| r.period_type == period_type)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        rows.truncate(limit);
        rows
    }

    // --- Persistence ---

    /// Serializable snapshot of everything, for the storage backend.
    pub fn snapshot(&self) -> StoreState {
        let mut versions: Vec<ContentVersion> =
            lock(&self.versions).values().flatten().cloned().collect();
        versions.sort_by(|a, b| {
            a.item_id
                .cmp(&b.item_id)
                .then(a.version_number.cmp(&b.version_number))
        });

        StoreState {
            records: self.all_records(),
            versions,
            queue_entries: self.all_entries(),
            history: lock(&self.history).clone(),
            analytics: lock(&self.analytics).values().cloned().collect(),
            next_entry_id: self.next_entry_id.load(Ordering::Relaxed),
        }
    }

    /// Rebuild a store from a persisted snapshot.
    pub fn restore(state: StoreState) -> Self {
        let store = Self::new();

        {
            let mut records = lock(&store.records);
            for record in state.records {
                records.insert(record.item_id.clone(), record);
            }
        }
        {
            let mut versions = lock(&store.versions);
            for version in state.versions {
                versions
                    .entry(version.item_id.clone())
                    .or_default()
                    .push(version);
            }
            for list in versions.values_mut() {
                list.sort_by_key(|v| v.version_number);
            }
        }
        {
            let mut queue = lock(&store.queue);
            for entry in state.queue_entries {
                if entry.status.is_active() {
                    queue.active_by_item.insert(entry.item_id.clone(), entry.id);
                }
                queue.entries.insert(entry.id, entry);
            }
        }
        *lock(&store.history) = state.history;
        {
            let mut analytics = lock(&store.analytics);
            for row in state.analytics {
                analytics.insert((row.period_start, row.period_end, row.period_type), row);
            }
        }
        store
            .next_entry_id
            .store(state.next_entry_id.max(1), Ordering::Relaxed);
        store
    }
}
