// src/pipeline/tick.rs

//! Scheduler tick: recover abandoned work, then enqueue due records.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::services::{FreshnessTracker, RefreshScheduler};
use crate::store::EnqueueOutcome;

/// Summary of one scheduler tick.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub reclaimed: usize,
    pub due: usize,
    pub enqueued: usize,
    pub already_queued: usize,
    /// Due records beyond the batch limit remain for the next tick
    pub remaining: bool,
}

/// Run one scheduler tick at `now`.
///
/// Lease reclaim always runs; enqueueing is skipped entirely when auto
/// refresh is disabled. At most `batch_size_limit` records are enqueued
/// per tick, most urgent first; the rest wait for the next tick.
pub fn run_tick(
    tracker: &FreshnessTracker,
    scheduler: &RefreshScheduler,
    config: &Arc<Config>,
    now: DateTime<Utc>,
) -> TickSummary {
    let mut summary = TickSummary {
        reclaimed: scheduler.reclaim_abandoned(),
        ..TickSummary::default()
    };

    if !config.freshness.enable_auto_refresh {
        log::debug!("Auto refresh disabled; tick enqueues nothing");
        return summary;
    }

    let limit = config.scheduler.batch_size_limit;
    let (due, next_offset) = tracker.due_for_check(now, limit, 0);
    summary.due = due.len();
    summary.remaining = next_offset.is_some();

    let batch_id = config
        .scheduler
        .enable_batch_processing
        .then(|| format!("tick-{}", now.timestamp()));

    for record in due {
        match scheduler.enqueue(&record.item_id, record.priority, now, batch_id.clone()) {
            EnqueueOutcome::Enqueued(_) => summary.enqueued += 1,
            EnqueueOutcome::AlreadyQueued(_) => summary.already_queued += 1,
        }
    }

    log::info!(
        "Tick: {} due, {} enqueued, {} already queued, {} reclaimed",
        summary.due,
        summary.enqueued,
        summary.already_queued,
        summary.reclaimed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentSnapshot, QueueStatus};
    use crate::services::alerts::{AlertSink, MemoryAlertSink};
    use crate::services::versions::VersionStore;
    use crate::store::StateStore;

    struct Fixture {
        store: Arc<StateStore>,
        tracker: Arc<FreshnessTracker>,
        scheduler: RefreshScheduler,
        config: Arc<Config>,
    }

    fn make_fixture(mutate: impl FnOnce(&mut Config)) -> Fixture {
        let store = Arc::new(StateStore::new());
        let versions = Arc::new(VersionStore::new(Arc::clone(&store)));
        let mut config = Config::default();
        mutate(&mut config);
        let config = Arc::new(config);
        let tracker = Arc::new(FreshnessTracker::new(
            Arc::clone(&store),
            versions,
            Arc::clone(&config),
        ));
        let scheduler = RefreshScheduler::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&config),
            Arc::new(MemoryAlertSink::new()) as Arc<dyn AlertSink>,
        );
        Fixture {
            store,
            tracker,
            scheduler,
            config,
        }
    }

    fn track(fx: &Fixture, item_id: &str) {
        let snapshot = ContentSnapshot {
            title: "T".into(),
            description: "D".into(),
            tags: vec![],
            image_urls: vec![],
            fetched_at: Utc::now(),
        };
        fx.tracker
            .initialize(item_id, "https://example.com/x", &snapshot)
            .unwrap();
    }

    #[test]
    fn test_tick_enqueues_due_records_once() {
        let fx = make_fixture(|_| {});
        track(&fx, "a");
        track(&fx, "b");

        let later = Utc::now() + chrono::Duration::hours(25);
        let summary = run_tick(&fx.tracker, &fx.scheduler, &fx.config, later);
        assert_eq!(summary.due, 2);
        assert_eq!(summary.enqueued, 2);
        assert_eq!(summary.already_queued, 0);

        // Second tick sees the same records due but their entries active
        let again = run_tick(&fx.tracker, &fx.scheduler, &fx.config, later);
        assert_eq!(again.enqueued, 0);
        assert_eq!(again.already_queued, 2);
    }

    #[test]
    fn test_tick_respects_disable_flag() {
        let fx = make_fixture(|c| c.freshness.enable_auto_refresh = false);
        track(&fx, "a");

        let later = Utc::now() + chrono::Duration::hours(25);
        let summary = run_tick(&fx.tracker, &fx.scheduler, &fx.config, later);
        assert_eq!(summary.due, 0);
        assert_eq!(summary.enqueued, 0);
        assert!(fx.store.all_entries().is_empty());
    }

    #[test]
    fn test_tick_caps_at_batch_limit_and_reports_remaining() {
        let fx = make_fixture(|c| c.scheduler.batch_size_limit = 2);
        for i in 0..5 {
            track(&fx, &format!("item-{i}"));
        }

        let later = Utc::now() + chrono::Duration::hours(25);
        let summary = run_tick(&fx.tracker, &fx.scheduler, &fx.config, later);
        assert_eq!(summary.enqueued, 2);
        assert!(summary.remaining);
    }

    #[test]
    fn test_tick_tags_batch_when_enabled() {
        let fx = make_fixture(|c| c.scheduler.enable_batch_processing = true);
        track(&fx, "a");

        let later = Utc::now() + chrono::Duration::hours(25);
        run_tick(&fx.tracker, &fx.scheduler, &fx.config, later);

        let entries = fx.store.all_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, QueueStatus::Pending);
        assert!(entries[0].batch_id.as_deref().is_some_and(|b| b.starts_with("tick-")));
    }
}
