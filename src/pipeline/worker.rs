// src/pipeline/worker.rs

//! Worker cycle: claim a batch of due entries and execute them
//! concurrently, bounded by the configured refresh concurrency.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::detect::{ChangeDetector, ChangeReport};
use crate::error::Result;
use crate::models::{FreshnessRecord, RefreshQueueEntry};
use crate::services::scheduler::AttemptOutcome;
use crate::services::{ContentRewriter, MetadataFetcher, RefreshScheduler, VersionStore};
use crate::store::StateStore;

/// Summary of one worker cycle.
#[derive(Debug, Default)]
pub struct CycleSummary {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub changed: usize,
}

/// Executes claimed refresh entries against the live sources.
pub struct RefreshWorker {
    worker_id: String,
    store: Arc<StateStore>,
    scheduler: Arc<RefreshScheduler>,
    versions: Arc<VersionStore>,
    fetcher: Arc<dyn MetadataFetcher>,
    rewriter: Arc<dyn ContentRewriter>,
    config: Arc<Config>,
}

impl RefreshWorker {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<StateStore>,
        scheduler: Arc<RefreshScheduler>,
        versions: Arc<VersionStore>,
        fetcher: Arc<dyn MetadataFetcher>,
        rewriter: Arc<dyn ContentRewriter>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            scheduler,
            versions,
            fetcher,
            rewriter,
            config,
        }
    }

    /// Claim up to one batch of due entries and run them to completion.
    pub async fn run_cycle(&self) -> CycleSummary {
        let batch = self.config.scheduler.batch_size_limit;
        let concurrency = self.config.scheduler.max_concurrent_refreshes.max(1);

        let entries = self.scheduler.claim_next(&self.worker_id, batch);
        let mut summary = CycleSummary {
            claimed: entries.len(),
            ..CycleSummary::default()
        };
        if entries.is_empty() {
            return summary;
        }

        let outcomes: Vec<(u64, AttemptOutcome)> = stream::iter(entries)
            .map(|entry| self.attempt(entry))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (entry_id, outcome) in outcomes {
            match &outcome {
                AttemptOutcome::Unchanged { .. } => summary.succeeded += 1,
                AttemptOutcome::Changed { .. } => {
                    summary.succeeded += 1;
                    summary.changed += 1;
                }
                AttemptOutcome::Failed { .. } => summary.failed += 1,
            }
            if let Err(e) = self.scheduler.complete(entry_id, &outcome) {
                // Lost to the lease reclaim; the entry will run again
                log::warn!("Could not complete entry {entry_id}: {e}");
            }
        }

        log::info!(
            "Worker {}: {} claimed, {} ok ({} changed), {} failed",
            self.worker_id,
            summary.claimed,
            summary.succeeded,
            summary.changed,
            summary.failed
        );
        summary
    }

    /// Run one claimed entry, timing it and folding any error into the
    /// outcome rather than propagating.
    async fn attempt(&self, entry: RefreshQueueEntry) -> (u64, AttemptOutcome) {
        let started = Instant::now();

        let Some(record) = self.store.get_record(&entry.item_id) else {
            let duration_ms = started.elapsed().as_millis() as u64;
            return (
                entry.id,
                AttemptOutcome::Failed {
                    error: format!("record {} no longer tracked", entry.item_id),
                    transient: false,
                    duration_ms,
                },
            );
        };

        let outcome = match self.refresh(&record).await {
            Ok(None) => AttemptOutcome::Unchanged {
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Some((report, new_version))) => AttemptOutcome::Changed {
                report,
                new_version,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => AttemptOutcome::Failed {
                error: e.to_string(),
                transient: e.is_transient(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        };
        (entry.id, outcome)
    }

    /// Fetch the source, diff against the latest stored snapshot, and
    /// append a version when something changed. Returns `None` when all
    /// hashes match.
    async fn refresh(&self, record: &FreshnessRecord) -> Result<Option<(ChangeReport, u32)>> {
        let fetched = self.fetcher.fetch(&record.source_url).await?;
        let detector = ChangeDetector::new(self.config.detection.sensitivity);

        let previous = self.versions.latest(&record.item_id);
        let report = match &previous {
            Some(version) => detector.detect(&version.snapshot, &fetched.snapshot),
            None => detector.initial(&fetched.snapshot),
        };
        if previous.is_some() && report.detection_method.is_none() {
            return Ok(None);
        }

        // The appended version always stores the raw fetch: it is the diff
        // baseline for the next cycle, so an unchanged page must compare
        // equal to it. The regenerated copy rides alongside.
        let mut rewritten = None;
        if report.needs_rewrite {
            // A failed regeneration never fails the refresh; the item keeps
            // its current copy and regeneration waits for the next change.
            match self.rewriter.rewrite(&fetched.snapshot).await {
                Ok(copy) => rewritten = Some(copy),
                Err(e) => {
                    log::warn!("Rewrite failed for item {}: {e}", record.item_id);
                }
            }
        }

        let version =
            self.versions
                .append(&record.item_id, &fetched.snapshot, &report, rewritten)?;
        Ok(Some((report, version.version_number)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use crate::error::AppError;
    use crate::models::{
        ContentSnapshot, FreshnessStatus, Priority, QueueStatus, RewrittenContent,
    };
    use crate::services::alerts::{AlertSink, MemoryAlertSink};
    use crate::services::fetcher::{FetchedMetadata, PassthroughRewriter};
    use crate::services::FreshnessTracker;

    /// Fetcher that serves a scripted sequence of snapshots or errors.
    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<ContentSnapshot>>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<ContentSnapshot>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl MetadataFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedMetadata> {
            let mut responses = self.responses.lock().unwrap();
            assert!(!responses.is_empty(), "unexpected fetch of {url}");
            let snapshot = responses.remove(0)?;
            Ok(FetchedMetadata {
                raw_content: String::new(),
                status_code: 200,
                fetched_at: Utc::now(),
                snapshot,
            })
        }
    }

    struct FailingRewriter;

    #[async_trait]
    impl ContentRewriter for FailingRewriter {
        async fn rewrite(&self, _snapshot: &ContentSnapshot) -> Result<RewrittenContent> {
            Err(AppError::generation("model unavailable"))
        }
    }

    /// Rewriter whose output never matches the fetched metadata.
    struct PrefixRewriter;

    #[async_trait]
    impl ContentRewriter for PrefixRewriter {
        async fn rewrite(&self, snapshot: &ContentSnapshot) -> Result<RewrittenContent> {
            Ok(RewrittenContent {
                title: format!("Edited: {}", snapshot.title),
                description: snapshot.description.clone(),
                tags: snapshot.tags.clone(),
            })
        }
    }

    struct Fixture {
        store: Arc<StateStore>,
        tracker: Arc<FreshnessTracker>,
        scheduler: Arc<RefreshScheduler>,
        versions: Arc<VersionStore>,
        alerts: Arc<MemoryAlertSink>,
        config: Arc<Config>,
    }

    fn make_fixture() -> Fixture {
        let store = Arc::new(StateStore::new());
        let versions = Arc::new(VersionStore::new(Arc::clone(&store)));
        let config = Arc::new(Config::default());
        let tracker = Arc::new(FreshnessTracker::new(
            Arc::clone(&store),
            Arc::clone(&versions),
            Arc::clone(&config),
        ));
        let alerts = Arc::new(MemoryAlertSink::new());
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&config),
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
        ));
        Fixture {
            store,
            tracker,
            scheduler,
            versions,
            alerts,
            config,
        }
    }

    fn make_worker(fx: &Fixture, fetcher: Arc<dyn MetadataFetcher>) -> RefreshWorker {
        RefreshWorker::new(
            "w1",
            Arc::clone(&fx.store),
            Arc::clone(&fx.scheduler),
            Arc::clone(&fx.versions),
            fetcher,
            Arc::new(PassthroughRewriter),
            Arc::clone(&fx.config),
        )
    }

    fn make_snapshot(title: &str) -> ContentSnapshot {
        ContentSnapshot {
            title: title.to_string(),
            description: "A product".into(),
            tags: vec!["dev".into()],
            image_urls: vec![],
            fetched_at: Utc::now(),
        }
    }

    fn track_and_enqueue(fx: &Fixture, item_id: &str) {
        fx.tracker
            .initialize(item_id, "https://example.com/x", &make_snapshot("Launch"))
            .unwrap();
        fx.scheduler
            .enqueue(item_id, Priority::Normal, Utc::now(), None);
    }

    #[tokio::test]
    async fn test_cycle_with_no_work_is_empty() {
        let fx = make_fixture();
        let worker = make_worker(&fx, Arc::new(ScriptedFetcher::new(vec![])));
        let summary = worker.run_cycle().await;
        assert_eq!(summary.claimed, 0);
    }

    #[tokio::test]
    async fn test_unchanged_fetch_completes_without_new_version() {
        let fx = make_fixture();
        track_and_enqueue(&fx, "a");

        let worker = make_worker(
            &fx,
            Arc::new(ScriptedFetcher::new(vec![Ok(make_snapshot("Launch"))])),
        );
        let summary = worker.run_cycle().await;
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.changed, 0);

        // Only the initial version exists
        assert_eq!(fx.versions.current_version("a"), 1);
        let record = fx.store.get_record("a").unwrap();
        assert_eq!(record.status, FreshnessStatus::Fresh);
        assert_eq!(record.check_count, 1);
    }

    #[tokio::test]
    async fn test_changed_fetch_appends_version_and_updates_record() {
        let fx = make_fixture();
        track_and_enqueue(&fx, "a");

        let worker = make_worker(
            &fx,
            Arc::new(ScriptedFetcher::new(vec![Ok(make_snapshot("Renamed"))])),
        );
        let summary = worker.run_cycle().await;
        assert_eq!(summary.changed, 1);

        assert_eq!(fx.versions.current_version("a"), 2);
        let latest = fx.versions.latest("a").unwrap();
        assert_eq!(latest.snapshot.title, "Renamed");

        let record = fx.store.get_record("a").unwrap();
        assert_eq!(record.content_version, 2);
        assert_eq!(record.update_count, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_transient_failure() {
        let fx = make_fixture();
        track_and_enqueue(&fx, "a");

        let worker = make_worker(
            &fx,
            Arc::new(ScriptedFetcher::new(vec![Err(AppError::timeout(
                "https://example.com/x",
            ))])),
        );
        let summary = worker.run_cycle().await;
        assert_eq!(summary.failed, 1);
        assert!(fx.alerts.is_empty());

        // Entry is requeued with backoff, not terminal
        let entry = fx.store.active_entry("a").unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.scheduled_at > Utc::now());

        // No worker holds the item anymore; the record must not report
        // processing while the retry waits out its backoff.
        let record = fx.store.get_record("a").unwrap();
        assert_ne!(record.status, FreshnessStatus::Processing);
        assert_eq!(record.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_rewritten_copy_does_not_poison_the_diff_baseline() {
        let fx = make_fixture();
        track_and_enqueue(&fx, "a");

        // Page changes once, then serves identical content on later cycles
        let worker = RefreshWorker::new(
            "w1",
            Arc::clone(&fx.store),
            Arc::clone(&fx.scheduler),
            Arc::clone(&fx.versions),
            Arc::new(ScriptedFetcher::new(vec![
                Ok(make_snapshot("Renamed")),
                Ok(make_snapshot("Renamed")),
                Ok(make_snapshot("Renamed")),
            ])),
            Arc::new(PrefixRewriter),
            Arc::clone(&fx.config),
        );

        let summary = worker.run_cycle().await;
        assert_eq!(summary.changed, 1);
        assert_eq!(fx.versions.current_version("a"), 2);

        let latest = fx.versions.latest("a").unwrap();
        assert_eq!(latest.snapshot.title, "Renamed");
        assert_eq!(
            latest.rewritten.as_ref().unwrap().title,
            "Edited: Renamed"
        );

        // Unchanged fetches stay unchanged; the rewriter's output must not
        // re-register as a new change on every cycle.
        for _ in 0..2 {
            fx.scheduler
                .enqueue("a", Priority::Normal, Utc::now(), None);
            let summary = worker.run_cycle().await;
            assert_eq!(summary.succeeded, 1);
            assert_eq!(summary.changed, 0);
        }
        assert_eq!(fx.versions.current_version("a"), 2);
    }

    #[tokio::test]
    async fn test_rewrite_failure_keeps_fetched_copy_and_succeeds() {
        let fx = make_fixture();
        track_and_enqueue(&fx, "a");

        let worker = RefreshWorker::new(
            "w1",
            Arc::clone(&fx.store),
            Arc::clone(&fx.scheduler),
            Arc::clone(&fx.versions),
            Arc::new(ScriptedFetcher::new(vec![Ok(make_snapshot("Renamed"))])),
            Arc::new(FailingRewriter),
            Arc::clone(&fx.config),
        );
        let summary = worker.run_cycle().await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.changed, 1);

        // Version still appended with the fetched metadata, no copy attached
        let latest = fx.versions.latest("a").unwrap();
        assert_eq!(latest.snapshot.title, "Renamed");
        assert!(latest.rewritten.is_none());
    }

    #[tokio::test]
    async fn test_cycle_processes_multiple_items() {
        let fx = make_fixture();
        track_and_enqueue(&fx, "a");
        track_and_enqueue(&fx, "b");
        track_and_enqueue(&fx, "c");

        let worker = make_worker(
            &fx,
            Arc::new(ScriptedFetcher::new(vec![
                Ok(make_snapshot("Launch")),
                Ok(make_snapshot("Launch")),
                Ok(make_snapshot("Launch")),
            ])),
        );
        let summary = worker.run_cycle().await;
        assert_eq!(summary.claimed, 3);
        assert_eq!(summary.succeeded, 3);
        assert!(fx.store.all_entries().iter().all(|e| e.status == QueueStatus::Completed));
    }
}
