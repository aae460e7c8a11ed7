//! freshtrack CLI
//!
//! Local execution entry point: track items, run the refresh loop, and
//! inspect freshness state.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use freshtrack::{
    config::Config,
    error::{AppError, Result},
    models::PeriodType,
    pipeline::{self, RefreshWorker},
    services::{
        AnalyticsAggregator, AlertSink, FreshnessTracker, HttpMetadataFetcher, LogAlertSink,
        MetadataFetcher, PassthroughRewriter, RefreshScheduler, VersionStore,
    },
    store::{LocalStorage, SnapshotStorage, StateStore},
};

/// freshtrack - content freshness tracker
#[derive(Parser, Debug)]
#[command(
    name = "freshtrack",
    version,
    about = "Tracks content freshness and schedules metadata refreshes"
)]
struct Cli {
    /// Path to storage directory containing config and state files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start tracking an item
    Track {
        /// Item identifier
        item_id: String,
        /// Source URL to watch for changes
        url: String,
    },

    /// Stop tracking an item and drop its history
    Untrack {
        /// Item identifier
        item_id: String,
    },

    /// Request an immediate high-priority refresh for an item
    Refresh {
        /// Item identifier
        item_id: String,
    },

    /// Run one scheduler tick and one worker cycle
    Tick,

    /// Run the refresh loop until interrupted
    Run {
        /// Seconds between scheduler ticks
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },

    /// Compute analytics for the last completed period
    Rollup {
        /// Aggregation period: hourly, daily, or weekly
        #[arg(long, default_value = "hourly")]
        period: String,
    },

    /// Show tracked items, queue depth, and recent activity
    Status,

    /// Validate the configuration file
    Validate,
}

/// Terminal queue entries older than this are pruned by the run loop.
const QUEUE_RETENTION_DAYS: i64 = 7;

/// Shared service graph behind every command.
struct App {
    store: Arc<StateStore>,
    tracker: Arc<FreshnessTracker>,
    scheduler: Arc<RefreshScheduler>,
    analytics: AnalyticsAggregator,
    worker: RefreshWorker,
    fetcher: Arc<dyn MetadataFetcher>,
    config: Arc<Config>,
    storage: LocalStorage,
}

impl App {
    async fn build(storage_dir: &PathBuf) -> Result<Self> {
        let config_path = storage_dir.join("config.toml");
        let config = Arc::new(Config::load_or_default(&config_path));
        config.validate()?;

        let storage = LocalStorage::new(storage_dir);
        let store = match storage.load_state().await? {
            Some(state) => Arc::new(StateStore::restore(state)),
            None => Arc::new(StateStore::new()),
        };

        let versions = Arc::new(VersionStore::new(Arc::clone(&store)));
        let tracker = Arc::new(FreshnessTracker::new(
            Arc::clone(&store),
            Arc::clone(&versions),
            Arc::clone(&config),
        ));
        let alerts = Arc::new(LogAlertSink) as Arc<dyn AlertSink>;
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&config),
            alerts,
        ));
        let analytics = AnalyticsAggregator::new(Arc::clone(&store));
        let fetcher: Arc<dyn MetadataFetcher> =
            Arc::new(HttpMetadataFetcher::new(&config.fetcher)?);
        let worker = RefreshWorker::new(
            format!("cli-{}", std::process::id()),
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&versions),
            Arc::clone(&fetcher),
            Arc::new(PassthroughRewriter),
            Arc::clone(&config),
        );

        Ok(Self {
            store,
            tracker,
            scheduler,
            analytics,
            worker,
            fetcher,
            config,
            storage,
        })
    }

    async fn persist(&self) -> Result<()> {
        self.storage.save_state(&self.store.snapshot()).await
    }

    /// One tick plus one worker cycle, then persist.
    async fn step(&self) -> Result<()> {
        let now = Utc::now();
        let tick = pipeline::run_tick(&self.tracker, &self.scheduler, &self.config, now);
        let cycle = self.worker.run_cycle().await;
        self.scheduler
            .prune_completed(now - chrono::Duration::days(QUEUE_RETENTION_DAYS));
        log::info!(
            "Step complete: {} enqueued, {} executed, {} failed",
            tick.enqueued,
            cycle.claimed,
            cycle.failed
        );
        self.persist().await
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn parse_period(raw: &str) -> Result<PeriodType> {
    match raw {
        "hourly" => Ok(PeriodType::Hourly),
        "daily" => Ok(PeriodType::Daily),
        "weekly" => Ok(PeriodType::Weekly),
        other => Err(AppError::validation(format!(
            "unknown period '{other}' (expected hourly, daily, or weekly)"
        ))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let app = App::build(&cli.storage_dir).await?;

    match cli.command {
        Command::Track { item_id, url } => {
            let fetched = app.fetcher.fetch(&url).await?;
            let record = app.tracker.initialize(&item_id, &url, &fetched.snapshot)?;
            app.persist().await?;
            log::info!(
                "Tracking {item_id}: \"{}\", next check at {}",
                fetched.snapshot.title,
                record
                    .next_check_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
        }

        Command::Untrack { item_id } => {
            app.tracker.remove(&item_id)?;
            app.persist().await?;
            log::info!("Stopped tracking {item_id}");
        }

        Command::Refresh { item_id } => {
            let entry = app.scheduler.force_refresh(&item_id)?;
            app.persist().await?;
            log::info!("Refresh queued as entry {} at high priority", entry.id);
        }

        Command::Tick => {
            app.step().await?;
        }

        Command::Run { interval_secs } => {
            log::info!("Refresh loop starting (tick every {interval_secs}s)");
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            loop {
                interval.tick().await;
                if let Err(e) = app.step().await {
                    log::error!("Refresh step failed: {e}");
                }
            }
        }

        Command::Rollup { period } => {
            let period_type = parse_period(&period)?;
            let row = app.analytics.rollup_previous(period_type, Utc::now());
            app.persist().await?;
            log::info!(
                "{period} rollup {}..{}: {} attempts, {} ok, {} failed, {} changed, median {:.0}ms",
                row.period_start,
                row.period_end,
                row.attempted,
                row.succeeded,
                row.failed,
                row.changes_detected,
                row.median_duration_ms
            );
        }

        Command::Status => {
            let records = app.store.all_records();
            log::info!("Tracked items: {}", records.len());
            for record in &records {
                log::info!(
                    "  {} [{:?}] score {:.1}, v{}, {} checks / {} updates",
                    record.item_id,
                    record.status,
                    record.staleness_score,
                    record.content_version,
                    record.check_count,
                    record.update_count
                );
            }

            let entries = app.store.all_entries();
            let active = entries.iter().filter(|e| e.status.is_active()).count();
            log::info!("Queue: {} entries ({} active)", entries.len(), active);

            for attempt in app.store.recent_history(5) {
                log::info!(
                    "  {} {} in {}ms{}",
                    attempt.item_id,
                    if attempt.success { "ok" } else { "failed" },
                    attempt.duration_ms,
                    attempt
                        .error
                        .as_deref()
                        .map(|e| format!(": {e}"))
                        .unwrap_or_default()
                );
            }
        }

        Command::Validate => {
            app.config.validate()?;
            log::info!("Config OK");
        }
    }

    Ok(())
}
