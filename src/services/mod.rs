//! Service layer: the trackers, queues, and aggregators that drive
//! refresh cycles over the shared [`crate::store::StateStore`].

pub mod alerts;
pub mod analytics;
pub mod fetcher;
pub mod scheduler;
pub mod tracker;
pub mod versions;

pub use alerts::{Alert, AlertSink, LogAlertSink, MemoryAlertSink};
pub use analytics::AnalyticsAggregator;
pub use fetcher::{
    ContentRewriter, FetchedMetadata, HttpMetadataFetcher, MetadataFetcher, PassthroughRewriter,
};
pub use scheduler::{AttemptOutcome, RefreshScheduler};
pub use tracker::{CheckOutcome, FreshnessTracker};
pub use versions::VersionStore;
