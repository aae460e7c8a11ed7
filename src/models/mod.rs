//! Data model for the freshness subsystem.

pub mod queue;
pub mod record;
pub mod version;

pub use queue::{
    FreshnessAnalyticsRow, PeriodType, QueueStatus, RefreshHistoryEntry, RefreshQueueEntry,
};
pub use record::{FreshnessRecord, FreshnessStatus, Priority};
pub use version::{ContentSnapshot, ContentVersion, DetectionMethod, RewrittenContent};
