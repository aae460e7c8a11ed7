//! Append-only per-item version history.

use std::sync::Arc;

use chrono::Utc;

use crate::detect::ChangeReport;
use crate::error::{AppError, Result};
use crate::models::{ContentSnapshot, ContentVersion, DetectionMethod, RewrittenContent};
use crate::store::StateStore;

/// Attempts before an append gives up under sustained contention.
const MAX_APPEND_ATTEMPTS: u32 = 16;

/// Service managing the append-only version history.
///
/// Appends serialize per item through a conditional write keyed on the
/// expected current max version, retried on conflict. Two concurrent
/// appends for the same item never both succeed with the same number;
/// there is no global lock.
pub struct VersionStore {
    store: Arc<StateStore>,
}

impl VersionStore {
    /// Create a version store over the shared state.
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Append a new version built from the raw fetched snapshot and its
    /// change report, with the regenerated copy when the rewriter ran.
    /// Returns the recorded version.
    pub fn append(
        &self,
        item_id: &str,
        snapshot: &ContentSnapshot,
        report: &ChangeReport,
        rewritten: Option<RewrittenContent>,
    ) -> Result<ContentVersion> {
        for _ in 0..MAX_APPEND_ATTEMPTS {
            let expected = self.store.current_version(item_id);
            let version = ContentVersion {
                item_id: item_id.to_string(),
                version_number: expected + 1,
                content_hash: report.new_hashes.content.clone(),
                metadata_hash: report.new_hashes.metadata.clone(),
                images_hash: report.new_hashes.images.clone(),
                changed_fields: report.changed_fields.clone(),
                change_score: report.change_score,
                detection_method: report
                    .detection_method
                    .unwrap_or(DetectionMethod::FullScan),
                snapshot: snapshot.clone(),
                rewritten: rewritten.clone(),
                created_at: Utc::now(),
            };

            match self.store.append_version(version.clone()) {
                Ok(()) => {
                    log::debug!(
                        "Recorded version {} for item {} (score {:.0})",
                        version.version_number,
                        item_id,
                        version.change_score
                    );
                    return Ok(version);
                }
                // Lost the race; re-read the max and retry
                Err(AppError::ConcurrencyConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AppError::conflict("version", item_id))
    }

    /// Newest-first page of an item's history. `before_version` restarts
    /// the sequence below a previously returned version number.
    pub fn history(
        &self,
        item_id: &str,
        limit: usize,
        before_version: Option<u32>,
    ) -> Vec<ContentVersion> {
        self.store.versions_page(item_id, limit, before_version)
    }

    /// The item's latest recorded version, if any.
    pub fn latest(&self, item_id: &str) -> Option<ContentVersion> {
        self.store.versions_page(item_id, 1, None).into_iter().next()
    }

    /// Current max version number (0 when the item has no history).
    pub fn current_version(&self, item_id: &str) -> u32 {
        self.store.current_version(item_id)
    }
}
