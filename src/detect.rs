//! Change detection between content snapshots.
//!
//! Compares two snapshots of an item's fetched metadata via three
//! independent digests (content, metadata fields, images) and scores the
//! magnitude of the change. Title and description changes weigh high, tag
//! changes medium, image changes low, so AI regeneration stays
//! proportional to the size of the change.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{ContentSnapshot, DetectionMethod};

/// Per-field weights contributing to the change score (sums to 100).
const WEIGHT_TITLE: f64 = 40.0;
const WEIGHT_DESCRIPTION: f64 = 30.0;
const WEIGHT_TAGS: f64 = 20.0;
const WEIGHT_IMAGES: f64 = 10.0;

/// Deterministic content-addressed digest over normalized content.
///
/// Identical input always yields identical output; used for equality
/// testing, not security.
pub fn hash(content: &str) -> String {
    let normalized = normalize(content);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

/// Collapse whitespace and lowercase so cosmetic edits don't register.
fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The three digests derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHashes {
    /// Over normalized title + description
    pub content: String,
    /// Over the sorted tag list
    pub metadata: String,
    /// Over the image URL list
    pub images: String,
}

impl SnapshotHashes {
    /// Compute all three digests for a snapshot.
    pub fn compute(snapshot: &ContentSnapshot) -> Self {
        let mut tags = snapshot.tags.clone();
        tags.sort();

        Self {
            content: hash(&format!("{}\n{}", snapshot.title, snapshot.description)),
            metadata: hash(&tags.join("\n")),
            images: hash(&snapshot.image_urls.join("\n")),
        }
    }
}

/// Structured result of comparing two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    /// Field names that changed
    pub changed_fields: Vec<String>,
    /// Title or description digest differed
    pub content_changed: bool,
    /// Tag digest differed
    pub metadata_changed: bool,
    /// Image digest differed
    pub images_changed: bool,
    /// Weighted magnitude of the change, 0-100
    pub change_score: f64,
    /// What comparison fired; None when nothing changed
    pub detection_method: Option<DetectionMethod>,
    /// Whether the change exceeds the rewrite sensitivity threshold
    pub needs_rewrite: bool,
    /// Digests of the new snapshot
    pub new_hashes: SnapshotHashes,
}

impl ChangeReport {
    /// Whether any hash differed. No difference means a successful check
    /// with no new version.
    pub fn has_changes(&self) -> bool {
        self.content_changed || self.metadata_changed || self.images_changed
    }
}

/// Detector comparing snapshots across fetch cycles.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    /// Change score above which the caller should invoke the rewriter
    sensitivity: f64,
}

impl ChangeDetector {
    /// Create a detector with the given rewrite sensitivity threshold.
    pub fn new(sensitivity: f64) -> Self {
        Self { sensitivity }
    }

    /// Compare an old snapshot against a newly fetched one.
    pub fn detect(&self, old: &ContentSnapshot, new: &ContentSnapshot) -> ChangeReport {
        let old_hashes = SnapshotHashes::compute(old);
        let new_hashes = SnapshotHashes::compute(new);

        let mut changed_fields = Vec::new();
        let mut score = 0.0;

        if hash(&old.title) != hash(&new.title) {
            changed_fields.push("title".to_string());
            score += WEIGHT_TITLE;
        }
        if hash(&old.description) != hash(&new.description) {
            changed_fields.push("description".to_string());
            score += WEIGHT_DESCRIPTION;
        }

        let metadata_changed = old_hashes.metadata != new_hashes.metadata;
        if metadata_changed {
            changed_fields.push("tags".to_string());
            score += WEIGHT_TAGS;
        }

        let images_changed = old_hashes.images != new_hashes.images;
        if images_changed {
            changed_fields.push("images".to_string());
            score += WEIGHT_IMAGES;
        }

        let content_changed = old_hashes.content != new_hashes.content;

        let detection_method = if content_changed {
            Some(DetectionMethod::ContentHash)
        } else if metadata_changed {
            Some(DetectionMethod::MetadataDiff)
        } else if images_changed {
            Some(DetectionMethod::ImageChange)
        } else {
            None
        };

        let change_score = score.min(100.0);

        ChangeReport {
            changed_fields,
            content_changed,
            metadata_changed,
            images_changed,
            change_score,
            detection_method,
            needs_rewrite: detection_method.is_some() && change_score > self.sensitivity,
            new_hashes,
        }
    }

    /// Report for the very first snapshot of an item (nothing to compare).
    pub fn initial(&self, snapshot: &ContentSnapshot) -> ChangeReport {
        ChangeReport {
            changed_fields: Vec::new(),
            content_changed: false,
            metadata_changed: false,
            images_changed: false,
            change_score: 0.0,
            detection_method: Some(DetectionMethod::FullScan),
            needs_rewrite: false,
            new_hashes: SnapshotHashes::compute(snapshot),
        }
    }
}
