//! Content snapshots and the append-only version history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a change was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Title/description digest differed
    ContentHash,
    /// Metadata (tag) digest differed
    MetadataDiff,
    /// Image list digest differed
    ImageChange,
    /// Initial version; nothing to compare against
    FullScan,
}

/// One fetched view of an item's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContentSnapshot {
    /// Item title
    pub title: String,

    /// Item description
    pub description: String,

    /// Tag list
    #[serde(default)]
    pub tags: Vec<String>,

    /// Image URLs
    #[serde(default)]
    pub image_urls: Vec<String>,

    /// When this snapshot was fetched
    pub fetched_at: DateTime<Utc>,
}

/// Regenerated display copy produced by the content rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrittenContent {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Immutable entry in an item's version history.
///
/// Version numbers are strictly increasing per item with no gaps; two
/// consecutive versions differ in at least one hash unless the version
/// is the initial one. The snapshot and hashes always describe the raw
/// fetch, so the next cycle diffs against what the source actually
/// served; any regenerated copy is carried separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVersion {
    /// Owning item identifier
    pub item_id: String,

    /// Monotonic version number, starts at 1
    pub version_number: u32,

    /// Digest of normalized title + description
    pub content_hash: String,

    /// Digest of metadata fields
    pub metadata_hash: String,

    /// Digest of the image URL list
    pub images_hash: String,

    /// Field names that changed relative to the previous version
    pub changed_fields: Vec<String>,

    /// Weighted magnitude of the change, 0-100
    pub change_score: f64,

    /// What comparison triggered this version
    pub detection_method: DetectionMethod,

    /// Raw fetched snapshot backing this version; the diff baseline for
    /// the next cycle
    pub snapshot: ContentSnapshot,

    /// Display copy regenerated for this version, when the rewriter ran
    #[serde(default)]
    pub rewritten: Option<RewrittenContent>,

    /// When this version was recorded
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_method_serde_names() {
        let json = serde_json::to_string(&DetectionMethod::ContentHash).unwrap();
        assert_eq!(json, "\"content_hash\"");
        let json = serde_json::to_string(&DetectionMethod::FullScan).unwrap();
        assert_eq!(json, "\"full_scan\"");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = ContentSnapshot {
            title: "Launch".into(),
            description: "A product".into(),
            tags: vec!["dev".into()],
            image_urls: vec!["https://example.com/a.png".into()],
            fetched_at: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ContentSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
