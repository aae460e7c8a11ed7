//! Source metadata fetching and optional content rewriting.
//!
//! The fetcher pulls the item's source page and reduces it to a
//! [`ContentSnapshot`] for change detection. Both seams are traits so the
//! pipeline can run against in-memory fakes in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use url::Url;

use crate::config::FetcherConfig;
use crate::error::{AppError, Result};
use crate::models::{ContentSnapshot, RewrittenContent};

/// Raw fetch result plus the snapshot extracted from it.
#[derive(Debug, Clone)]
pub struct FetchedMetadata {
    pub raw_content: String,
    pub status_code: u16,
    pub fetched_at: DateTime<Utc>,
    pub snapshot: ContentSnapshot,
}

/// Retrieves current metadata for an item's source URL.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedMetadata>;
}

/// HTTP fetcher backed by a shared reqwest client.
pub struct HttpMetadataFetcher {
    client: Client,
}

impl HttpMetadataFetcher {
    /// Build the fetcher with the configured user agent and timeout.
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedMetadata> {
        let parsed = Url::parse(url)?;
        let response = self.client.get(parsed.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::network(
                url,
                format!("unexpected status {status}"),
            ));
        }

        let body = response.text().await?;
        let fetched_at = Utc::now();
        let snapshot = extract_snapshot(&body, &parsed, fetched_at);
        log::debug!("Fetched {url}: {} bytes", body.len());

        Ok(FetchedMetadata {
            raw_content: body,
            status_code: status.as_u16(),
            fetched_at,
            snapshot,
        })
    }
}

/// Reduce an HTML page to the tracked metadata fields.
fn extract_snapshot(html: &str, base: &Url, fetched_at: DateTime<Utc>) -> ContentSnapshot {
    let title = meta_content(html, "og:title")
        .or_else(|| tag_text(html, "title"))
        .unwrap_or_default();
    let description = meta_content(html, "og:description")
        .or_else(|| meta_content(html, "description"))
        .unwrap_or_default();
    let tags: Vec<String> = meta_content(html, "keywords")
        .map(|raw| {
            raw.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let image_urls: Vec<String> = meta_content(html, "og:image")
        .into_iter()
        .filter_map(|src| base.join(&src).ok())
        .map(|u| u.to_string())
        .collect();

    ContentSnapshot {
        title,
        description,
        tags,
        image_urls,
        fetched_at,
    }
}

/// Text of the first `<name>...</name>` element, if present.
fn tag_text(html: &str, name: &str) -> Option<String> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let lower = html.to_lowercase();
    let start = lower.find(&open)?;
    let body_start = start + lower[start..].find('>')? + 1;
    let end = body_start + lower[body_start..].find(&close)?;
    let text = html[body_start..end].trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Content attribute of the first meta tag whose name or property matches.
fn meta_content(html: &str, key: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let mut cursor = 0;
    while let Some(offset) = lower[cursor..].find("<meta") {
        let start = cursor + offset;
        let end = start + lower[start..].find('>')?;
        let tag = &html[start..end];
        let tag_lower = &lower[start..end];
        let named = attr_value(tag, tag_lower, "name")
            .or_else(|| attr_value(tag, tag_lower, "property"));
        if named.as_deref() == Some(key) {
            return attr_value(tag, tag_lower, "content").filter(|v| !v.is_empty());
        }
        cursor = end;
    }
    None
}

/// Value of a quoted attribute inside one tag, if present.
fn attr_value(tag: &str, tag_lower: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=");
    let at = tag_lower.find(&needle)?;
    let rest = &tag[at + needle.len()..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    let close = inner.find(quote)?;
    Some(inner[..close].trim().to_string())
}

/// Produces fresh display copy from a new snapshot. Failures here never
/// fail the refresh; the previous copy is kept and regeneration is
/// deferred to the next detected change.
#[async_trait]
pub trait ContentRewriter: Send + Sync {
    async fn rewrite(&self, snapshot: &ContentSnapshot) -> Result<RewrittenContent>;
}

/// Rewriter that passes the fetched metadata through unmodified.
pub struct PassthroughRewriter;

#[async_trait]
impl ContentRewriter for PassthroughRewriter {
    async fn rewrite(&self, snapshot: &ContentSnapshot) -> Result<RewrittenContent> {
        Ok(RewrittenContent {
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            tags: snapshot.tags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title> Fallback Title </title>
        <meta property="og:title" content="Widget Pro">
        <meta name="description" content="A fine widget.">
        <meta name="keywords" content="widgets, tools , ">
        <meta property="og:image" content="/img/hero.png">
        </head><body></body></html>"#;

    #[test]
    fn test_extract_snapshot_prefers_og_fields() {
        let base = Url::parse("https://example.com/products/1").unwrap();
        let snap = extract_snapshot(PAGE, &base, Utc::now());
        assert_eq!(snap.title, "Widget Pro");
        assert_eq!(snap.description, "A fine widget.");
        assert_eq!(snap.tags, vec!["widgets".to_string(), "tools".to_string()]);
        assert_eq!(snap.image_urls, vec!["https://example.com/img/hero.png"]);
    }

    #[test]
    fn test_extract_snapshot_falls_back_to_title_tag() {
        let base = Url::parse("https://example.com/").unwrap();
        let html = "<html><head><title>Plain Page</title></head></html>";
        let snap = extract_snapshot(html, &base, Utc::now());
        assert_eq!(snap.title, "Plain Page");
        assert!(snap.description.is_empty());
        assert!(snap.tags.is_empty());
        assert!(snap.image_urls.is_empty());
    }

    #[test]
    fn test_meta_content_matches_case_insensitive_names() {
        let html = r#"<META NAME="Description" CONTENT="shouty">"#;
        // Attribute names are matched case-insensitively, values are not
        assert_eq!(meta_content(html, "description"), None);
        let html = r#"<META NAME="description" CONTENT="shouty">"#;
        assert_eq!(meta_content(html, "description"), Some("shouty".into()));
    }

    #[tokio::test]
    async fn test_passthrough_rewriter_echoes_snapshot() {
        let snap = ContentSnapshot {
            title: "T".into(),
            description: "D".into(),
            tags: vec!["x".into()],
            image_urls: vec![],
            fetched_at: Utc::now(),
        };
        let out = PassthroughRewriter.rewrite(&snap).await.unwrap();
        assert_eq!(out.title, "T");
        assert_eq!(out.tags, vec!["x".to_string()]);
    }
}
