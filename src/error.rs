// src/error.rs

//! Unified error handling for the freshness subsystem.

use std::fmt;

use thiserror::Error;

/// Result type alias for freshness operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Remote fetch failed (connection, DNS, non-success status)
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Remote fetch exceeded the configured timeout
    #[error("Timeout fetching {url}")]
    Timeout { url: String },

    /// Fetched content was malformed; flagged for manual review
    #[error("Validation error: {0}")]
    Validation(String),

    /// Content rewriter failed; previous rewritten metadata is retained
    #[error("Generation error: {0}")]
    Generation(String),

    /// Lost a conditional state transition race; another worker proceeds
    #[error("Concurrency conflict for {entity} {id}")]
    ConcurrencyConflict { entity: &'static str, id: String },

    /// Refresh attempts exhausted; entry is terminally failed
    #[error("Retries exhausted for item {item_id} after {attempts} attempts")]
    ExhaustedRetries { item_id: String, attempts: u32 },

    /// Tracked item or queue entry not found
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Create a network error with the failing URL as context.
    pub fn network(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a generation (rewrite) error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    /// Create a concurrency conflict error.
    pub fn conflict(entity: &'static str, id: impl Into<String>) -> Self {
        Self::ConcurrencyConflict {
            entity,
            id: id.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this failure class is retried automatically with backoff.
    ///
    /// Only network and timeout failures are transient; validation and
    /// generation failures require manual review or the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        let url = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if e.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network {
                url,
                message: e.to_string(),
            }
        }
    }
}
