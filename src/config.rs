//! Application configuration structures.
//!
//! Typed key/value configuration for the freshness subsystem: refresh
//! intervals, staleness thresholds, retry limits, and priority weights.
//! Loaded once at startup from TOML with defaults for every key, and
//! refreshable on demand via [`Config::reload`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Freshness tracking behavior
    #[serde(default)]
    pub freshness: FreshnessConfig,

    /// Refresh queue and worker behavior
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry and backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Change detection settings
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Priority weights applied to the staleness score
    #[serde(default)]
    pub priority_weights: PriorityWeights,

    /// HTTP fetcher settings
    #[serde(default)]
    pub fetcher: FetcherConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Re-read the file and replace this configuration in place.
    pub fn reload(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let fresh = Self::load(&path)?;
        fresh.validate()?;
        log::info!("Configuration reloaded from {}", path.display());
        *self = fresh;
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.freshness.default_refresh_interval_hours == 0 {
            return Err(AppError::validation(
                "freshness.default_refresh_interval_hours must be > 0",
            ));
        }
        if self.freshness.staleness_threshold_hours == 0 {
            return Err(AppError::validation(
                "freshness.staleness_threshold_hours must be > 0",
            ));
        }
        if self.freshness.expiry_threshold_hours <= self.freshness.staleness_threshold_hours {
            return Err(AppError::validation(
                "freshness.expiry_threshold_hours must exceed staleness_threshold_hours",
            ));
        }
        if self.scheduler.max_concurrent_refreshes == 0 {
            return Err(AppError::validation(
                "scheduler.max_concurrent_refreshes must be > 0",
            ));
        }
        if self.scheduler.batch_size_limit == 0 {
            return Err(AppError::validation(
                "scheduler.batch_size_limit must be > 0",
            ));
        }
        if self.scheduler.lease_timeout_secs == 0 {
            return Err(AppError::validation(
                "scheduler.lease_timeout_secs must be > 0",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(AppError::validation(
                "retry.backoff_multiplier must be >= 1.0",
            ));
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            return Err(AppError::validation(
                "retry.max_delay_secs must be >= retry.base_delay_secs",
            ));
        }
        if !(0.0..=100.0).contains(&self.detection.sensitivity) {
            return Err(AppError::validation(
                "detection.sensitivity must be within [0, 100]",
            ));
        }
        self.priority_weights.validate()?;
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            freshness: FreshnessConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            detection: DetectionConfig::default(),
            priority_weights: PriorityWeights::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}

/// Freshness tracking behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Default recheck interval for new records, in hours
    #[serde(default = "defaults::refresh_interval_hours")]
    pub default_refresh_interval_hours: u32,

    /// Hours after which the staleness score reaches 100 (before weighting)
    #[serde(default = "defaults::staleness_threshold_hours")]
    pub staleness_threshold_hours: u32,

    /// Absolute ceiling: records unchecked longer than this are expired
    /// regardless of priority weighting
    #[serde(default = "defaults::expiry_threshold_hours")]
    pub expiry_threshold_hours: u32,

    /// Whether the periodic tick enqueues due records at all
    #[serde(default = "defaults::enabled")]
    pub enable_auto_refresh: bool,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            default_refresh_interval_hours: defaults::refresh_interval_hours(),
            staleness_threshold_hours: defaults::staleness_threshold_hours(),
            expiry_threshold_hours: defaults::expiry_threshold_hours(),
            enable_auto_refresh: defaults::enabled(),
        }
    }
}

/// Refresh queue and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum refreshes executed concurrently by one worker process
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent_refreshes: usize,

    /// Maximum entries enqueued per scheduler tick
    #[serde(default = "defaults::batch_size_limit")]
    pub batch_size_limit: usize,

    /// Group entries enqueued in one tick under an advisory batch id
    #[serde(default = "defaults::enabled")]
    pub enable_batch_processing: bool,

    /// Seconds a claimed entry may stay processing before reclaim
    #[serde(default = "defaults::lease_timeout")]
    pub lease_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_refreshes: defaults::max_concurrent(),
            batch_size_limit: defaults::batch_size_limit(),
            enable_batch_processing: defaults::enabled(),
            lease_timeout_secs: defaults::lease_timeout(),
        }
    }
}

/// Retry and exponential backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum automatic retries for transient failures
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry, in seconds
    #[serde(default = "defaults::base_delay")]
    pub base_delay_secs: u64,

    /// Multiplier applied per retry (delay = base * multiplier^retry_count)
    #[serde(default = "defaults::backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Cap on the computed backoff delay, in seconds
    #[serde(default = "defaults::max_delay")]
    pub max_delay_secs: u64,
}

impl RetryConfig {
    /// Exponential backoff delay before the given attempt:
    /// `base * multiplier^attempt`, capped at `max_delay_secs`.
    pub fn delay_for(&self, attempt: u32) -> chrono::Duration {
        let secs = self.base_delay_secs as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = secs.min(self.max_delay_secs as f64);
        chrono::Duration::seconds(capped as i64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_secs: defaults::base_delay(),
            backoff_multiplier: defaults::backoff_multiplier(),
            max_delay_secs: defaults::max_delay(),
        }
    }
}

/// Change detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Change score above which the content rewriter is invoked (0-100)
    #[serde(default = "defaults::sensitivity")]
    pub sensitivity: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sensitivity: defaults::sensitivity(),
        }
    }
}

/// Multipliers applied to the time-based staleness score per priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityWeights {
    #[serde(default = "defaults::weight_low")]
    pub low: f64,
    #[serde(default = "defaults::weight_normal")]
    pub normal: f64,
    #[serde(default = "defaults::weight_high")]
    pub high: f64,
    #[serde(default = "defaults::weight_critical")]
    pub critical: f64,
}

impl PriorityWeights {
    fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("low", self.low),
            ("normal", self.normal),
            ("high", self.high),
            ("critical", self.critical),
        ] {
            if w <= 0.0 {
                return Err(AppError::validation(format!(
                    "priority_weights.{name} must be > 0"
                )));
            }
        }
        Ok(())
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            low: defaults::weight_low(),
            normal: defaults::weight_normal(),
            high: defaults::weight_high(),
            critical: defaults::weight_critical(),
        }
    }
}

/// HTTP fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

mod defaults {
    // Freshness defaults
    pub fn refresh_interval_hours() -> u32 {
        24
    }
    pub fn staleness_threshold_hours() -> u32 {
        48
    }
    pub fn expiry_threshold_hours() -> u32 {
        168
    }
    pub fn enabled() -> bool {
        true
    }

    // Scheduler defaults
    pub fn max_concurrent() -> usize {
        5
    }
    pub fn batch_size_limit() -> usize {
        50
    }
    pub fn lease_timeout() -> u64 {
        600
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay() -> u64 {
        60
    }
    pub fn backoff_multiplier() -> f64 {
        2.0
    }
    pub fn max_delay() -> u64 {
        3600
    }

    // Detection defaults
    pub fn sensitivity() -> f64 {
        10.0
    }

    // Priority weight defaults
    pub fn weight_low() -> f64 {
        0.8
    }
    pub fn weight_normal() -> f64 {
        1.0
    }
    pub fn weight_high() -> f64 {
        1.2
    }
    pub fn weight_critical() -> f64 {
        1.5
    }

    // Fetcher defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; freshtrack/1.0)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.freshness.default_refresh_interval_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_expiry_below_staleness() {
        let mut config = Config::default();
        config.freshness.expiry_threshold_hours = config.freshness.staleness_threshold_hours;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_backoff() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_sensitivity() {
        let mut config = Config::default();
        config.detection.sensitivity = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_nonpositive_weight() {
        let mut config = Config::default();
        config.priority_weights.low = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retry]
            max_attempts = 5
        "#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_secs, 60);
        assert_eq!(config.freshness.default_refresh_interval_hours, 24);
    }

    #[test]
    fn backoff_delay_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(0).num_seconds(), 60);
        assert_eq!(retry.delay_for(1).num_seconds(), 120);
        assert_eq!(retry.delay_for(2).num_seconds(), 240);
        // 60 * 2^10 would be far past the cap
        assert_eq!(retry.delay_for(10).num_seconds(), 3600);
    }

    #[test]
    fn reload_replaces_values() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[freshness]\ndefault_refresh_interval_hours = 12\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.reload(tmp.path()).unwrap();
        assert_eq!(config.freshness.default_refresh_interval_hours, 12);
    }
}
