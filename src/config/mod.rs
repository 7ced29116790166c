// src/config/mod.rs
//! Crawler configuration (`config/crawler.toml`).
//!
//! Resolution order:
//! 1) `$CRAWLER_CONFIG_PATH` (must exist)
//! 2) `config/crawler.toml`
//! 3) built-in defaults (logged)
//!
//! Every section and field has a default, so a partial file is fine.

pub mod keywords;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hot_score::{PlatformWeights, ScoreParams};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::ContentSource;

pub const DEFAULT_CONFIG_PATH: &str = "config/crawler.toml";
pub const ENV_CONFIG_PATH: &str = "CRAWLER_CONFIG_PATH";
pub const ENV_DECAY_RATE: &str = "CRAWLER_DECAY_RATE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub pipeline: PipelineConfig,
    pub scoring: ScoringConfig,
    pub scheduler: SchedulerConfig,
    pub search_api: SearchApiConfig,
    pub uploads: UploadConfig,
    pub keywords: KeywordsConfig,
    pub sources: Vec<ContentSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Feed entries older than this are ignored.
    pub feed_lookback_days: i64,
    pub max_items_per_source: usize,
    pub summary_chars: usize,
    /// Pause between two sources of the same crawl cycle.
    pub source_pause_ms: u64,
    pub http_timeout_secs: u64,
    /// Upper bound of the random term added to trending keyword scores.
    pub trending_jitter: f64,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feed_lookback_days: 7,
            max_items_per_source: 10,
            summary_chars: 150,
            source_pause_ms: 0,
            http_timeout_secs: 30,
            trending_jitter: 20.0,
            user_agent: concat!("brand-pulse/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    #[serde(flatten)]
    pub params: ScoreParams,
    pub platforms: PlatformWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Start the scheduler when the service boots.
    pub autostart: bool,
    pub primary_interval_mins: u64,
    pub secondary_interval_mins: u64,
    /// Hour of day (UTC) for the cleanup task.
    pub cleanup_hour_utc: u32,
    pub retention_days: i64,
    /// Drop task execution logs older than this during cleanup. Unset keeps them forever.
    pub task_log_retention_days: Option<i64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            primary_interval_mins: 30,
            secondary_interval_mins: 120,
            cleanup_hour_utc: 2,
            retention_days: 30,
            task_log_retention_days: None,
        }
    }
}

impl SchedulerConfig {
    pub fn primary_interval(&self) -> Duration {
        Duration::from_secs(self.primary_interval_mins.max(1) * 60)
    }

    pub fn secondary_interval(&self) -> Duration {
        Duration::from_secs(self.secondary_interval_mins.max(1) * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchApiConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Name of the env var holding the bearer token.
    pub token_env: String,
    pub max_results: u32,
    pub lookback_hours: i64,
    pub min_engagement: u64,
    pub spam_phrases: Vec<String>,
    pub languages: Vec<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SearchApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.twitter.com/2".to_string(),
            token_env: "SEARCH_API_BEARER_TOKEN".to_string(),
            max_results: 50,
            lookback_hours: 24,
            min_engagement: 5,
            spam_phrases: ["buy now", "click here", "discount", "sale"]
                .into_iter()
                .map(String::from)
                .collect(),
            languages: ["en", "zh", "ja", "ko"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 15 * 60 * 1_000,
        }
    }
}

impl SearchApiConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            transient_base: Duration::from_millis(self.backoff_base_ms),
            throttled_base: Duration::from_millis(self.backoff_base_ms.saturating_mul(2)),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Blob store write endpoint. Unset keeps uploads in memory.
    pub endpoint: Option<String>,
    pub public_base_url: String,
    pub token_env: String,
    pub key_prefix: String,
    pub max_concurrency: usize,
    pub inter_task_delay_ms: u64,
    pub max_attempts: u32,
    pub throttle_base_ms: u64,
    pub transient_base_ms: u64,
    pub max_delay_ms: u64,
    pub verify: bool,
    pub verify_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            public_base_url: "https://media.example.invalid".to_string(),
            token_env: "BLOB_STORE_TOKEN".to_string(),
            key_prefix: "mirrored".to_string(),
            max_concurrency: 1,
            inter_task_delay_ms: 1_500,
            max_attempts: 4,
            throttle_base_ms: 3_000,
            transient_base_ms: 1_000,
            max_delay_ms: 60_000,
            verify: true,
            verify_timeout_secs: 10,
            download_timeout_secs: 30,
        }
    }
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            transient_base: Duration::from_millis(self.transient_base_ms),
            throttled_base: Duration::from_millis(self.throttle_base_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordsConfig {
    pub path: Option<String>,
    pub refresh_secs: u64,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            path: None,
            refresh_secs: 300,
        }
    }
}

// parse optional float env and clamp to a sane decay range
fn parse_decay_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.1, 10.0))
}

impl CrawlerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: CrawlerConfig = toml::from_str(s).context("parsing crawler config")?;
        cfg.scoring.platforms = cfg.scoring.platforms.normalized();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading crawler config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Self::load_from(&default)?
            } else {
                tracing::warn!(path = DEFAULT_CONFIG_PATH, "crawler config not found, using defaults");
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(rate) = parse_decay_env(std::env::var(ENV_DECAY_RATE).ok()) {
            self.scoring.params.decay_rate = rate;
        }
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &ContentSource> {
        self.sources.iter().filter(|s| s.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{CrawlGroup, SourceKind};
    use std::{env, fs};

    const SAMPLE: &str = r#"
[pipeline]
feed_lookback_days = 3

[scoring]
decay_rate = 2.0

[scoring.platforms]
default_weight = 0.9
weights = { Weibo = 1.25 }

[scheduler]
cleanup_hour_utc = 4

[[sources]]
name = "Toy News"
kind = "feed"
url = "https://example.com/rss"

[[sources]]
name = "X search"
kind = "search-api"
group = "secondary"
active = false
"#;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = CrawlerConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.pipeline.feed_lookback_days, 3);
        assert_eq!(cfg.pipeline.max_items_per_source, 10);
        assert_eq!(cfg.scoring.params.decay_rate, 2.0);
        assert_eq!(cfg.scoring.params.engagement_cap, 40.0);
        assert_eq!(cfg.scoring.platforms.weight_for("weibo"), 1.25);
        assert_eq!(cfg.scheduler.cleanup_hour_utc, 4);
        assert_eq!(cfg.scheduler.retention_days, 30);
        assert_eq!(cfg.uploads.max_concurrency, 1);

        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[0].kind, SourceKind::Feed);
        assert_eq!(cfg.sources[0].group, CrawlGroup::Primary);
        assert_eq!(cfg.sources[1].group, CrawlGroup::Secondary);
        assert_eq!(cfg.active_sources().count(), 1);
    }

    #[test]
    fn decay_env_is_clamped() {
        assert_eq!(parse_decay_env(Some("1.8".into())), Some(1.8));
        assert_eq!(parse_decay_env(Some("99".into())), Some(10.0));
        assert_eq!(parse_decay_env(Some("nope".into())), None);
        assert_eq!(parse_decay_env(None), None);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_DECAY_RATE);

        // no file in the temp CWD → defaults
        let cfg = CrawlerConfig::load_default().unwrap();
        assert!(cfg.sources.is_empty());

        let p = tmp.path().join("alt.toml");
        fs::write(&p, SAMPLE).unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_DECAY_RATE, "1.75");
        let cfg = CrawlerConfig::load_default().unwrap();
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.scoring.params.decay_rate, 1.75);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(CrawlerConfig::load_default().is_err());

        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_DECAY_RATE);
        env::set_current_dir(&old).unwrap();
    }
}
