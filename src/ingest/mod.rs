// src/ingest/mod.rs
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::CrawlerConfig;
use crate::hot_score::{self, PlatformWeights, ScoreInput, ScoreParams};
use crate::normalize::Normalizer;
use crate::relevance::RelevanceHandle;
use crate::store::{ContentItem, ContentStatus};
use types::RawItem;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("crawl_items_fetched_total", "Raw items returned by adapters.");
        describe_counter!(
            "crawl_items_saved_total",
            "Items persisted after relevance and dedup."
        );
        describe_counter!(
            "crawl_duplicates_total",
            "Items skipped because their canonical URL was already stored."
        );
        describe_counter!(
            "crawl_source_errors_total",
            "Adapter fetch/parse errors and per-item store failures."
        );
        describe_counter!(
            "search_rate_limited_total",
            "Search API calls refused or throttled by the rate limit."
        );
        describe_histogram!("crawl_cycle_ms", "Crawl cycle duration in milliseconds.");
        describe_histogram!("feed_parse_ms", "Feed fetch + parse time in milliseconds.");
        describe_gauge!("crawl_last_run_ts", "Unix ts when a crawl cycle last finished.");
    });
}

/// Relevance → normalize → score, the part every adapter's output goes through.
#[derive(Debug, Clone)]
pub struct Pipeline {
    relevance: RelevanceHandle,
    normalizer: Normalizer,
    params: ScoreParams,
    weights: PlatformWeights,
}

impl Pipeline {
    pub fn new(
        relevance: RelevanceHandle,
        normalizer: Normalizer,
        params: ScoreParams,
        weights: PlatformWeights,
    ) -> Self {
        Self {
            relevance,
            normalizer,
            params,
            weights,
        }
    }

    pub fn from_config(cfg: &CrawlerConfig, relevance: RelevanceHandle) -> Self {
        Self::new(
            relevance,
            Normalizer::default().with_summary_chars(cfg.pipeline.summary_chars),
            cfg.scoring.params.clone(),
            cfg.scoring.platforms.clone(),
        )
    }

    pub fn relevance(&self) -> &RelevanceHandle {
        &self.relevance
    }

    pub fn is_relevant(&self, item: &RawItem) -> bool {
        self.relevance.matches(&item.haystack())
    }

    /// Build the row to persist. `image_urls` holds the ranked candidates;
    /// the caller may swap them for mirrored copies before saving.
    pub fn prepare(
        &self,
        item: &RawItem,
        source_id: Uuid,
        platform: &str,
        now: DateTime<Utc>,
    ) -> ContentItem {
        let n = self.normalizer.normalize(item);
        let hot = hot_score::score(
            &self.params,
            &ScoreInput {
                published_at: item.published_at,
                engagement: &item.engagement,
                body_chars: n.plain_body.chars().count(),
                platform_weight: self.weights.weight_for(platform),
            },
            now,
        );

        ContentItem {
            id: Uuid::new_v4(),
            title: crate::normalize::strip_markup(&item.title),
            body: n.plain_body,
            summary: n.summary,
            author: item.author.clone(),
            source_id,
            canonical_url: item.canonical_url.clone(),
            published_at: item.published_at,
            image_urls: n.images,
            tags: n.tags,
            category: n.category,
            hot_score: hot,
            engagement: item.engagement,
            status: ContentStatus::Approved,
            created_at: now,
        }
    }
}

/// Tag → number of items carrying it. Sorted for stable store writes.
pub fn tag_counts<'a>(items: impl IntoIterator<Item = &'a ContentItem>) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for item in items {
        for tag in &item.tags {
            *counts.entry(tag.to_lowercase()).or_insert(0u64) += 1;
        }
    }
    counts
}
