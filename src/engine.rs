// src/engine.rs
//! # Crawl Engine
//! One crawl cycle: for each active source of a group, fetch → relevance →
//! dedup check → (optional image mirroring) → normalize + score → save.
//!
//! Sources run one after another, never concurrently, so each external API
//! sees at most one caller from this process. Failures are isolated per
//! source and per item: a bad source or a rejected write is logged, counted
//! and skipped.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CrawlerConfig;
use crate::ingest::providers::{feed::FeedAdapter, search_api::SearchApiAdapter, simulated::SimulatedAdapter};
use crate::ingest::providers::search_api::SearchApiClient;
use crate::ingest::types::{ContentSource, CrawlGroup, SourceAdapter, SourceKind};
use crate::ingest::{ensure_metrics_described, tag_counts, Pipeline};
use crate::normalize::is_placeholder;
use crate::relevance::RelevanceHandle;
use crate::store::{ContentItem, ContentStore};
use crate::upload::UploadQueue;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub kind: Option<SourceKind>,
    pub fetched: usize,
    pub relevant: usize,
    pub saved: usize,
    pub duplicates: usize,
    /// Per-item store failures.
    pub errors: usize,
    /// The source could not be processed at all (registry or adapter missing).
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub group: CrawlGroup,
    pub sources: usize,
    pub fetched: usize,
    pub relevant: usize,
    pub saved: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub keywords_updated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub per_source: Vec<SourceReport>,
}

pub struct CrawlEngine {
    sources: Vec<ContentSource>,
    max_items_per_source: usize,
    source_pause: Duration,
    store: Arc<dyn ContentStore>,
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
    pipeline: Pipeline,
    uploads: Option<Arc<UploadQueue>>,
}

impl CrawlEngine {
    pub fn new(cfg: &CrawlerConfig, store: Arc<dyn ContentStore>, pipeline: Pipeline) -> Self {
        ensure_metrics_described();
        Self {
            sources: cfg.sources.clone(),
            max_items_per_source: cfg.pipeline.max_items_per_source.max(1),
            source_pause: Duration::from_millis(cfg.pipeline.source_pause_ms),
            store,
            adapters: HashMap::new(),
            pipeline,
            uploads: None,
        }
    }

    /// Feed and simulated adapters always; the search API adapter only when
    /// a client could be built (token present).
    pub fn standard(
        cfg: &CrawlerConfig,
        store: Arc<dyn ContentStore>,
        relevance: RelevanceHandle,
        http: reqwest::Client,
        search: Option<Arc<SearchApiClient>>,
    ) -> Self {
        let feed = FeedAdapter::new(http, relevance.clone())
            .with_lookback_days(cfg.pipeline.feed_lookback_days)
            .with_max_items(cfg.pipeline.max_items_per_source)
            .with_timeout(Duration::from_secs(cfg.pipeline.http_timeout_secs.max(1)));
        let mut engine = Self::new(cfg, store, Pipeline::from_config(cfg, relevance.clone()))
            .with_adapter(Arc::new(feed))
            .with_adapter(Arc::new(SimulatedAdapter::new(relevance.clone())));
        if let Some(client) = search {
            engine = engine.with_adapter(Arc::new(SearchApiAdapter::new(client, relevance, &cfg.search_api)));
        }
        engine
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn with_uploads(mut self, uploads: Arc<UploadQueue>) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn sources_for(&self, group: CrawlGroup) -> Vec<ContentSource> {
        self.sources
            .iter()
            .filter(|s| s.active && s.group == group)
            .cloned()
            .collect()
    }

    /// Crawl every active source of `group` now.
    pub async fn run_crawl_cycle(&self, group: CrawlGroup) -> Result<CrawlReport> {
        let sources = self.sources_for(group);
        self.run_sources(group, &sources, Utc::now()).await
    }

    /// Crawl the given sources in order. Fails only when every source failed.
    pub async fn run_sources(
        &self,
        group: CrawlGroup,
        sources: &[ContentSource],
        now: DateTime<Utc>,
    ) -> Result<CrawlReport> {
        let t0 = Instant::now();
        let started_at = Utc::now();
        let mut per_source = Vec::with_capacity(sources.len());
        let mut saved_items: Vec<ContentItem> = Vec::new();

        for (i, source) in sources.iter().enumerate() {
            if i > 0 && !self.source_pause.is_zero() {
                tokio::time::sleep(self.source_pause).await;
            }
            let (report, mut saved) = self.crawl_source(source, now).await;
            tracing::info!(
                target: "ingest",
                source = %source.name,
                fetched = report.fetched,
                relevant = report.relevant,
                saved = report.saved,
                duplicates = report.duplicates,
                "source crawled"
            );
            per_source.push(report);
            saved_items.append(&mut saved);
        }

        // trending aggregation over what this cycle actually stored
        let mut keywords_updated = 0usize;
        for (tag, count) in tag_counts(&saved_items) {
            match self.store.upsert_trending_keyword(&tag, count, now).await {
                Ok(_) => keywords_updated += 1,
                Err(e) => tracing::warn!(keyword = %tag, error = %e, "trending upsert failed"),
            }
        }

        let report = CrawlReport {
            group,
            sources: per_source.len(),
            fetched: per_source.iter().map(|r| r.fetched).sum(),
            relevant: per_source.iter().map(|r| r.relevant).sum(),
            saved: per_source.iter().map(|r| r.saved).sum(),
            duplicates: per_source.iter().map(|r| r.duplicates).sum(),
            failed: per_source.iter().filter(|r| r.failed).count(),
            keywords_updated,
            started_at,
            finished_at: Utc::now(),
            per_source,
        };

        histogram!("crawl_cycle_ms", "group" => group.task_name()).record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("crawl_last_run_ts").set(report.finished_at.timestamp() as f64);
        tracing::info!(
            target: "ingest",
            group = group.task_name(),
            sources = report.sources,
            saved = report.saved,
            duplicates = report.duplicates,
            failed = report.failed,
            "crawl cycle finished"
        );

        if report.sources > 0 && report.failed == report.sources {
            bail!("all {} sources failed", report.sources);
        }
        Ok(report)
    }

    async fn crawl_source(&self, source: &ContentSource, now: DateTime<Utc>) -> (SourceReport, Vec<ContentItem>) {
        let mut report = SourceReport {
            name: source.name.clone(),
            kind: Some(source.kind),
            ..Default::default()
        };
        let mut saved = Vec::new();

        let Some(adapter) = self.adapters.get(&source.kind) else {
            tracing::warn!(source = %source.name, kind = source.kind.as_str(), "no adapter registered, skipping");
            counter!("crawl_source_errors_total", "kind" => source.kind.as_str()).increment(1);
            report.failed = true;
            return (report, saved);
        };
        let source_id = match self.store.get_or_create_source(&source.name, source.kind).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(source = %source.name, error = %e, "source registry unavailable, skipping");
                counter!("crawl_source_errors_total", "kind" => source.kind.as_str()).increment(1);
                report.failed = true;
                return (report, saved);
            }
        };

        let limit = source.max_items.unwrap_or(self.max_items_per_source);
        let items = adapter.fetch(source).await;
        report.fetched = items.len();
        counter!("crawl_items_fetched_total", "kind" => source.kind.as_str()).increment(items.len() as u64);

        for item in items.into_iter().take(limit) {
            if !self.pipeline.is_relevant(&item) {
                continue;
            }
            report.relevant += 1;

            match self.store.find_by_url(&item.canonical_url).await {
                Ok(Some(_)) => {
                    report.duplicates += 1;
                    counter!("crawl_duplicates_total").increment(1);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(url = %item.canonical_url, error = %e, "dedup lookup failed, skipping item");
                    report.errors += 1;
                    continue;
                }
            }

            let mut row = self.pipeline.prepare(&item, source_id, source.platform_or_kind(), now);
            if source.mirror_images {
                if let Some(q) = &self.uploads {
                    row.image_urls = self.mirror(q, &row.image_urls, &source.name).await;
                }
            }

            match self.store.save_if_new(row.clone()).await {
                Ok(o) if o.saved => {
                    report.saved += 1;
                    counter!("crawl_items_saved_total", "kind" => source.kind.as_str()).increment(1);
                    saved.push(row);
                }
                Ok(_) => {
                    report.duplicates += 1;
                    counter!("crawl_duplicates_total").increment(1);
                }
                Err(e) => {
                    tracing::warn!(url = %row.canonical_url, error = %e, "save failed, continuing with next item");
                    counter!("crawl_source_errors_total", "kind" => "store").increment(1);
                    report.errors += 1;
                }
            }
        }

        (report, saved)
    }

    // placeholders are never mirrored
    async fn mirror(&self, q: &UploadQueue, urls: &[String], context: &str) -> Vec<String> {
        let real: Vec<String> = urls.iter().filter(|u| !is_placeholder(u)).cloned().collect();
        if real.is_empty() {
            return urls.to_vec();
        }
        let mut mirrored = q.mirror_all(&real, context).await.into_iter();
        urls.iter()
            .map(|u| {
                if is_placeholder(u) {
                    u.clone()
                } else {
                    mirrored.next().unwrap_or_else(|| u.clone())
                }
            })
            .collect()
    }
}
