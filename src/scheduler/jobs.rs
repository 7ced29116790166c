// src/scheduler/jobs.rs
// src/scheduler/jobs.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

use super::{Job, Ticker};
use crate::engine::CrawlEngine;
use crate::ingest::types::CrawlGroup;
use crate::store::ContentStore;

/// One crawl cycle over the sources of a group.
pub struct CrawlJob {
    engine: Arc<CrawlEngine>,
    group: CrawlGroup,
}

impl CrawlJob {
    pub fn new(engine: Arc<CrawlEngine>, group: CrawlGroup) -> Self {
        Self { engine, group }
    }
}

#[async_trait]
impl Job for CrawlJob {
    async fn run(&self) -> Result<serde_json::Value> {
        let report = self.engine.run_crawl_cycle(self.group).await?;
        Ok(serde_json::to_value(report)?)
    }
}

/// Daily housekeeping: purge expired rejected items, re-rank trending
/// keywords, optionally prune old task logs.
pub struct CleanupJob {
    store: Arc<dyn ContentStore>,
    ticker: Arc<dyn Ticker>,
    retention_days: i64,
    task_log_retention_days: Option<i64>,
}

impl CleanupJob {
    pub fn new(store: Arc<dyn ContentStore>, ticker: Arc<dyn Ticker>, retention_days: i64) -> Self {
        Self {
            store,
            ticker,
            retention_days,
            task_log_retention_days: None,
        }
    }

    pub fn with_task_log_retention(mut self, days: Option<i64>) -> Self {
        self.task_log_retention_days = days;
        self
    }
}

#[async_trait]
impl Job for CleanupJob {
    async fn run(&self) -> Result<serde_json::Value> {
        let now = self.ticker.now();

        let expired = self
            .store
            .list_expired(now, self.retention_days)
            .await
            .context("listing expired items")?;
        let ids: Vec<_> = expired.iter().map(|i| i.id).collect();
        let deleted = if ids.is_empty() {
            0
        } else {
            self.store.delete_items(&ids).await.context("deleting expired items")?
        };

        let mut trending = self
            .store
            .trending_keywords()
            .await
            .context("loading trending keywords")?;
        trending.sort_by(|a, b| {
            b.hot_score
                .total_cmp(&a.hot_score)
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        let ranks: Vec<(String, u32)> = trending
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.keyword, i as u32 + 1))
            .collect();
        self.store
            .set_trending_ranks(&ranks)
            .await
            .context("writing trending ranks")?;

        let logs_pruned = match self.task_log_retention_days {
            Some(days) => self
                .store
                .prune_task_logs(now - Duration::days(days.max(0)))
                .await
                .context("pruning task logs")?,
            None => 0,
        };

        tracing::info!(
            target: "scheduler",
            deleted,
            ranked = ranks.len(),
            logs_pruned,
            "cleanup finished"
        );
        Ok(json!({
            "deleted": deleted,
            "ranked": ranks.len(),
            "logs_pruned": logs_pruned,
        }))
    }
}
