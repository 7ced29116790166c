// src/store/memory.rs
//! In-process `ContentStore`. Used by the service when no external database
//! is wired in, and by the tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    trending_score, ContentItem, ContentStatus, ContentStore, SaveOutcome, SourceRecord,
    TaskExecutionLog, TrendingKeyword,
};
use crate::ingest::types::SourceKind;

#[derive(Debug, Default)]
struct Inner {
    items: Vec<ContentItem>,
    sources: Vec<SourceRecord>,
    trending: HashMap<String, TrendingKeyword>,
    logs: Vec<TaskExecutionLog>,
    // failure injection
    failing_urls: HashSet<String>,
    fail_task_logs: bool,
}

#[derive(Debug)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    jitter: f64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl InMemoryStore {
    /// `jitter` bounds the random term of trending keyword scores (`[0, jitter)`).
    pub fn new(jitter: f64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            jitter: jitter.max(0.0),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("in-memory store mutex poisoned"))
    }

    fn jitter_sample(&self) -> f64 {
        if self.jitter > 0.0 {
            rand::rng().random_range(0.0..self.jitter)
        } else {
            0.0
        }
    }

    pub fn items(&self) -> Vec<ContentItem> {
        self.lock().map(|g| g.items.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moderation stand-in: change an item's status.
    pub fn set_status(&self, id: Uuid, status: ContentStatus) -> bool {
        match self.lock() {
            Ok(mut g) => match g.items.iter_mut().find(|i| i.id == id) {
                Some(item) => {
                    item.status = status;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Make `save_if_new` fail for this URL (error-isolation tests).
    pub fn fail_saves_for(&self, canonical_url: &str) {
        if let Ok(mut g) = self.lock() {
            g.failing_urls.insert(canonical_url.to_string());
        }
    }

    /// Make `append_task_log` fail (log-write failure tests).
    pub fn fail_task_logs(&self, fail: bool) {
        if let Ok(mut g) = self.lock() {
            g.fail_task_logs = fail;
        }
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn find_by_url(&self, canonical_url: &str) -> Result<Option<ContentItem>> {
        let g = self.lock()?;
        Ok(g.items
            .iter()
            .find(|i| i.canonical_url == canonical_url)
            .cloned())
    }

    async fn save_if_new(&self, item: ContentItem) -> Result<SaveOutcome> {
        let mut g = self.lock()?;
        if g.failing_urls.contains(&item.canonical_url) {
            return Err(anyhow!("write rejected for {}", item.canonical_url));
        }
        if let Some(existing) = g.items.iter().find(|i| i.canonical_url == item.canonical_url) {
            return Ok(SaveOutcome {
                saved: false,
                id: existing.id,
            });
        }
        let id = item.id;
        g.items.push(item);
        Ok(SaveOutcome { saved: true, id })
    }

    // lookup and insert happen under one lock, so concurrent first use cannot
    // create two records here; external stores need a unique constraint
    async fn get_or_create_source(&self, name: &str, kind: SourceKind) -> Result<Uuid> {
        let mut g = self.lock()?;
        if let Some(s) = g.sources.iter().find(|s| s.name == name) {
            return Ok(s.id);
        }
        let rec = SourceRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            created_at: Utc::now(),
        };
        let id = rec.id;
        g.sources.push(rec);
        Ok(id)
    }

    async fn sources(&self) -> Result<Vec<SourceRecord>> {
        Ok(self.lock()?.sources.clone())
    }

    async fn upsert_trending_keyword(
        &self,
        keyword: &str,
        delta: u64,
        now: DateTime<Utc>,
    ) -> Result<TrendingKeyword> {
        let jitter = self.jitter_sample();
        let mut g = self.lock()?;
        let entry = g
            .trending
            .entry(keyword.to_string())
            .or_insert_with(|| TrendingKeyword {
                keyword: keyword.to_string(),
                mention_count: 0,
                hot_score: 0.0,
                last_updated_at: now,
                rank: None,
            });
        entry.mention_count = entry.mention_count.saturating_add(delta);
        entry.hot_score = trending_score(entry.mention_count, jitter);
        entry.last_updated_at = now;
        Ok(entry.clone())
    }

    async fn trending_keywords(&self) -> Result<Vec<TrendingKeyword>> {
        let g = self.lock()?;
        let mut v: Vec<TrendingKeyword> = g.trending.values().cloned().collect();
        v.sort_by(|a, b| a.keyword.cmp(&b.keyword));
        Ok(v)
    }

    async fn set_trending_ranks(&self, ranks: &[(String, u32)]) -> Result<()> {
        let mut g = self.lock()?;
        for (kw, rank) in ranks {
            if let Some(t) = g.trending.get_mut(kw) {
                t.rank = Some(*rank);
            }
        }
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>, retention_days: i64) -> Result<Vec<ContentItem>> {
        let cutoff = now - Duration::days(retention_days.max(0));
        let g = self.lock()?;
        Ok(g.items
            .iter()
            .filter(|i| i.status == ContentStatus::Rejected && i.published_at < cutoff)
            .cloned()
            .collect())
    }

    async fn delete_items(&self, ids: &[Uuid]) -> Result<usize> {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        let mut g = self.lock()?;
        let before = g.items.len();
        g.items.retain(|i| !ids.contains(&i.id));
        Ok(before - g.items.len())
    }

    async fn append_task_log(&self, log: TaskExecutionLog) -> Result<()> {
        let mut g = self.lock()?;
        if g.fail_task_logs {
            return Err(anyhow!("task log table unavailable"));
        }
        g.logs.push(log);
        Ok(())
    }

    async fn task_logs(&self) -> Result<Vec<TaskExecutionLog>> {
        Ok(self.lock()?.logs.clone())
    }

    async fn prune_task_logs(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut g = self.lock()?;
        let n = g.logs.len();
        g.logs.retain(|l| l.executed_at >= before);
        Ok(n - g.logs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_registry_reuses_ids() {
        let store = InMemoryStore::new(0.0);
        let a = store.get_or_create_source("Toy News", SourceKind::Feed).await.unwrap();
        let b = store.get_or_create_source("Toy News", SourceKind::Feed).await.unwrap();
        let c = store.get_or_create_source("Weibo", SourceKind::Simulated).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.sources().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn trending_counts_merge() {
        let store = InMemoryStore::new(0.0);
        let now = Utc::now();
        store.upsert_trending_keyword("labubu", 2, now).await.unwrap();
        let t = store.upsert_trending_keyword("labubu", 3, now).await.unwrap();
        assert_eq!(t.mention_count, 5);
        assert_eq!(t.hot_score, 50.0);
    }

    #[tokio::test]
    async fn trending_jitter_is_bounded() {
        let store = InMemoryStore::new(20.0);
        let now = Utc::now();
        for _ in 0..50 {
            let t = store.upsert_trending_keyword("k", 0, now).await.unwrap();
            assert!(t.hot_score >= 0.0 && t.hot_score <= 20.0);
        }
    }
}
