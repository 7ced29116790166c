// src/store/mod.rs
//! Dedup & persistence seam.
//!
//! The backing object/relational store is an external collaborator; the
//! pipeline talks to it only through [`ContentStore`]. `canonical_url` is the
//! sole dedup key for content items.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::types::{Engagement, SourceKind};

pub use memory::InMemoryStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Approved,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub summary: String,
    pub author: Option<String>,
    pub source_id: Uuid,
    pub canonical_url: String,
    pub published_at: DateTime<Utc>,
    pub image_urls: Vec<String>,
    pub tags: Vec<String>,
    pub category: String,
    pub hot_score: f64,
    pub engagement: Engagement,
    pub status: ContentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: Uuid,
    pub name: String,
    pub kind: SourceKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingKeyword {
    pub keyword: String,
    pub mention_count: u64,
    pub hot_score: f64,
    pub last_updated_at: DateTime<Utc>,
    /// 1-based, assigned by the nightly cleanup. `None` until first ranked.
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionLog {
    pub task_name: String,
    pub success: bool,
    pub result: serde_json::Value,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub saved: bool,
    /// Id of the stored row: the new one, or the existing one on a duplicate.
    pub id: Uuid,
}

/// Trending score for a keyword: `count * 10` plus a bounded jitter so equal
/// counts do not produce perfectly flat ties.
pub fn trending_score(mention_count: u64, jitter: f64) -> f64 {
    crate::hot_score::round2(mention_count as f64 * 10.0 + jitter)
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn find_by_url(&self, canonical_url: &str) -> Result<Option<ContentItem>>;

    /// Insert unless a row with the same `canonical_url` exists. Idempotent.
    async fn save_if_new(&self, item: ContentItem) -> Result<SaveOutcome>;

    /// Registry id for `name`, inserting a record on first use.
    async fn get_or_create_source(&self, name: &str, kind: SourceKind) -> Result<Uuid>;

    async fn sources(&self) -> Result<Vec<SourceRecord>>;

    /// Merge `delta` into the keyword's mention count and recompute its score.
    async fn upsert_trending_keyword(
        &self,
        keyword: &str,
        delta: u64,
        now: DateTime<Utc>,
    ) -> Result<TrendingKeyword>;

    async fn trending_keywords(&self) -> Result<Vec<TrendingKeyword>>;

    /// Overwrite ranks; keywords not listed keep theirs.
    async fn set_trending_ranks(&self, ranks: &[(String, u32)]) -> Result<()>;

    /// Rejected items published before `now - retention_days`.
    async fn list_expired(&self, now: DateTime<Utc>, retention_days: i64) -> Result<Vec<ContentItem>>;

    async fn delete_items(&self, ids: &[Uuid]) -> Result<usize>;

    async fn append_task_log(&self, log: TaskExecutionLog) -> Result<()>;

    async fn task_logs(&self) -> Result<Vec<TaskExecutionLog>>;

    /// Drop logs executed before `before`. Returns how many went.
    async fn prune_task_logs(&self, before: DateTime<Utc>) -> Result<usize>;
}
