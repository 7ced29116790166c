// src/ingest/providers/search_api.rs
//! Bearer-token social search client (`GET /tweets/search/recent` shape).
//!
//! - Fails fast with `RateLimited` while the cached budget is spent.
//! - 429: waits until the advertised reset and retries, unless the reset is
//!   further away than the longest backoff wait; then `RateLimited` at once.
//! - Network errors and 5xx: exponential backoff, bounded attempts.
//! - Rate-limit headers are folded into the cached state after every call.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SearchApiConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::rate_limit::RateLimitState;
use crate::ingest::retry::{FailureClass, RetryPolicy};
use crate::ingest::types::{
    ContentSource, RawItem, SearchPost, SourceAdapter, SourceKind, SourcePayload,
};
use crate::relevance::RelevanceHandle;

const SEARCH_PATH: &str = "/tweets/search/recent";
const TWEET_FIELDS: &str = "created_at,author_id,public_metrics,attachments,lang";
const USER_FIELDS: &str = "name,username,verified,profile_image_url,public_metrics";
const MEDIA_FIELDS: &str = "url,preview_image_url,type";
const EXPANSIONS: &str = "author_id,attachments.media_keys,referenced_tweets.id";

/* ----------------------------
Wire format
---------------------------- */

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ApiPost>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: SearchMeta,
}

#[derive(Debug, Deserialize)]
struct ApiPost {
    id: String,
    text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    public_metrics: PostMetrics,
    #[serde(default)]
    attachments: Option<Attachments>,
}

#[derive(Debug, Default, Deserialize)]
struct PostMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    quote_count: u64,
    #[serde(default)]
    impression_count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
    #[serde(default)]
    media: Vec<ApiMedia>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: String,
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMedia {
    pub media_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub preview_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMeta {
    #[serde(default)]
    pub result_count: u32,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub items: Vec<SearchPost>,
    pub users: Vec<ApiUser>,
    pub media: Vec<ApiMedia>,
    pub meta: SearchMeta,
}

impl SearchResponse {
    fn into_results(self, now: DateTime<Utc>) -> SearchResults {
        let users: HashMap<&str, &ApiUser> = self
            .includes
            .users
            .iter()
            .map(|u| (u.id.as_str(), u))
            .collect();
        let media: HashMap<&str, &ApiMedia> = self
            .includes
            .media
            .iter()
            .map(|m| (m.media_key.as_str(), m))
            .collect();

        let items = self
            .data
            .into_iter()
            .map(|p| {
                let author = p.author_id.as_deref().and_then(|id| users.get(id));
                let media_urls = p
                    .attachments
                    .map(|a| a.media_keys)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|k| media.get(k.as_str()))
                    .filter_map(|m| m.url.clone().or_else(|| m.preview_image_url.clone()))
                    .collect();
                SearchPost {
                    id: p.id,
                    text: p.text,
                    created_at: p.created_at.unwrap_or(now),
                    author_name: author.map(|u| u.name.clone()),
                    author_username: author.map(|u| u.username.clone()),
                    like_count: p.public_metrics.like_count,
                    retweet_count: p.public_metrics.retweet_count,
                    reply_count: p.public_metrics.reply_count,
                    quote_count: p.public_metrics.quote_count,
                    impression_count: p.public_metrics.impression_count,
                    media_urls,
                }
            })
            .collect();

        SearchResults {
            items,
            users: self.includes.users.clone(),
            media: self.includes.media.clone(),
            meta: self.meta,
        }
    }
}

/* ----------------------------
Client
---------------------------- */

/// `("k1" OR "k2") -is:retweet -is:reply (has:images OR has:videos) (lang:en OR ...)`.
/// The lower time bound travels as the `start_time` parameter.
pub fn build_query(keywords: &[String], languages: &[String]) -> String {
    let terms: Vec<String> = keywords
        .iter()
        .map(|k| k.replace('"', "").trim().to_string())
        .filter(|k| !k.is_empty())
        .map(|k| format!("\"{k}\""))
        .collect();
    let mut q = format!("({})", terms.join(" OR "));
    q.push_str(" -is:retweet -is:reply (has:images OR has:videos)");
    let langs: Vec<String> = languages
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| format!("lang:{l}"))
        .collect();
    if !langs.is_empty() {
        q.push_str(&format!(" ({})", langs.join(" OR ")));
    }
    q
}

pub struct SearchApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
    retry: RetryPolicy,
    rate: Arc<RwLock<RateLimitState>>,
}

impl SearchApiClient {
    /// Missing or blank credentials are a configuration error, raised here
    /// rather than on the first call.
    pub fn new(cfg: &SearchApiConfig, token: Option<String>) -> PipelineResult<Self> {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PipelineError::Config(format!("search API token missing (set {})", cfg.token_env))
            })?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token,
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
            retry: cfg.retry_policy(),
            rate: Arc::new(RwLock::new(RateLimitState::default())),
        })
    }

    /// Token read from the env var named by `cfg.token_env`.
    pub fn from_env(cfg: &SearchApiConfig) -> PipelineResult<Self> {
        Self::new(cfg, std::env::var(&cfg.token_env).ok())
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// See [`RateLimitState::seed_hourly`].
    pub fn seed_hourly_limit(&self, limit: u32) {
        self.with_rate(|st| st.seed_hourly(limit, Utc::now()));
    }

    pub fn rate_limit(&self) -> RateLimitState {
        self.rate.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn with_rate<T>(&self, f: impl FnOnce(&mut RateLimitState) -> T) -> Option<T> {
        self.rate.write().ok().map(|mut g| f(&mut g))
    }

    pub async fn search(
        &self,
        query: &str,
        max_results: u32,
        lookback_hours: i64,
    ) -> PipelineResult<SearchResults> {
        let now = Utc::now();
        if let Some(Err(e)) = self.with_rate(|st| st.check(now)) {
            counter!("search_rate_limited_total", "stage" => "precheck").increment(1);
            return Err(e);
        }

        let start_time = (now - chrono::Duration::hours(lookback_hours.max(1)))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let max = max_results.clamp(10, 100).to_string();
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let mut backoff = self.retry.backoff();

        loop {
            self.with_rate(|st| st.record_request());
            let sent = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .timeout(self.timeout)
                .query(&[
                    ("query", query),
                    ("max_results", max.as_str()),
                    ("start_time", start_time.as_str()),
                    ("sort_order", "recency"),
                    ("tweet.fields", TWEET_FIELDS),
                    ("user.fields", USER_FIELDS),
                    ("media.fields", MEDIA_FIELDS),
                    ("expansions", EXPANSIONS),
                ])
                .send()
                .await;

            let resp = match sent {
                Ok(r) => r,
                Err(e) => {
                    let err = PipelineError::from(e);
                    match backoff.next_delay(FailureClass::Transient, None) {
                        Some(d) => {
                            warn!(error = %err, wait_ms = d.as_millis() as u64, "search request failed, retrying");
                            tokio::time::sleep(d).await;
                            continue;
                        }
                        None => {
                            return Err(PipelineError::Exhausted {
                                attempts: backoff.failures(),
                                last: Box::new(err),
                            })
                        }
                    }
                }
            };

            self.with_rate(|st| st.update_from_headers(resp.headers()));
            let status = resp.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                counter!("search_rate_limited_total", "stage" => "response").increment(1);
                let (hint, reset_at) = self
                    .with_rate(|st| (st.wait_hint(Utc::now()), st.reset_at))
                    .unwrap_or((None, None));
                if hint.is_some_and(|h| h > self.retry.max_delay) {
                    info!(?reset_at, "search API throttled past the retry window, giving up");
                    return Err(PipelineError::RateLimited { reset_at });
                }
                match backoff.next_delay(FailureClass::Throttled, hint) {
                    Some(d) => {
                        info!(wait_ms = d.as_millis() as u64, "search API throttled, waiting for reset");
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    None => {
                        return Err(PipelineError::Exhausted {
                            attempts: backoff.failures(),
                            last: Box::new(PipelineError::RateLimited { reset_at }),
                        })
                    }
                }
            }

            if status.is_server_error() {
                let err = PipelineError::Transient(format!("search API returned {status}"));
                match backoff.next_delay(FailureClass::Transient, None) {
                    Some(d) => {
                        warn!(%status, wait_ms = d.as_millis() as u64, "search API server error, retrying");
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    None => {
                        return Err(PipelineError::Exhausted {
                            attempts: backoff.failures(),
                            last: Box::new(err),
                        })
                    }
                }
            }

            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return Err(PipelineError::Config(format!("search API rejected credentials ({status})")));
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(PipelineError::Malformed(format!("search API returned {status}: {body}")));
            }

            let parsed: SearchResponse = resp.json().await.map_err(|e| {
                if e.is_decode() {
                    PipelineError::Malformed(e.to_string())
                } else {
                    PipelineError::from(e)
                }
            })?;
            let results = parsed.into_results(Utc::now());
            debug!(count = results.items.len(), "search API page received");
            return Ok(results);
        }
    }
}

/* ----------------------------
Adapter
---------------------------- */

#[derive(Debug, Clone)]
pub struct PostFilter {
    pub min_engagement: u64,
    pub spam_phrases: Vec<String>,
}

impl PostFilter {
    pub fn from_config(cfg: &SearchApiConfig) -> Self {
        Self {
            min_engagement: cfg.min_engagement,
            spam_phrases: cfg.spam_phrases.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Relevant, engaged enough and free of spam phrases.
    pub fn keep(&self, post: &SearchPost, relevance: &RelevanceHandle) -> bool {
        if !relevance.matches(&post.text) {
            return false;
        }
        if post.total_engagement() < self.min_engagement {
            return false;
        }
        let lower = post.text.to_lowercase();
        !self.spam_phrases.iter().any(|s| lower.contains(s.as_str()))
    }
}

pub struct SearchApiAdapter {
    client: Arc<SearchApiClient>,
    relevance: RelevanceHandle,
    filter: PostFilter,
    languages: Vec<String>,
    max_results: u32,
    lookback_hours: i64,
}

impl SearchApiAdapter {
    pub fn new(client: Arc<SearchApiClient>, relevance: RelevanceHandle, cfg: &SearchApiConfig) -> Self {
        Self {
            client,
            relevance,
            filter: PostFilter::from_config(cfg),
            languages: cfg.languages.clone(),
            max_results: cfg.max_results,
            lookback_hours: cfg.lookback_hours,
        }
    }

    pub fn client(&self) -> &Arc<SearchApiClient> {
        &self.client
    }
}

#[async_trait]
impl SourceAdapter for SearchApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::SearchApi
    }

    async fn fetch(&self, source: &ContentSource) -> Vec<RawItem> {
        let keywords = if source.keywords.is_empty() {
            self.relevance.enabled_keywords()
        } else {
            source.keywords.clone()
        };
        if keywords.is_empty() {
            warn!(source = %source.name, "no keywords to search for");
            return Vec::new();
        }

        if let Some(limit) = source.rate_limit_per_hour {
            self.client.seed_hourly_limit(limit);
        }

        let query = build_query(&keywords, &self.languages);
        let max = source
            .max_items
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(self.max_results);
        match self.client.search(&query, max, self.lookback_hours).await {
            Ok(results) => {
                let total = results.items.len();
                let kept: Vec<RawItem> = results
                    .items
                    .into_iter()
                    .filter(|p| self.filter.keep(p, &self.relevance))
                    .map(|p| SourcePayload::SearchApi(p).into_raw_item())
                    .collect();
                info!(target: "ingest", source = %source.name, total, kept = kept.len(), "search API results");
                kept
            }
            Err(PipelineError::RateLimited { reset_at }) => {
                warn!(source = %source.name, ?reset_at, "search API budget exhausted, skipping source");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, source = %source.name, "search API fetch failed");
                counter!("crawl_source_errors_total", "kind" => "search-api").increment(1);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_shape() {
        let q = build_query(
            &["labubu".into(), "pop \"mart\"".into(), " ".into()],
            &["en".into(), "zh".into()],
        );
        assert_eq!(
            q,
            r#"("labubu" OR "pop mart") -is:retweet -is:reply (has:images OR has:videos) (lang:en OR lang:zh)"#
        );
    }

    #[test]
    fn missing_token_fails_at_construction() {
        let cfg = SearchApiConfig::default();
        assert!(matches!(
            SearchApiClient::new(&cfg, None),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            SearchApiClient::new(&cfg, Some("   ".into())),
            Err(PipelineError::Config(_))
        ));
        assert!(SearchApiClient::new(&cfg, Some("t0ken".into())).is_ok());
    }

    #[test]
    fn response_joins_users_and_media() {
        let json = r#"{
            "data": [{
                "id": "42", "text": "labubu haul", "author_id": "u1",
                "created_at": "2025-06-01T10:00:00.000Z",
                "public_metrics": {"like_count": 3, "retweet_count": 1, "reply_count": 1, "quote_count": 0, "impression_count": 900},
                "attachments": {"media_keys": ["m1", "m2"]}
            }],
            "includes": {
                "users": [{"id": "u1", "name": "Toy Fan", "username": "toyfan"}],
                "media": [
                    {"media_key": "m1", "type": "photo", "url": "https://pbs.example.com/m1.jpg"},
                    {"media_key": "m2", "type": "video", "preview_image_url": "https://pbs.example.com/m2.jpg"}
                ]
            },
            "meta": {"result_count": 1}
        }"#;
        let resp: SearchResponse = serde_json::from_str(json).unwrap();
        let r = resp.into_results(Utc::now());
        assert_eq!(r.items.len(), 1);
        let p = &r.items[0];
        assert_eq!(p.author_username.as_deref(), Some("toyfan"));
        assert_eq!(p.media_urls.len(), 2);
        assert_eq!(p.total_engagement(), 5);
        assert_eq!(p.canonical_url(), "https://x.com/toyfan/status/42");
    }

    #[test]
    fn post_filter_rules() {
        let rel = RelevanceHandle::from_keywords(["labubu"]);
        let f = PostFilter {
            min_engagement: 5,
            spam_phrases: vec!["buy now".into()],
        };
        let mut p = SearchPost {
            id: "1".into(),
            text: "Labubu restock tonight".into(),
            created_at: Utc::now(),
            author_name: None,
            author_username: None,
            like_count: 4,
            retweet_count: 1,
            reply_count: 0,
            quote_count: 0,
            impression_count: 0,
            media_urls: vec![],
        };
        assert!(f.keep(&p, &rel));
        p.like_count = 3;
        assert!(!f.keep(&p, &rel), "below engagement threshold");
        p.like_count = 10;
        p.text = "Labubu BUY NOW cheap".into();
        assert!(!f.keep(&p, &rel), "spam phrase");
        p.text = "unrelated toy".into();
        assert!(!f.keep(&p, &rel), "not relevant");
    }
}
