// src/upload/mod.rs
//! Serialized, retrying mirror of binary assets into a write-throttled blob store.
//!
//! The backend accepts roughly one write per key per second, so the queue
//! is a single FIFO gate (`max_concurrency`, normally 1). A finished task
//! keeps its slot for `inter_task_delay` before the next one is dispatched.
//! Callers get their public URL as soon as the store acknowledges the write.

pub mod blob;
pub mod sniff;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::UploadConfig;
use crate::error::{BlobError, PipelineError, PipelineResult};
use crate::ingest::retry::{FailureClass, RetryPolicy};

pub use blob::{BlobStore, HttpBlobStore, MemoryBlobStore, ObjectMeta};

const CACHE_CONTROL: &str = "public, max-age=31536000";
const RECENT_TASKS: usize = 256;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("upload_attempts_total", "Blob store write attempts.");
        describe_counter!(
            "upload_failures_total",
            "Uploads that failed after exhausting retries."
        );
        describe_gauge!("upload_queue_waiting", "Uploads waiting for the queue gate.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Queued,
    Uploading,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    pub id: u64,
    /// Original URL or caller label; the bytes themselves are not kept.
    pub payload_ref: String,
    pub key: String,
    pub status: UploadStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub uploading: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Caller-supplied metadata for [`UploadQueue::enqueue_upload`].
#[derive(Debug, Clone, Default)]
pub struct UploadMeta {
    /// Content type claimed by the caller or the origin server. Used only
    /// when sniffing does not recognise the payload.
    pub declared_content_type: Option<String>,
    pub source_url: Option<String>,
    /// Free-form label, e.g. the source name the asset belongs to.
    pub context: String,
}

#[derive(Default)]
struct Tracker {
    stats: QueueStats,
    recent: VecDeque<UploadTask>,
}

impl Tracker {
    fn push(&mut self, task: UploadTask) {
        self.stats.queued += 1;
        if self.recent.len() == RECENT_TASKS {
            self.recent.pop_front();
        }
        self.recent.push_back(task);
    }

    fn transition(&mut self, id: u64, to: UploadStatus, attempts: u32) {
        let from = self
            .recent
            .iter_mut()
            .find(|t| t.id == id)
            .map(|t| {
                let from = t.status;
                t.status = to;
                t.attempts = attempts;
                from
            });
        // evicted tasks still count
        let from = from.unwrap_or(match to {
            UploadStatus::Uploading => UploadStatus::Queued,
            _ => UploadStatus::Uploading,
        });
        match from {
            UploadStatus::Queued => self.stats.queued = self.stats.queued.saturating_sub(1),
            UploadStatus::Uploading => self.stats.uploading = self.stats.uploading.saturating_sub(1),
            _ => {}
        }
        match to {
            UploadStatus::Queued => self.stats.queued += 1,
            UploadStatus::Uploading => self.stats.uploading += 1,
            UploadStatus::Succeeded => self.stats.succeeded += 1,
            UploadStatus::Failed => self.stats.failed += 1,
        }
    }
}

pub struct UploadQueue {
    store: Arc<dyn BlobStore>,
    http: reqwest::Client,
    gate: Arc<Semaphore>,
    inter_task_delay: Duration,
    retry: RetryPolicy,
    key_prefix: String,
    verify: bool,
    download_timeout: Duration,
    next_id: AtomicU64,
    tracker: Mutex<Tracker>,
}

impl UploadQueue {
    pub fn new(store: Arc<dyn BlobStore>, cfg: &UploadConfig) -> Self {
        ensure_metrics_described();
        Self {
            store,
            http: reqwest::Client::new(),
            gate: Arc::new(Semaphore::new(cfg.max_concurrency.max(1))),
            inter_task_delay: Duration::from_millis(cfg.inter_task_delay_ms),
            retry: cfg.retry_policy(),
            key_prefix: cfg.key_prefix.clone(),
            verify: cfg.verify,
            download_timeout: Duration::from_secs(cfg.download_timeout_secs.max(1)),
            next_id: AtomicU64::new(1),
            tracker: Mutex::new(Tracker::default()),
        }
    }

    /// Store chosen from config: HTTP when an endpoint is set, memory otherwise.
    pub fn from_config(cfg: &UploadConfig, http: reqwest::Client) -> Self {
        let store: Arc<dyn BlobStore> = match cfg.endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => {
                let token = std::env::var(&cfg.token_env).ok().filter(|t| !t.trim().is_empty());
                if token.is_none() {
                    tracing::warn!(env = %cfg.token_env, "blob store token not set, writes will be anonymous");
                }
                Arc::new(
                    HttpBlobStore::new(http.clone(), endpoint, cfg.public_base_url.clone(), token)
                        .with_verify_timeout(Duration::from_secs(cfg.verify_timeout_secs.max(1))),
                )
            }
            _ => Arc::new(MemoryBlobStore::new(cfg.public_base_url.clone())),
        };
        Self::new(store, cfg).with_http_client(http)
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn stats(&self) -> QueueStats {
        self.tracker.lock().map(|t| t.stats).unwrap_or_default()
    }

    pub fn recent_tasks(&self) -> Vec<UploadTask> {
        self.tracker
            .lock()
            .map(|t| t.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn track(&self, f: impl FnOnce(&mut Tracker)) {
        if let Ok(mut t) = self.tracker.lock() {
            f(&mut t);
        }
    }

    /// Queue `bytes` for upload and wait for the store's acknowledgement.
    pub async fn enqueue_upload(&self, bytes: Vec<u8>, meta: UploadMeta) -> PipelineResult<String> {
        if bytes.is_empty() {
            return Err(PipelineError::EmptyPayload);
        }

        let content_type = sniff::resolve_content_type(&bytes, meta.declared_content_type.as_deref());
        let key = object_key(
            &self.key_prefix,
            Utc::now().timestamp_millis(),
            &bytes,
            sniff::extension_for(&content_type),
        );
        let object = ObjectMeta {
            content_type,
            cache_control: CACHE_CONTROL.to_string(),
            metadata: object_metadata(&meta, bytes.len()),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload_ref = meta
            .source_url
            .clone()
            .unwrap_or_else(|| meta.context.clone());
        self.track(|t| {
            t.push(UploadTask {
                id,
                payload_ref,
                key: key.clone(),
                status: UploadStatus::Queued,
                attempts: 0,
            })
        });
        gauge!("upload_queue_waiting").increment(1.0);

        let permit = self.gate.clone().acquire_owned().await;
        gauge!("upload_queue_waiting").decrement(1.0);
        let permit = permit.map_err(|_| PipelineError::Config("upload queue closed".into()))?;

        self.track(|t| t.transition(id, UploadStatus::Uploading, 0));
        let result = self.put_with_retry(id, &key, &bytes, &object).await;

        // slot stays taken for the inter-task delay, the caller does not wait for it
        let delay = self.inter_task_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(permit);
        });

        match result {
            Ok(attempts) => {
                self.track(|t| t.transition(id, UploadStatus::Succeeded, attempts));
                let url = self.store.public_url(&key);
                if self.verify {
                    if let Err(e) = self.verify_written(&url).await {
                        tracing::warn!(error = %e, url = %url, "post-write verification failed");
                    }
                }
                tracing::debug!(target: "upload", key = %key, attempts, "upload acknowledged");
                Ok(url)
            }
            Err((attempts, e)) => {
                self.track(|t| t.transition(id, UploadStatus::Failed, attempts));
                counter!("upload_failures_total").increment(1);
                tracing::warn!(target: "upload", key = %key, attempts, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    /// Download `source_url`, then upload it through the queue.
    pub async fn enqueue_upload_from_url(&self, source_url: &str, context: &str) -> PipelineResult<String> {
        let (bytes, declared) = self.download(source_url).await?;
        self.enqueue_upload(
            bytes,
            UploadMeta {
                declared_content_type: declared,
                source_url: Some(source_url.to_string()),
                context: context.to_string(),
            },
        )
        .await
    }

    /// Mirror each URL in order. A failed mirror keeps the original URL.
    pub async fn mirror_all(&self, urls: &[String], context: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(urls.len());
        for url in urls {
            match self.enqueue_upload_from_url(url, context).await {
                Ok(mirrored) => out.push(mirrored),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "mirroring failed, keeping original url");
                    out.push(url.clone());
                }
            }
        }
        out
    }

    async fn put_with_retry(
        &self,
        id: u64,
        key: &str,
        bytes: &[u8],
        meta: &ObjectMeta,
    ) -> Result<u32, (u32, PipelineError)> {
        let mut backoff = self.retry.backoff();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            counter!("upload_attempts_total").increment(1);
            let err = match self.store.put(key, bytes, meta).await {
                Ok(()) => return Ok(attempts),
                Err(e) => e,
            };
            let class = if err.is_throttled() {
                FailureClass::Throttled
            } else {
                FailureClass::Transient
            };
            match backoff.next_delay(class, None) {
                Some(wait) => {
                    tracing::info!(
                        target: "upload",
                        key,
                        attempt = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "write failed, retrying"
                    );
                    self.track(|t| {
                        if let Some(task) = t.recent.iter_mut().find(|t| t.id == id) {
                            task.attempts = attempts;
                        }
                    });
                    tokio::time::sleep(wait).await;
                }
                None => {
                    return Err((
                        attempts,
                        PipelineError::Exhausted {
                            attempts,
                            last: Box::new(blob_to_pipeline(err)),
                        },
                    ))
                }
            }
        }
    }

    async fn download(&self, url: &str) -> PipelineResult<(Vec<u8>, Option<String>)> {
        let mut backoff = self.retry.backoff();
        loop {
            let err = match self.download_once(url).await {
                Ok(ok) => return Ok(ok),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            match backoff.next_delay(FailureClass::Transient, None) {
                Some(wait) => tokio::time::sleep(wait).await,
                None => return Err(err),
            }
        }
    }

    async fn download_once(&self, url: &str) -> PipelineResult<(Vec<u8>, Option<String>)> {
        let resp = self
            .http
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?;
        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::Transient(format!("download {url}: {status}")));
        }
        if !status.is_success() {
            return Err(PipelineError::Malformed(format!("download {url}: {status}")));
        }
        let declared = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(PipelineError::EmptyPayload);
        }
        Ok((bytes, declared))
    }

    async fn verify_written(&self, public_url: &str) -> PipelineResult<()> {
        match self.store.exists(public_url).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PipelineError::Verification(format!("{public_url} not visible yet"))),
            Err(e) => Err(PipelineError::Verification(e.to_string())),
        }
    }
}

fn blob_to_pipeline(err: BlobError) -> PipelineError {
    match err {
        BlobError::Throttled(_) => PipelineError::RateLimited { reset_at: None },
        other => PipelineError::Transient(other.to_string()),
    }
}

fn object_metadata(meta: &UploadMeta, size: usize) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    if let Some(u) = &meta.source_url {
        m.insert("original-url".to_string(), u.clone());
    }
    if !meta.context.is_empty() {
        m.insert("source".to_string(), meta.context.clone());
    }
    m.insert("file-size".to_string(), size.to_string());
    m.insert("upload-timestamp".to_string(), Utc::now().to_rfc3339());
    m
}

/// `{prefix}-{unix_millis}-{first 8 hex of sha256}.{ext}`
pub fn object_key(prefix: &str, unix_millis: i64, bytes: &[u8], ext: &str) -> String {
    let digest = Sha256::digest(bytes);
    let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{prefix}-{unix_millis}-{short}.{ext}")
}
