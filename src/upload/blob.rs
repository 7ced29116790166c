// src/upload/blob.rs
//! Blob-store seam for the upload queue.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::BlobError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_type: String,
    pub cache_control: String,
    /// Free-form metadata (original URL, source, size, upload time).
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key`. `Ok` is the store's acknowledgement.
    async fn put(&self, key: &str, bytes: &[u8], meta: &ObjectMeta) -> Result<(), BlobError>;

    fn public_url(&self, key: &str) -> String;

    /// Lightweight read-side check that `public_url` resolves.
    async fn exists(&self, public_url: &str) -> Result<bool, BlobError>;
}

/// S3/R2-style HTTP store: `PUT {endpoint}/{key}` with a bearer token.
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    public_base_url: String,
    token: Option<String>,
    verify_timeout: Duration,
}

impl HttpBlobStore {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        public_base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            token,
            verify_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_verify_timeout(mut self, t: Duration) -> Self {
        self.verify_timeout = t;
        self
    }
}

fn looks_throttled(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("toomanyrequests") || lower.contains("too many requests")
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], meta: &ObjectMeta) -> Result<(), BlobError> {
        let mut req = self
            .client
            .put(format!("{}/{}", self.endpoint, key))
            .header(reqwest::header::CONTENT_TYPE, meta.content_type.as_str())
            .header(reqwest::header::CACHE_CONTROL, meta.cache_control.as_str())
            .body(bytes.to_vec());
        for (k, v) in &meta.metadata {
            req = req.header(format!("x-meta-{k}"), v.as_str());
        }
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || looks_throttled(&body) {
            return Err(BlobError::Throttled(format!("{status}: {body}")));
        }
        Err(BlobError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    async fn exists(&self, public_url: &str) -> Result<bool, BlobError> {
        let resp = self
            .client
            .head(public_url)
            .timeout(self.verify_timeout)
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}

/// Keeps objects in memory. Used when no blob endpoint is configured.
pub struct MemoryBlobStore {
    public_base_url: String,
    objects: Mutex<HashMap<String, (Vec<u8>, ObjectMeta)>>,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, ObjectMeta)> {
        self.objects.lock().ok().and_then(|m| m.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], meta: &ObjectMeta) -> Result<(), BlobError> {
        let mut m = self
            .objects
            .lock()
            .map_err(|_| BlobError::Network("memory store poisoned".into()))?;
        m.insert(key.to_string(), (bytes.to_vec(), meta.clone()));
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    async fn exists(&self, public_url: &str) -> Result<bool, BlobError> {
        let prefix = format!("{}/", self.public_base_url);
        let Some(key) = public_url.strip_prefix(&prefix) else {
            return Ok(false);
        };
        Ok(self
            .objects
            .lock()
            .map(|m| m.contains_key(key))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_detection_in_body() {
        assert!(looks_throttled("<Error><Code>TooManyRequests</Code></Error>"));
        assert!(looks_throttled("Too Many Requests"));
        assert!(!looks_throttled("AccessDenied"));
    }

    #[tokio::test]
    async fn memory_store_round_trip_and_exists() {
        let store = MemoryBlobStore::new("https://media.test/");
        store
            .put("a.png", b"x", &ObjectMeta::default())
            .await
            .unwrap();
        let url = store.public_url("a.png");
        assert_eq!(url, "https://media.test/a.png");
        assert!(store.exists(&url).await.unwrap());
        assert!(!store.exists("https://media.test/b.png").await.unwrap());
    }
}
