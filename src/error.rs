// src/error.rs
//! Error taxonomy shared by the source adapters and the upload queue.
//!
//! Application plumbing (config loading, job bodies, bootstrap) stays on
//! `anyhow`; these typed errors exist where callers branch on the failure
//! class (retry, back off, skip, fail at construction).

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network failure, timeout or 5xx. Safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Quota exhausted or HTTP 429. `reset_at` is the earliest moment a retry can succeed.
    #[error("rate limited until {reset_at:?}")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// Payload could not be parsed; the source is skipped for this cycle.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Missing credentials or invalid settings, raised at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Post-write existence check failed. Callers log it and carry on.
    #[error("verification failed: {0}")]
    Verification(String),

    #[error("empty payload")]
    EmptyPayload,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transient(_) | PipelineError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PipelineError::Malformed(err.to_string())
        } else {
            PipelineError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Malformed(err.to_string())
    }
}

/// Failures reported by a [`crate::upload::BlobStore`] write.
#[derive(Debug, Error)]
pub enum BlobError {
    /// HTTP 429 or a provider "too many requests" response.
    #[error("store throttled the write: {0}")]
    Throttled(String),

    #[error("store rejected the write (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),
}

impl BlobError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, BlobError::Throttled(_))
    }
}

impl From<reqwest::Error> for BlobError {
    fn from(err: reqwest::Error) -> Self {
        BlobError::Network(err.to_string())
    }
}
