// src/ingest/rate_limit.rs
//! Rate-limit budget of the search API, as last reported by the server.
//!
//! Process-local and advisory: it only saves doomed calls, the server stays
//! authoritative.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::Duration;

use crate::error::PipelineError;

pub const HEADER_REMAINING: &str = "x-rate-limit-remaining";
pub const HEADER_LIMIT: &str = "x-rate-limit-limit";
pub const HEADER_RESET: &str = "x-rate-limit-reset";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
    /// Calls left in the current window. Unknown until the first response.
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

impl RateLimitState {
    /// Merge whatever rate-limit headers the response carried. Missing or
    /// unparseable headers leave the previous value in place.
    pub fn update_from_headers(&mut self, headers: &HeaderMap) {
        if let Some(r) = header_u64(headers, HEADER_REMAINING) {
            self.remaining = Some(u32::try_from(r).unwrap_or(u32::MAX));
        }
        if let Some(l) = header_u64(headers, HEADER_LIMIT) {
            self.limit = Some(u32::try_from(l).unwrap_or(u32::MAX));
        }
        if let Some(ts) = header_u64(headers, HEADER_RESET) {
            self.reset_at = i64::try_from(ts)
                .ok()
                .and_then(|s| Utc.timestamp_opt(s, 0).single());
        }
    }

    /// Assume an hourly quota of `limit` calls. Ignored once the server has
    /// reported a limit of its own.
    pub fn seed_hourly(&mut self, limit: u32, now: DateTime<Utc>) {
        if self.limit.is_some() {
            return;
        }
        self.limit = Some(limit);
        self.remaining = Some(limit);
        self.reset_at = Some(now + chrono::Duration::hours(1));
    }

    /// Restore the budget once the window is over. Before `reset_at` this is a no-op.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if let Some(reset) = self.reset_at {
            if now >= reset {
                self.remaining = self.limit;
                self.reset_at = None;
            }
        }
    }

    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        matches!(
            (self.remaining, self.reset_at),
            (Some(0), Some(reset)) if now < reset
        )
    }

    /// Fails fast when the budget is spent and the window has not rolled over.
    pub fn check(&mut self, now: DateTime<Utc>) -> Result<(), PipelineError> {
        self.refresh(now);
        if self.is_exhausted(now) {
            return Err(PipelineError::RateLimited {
                reset_at: self.reset_at,
            });
        }
        Ok(())
    }

    /// Local accounting for a request in flight; headers overwrite it afterwards.
    pub fn record_request(&mut self) {
        if let Some(r) = self.remaining.as_mut() {
            *r = r.saturating_sub(1);
        }
    }

    /// `max(reset_at - now, 0)`, or `None` when the server never told us.
    pub fn wait_hint(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.reset_at
            .map(|reset| (reset - now).to_std().unwrap_or(Duration::ZERO))
    }
}
