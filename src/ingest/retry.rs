// src/ingest/retry.rs
//! Exponential backoff shared by the search API client and the upload queue.
//!
//! Waits never shrink from one retry to the next and never exceed
//! `max_delay`. A server-provided hint (e.g. time until a rate-limit reset)
//! wins over the computed delay when it is longer.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 429 or a provider "too many requests" answer.
    Throttled,
    /// Network errors, timeouts, 5xx and everything else worth another try.
    Transient,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub transient_base: Duration,
    pub throttled_base: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            transient_base: Duration::from_millis(1_000),
            throttled_base: Duration::from_millis(3_000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            failures: 0,
            last: Duration::ZERO,
        }
    }
}

/// Per-operation retry state. Create one per logical call via [`RetryPolicy::backoff`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    last: Duration,
}

impl Backoff {
    /// Registers a failure and returns how long to wait before the next
    /// attempt, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self, class: FailureClass, hint: Option<Duration>) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts.max(1) {
            return None;
        }

        let base = match class {
            FailureClass::Throttled => self.policy.throttled_base,
            FailureClass::Transient => self.policy.transient_base,
        };
        let factor = 2u32.saturating_pow(self.failures - 1);
        let computed = base.saturating_mul(factor);
        let wanted = match hint {
            Some(h) => h.max(computed),
            None => computed,
        };

        let delay = wanted.max(self.last).min(self.policy.max_delay);
        self.last = delay;
        Some(delay)
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
