// src/scheduler/ticker.rs
//! Clock seam for the scheduler. Production uses wall time; tests drive a
//! [`ManualTicker`] forward explicitly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

#[async_trait]
pub trait Ticker: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        // wall clock may jump; re-check after every sleep
        loop {
            let now = Utc::now();
            if now >= deadline {
                return;
            }
            let wait = (deadline - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_millis(1));
            tokio::time::sleep(wait).await;
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualTicker {
    tx: Arc<watch::Sender<DateTime<Utc>>>,
}

impl ManualTicker {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (tx, _rx) = watch::channel(start);
        Self { tx: Arc::new(tx) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let next = *self.tx.borrow() + by;
        self.tx.send_replace(next);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.tx.send_replace(to);
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    fn now(&self) -> DateTime<Utc> {
        *self.tx.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() >= deadline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn manual_ticker_wakes_only_past_deadline() {
        let start = Utc::now();
        let t = ManualTicker::new(start);
        let waiter = {
            let t = t.clone();
            tokio::spawn(async move { t.sleep_until(start + chrono::Duration::minutes(10)).await })
        };
        t.advance(chrono::Duration::minutes(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        t.advance(chrono::Duration::minutes(5));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
