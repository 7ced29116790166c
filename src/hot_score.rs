// src/hot_score.rs
//! # Hot Score
//!
//! Pure scoring of an item from recency, engagement, body length and the
//! platform it came from:
//!
//! ```text
//! score = (base + time_decay + engagement + quality) * platform_weight
//! time_decay = max(0, 50 - hours_since_published * decay_rate)
//! ```
//!
//! - Engagement uses `ln(1 + x)` per signal, so a viral outlier saturates
//!   at `engagement_cap` instead of dominating the ranking.
//! - Quality grows with body length up to `quality_cap`.
//! - Platform weights resolve alias → exact → substring → default, with
//!   case-insensitive keys (same lookup rules as the source registry).
//! - The result is rounded to two decimals. No hidden state: identical
//!   inputs at an identical `now` give identical output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ingest::types::Engagement;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreParams {
    pub base: f64,
    pub recency_max: f64,
    /// Points of recency lost per hour since publication.
    pub decay_rate: f64,
    pub engagement_cap: f64,
    pub quality_cap: f64,
    /// Body characters per quality point.
    pub chars_per_quality_point: f64,
    pub like_weight: f64,
    pub share_weight: f64,
    pub comment_weight: f64,
    pub view_weight: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            base: 50.0,
            recency_max: 50.0,
            decay_rate: 1.5,
            engagement_cap: 40.0,
            quality_cap: 10.0,
            chars_per_quality_point: 100.0,
            like_weight: 3.0,
            share_weight: 4.0,
            comment_weight: 3.5,
            view_weight: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub published_at: DateTime<Utc>,
    pub engagement: &'a Engagement,
    /// Length of the markup-free body, in characters.
    pub body_chars: usize,
    pub platform_weight: f64,
}

fn damp(x: u64, weight: f64) -> f64 {
    weight * (x as f64).ln_1p()
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn time_decay(params: &ScoreParams, published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    // items stamped in the future count as brand new
    let hours = ((now - published_at).num_seconds().max(0) as f64) / 3600.0;
    (params.recency_max - hours * params.decay_rate).max(0.0)
}

pub fn engagement_term(params: &ScoreParams, e: &Engagement) -> f64 {
    let raw = damp(e.likes, params.like_weight)
        + damp(e.shares, params.share_weight)
        + damp(e.comments, params.comment_weight)
        + damp(e.views, params.view_weight);
    raw.min(params.engagement_cap)
}

pub fn quality_term(params: &ScoreParams, body_chars: usize) -> f64 {
    if params.chars_per_quality_point <= 0.0 {
        return 0.0;
    }
    (body_chars as f64 / params.chars_per_quality_point).min(params.quality_cap)
}

pub fn score(params: &ScoreParams, input: &ScoreInput<'_>, now: DateTime<Utc>) -> f64 {
    let raw = params.base
        + time_decay(params, input.published_at, now)
        + engagement_term(params, input.engagement)
        + quality_term(params, input.body_chars);
    round2(raw * input.platform_weight)
}

/* ----------------------------
Platform weights
---------------------------- */

/// Per-platform score multipliers, loaded from the `[scoring.platforms]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformWeights {
    #[serde(default = "default_platform_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Alternative names → canonical platform.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_platform_weight() -> f64 {
    1.0
}

const MIN_WEIGHT: f64 = 0.5;
const MAX_WEIGHT: f64 = 2.0;

fn clamp_weight(w: f64) -> f64 {
    if w.is_finite() {
        w.clamp(MIN_WEIGHT, MAX_WEIGHT)
    } else {
        1.0
    }
}

impl Default for PlatformWeights {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl PlatformWeights {
    pub fn weight_for(&self, platform: &str) -> f64 {
        let p = normalize(platform);

        if let Some(canon) = self.aliases.get(&p) {
            if let Some(&w) = self.weights.get(&normalize(canon)) {
                return clamp_weight(w);
            }
        }

        if let Some(&w) = self.weights.get(&p) {
            return clamp_weight(w);
        }

        // substring fallback, longest key first so "x" never shadows "xiaohongshu"
        let mut keys: Vec<(&String, &f64)> = self.weights.iter().collect();
        keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        for (k, &w) in keys {
            if k.len() > 2 && p.contains(k.as_str()) {
                return clamp_weight(w);
            }
        }

        clamp_weight(self.default_weight)
    }

    pub fn default_seed() -> Self {
        let weights = [
            ("tiktok", 1.4),
            ("instagram", 1.3),
            ("weibo", 1.2),
            ("youtube", 1.2),
            ("x", 1.2),
            ("xiaohongshu", 1.1),
            ("feed", 1.0),
            ("simulated", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let aliases = [
            ("twitter", "x"),
            ("search-api", "x"),
            ("微博", "weibo"),
            ("小红书", "xiaohongshu"),
            ("rednote", "xiaohongshu"),
            ("douyin", "tiktok"),
            ("抖音", "tiktok"),
            ("ig", "instagram"),
            ("rss", "feed"),
        ]
        .into_iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect();

        Self {
            default_weight: 1.0,
            weights,
            aliases,
        }
    }

    /// Normalize keys so lookups stay case-insensitive after loading from config.
    pub fn normalized(mut self) -> Self {
        self.weights = self
            .weights
            .into_iter()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
        self.aliases = self
            .aliases
            .into_iter()
            .map(|(k, v)| (normalize(&k), normalize(&v)))
            .collect();
        self
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn fresh_item_without_engagement() {
        let p = ScoreParams::default();
        let e = Engagement::default();
        let s = score(
            &p,
            &ScoreInput {
                published_at: now(),
                engagement: &e,
                body_chars: 0,
                platform_weight: 1.0,
            },
            now(),
        );
        assert_eq!(s, 100.0);
    }

    #[test]
    fn decay_bottoms_out_at_zero() {
        let p = ScoreParams::default();
        assert_eq!(time_decay(&p, now() - Duration::days(10), now()), 0.0);
        assert_eq!(time_decay(&p, now() + Duration::hours(3), now()), 50.0);
        assert_eq!(time_decay(&p, now() - Duration::hours(10), now()), 35.0);
    }

    #[test]
    fn viral_outliers_hit_the_cap() {
        let p = ScoreParams::default();
        let e = Engagement {
            likes: 50_000_000,
            shares: 9_000_000,
            comments: 1_000_000,
            views: 900_000_000,
        };
        assert_eq!(engagement_term(&p, &e), 40.0);
    }

    #[test]
    fn quality_is_capped() {
        let p = ScoreParams::default();
        assert_eq!(quality_term(&p, 250), 2.5);
        assert_eq!(quality_term(&p, 100_000), 10.0);
    }

    #[test]
    fn platform_lookup_order() {
        let w = PlatformWeights::default_seed();
        assert_eq!(w.weight_for("TikTok"), 1.4);
        assert_eq!(w.weight_for("twitter"), 1.2);
        assert_eq!(w.weight_for("小红书"), 1.1);
        assert_eq!(w.weight_for("weibo-hot"), 1.2);
        assert_eq!(w.weight_for("mastodon"), 1.0);
    }

    #[test]
    fn weights_are_clamped() {
        let mut w = PlatformWeights::default_seed();
        w.weights.insert("spammy".into(), 50.0);
        assert_eq!(w.weight_for("spammy"), 2.0);
    }
}
