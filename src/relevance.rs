// src/relevance.rs
//! Relevance gate: case-insensitive substring containment against the
//! enabled keywords. No tokenization: every match reads as "the text
//! contains `labubu`".
//!
//! The keyword list is owned by an external configuration collaborator
//! ([`KeywordSource`]) and can be reloaded at runtime. When that collaborator
//! fails, the built-in list takes over so the pipeline keeps running.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::keywords::KeywordSource;

/// Built-in brand keywords used when no keyword configuration can be loaded.
pub const BUILTIN_KEYWORDS: &[&str] = &[
    "labubu",
    "lаbubu", // Cyrillic "а", seen in scraped titles
    "拉布布",
    "泡泡玛特",
    "popmart",
    "pop mart",
    "lisa",
    "blackpink",
    "盲盒",
    "blind box",
    "手办",
    "figure",
    "collectible",
    "designer toy",
    "收藏",
    "限量",
    "limited edition",
    "kaws",
    "molly",
    "dimoo",
    "skullpanda",
    "hirono",
];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub keyword: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl KeywordEntry {
    pub fn enabled(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    entries: Vec<KeywordEntry>,
    // lowercase copies of enabled keywords, rebuilt on every mutation
    needles: Vec<String>,
}

impl KeywordFilter {
    pub fn new(entries: Vec<KeywordEntry>) -> Self {
        let mut f = Self {
            entries,
            needles: Vec::new(),
        };
        f.rebuild();
        f
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_KEYWORDS
                .iter()
                .map(|k| KeywordEntry::enabled(*k))
                .collect(),
        )
    }

    fn rebuild(&mut self) {
        self.needles = self
            .entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.keyword.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.needles.is_empty() {
            return false;
        }
        let hay = text.to_lowercase();
        self.needles.iter().any(|k| hay.contains(k.as_str()))
    }

    /// Enabled keywords found in `text`, in list order.
    pub fn matched(&self, text: &str) -> Vec<String> {
        let hay = text.to_lowercase();
        self.needles
            .iter()
            .filter(|k| hay.contains(k.as_str()))
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> &[KeywordEntry] {
        &self.entries
    }

    pub fn enabled_keywords(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.keyword.clone())
            .collect()
    }

    /// Toggle an existing keyword (case-insensitive). Returns false when unknown.
    pub fn set_enabled(&mut self, keyword: &str, enabled: bool) -> bool {
        let needle = keyword.trim().to_lowercase();
        let mut found = false;
        for e in self.entries.iter_mut() {
            if e.keyword.to_lowercase() == needle {
                e.enabled = enabled;
                found = true;
            }
        }
        if found {
            self.rebuild();
        }
        found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadOutcome {
    Loaded,
    FellBackToBuiltin,
}

/* ----------------------------
Thread-safe handle + refresh
---------------------------- */

/// Shared, reloadable keyword filter. Cloning shares the same list.
#[derive(Debug, Clone)]
pub struct RelevanceHandle {
    inner: Arc<RwLock<KeywordFilter>>,
}

impl Default for RelevanceHandle {
    fn default() -> Self {
        Self::new(KeywordFilter::builtin())
    }
}

impl RelevanceHandle {
    pub fn new(filter: KeywordFilter) -> Self {
        Self {
            inner: Arc::new(RwLock::new(filter)),
        }
    }

    pub fn from_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(KeywordFilter::new(
            keywords.into_iter().map(KeywordEntry::enabled).collect(),
        ))
    }

    pub fn matches(&self, text: &str) -> bool {
        match self.inner.read() {
            Ok(f) => f.matches(text),
            Err(_) => false,
        }
    }

    pub fn matched(&self, text: &str) -> Vec<String> {
        match self.inner.read() {
            Ok(f) => f.matched(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn enabled_keywords(&self) -> Vec<String> {
        match self.inner.read() {
            Ok(f) => f.enabled_keywords(),
            Err(_) => Vec::new(),
        }
    }

    pub fn entries(&self) -> Vec<KeywordEntry> {
        match self.inner.read() {
            Ok(f) => f.entries().to_vec(),
            Err(_) => Vec::new(),
        }
    }

    pub fn set_enabled(&self, keyword: &str, enabled: bool) -> bool {
        match self.inner.write() {
            Ok(mut f) => f.set_enabled(keyword, enabled),
            Err(_) => false,
        }
    }

    pub fn replace(&self, filter: KeywordFilter) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = filter;
        }
    }

    /// Pull the keyword list from `source` and swap it in. An unreachable
    /// source installs the built-in list instead of failing closed.
    pub async fn reload(&self, source: &dyn KeywordSource) -> ReloadOutcome {
        match source.load().await {
            Ok(entries) => {
                let n = entries.len();
                self.replace(KeywordFilter::new(entries));
                info!(target: "relevance", keywords = n, source = %source.describe(), "keywords reloaded");
                ReloadOutcome::Loaded
            }
            Err(e) => {
                warn!(
                    target: "relevance",
                    error = ?e,
                    source = %source.describe(),
                    "keyword source unavailable, using built-in list"
                );
                self.replace(KeywordFilter::builtin());
                ReloadOutcome::FellBackToBuiltin
            }
        }
    }
}

/// Reload keywords from `source` every `every`, starting immediately.
pub fn spawn_keyword_refresh(
    handle: RelevanceHandle,
    source: Arc<dyn KeywordSource>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            handle.reload(source.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_is_case_insensitive() {
        let f = KeywordFilter::new(vec![KeywordEntry::enabled("Labubu")]);
        assert!(f.matches("I love my new LABUBU figure"));
        assert!(f.matches("labubu"));
        assert!(!f.matches("lab ubu"));
    }

    #[test]
    fn disabled_keywords_do_not_match() {
        let mut f = KeywordFilter::new(vec![
            KeywordEntry::enabled("labubu"),
            KeywordEntry {
                keyword: "kaws".into(),
                enabled: false,
            },
        ]);
        assert!(!f.matches("KAWS drop tonight"));
        assert!(f.set_enabled("KAWS", true));
        assert!(f.matches("KAWS drop tonight"));
        assert!(!f.set_enabled("unknown", true));
    }

    #[test]
    fn cjk_keywords_match_inside_sentences() {
        let f = KeywordFilter::builtin();
        assert!(f.matches("泡泡玛特新品发布会"));
        assert_eq!(f.matched("今天买了盲盒"), vec!["盲盒".to_string()]);
    }

    #[test]
    fn blank_keywords_never_match_everything() {
        let f = KeywordFilter::new(vec![KeywordEntry::enabled("   ")]);
        assert!(!f.matches("anything at all"));
    }
}
