// src/config/keywords.rs
//! Keyword configuration collaborator. The relevance filter only sees the
//! [`KeywordSource`] trait; the file-backed implementation reads TOML or JSON.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::relevance::KeywordEntry;

pub const ENV_KEYWORDS_PATH: &str = "CRAWLER_KEYWORDS_PATH";
pub const DEFAULT_KEYWORDS_PATH: &str = "config/keywords.toml";

#[async_trait]
pub trait KeywordSource: Send + Sync {
    async fn load(&self) -> Result<Vec<KeywordEntry>>;
    fn describe(&self) -> String;
}

/// Reads `keywords = [...]` from a TOML file, or a bare JSON array.
/// Entries may be plain strings (enabled) or `{ keyword, enabled }` tables.
#[derive(Debug, Clone)]
pub struct FileKeywordSource {
    path: PathBuf,
}

impl FileKeywordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$CRAWLER_KEYWORDS_PATH`, then the configured path, then `config/keywords.toml`.
    pub fn from_env_or(configured: Option<&str>) -> Self {
        let path = std::env::var(ENV_KEYWORDS_PATH)
            .ok()
            .or_else(|| configured.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_KEYWORDS_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeywordSource for FileKeywordSource {
    async fn load(&self) -> Result<Vec<KeywordEntry>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading keywords from {}", self.path.display()))?;
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_keywords(&content, &ext)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed list, for tests and for running without a keyword file.
#[derive(Debug, Clone, Default)]
pub struct StaticKeywordSource(pub Vec<KeywordEntry>);

#[async_trait]
impl KeywordSource for StaticKeywordSource {
    async fn load(&self) -> Result<Vec<KeywordEntry>> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Plain(String),
    Full(KeywordEntry),
}

impl From<RawEntry> for KeywordEntry {
    fn from(r: RawEntry) -> Self {
        match r {
            RawEntry::Plain(k) => KeywordEntry::enabled(k),
            RawEntry::Full(e) => e,
        }
    }
}

pub fn parse_keywords(s: &str, hint_ext: &str) -> Result<Vec<KeywordEntry>> {
    let try_toml = hint_ext == "toml" || s.contains("keywords");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported keyword file format"))
}

fn parse_toml(s: &str) -> Result<Vec<KeywordEntry>> {
    #[derive(serde::Deserialize)]
    struct TomlKeywords {
        keywords: Vec<RawEntry>,
    }
    let v: TomlKeywords = toml::from_str(s)?;
    Ok(clean_list(v.keywords.into_iter().map(Into::into).collect()))
}

fn parse_json(s: &str) -> Result<Vec<KeywordEntry>> {
    let v: Vec<RawEntry> = serde_json::from_str(s)?;
    Ok(clean_list(v.into_iter().map(Into::into).collect()))
}

/// Trim, drop blanks, de-duplicate case-insensitively (first spelling wins,
/// enabled if any duplicate is enabled).
fn clean_list(items: Vec<KeywordEntry>) -> Vec<KeywordEntry> {
    let mut map: BTreeMap<String, KeywordEntry> = BTreeMap::new();
    for it in items {
        let t = it.keyword.trim();
        if t.is_empty() {
            continue;
        }
        map.entry(t.to_lowercase())
            .and_modify(|e| e.enabled |= it.enabled)
            .or_insert_with(|| KeywordEntry {
                keyword: t.to_string(),
                enabled: it.enabled,
            });
    }
    map.into_values().collect()
}
