// src/ingest/providers/feed.rs
//! RSS 2.0 / Atom feed adapter.
//!
//! Uses the quick-xml event reader so namespaced elements (`media:thumbnail`,
//! `content:encoded`, `dc:creator`) are matched by their qualified name.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{
    ContentSource, FeedEntry, ImageCandidate, ImageOrigin, RawItem, SourceAdapter, SourceKind,
    SourcePayload,
};
use crate::normalize::{extract_inline_images, extract_og_images};
use crate::relevance::RelevanceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Date,
    Description,
    Content,
    Author,
}

#[derive(Debug, Default)]
struct EntryBuilder {
    title: String,
    link: String,
    date: String,
    description: String,
    content: String,
    author: String,
    thumbnails: Vec<String>,
    enclosures: Vec<String>,
    // fields already filled by an earlier element (Atom: published + updated)
    done: Vec<Field>,
}

fn field_for(stack: &[String]) -> Option<Field> {
    let top = stack.last()?.as_str();
    let parent = stack.len().checked_sub(2).and_then(|i| stack.get(i));
    match top {
        "title" => Some(Field::Title),
        "link" => Some(Field::Link),
        "pubDate" | "published" | "updated" | "dc:date" => Some(Field::Date),
        "description" | "summary" => Some(Field::Description),
        "content:encoded" | "content" => Some(Field::Content),
        "author" | "dc:creator" => Some(Field::Author),
        "name" if parent.map(|p| p == "author").unwrap_or(false) => Some(Field::Author),
        _ => None,
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
}

fn is_image_mime(t: Option<&str>) -> bool {
    t.map(|t| t.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

impl EntryBuilder {
    fn push_text(&mut self, field: Field, text: &str) {
        if self.done.contains(&field) {
            return;
        }
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Date => &mut self.date,
            Field::Description => &mut self.description,
            Field::Content => &mut self.content,
            Field::Author => &mut self.author,
        };
        slot.push_str(text);
    }

    fn close(&mut self, field: Field) {
        let filled = match field {
            Field::Title => &self.title,
            Field::Link => &self.link,
            Field::Date => &self.date,
            Field::Description => &self.description,
            Field::Content => &self.content,
            Field::Author => &self.author,
        };
        if !filled.trim().is_empty() && !self.done.contains(&field) {
            self.done.push(field);
        }
    }

    /// Attribute-carrying elements, both `<x ...>` and `<x .../>`.
    fn on_element(&mut self, name: &str, e: &BytesStart<'_>) {
        match name {
            "media:thumbnail" => {
                if let Some(u) = attr(e, "url") {
                    self.thumbnails.push(u);
                }
            }
            "enclosure" | "media:content" => {
                let ty = attr(e, "type");
                let medium_image = attr(e, "medium").as_deref() == Some("image");
                if is_image_mime(ty.as_deref()) || medium_image {
                    if let Some(u) = attr(e, "url") {
                        self.enclosures.push(u);
                    }
                }
            }
            // Atom: <link rel="alternate" href="..."/>
            "link" => {
                let rel = attr(e, "rel");
                if let Some(href) = attr(e, "href") {
                    if self.link.is_empty() && rel.as_deref().map_or(true, |r| r == "alternate") {
                        self.link = href;
                    }
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Option<FeedEntry> {
        let title = crate::normalize::strip_markup(&self.title);
        let link = self.link.trim().to_string();
        if link.is_empty() || title.is_empty() {
            return None;
        }
        let published_at = parse_date(self.date.trim())?;

        let content = if self.content.trim().is_empty() {
            self.description
        } else {
            self.content
        };

        let mut images: Vec<ImageCandidate> = self
            .thumbnails
            .into_iter()
            .map(|u| ImageCandidate::new(u, ImageOrigin::Thumbnail))
            .collect();
        images.extend(
            self.enclosures
                .into_iter()
                .map(|u| ImageCandidate::new(u, ImageOrigin::Enclosure)),
        );
        images.extend(
            extract_inline_images(&content)
                .into_iter()
                .map(|u| ImageCandidate::new(u, ImageOrigin::Inline)),
        );
        images.extend(
            extract_og_images(&content)
                .into_iter()
                .map(|u| ImageCandidate::new(u, ImageOrigin::OpenGraph)),
        );

        let author = Some(self.author.trim().to_string()).filter(|a| !a.is_empty());

        Some(FeedEntry {
            title,
            link,
            published_at,
            content,
            author,
            images,
        })
    }
}

fn from_offset(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

/// RFC 2822 (RSS) or RFC 3339 (Atom). `None` when neither parses.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    OffsetDateTime::parse(s, &Rfc2822)
        .ok()
        .and_then(from_offset)
        .or_else(|| OffsetDateTime::parse(s, &Rfc3339).ok().and_then(from_offset))
        // obsolete zone names ("GMT", "EST") that the strict parser refuses
        .or_else(|| {
            DateTime::parse_from_rfc2822(s)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        })
}

/// Parse every entry of an RSS or Atom document. Entries without a link,
/// title or parseable date are dropped.
pub fn parse_entries(xml: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut out = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<EntryBuilder> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                saw_root = true;
                if name == "item" || name == "entry" {
                    current = Some(EntryBuilder::default());
                } else if let Some(b) = current.as_mut() {
                    b.on_element(&name, &e);
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let Some(b) = current.as_mut() {
                    b.on_element(&name, &e);
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(b), Some(f)) = (current.as_mut(), field_for(&stack)) {
                    let raw = String::from_utf8_lossy(t.as_ref());
                    b.push_text(f, &html_escape::decode_html_entities(&raw));
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some(b), Some(f)) = (current.as_mut(), field_for(&stack)) {
                    b.push_text(f, &String::from_utf8_lossy(c.as_ref()));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let (Some(b), Some(f)) = (current.as_mut(), field_for(&stack)) {
                    b.close(f);
                }
                stack.pop();
                if name == "item" || name == "entry" {
                    if let Some(entry) = current.take().and_then(EntryBuilder::finish) {
                        out.push(entry);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!(e)).context(format!(
                    "parsing feed xml at byte {}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(anyhow!("document has no elements"));
    }
    Ok(out)
}

/// Keep entries inside the lookback window that pass the relevance filter.
pub fn select_entries(
    entries: Vec<FeedEntry>,
    relevance: &RelevanceHandle,
    now: DateTime<Utc>,
    lookback: chrono::Duration,
    max_items: usize,
) -> Vec<RawItem> {
    let cutoff = now - lookback;
    entries
        .into_iter()
        .filter(|e| e.published_at >= cutoff)
        .filter(|e| relevance.matches(&format!("{} {}", e.title, e.content)))
        .take(max_items)
        .map(|e| SourcePayload::Feed(e).into_raw_item())
        .collect()
}

pub struct FeedAdapter {
    client: reqwest::Client,
    relevance: RelevanceHandle,
    lookback: chrono::Duration,
    max_items: usize,
    timeout: Duration,
}

impl FeedAdapter {
    pub fn new(client: reqwest::Client, relevance: RelevanceHandle) -> Self {
        Self {
            client,
            relevance,
            lookback: chrono::Duration::days(7),
            max_items: 10,
            timeout: Duration::from_secs(30),
        }
    }

    /// Per-request timeout, on top of whatever the shared client enforces.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback = chrono::Duration::days(days.max(0));
        self
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n;
        self
    }

    async fn fetch_body(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .context("feed http get()")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("feed returned HTTP {status}"));
        }
        resp.text().await.context("feed http .text()")
    }

    pub async fn fetch_at(&self, source: &ContentSource, now: DateTime<Utc>) -> Vec<RawItem> {
        let Some(url) = source.url.as_deref() else {
            tracing::warn!(source = %source.name, "feed source has no url");
            return Vec::new();
        };

        let body = match self.fetch_body(url).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = ?e, source = %source.name, url, "feed fetch failed");
                counter!("crawl_source_errors_total", "kind" => "feed").increment(1);
                return Vec::new();
            }
        };

        let t0 = std::time::Instant::now();
        let entries = match parse_entries(&body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, source = %source.name, "feed parse failed");
                counter!("crawl_source_errors_total", "kind" => "feed").increment(1);
                return Vec::new();
            }
        };
        histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let total = entries.len();
        let max = source.max_items.unwrap_or(self.max_items);
        let items = select_entries(entries, &self.relevance, now, self.lookback, max);
        tracing::debug!(
            target: "ingest",
            source = %source.name,
            total,
            kept = items.len(),
            "feed parsed"
        );
        items
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    async fn fetch(&self, source: &ContentSource) -> Vec<RawItem> {
        self.fetch_at(source, Utc::now()).await
    }
}
