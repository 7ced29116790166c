// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Feed,
    SearchApi,
    Simulated,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::SearchApi => "search-api",
            SourceKind::Simulated => "simulated",
        }
    }
}

/// Which scheduled crawl task picks a source up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlGroup {
    #[default]
    Primary,
    Secondary,
}

impl CrawlGroup {
    pub fn task_name(&self) -> &'static str {
        match self {
            CrawlGroup::Primary => "primary_crawl",
            CrawlGroup::Secondary => "secondary_crawl",
        }
    }
}

impl std::str::FromStr for CrawlGroup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(CrawlGroup::Primary),
            "secondary" => Ok(CrawlGroup::Secondary),
            other => Err(anyhow::anyhow!("unknown crawl group `{other}`")),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_locale() -> String {
    "en".to_string()
}

/// A configured content source. The registry id is assigned by the store on
/// first reference (see `ContentStore::get_or_create_source`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSource {
    pub name: String,
    pub kind: SourceKind,
    /// Feed URL for `feed` sources; unused otherwise.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Platform used for the hot-score weight (e.g. "weibo", "x"). Falls back to the kind.
    #[serde(default)]
    pub platform: Option<String>,
    /// Extra query terms. Empty means "use the enabled relevance keywords".
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Hourly call quota assumed until the provider reports its own budget.
    #[serde(default)]
    pub rate_limit_per_hour: Option<u32>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub group: CrawlGroup,
    /// Route this source's images through the upload queue.
    #[serde(default)]
    pub mirror_images: bool,
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl ContentSource {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            url: None,
            locale: default_locale(),
            platform: None,
            keywords: Vec::new(),
            rate_limit_per_hour: None,
            active: true,
            group: CrawlGroup::Primary,
            mirror_images: false,
            max_items: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_group(mut self, group: CrawlGroup) -> Self {
        self.group = group;
        self
    }

    pub fn platform_or_kind(&self) -> &str {
        self.platform.as_deref().unwrap_or(self.kind.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub views: u64,
}

impl Engagement {
    pub fn interactions(&self) -> u64 {
        self.likes
            .saturating_add(self.shares)
            .saturating_add(self.comments)
    }
}

/// Where an image candidate was found; lower variants rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageOrigin {
    Thumbnail,
    Enclosure,
    Attached,
    Inline,
    OpenGraph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCandidate {
    pub url: String,
    pub origin: ImageOrigin,
}

impl ImageCandidate {
    pub fn new(url: impl Into<String>, origin: ImageOrigin) -> Self {
        Self {
            url: url.into(),
            origin,
        }
    }
}

/// The single shape every adapter hands to the shared pipeline. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub canonical_url: String,
    pub published_at: DateTime<Utc>,
    pub images: Vec<ImageCandidate>,
    pub engagement: Engagement,
}

impl RawItem {
    /// Title and body joined, the text relevance and categorisation look at.
    pub fn haystack(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

/// Source-specific payloads, converted to [`RawItem`] before any shared logic sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourcePayload {
    Feed(FeedEntry),
    SearchApi(SearchPost),
    Simulated(SimulatedPost),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    /// Plain description or full `content:encoded` markup.
    pub content: String,
    pub author: Option<String>,
    pub images: Vec<ImageCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPost {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author_name: Option<String>,
    pub author_username: Option<String>,
    pub like_count: u64,
    pub retweet_count: u64,
    pub reply_count: u64,
    pub quote_count: u64,
    pub impression_count: u64,
    pub media_urls: Vec<String>,
}

impl SearchPost {
    pub fn total_engagement(&self) -> u64 {
        self.like_count
            .saturating_add(self.retweet_count)
            .saturating_add(self.reply_count)
            .saturating_add(self.quote_count)
    }

    pub fn canonical_url(&self) -> String {
        let user = self.author_username.as_deref().unwrap_or("i");
        format!("https://x.com/{}/status/{}", user, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPost {
    pub platform: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub image_urls: Vec<String>,
    pub engagement: Engagement,
}

impl SourcePayload {
    pub fn into_raw_item(self) -> RawItem {
        match self {
            SourcePayload::Feed(e) => RawItem {
                title: e.title,
                body: e.content,
                author: e.author,
                canonical_url: e.link,
                published_at: e.published_at,
                images: e.images,
                engagement: Engagement::default(),
            },
            SourcePayload::SearchApi(p) => {
                let canonical_url = p.canonical_url();
                let title: String = p.text.chars().take(80).collect();
                RawItem {
                    title,
                    author: p.author_name.or(p.author_username),
                    canonical_url,
                    published_at: p.created_at,
                    images: p
                        .media_urls
                        .into_iter()
                        .map(|u| ImageCandidate::new(u, ImageOrigin::Attached))
                        .collect(),
                    engagement: Engagement {
                        likes: p.like_count,
                        shares: p.retweet_count.saturating_add(p.quote_count),
                        comments: p.reply_count,
                        views: p.impression_count,
                    },
                    body: p.text,
                }
            }
            SourcePayload::Simulated(s) => RawItem {
                title: s.title,
                body: s.body,
                author: Some(s.author),
                canonical_url: s.url,
                published_at: s.published_at,
                images: s
                    .image_urls
                    .into_iter()
                    .map(|u| ImageCandidate::new(u, ImageOrigin::Attached))
                    .collect(),
                engagement: s.engagement,
            },
        }
    }
}

/// Contract shared by every source kind: never fails. Network and parse
/// problems are logged and yield an empty list so one bad source cannot
/// abort a crawl cycle.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn fetch(&self, source: &ContentSource) -> Vec<RawItem>;
}
