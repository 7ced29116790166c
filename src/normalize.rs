// src/normalize.rs
//! RawItem → summary, tags, category and a ranked image list.
//!
//! Everything here is deterministic except the placeholder image handed out
//! when an item has no usable picture at all.

use once_cell::sync::OnceCell;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::ingest::types::{ImageCandidate, RawItem};

pub const DEFAULT_CATEGORY: &str = "潮流趋势";
pub const MAX_IMAGES: usize = 5;

pub const TAG_VOCABULARY: &[&str] = &[
    "labubu", "lisa", "盲盒", "手办", "popmart", "pop mart", "收藏", "限量", "新品", "发布", "穿搭",
    "明星", "同款", "价格", "涨价", "暴涨", "拍卖", "定制", "改款",
];

/// Category buckets, first match wins.
pub const CATEGORY_RULES: &[(&str, &[&str])] = &[
    ("新品发布", &["新品", "发布", "上市", "new release", "launch"]),
    ("活动预告", &["活动", "展览", "发布会", "exhibition", "pop-up"]),
    ("开箱评测", &["开箱", "评测", "测评", "unboxing", "review"]),
    ("收藏攻略", &["收藏", "攻略", "指南", "collector guide"]),
    ("穿搭分享", &["穿搭", "造型", "搭配", "outfit"]),
    ("艺术创作", &["艺术", "创作", "设计", "artwork"]),
];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".svg"];
const IMAGE_HOST_HINTS: &[&str] = &["picsum", "unsplash", "pexels", "pixabay", "cdn", "media"];
const IMAGE_PATH_DENY: &[&str] = &["icon", "logo", "avatar"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub needles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalized {
    pub summary: String,
    /// Markup-free body, used for the quality term of the hot score.
    pub plain_body: String,
    pub tags: Vec<String>,
    pub category: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    pub summary_chars: usize,
    pub tag_vocabulary: Vec<String>,
    pub categories: Vec<CategoryRule>,
    pub default_category: String,
    pub max_images: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            summary_chars: 150,
            tag_vocabulary: TAG_VOCABULARY.iter().map(|s| s.to_string()).collect(),
            categories: CATEGORY_RULES
                .iter()
                .map(|(name, needles)| CategoryRule {
                    name: name.to_string(),
                    needles: needles.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
            default_category: DEFAULT_CATEGORY.to_string(),
            max_images: MAX_IMAGES,
        }
    }
}

impl Normalizer {
    pub fn with_summary_chars(mut self, n: usize) -> Self {
        self.summary_chars = n;
        self
    }

    pub fn normalize(&self, item: &RawItem) -> Normalized {
        let plain_body = strip_markup(&item.body);
        let haystack = format!("{} {}", strip_markup(&item.title), plain_body).to_lowercase();

        Normalized {
            summary: summarize(&plain_body, self.summary_chars),
            tags: self.tags(&haystack),
            category: self.category(&haystack),
            images: self.rank_images(&item.images),
            plain_body,
        }
    }

    fn tags(&self, lowered: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tag_vocabulary
            .iter()
            .filter(|t| lowered.contains(&t.to_lowercase()))
            .filter(|t| seen.insert(t.to_lowercase()))
            .cloned()
            .collect()
    }

    fn category(&self, lowered: &str) -> String {
        self.categories
            .iter()
            .find(|rule| {
                rule.needles
                    .iter()
                    .any(|n| lowered.contains(&n.to_lowercase()))
            })
            .map(|rule| rule.name.clone())
            .unwrap_or_else(|| self.default_category.clone())
    }

    /// Stable sort by origin preference, de-duplicate, keep plausible image
    /// URLs, cap the list. An empty result gets a random placeholder.
    pub fn rank_images(&self, candidates: &[ImageCandidate]) -> Vec<String> {
        let mut ordered: Vec<&ImageCandidate> = candidates.iter().collect();
        ordered.sort_by_key(|c| c.origin);

        let mut seen = HashSet::new();
        let mut out: Vec<String> = ordered
            .into_iter()
            .map(|c| c.url.trim())
            .filter(|u| is_plausible_image_url(u))
            .filter(|u| seen.insert(u.to_string()))
            .take(self.max_images.max(1))
            .map(str::to_string)
            .collect();

        if out.is_empty() {
            out.push(placeholder_image());
        }
        out
    }
}

/// Decode entities, strip tags, collapse whitespace.
pub fn strip_markup(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)<[^>]*>").expect("tag regex"));
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));

    let no_tags = re_tags.replace_all(s, " ");
    let decoded = html_escape::decode_html_entities(&no_tags).to_string();
    // decoding can surface new tags (`&lt;b&gt;`)
    let no_tags = re_tags.replace_all(&decoded, " ");
    re_ws.replace_all(&no_tags, " ").trim().to_string()
}

/// First `max_chars` characters, with `...` appended when truncated.
pub fn summarize(plain: &str, max_chars: usize) -> String {
    if plain.chars().count() <= max_chars {
        return plain.to_string();
    }
    let mut out: String = plain.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

fn url_path_lowercase(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let rest = rest.trim_start_matches('/');
    match rest.find('/') {
        Some(i) => rest[i..].to_lowercase(),
        None => String::new(),
    }
}

/// `<img src>` URLs from markup, minus icons, logos, avatars and relative paths.
pub fn extract_inline_images(html: &str) -> Vec<String> {
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src=["']([^"'>]+)["']"#).expect("img regex")
    });

    re.captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .filter(|src| src.len() > 10)
        .filter(|src| src.starts_with("http") || src.starts_with("//"))
        .filter(|src| {
            let path = url_path_lowercase(src);
            !IMAGE_PATH_DENY.iter().any(|d| path.contains(d))
        })
        .map(|src| {
            if src.starts_with("//") {
                format!("https:{src}")
            } else {
                src.to_string()
            }
        })
        .collect()
}

/// `og:image` URLs from `<meta property="og:image" content="...">`.
pub fn extract_og_images(html: &str) -> Vec<String> {
    static RE_OG: OnceCell<Regex> = OnceCell::new();
    let re = RE_OG.get_or_init(|| {
        Regex::new(r#"(?i)<meta[^>]+property=["']og:image["'][^>]+content=["']([^"'>]+)["']"#)
            .expect("og regex")
    });
    re.captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|src| src.starts_with("http"))
        .collect()
}

pub fn is_plausible_image_url(url: &str) -> bool {
    if url.len() < 10 || !(url.starts_with("http://") || url.starts_with("https://")) {
        return false;
    }
    let lower = url.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
        || IMAGE_HOST_HINTS.iter().any(|h| lower.contains(h))
}

pub fn placeholder_image() -> String {
    let n: u32 = rand::rng().random_range(0..1000);
    format!("https://picsum.photos/600/400?random={n}")
}

pub fn is_placeholder(url: &str) -> bool {
    url.starts_with("https://picsum.photos/600/400?random=")
}
