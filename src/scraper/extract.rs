//! HTML extraction: title, links, meta tags, heading structure, images and
//! the sub-resources a page references.
//!
//! Deliberately tolerant string/regex scanning rather than a full DOM parse.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

static TITLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));
static H1_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("valid h1 regex"));
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static ANCHOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b[^>]*>").expect("valid anchor regex"));
static IMG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid img regex"));
static META_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid meta regex"));
static SCRIPT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>").expect("valid script regex"));
static LINK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid link regex"));
static HEADING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<h([1-6])\b").expect("valid heading regex"));
static ATTR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid attribute regex")
});

/// Structured data extracted from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapingData {
    pub title: String,
    pub links: Vec<String>,
    pub links_count: usize,
    pub meta_tags: BTreeMap<String, String>,
    pub structure: BTreeMap<String, usize>,
    pub images_count: usize,
    pub image_urls: Vec<String>,
}

impl ScrapingData {
    pub fn from_html(html: &str, base: &Url) -> Self {
        let links = extract_links(html, base);
        Self {
            title: extract_title(html),
            links_count: links.len(),
            links,
            meta_tags: extract_meta_tags(html),
            structure: analyze_structure(html),
            images_count: count_images(html),
            image_urls: extract_image_urls(html, base),
        }
    }
}

/// Kind of sub-resource a page pulls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Script,
    Stylesheet,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub url: String,
}

/// Page title, falling back to the first `<h1>`.
pub fn extract_title(html: &str) -> String {
    let from = |re: &Regex| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .map(|m| clean_text(m.as_str()))
            .filter(|t| !t.is_empty())
    };
    from(&TITLE_PATTERN)
        .or_else(|| from(&H1_PATTERN))
        .unwrap_or_default()
}

/// Absolute, de-duplicated http(s) links in document order.
pub fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let hrefs = ANCHOR_PATTERN
        .find_iter(html)
        .filter_map(|tag| attribute(tag.as_str(), "href"))
        .filter(|href| !href.starts_with('#') && !href.to_ascii_lowercase().starts_with("javascript:"));
    resolve_unique(hrefs, base)
}

/// Absolute, de-duplicated image URLs in document order.
pub fn extract_image_urls(html: &str, base: &Url) -> Vec<String> {
    let srcs = IMG_PATTERN
        .find_iter(html)
        .filter_map(|tag| attribute(tag.as_str(), "src"));
    resolve_unique(srcs, base)
}

pub fn count_images(html: &str) -> usize {
    IMG_PATTERN.find_iter(html).count()
}

/// Number of `h1`..`h6` elements; absent levels are omitted.
pub fn analyze_structure(html: &str) -> BTreeMap<String, usize> {
    let mut structure = BTreeMap::new();
    for caps in HEADING_PATTERN.captures_iter(html) {
        *structure.entry(format!("h{}", &caps[1])).or_insert(0) += 1;
    }
    structure
}

/// `<meta name|property=... content=...>` pairs (description, keywords, Open Graph, ...).
pub fn extract_meta_tags(html: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for tag in META_PATTERN.find_iter(html) {
        let tag = tag.as_str();
        let key = attribute(tag, "name").or_else(|| attribute(tag, "property"));
        if let (Some(key), Some(content)) = (key, attribute(tag, "content")) {
            tags.entry(key.to_ascii_lowercase())
                .or_insert_with(|| html_decode(content.trim()));
        }
    }
    tags
}

/// Scripts, stylesheets and images referenced by the page.
pub fn extract_resources(html: &str, base: &Url) -> Vec<Resource> {
    let mut resources = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |kind: ResourceKind, raw: String| {
        if let Some(url) = resolve(&raw, base) {
            if seen.insert(url.clone()) {
                resources.push(Resource { kind, url });
            }
        }
    };

    for tag in SCRIPT_PATTERN.find_iter(html) {
        if let Some(src) = attribute(tag.as_str(), "src") {
            push(ResourceKind::Script, src);
        }
    }
    for tag in LINK_PATTERN.find_iter(html) {
        let tag = tag.as_str();
        let is_stylesheet = attribute(tag, "rel")
            .map(|rel| rel.to_ascii_lowercase().split_whitespace().any(|r| r == "stylesheet"))
            .unwrap_or(false);
        if is_stylesheet {
            if let Some(href) = attribute(tag, "href") {
                push(ResourceKind::Stylesheet, href);
            }
        }
    }
    for src in IMG_PATTERN
        .find_iter(html)
        .filter_map(|tag| attribute(tag.as_str(), "src"))
    {
        push(ResourceKind::Image, src);
    }

    resources
}

/// Value of attribute `name` inside a single opening tag.
fn attribute(tag: &str, name: &str) -> Option<String> {
    ATTR_PATTERN.captures_iter(tag).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().trim().to_string())
    })
}

fn resolve(raw: &str, base: &Url) -> Option<String> {
    let raw = html_decode(raw.trim());
    if raw.is_empty() {
        return None;
    }
    let url = base.join(&raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn resolve_unique(raw: impl Iterator<Item = String>, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.filter_map(|r| resolve(&r, base))
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn clean_text(fragment: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(fragment, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    html_decode(&collapsed)
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
