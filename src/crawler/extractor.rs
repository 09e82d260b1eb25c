//! HTML and stylesheet reference extraction
//!
//! This module handles parsing fetched documents to discover:
//! - Hyperlinks to follow (from `<a>` and `<area>` tags)
//! - Assets to archive alongside the page (stylesheets, scripts, images)
//! - `url(...)` and `@import` references inside CSS
//!
//! Parsing is best-effort: html5ever recovers from malformed markup, and
//! only documents that look binary are reported as unparseable.

use crate::state::ResourceKind;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Bytes inspected when deciding whether a body is text
const SNIFF_LEN: usize = 1024;

/// Path fragments of account pages, which are not followed
const ACCOUNT_PATHS: &[&str] = &["/login", "/signin", "/signup", "/register", "/logout"];

/// Query parameters marking download or account links
const EXCLUDED_PARAMS: &[&str] = &["download", "login", "logout", "signin", "signup"];

lazy_static! {
    static ref CSS_URL_PATTERN: Regex =
        Regex::new(r#"url\(\s*["']?([^"')]+?)["']?\s*\)"#).expect("Invalid css url regex");
    static ref CSS_IMPORT_PATTERN: Regex =
        Regex::new(r#"@import\s+["']([^"']+)["']"#).expect("Invalid css import regex");
}

/// References discovered in an HTML document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// The page title (from `<title>`)
    pub title: Option<String>,

    /// Hyperlinks, absolute, in document order, deduplicated
    pub links: Vec<Url>,

    /// Asset references with their discovery kind, deduplicated
    pub assets: Vec<(Url, ResourceKind)>,
}

/// Result of extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Document(ExtractedDocument),
    /// Binary or otherwise unreadable content; stored as-is with no children
    Unparseable,
}

impl Extracted {
    pub fn is_unparseable(&self) -> bool {
        matches!(self, Self::Unparseable)
    }
}

/// Parses an HTML body and collects its links and assets
///
/// # Link Extraction Rules
///
/// **Links:**
/// - `<a href>` and `<area href>`, except `<a download>`
/// - Not account pages (`/login`, `/signin`, `/signup`, `/register`,
///   `/logout`) or URLs with a `download`, `login`, `logout`, `signin` or
///   `signup` query parameter
///
/// **Assets:**
/// - `<link rel="stylesheet">` → css
/// - `<script src>` → js
/// - `<img src|data-src|srcset>`, `<source srcset>`, `<link rel="icon">`,
///   `<link rel="apple-touch-icon">` → image
/// - `url(...)` inside `<style>` blocks and `style` attributes
///
/// **Excluded:** `javascript:`, `mailto:`, `tel:`, `data:` and fragment-only
/// references, and anything that is not http(s) after resolution.
///
/// Relative references resolve against `<base href>` when present, else
/// against `page_url`.
///
/// # Example
///
/// ```no_run
/// use sumi_scroll::crawler::{extract, Extracted};
/// use url::Url;
///
/// let html = br#"<html><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// if let Extracted::Document(doc) = extract(html, &base_url) {
///     assert_eq!(doc.links[0].as_str(), "https://example.com/page");
/// }
/// ```
pub fn extract(body: &[u8], page_url: &Url) -> Extracted {
    if looks_binary(body) {
        return Extracted::Unparseable;
    }

    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);
    let base = document_base(&document, page_url);

    let title = extract_title(&document);
    let links = extract_links(&document, &base);
    let assets = extract_assets(&document, &base);

    Extracted::Document(ExtractedDocument {
        title,
        links,
        assets,
    })
}

/// Collects `url(...)` and `@import` references from a stylesheet
///
/// Imports are classified as css, image extensions as image, everything
/// else (fonts, cursors) as other.
pub fn extract_css_urls(css: &str, base: &Url) -> Vec<(Url, ResourceKind)> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    let imports = CSS_IMPORT_PATTERN
        .captures_iter(css)
        .filter_map(|c| c.get(1))
        .map(|m| (m.as_str(), ResourceKind::Css));
    let urls = CSS_URL_PATTERN
        .captures_iter(css)
        .filter_map(|c| c.get(1))
        .map(|m| (m.as_str(), ResourceKind::Other));

    for (reference, fallback) in imports.chain(urls) {
        let Some(url) = resolve_link(reference, base) else {
            continue;
        };
        if !seen.insert(url.to_string()) {
            continue;
        }
        let kind = match ResourceKind::from_extension(url.path()) {
            Some(ResourceKind::Image) => ResourceKind::Image,
            Some(ResourceKind::Css) => ResourceKind::Css,
            _ => fallback,
        };
        found.push((url, kind));
    }

    found
}

/// Stylesheet variant of [`extract`]
pub fn extract_stylesheet(body: &[u8], sheet_url: &Url) -> Vec<(Url, ResourceKind)> {
    if looks_binary(body) {
        return Vec::new();
    }
    extract_css_urls(&String::from_utf8_lossy(body), sheet_url)
}

fn looks_binary(body: &[u8]) -> bool {
    body[..body.len().min(SNIFF_LEN)].contains(&0)
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    selector("base[href]")
        .and_then(|s| {
            document
                .select(&s)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .filter(|base| matches!(base.scheme(), "http" | "https"))
        .unwrap_or_else(|| page_url.clone())
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = selector("title")?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let Some(link_selector) = selector("a[href], area[href]") else {
        return links;
    };

    for element in document.select(&link_selector) {
        // Skip if it has the download attribute
        if element.value().attr("download").is_some() {
            continue;
        }

        let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, base)) else {
            continue;
        };
        if is_account_or_download(&url) {
            tracing::trace!("Not following {}", url);
            continue;
        }
        if seen.insert(url.to_string()) {
            links.push(url);
        }
    }

    links
}

/// Whether a hyperlink leads to a login wall or a download endpoint
fn is_account_or_download(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    if ACCOUNT_PATHS.iter().any(|p| path.contains(p)) {
        return true;
    }
    url.query_pairs()
        .any(|(key, _)| EXCLUDED_PARAMS.contains(&key.to_ascii_lowercase().as_str()))
}

fn extract_assets(document: &Html, base: &Url) -> Vec<(Url, ResourceKind)> {
    let mut collector = AssetCollector::default();

    if let Some(s) = selector("link[href]") {
        for element in document.select(&s) {
            let rel = rel_tokens(&element);
            let kind = if rel.iter().any(|r| r == "stylesheet") {
                ResourceKind::Css
            } else if rel
                .iter()
                .any(|r| r == "icon" || r == "apple-touch-icon" || r == "apple-touch-icon-precomposed")
            {
                ResourceKind::Image
            } else {
                continue;
            };
            collector.add_attr(&element, "href", kind, base);
        }
    }

    if let Some(s) = selector("script[src]") {
        for element in document.select(&s) {
            collector.add_attr(&element, "src", ResourceKind::Js, base);
        }
    }

    if let Some(s) = selector("img, source") {
        for element in document.select(&s) {
            collector.add_attr(&element, "src", ResourceKind::Image, base);
            collector.add_attr(&element, "data-src", ResourceKind::Image, base);
            if let Some(srcset) = element.value().attr("srcset") {
                for candidate in srcset_urls(srcset) {
                    collector.add(candidate, ResourceKind::Image, base);
                }
            }
        }
    }

    if let Some(s) = selector("style") {
        for element in document.select(&s) {
            let css = element.text().collect::<String>();
            for (url, kind) in extract_css_urls(&css, base) {
                collector.push(url, kind);
            }
        }
    }

    if let Some(s) = selector("[style]") {
        for element in document.select(&s) {
            if let Some(css) = element.value().attr("style") {
                for (url, kind) in extract_css_urls(css, base) {
                    collector.push(url, kind);
                }
            }
        }
    }

    collector.assets
}

fn rel_tokens(element: &ElementRef<'_>) -> Vec<String> {
    element
        .value()
        .attr("rel")
        .map(|rel| rel.split_ascii_whitespace().map(str::to_ascii_lowercase).collect())
        .unwrap_or_default()
}

/// Image candidates of a `srcset`: the URL part of each comma-separated entry
fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_ascii_whitespace().next())
}

#[derive(Default)]
struct AssetCollector {
    seen: HashSet<String>,
    assets: Vec<(Url, ResourceKind)>,
}

impl AssetCollector {
    fn add_attr(&mut self, element: &ElementRef<'_>, attr: &str, kind: ResourceKind, base: &Url) {
        if let Some(value) = element.value().attr(attr) {
            self.add(value, kind, base);
        }
    }

    fn add(&mut self, reference: &str, kind: ResourceKind, base: &Url) {
        if let Some(url) = resolve_link(reference, base) {
            self.push(url, kind);
        }
    }

    fn push(&mut self, url: Url, kind: ResourceKind) {
        if self.seen.insert(url.to_string()) {
            self.assets.push((url, kind));
        }
    }
}

/// Resolves a reference to an absolute URL and validates it
///
/// Returns None if the reference should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only references
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    // Skip empty hrefs
    if href.is_empty() {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    // Skip fragment-only links (same page anchors)
    if href.starts_with('#') {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url),
        _ => None,
    }
}
