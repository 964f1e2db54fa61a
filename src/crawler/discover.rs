/// Page discovery: sitemap first, breadth-first link traversal as fallback.
///
/// Produces a deduplicated sequence of canonical relative URLs in first-seen
/// order, capped at the configured page maximum. Off-origin links, fragments,
/// and non-document resources are excluded.
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::fetch::Fetcher;

static SITEMAP_LOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<loc>\s*([^<]+?)\s*</loc>").expect("static regex"));

/// Extensions that never hold readable page content.
const SKIP_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "css", "js", "json",
    "xml", "pdf", "zip", "gz", "woff", "woff2", "ttf", "mp3", "mp4",
];

pub struct Discoverer<'a> {
    fetcher: &'a Fetcher,
    base: Url,
    max_pages: usize,
}

impl<'a> Discoverer<'a> {
    pub fn new(fetcher: &'a Fetcher, base: Url, max_pages: usize) -> Self {
        Self {
            fetcher,
            base,
            max_pages,
        }
    }

    /// Enumerate candidate page URLs for the site.
    ///
    /// Fails only when neither the sitemap nor the homepage is reachable
    /// (total site unavailability).
    pub async fn discover(&self) -> Result<Vec<String>> {
        match self.from_sitemap().await {
            Ok(urls) if !urls.is_empty() => {
                debug!("Discovered {} URLs via sitemap", urls.len());
                return Ok(urls);
            }
            Ok(_) => debug!("Sitemap yielded no URLs, falling back to link traversal"),
            Err(e) => debug!("Sitemap unavailable ({e}), falling back to link traversal"),
        }

        self.from_links().await
    }

    async fn from_sitemap(&self) -> Result<Vec<String>> {
        let sitemap_url = self.base.join("/sitemap.xml").context("bad base URL")?;
        let fetched = self.fetcher.fetch(&sitemap_url).await?;

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for cap in SITEMAP_LOC.captures_iter(&fetched.body) {
            if urls.len() >= self.max_pages {
                break;
            }
            if let Some(rel) = canonicalize(&self.base, &cap[1]) {
                if seen.insert(rel.clone()) {
                    urls.push(rel);
                }
            }
        }
        Ok(urls)
    }

    /// Breadth-first traversal of same-origin hyperlinks from the homepage.
    async fn from_links(&self) -> Result<Vec<String>> {
        let root = "/".to_string();
        let mut seen: HashSet<String> = HashSet::from([root.clone()]);
        let mut ordered = vec![root.clone()];
        let mut queue = VecDeque::from([root]);
        let mut homepage_ok = false;

        while let Some(rel) = queue.pop_front() {
            if ordered.len() >= self.max_pages && homepage_ok {
                break;
            }
            let abs = match self.base.join(&rel) {
                Ok(u) => u,
                Err(_) => continue,
            };
            let fetched = match self.fetcher.fetch(&abs).await {
                Ok(f) => f,
                Err(e) => {
                    if rel == "/" {
                        return Err(e).context("homepage unreachable");
                    }
                    warn!("Link traversal fetch failed for {rel}: {e}");
                    continue;
                }
            };
            homepage_ok = true;

            for link in page_links(&fetched.body, &self.base) {
                if ordered.len() >= self.max_pages {
                    break;
                }
                if seen.insert(link.clone()) {
                    ordered.push(link.clone());
                    queue.push_back(link);
                }
            }
        }

        Ok(ordered)
    }
}

/// Extract canonical same-origin links from an HTML document.
fn page_links(html: &str, base: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("a[href]").expect("static selector");
    doc.select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| canonicalize(base, href))
        .collect()
}

/// Resolve a link against the base and reduce it to a canonical relative URL.
///
/// Returns `None` for off-origin links, fragments, non-HTTP schemes, and
/// non-document resources.
pub fn canonicalize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut joined = base.join(href).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    if joined.host_str() != base.host_str() {
        return None;
    }
    joined.set_fragment(None);

    let path = joined.path();
    if let Some(ext) = path.rsplit('.').next().filter(|e| !e.contains('/')) {
        if path.contains('.') && SKIP_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            return None;
        }
    }

    Some(to_relative(&joined))
}

/// Canonical relative form: normalized path plus query, no trailing slash.
fn to_relative(url: &Url) -> String {
    let mut path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    path
}

/// Validate and normalize a caller-supplied page URL (query/update paths).
///
/// Accepts a site-relative path; rejects traversal attempts, schemes, and
/// oversized input.
pub fn normalize_rel_path(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("url must not be empty".to_string());
    }
    if raw.len() > 2048 {
        return Err("url too long".to_string());
    }
    if raw.contains("://") || raw.starts_with("//") {
        return Err("url must be a site-relative path".to_string());
    }
    if !raw.starts_with('/') {
        return Err("url must start with '/'".to_string());
    }
    if raw.split(['/', '?']).any(|seg| seg == "..") {
        return Err("url must not contain '..'".to_string());
    }

    let (path, query) = match raw.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (raw, None),
    };
    let mut normalized = path.trim_end_matches('/').to_string();
    if normalized.is_empty() {
        normalized.push('/');
    }
    if let Some(q) = query {
        normalized.push('?');
        normalized.push_str(q);
    }
    Ok(normalized)
}
