use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{DecodeError, FetchError};
use crate::fetch::Fetch;

static NEXT_DATA: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script#__NEXT_DATA__").unwrap());

#[derive(Debug, Deserialize)]
struct Feed {
    products: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    slug: String,
    id: HitId,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitId {
    Text(String),
    Number(u64),
}

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitId::Text(s) => f.write_str(s),
            HitId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Fetch listing page `page` (1-based) and return its product URLs in
/// listing order. A page whose feed is missing or malformed yields no items.
pub async fn list_page<F: Fetch>(
    fetcher: &F,
    settings: &Settings,
    page: u32,
) -> Result<Vec<String>, FetchError> {
    let html = fetcher.fetch(&settings.listing_page_url(page)).await?;
    match parse_listing(&html, settings, page) {
        Ok(urls) => {
            info!("Listing page {}: {} products", page, urls.len());
            Ok(urls)
        }
        Err(e) => {
            warn!("{}; treating page as empty", e);
            Ok(Vec::new())
        }
    }
}

/// Pull the product hits out of the page's `__NEXT_DATA__` block.
pub fn parse_listing(html: &str, settings: &Settings, page: u32) -> Result<Vec<String>, DecodeError> {
    let fail = |reason: String| DecodeError { page, reason };

    let doc = Html::parse_document(html);
    let raw: String = doc
        .select(&NEXT_DATA)
        .next()
        .ok_or_else(|| fail("no __NEXT_DATA__ block".into()))?
        .text()
        .collect();

    let data: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| fail(format!("invalid JSON: {}", e)))?;
    let node = data
        .pointer(&settings.feed_pointer)
        .ok_or_else(|| fail(format!("nothing at {}", settings.feed_pointer)))?;
    let feed = Feed::deserialize(node).map_err(|e| fail(format!("unexpected feed shape: {}", e)))?;

    let mut seen = HashSet::new();
    Ok(feed
        .products
        .into_iter()
        .filter(|h| !h.slug.is_empty())
        .map(|h| settings.product_url(&h.slug, &h.id.to_string()))
        .filter(|url| seen.insert(url.clone()))
        .collect())
}

/// Decides which listing page comes next: stops at the page ceiling or after
/// `max_empty` empty pages in a row.
#[derive(Debug)]
pub struct Pagination {
    next: u32,
    max_pages: u32,
    max_empty: u32,
    empty_run: u32,
}

impl Pagination {
    pub fn new(max_pages: u32, max_empty: u32) -> Self {
        Pagination {
            next: 1,
            max_pages,
            max_empty: max_empty.max(1),
            empty_run: 0,
        }
    }

    pub fn next_page(&mut self) -> Option<u32> {
        if self.next > self.max_pages || self.empty_run >= self.max_empty {
            return None;
        }
        let page = self.next;
        self.next += 1;
        Some(page)
    }

    /// Report how many items the last page yielded.
    pub fn observe(&mut self, items: usize) {
        if items == 0 {
            self.empty_run += 1;
        } else {
            self.empty_run = 0;
        }
    }

    pub fn exhausted_by_empty_pages(&self) -> bool {
        self.empty_run >= self.max_empty
    }
}
