//! Breadth-first crawl over linked pages.
//!
//! The crawler owns a frontier of `(url, depth)` pairs seeded at depth 0
//! and hands back one page per call, so the caller drives persistence and
//! reporting at its own pace. Three limits bound every crawl:
//!
//! - **depth** — links found on a page at `max_depth` are not followed
//! - **pages** — fetch attempts stop once `max_pages` is reached; failed
//!   fetches spend budget too
//! - **domain** — links leaving the seed host are dropped unless external
//!   domains were allowed
//!
//! Page identity is the [`normalize_url`] form (fragment and query
//! stripped). A URL is marked visited when it enters the frontier, never
//! at fetch time, so the same page cannot be queued twice through
//! different links. The first link to discover a page decides its depth.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::extract_web::WebExtractor;

/// Canonical identity of a page: fragment and query removed.
///
/// `https://a.com/docs?utm=x#top` and `https://a.com/docs` are the same
/// page to the crawler and to the store.
pub fn normalize_url(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    u.set_query(None);
    u.to_string()
}

/// A successfully fetched page, ready to persist.
#[derive(Debug)]
pub struct CrawledPage {
    pub url: Url,
    pub depth: usize,
    pub title: Option<String>,
    pub text: String,
}

/// One crawl step: a page, or a fetch that spent budget and failed.
#[derive(Debug)]
pub enum CrawlItem {
    Page(CrawledPage),
    Failed { url: Url, reason: String },
}

pub struct Crawler {
    extractor: Arc<WebExtractor>,
    max_depth: usize,
    max_pages: usize,
    same_domain_only: bool,
    seed_host: Option<String>,
    frontier: VecDeque<(Url, usize)>,
    visited: HashSet<String>,
    fetched: usize,
}

impl Crawler {
    pub fn new(
        extractor: Arc<WebExtractor>,
        seed: Url,
        max_depth: usize,
        max_pages: usize,
        same_domain_only: bool,
    ) -> Self {
        let seed_host = seed.host_str().map(|h| h.to_string());
        let mut visited = HashSet::new();
        visited.insert(normalize_url(&seed));
        let mut frontier = VecDeque::new();
        frontier.push_back((seed, 0));

        Self {
            extractor,
            max_depth,
            max_pages,
            same_domain_only,
            seed_host,
            frontier,
            visited,
            fetched: 0,
        }
    }

    /// Fetch the next frontier page. `None` once the frontier is empty or
    /// the page budget is spent.
    pub async fn next_page(&mut self) -> Option<CrawlItem> {
        if self.fetched >= self.max_pages {
            return None;
        }
        let (url, depth) = self.frontier.pop_front()?;
        self.fetched += 1;

        match self.extractor.fetch_page(&url).await {
            Ok(page) => {
                debug!(%url, depth, links = page.links.len(), "crawled page");
                for link in &page.links {
                    self.enqueue(link, depth + 1);
                }
                Some(CrawlItem::Page(CrawledPage {
                    url: page.url,
                    depth,
                    title: page.title,
                    text: page.text,
                }))
            }
            Err(e) => Some(CrawlItem::Failed {
                url,
                reason: e.to_string(),
            }),
        }
    }

    fn enqueue(&mut self, link: &Url, depth: usize) {
        if depth > self.max_depth {
            return;
        }
        if self.same_domain_only && link.host_str() != self.seed_host.as_deref() {
            return;
        }
        if !self.visited.insert(normalize_url(link)) {
            return;
        }
        self.frontier.push_back((link.clone(), depth));
    }
}
