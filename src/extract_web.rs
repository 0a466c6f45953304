//! Web page extraction: fetch HTML, strip boilerplate, collect links.
//!
//! The extractor prefers a main-content region (`<main>`, `<article>`,
//! `#content`, `#main`) and falls back to `<body>`. Within the chosen
//! region, script/style/nav/header/footer/aside subtrees are skipped and
//! block elements become line breaks, so the page reduces to readable
//! prose. Links are resolved against the page URL for the crawler; the
//! parser keeps them in document order without duplicates.
//!
//! Fetches go through the [`FetchCache`] when one is configured. Cache
//! problems are logged and ignored; only the network result decides
//! whether a page counts as reachable.

use std::time::Duration;

use async_trait::async_trait;
use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::cache::FetchCache;
use crate::config::CrawlConfig;
use crate::error::{unavailable, EngineError, Result};
use crate::extractor::Extract;
use crate::models::{ExtractedUnit, SourceKind, UnitProvenance};

/// Subtrees that never contribute indexable text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form", "svg",
    "iframe", "button",
];

/// Content regions tried in order before falling back to the whole page.
const MAIN_SELECTORS: &[&str] = &["main", "article", "#content", "#main", "body"];

/// A fetched and parsed page.
#[derive(Debug)]
pub struct WebPage {
    pub url: Url,
    pub title: Option<String>,
    pub text: String,
    pub links: Vec<Url>,
}

/// Fetches pages over HTTP and reduces them to text plus outgoing links.
pub struct WebExtractor {
    client: reqwest::Client,
    cache: Option<FetchCache>,
    force_fetch: bool,
}

impl WebExtractor {
    pub fn new(config: &CrawlConfig, cache: Option<FetchCache>, force_fetch: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            cache,
            force_fetch,
        })
    }

    /// Fetch one page and parse it.
    pub async fn fetch_page(&self, url: &Url) -> Result<WebPage> {
        let html = self.fetch_html(url).await?;
        Ok(parse_page(url, &html))
    }

    /// Fetch raw HTML, consulting the cache unless a fresh fetch is forced.
    async fn fetch_html(&self, url: &Url) -> Result<String> {
        if let Some(cache) = &self.cache {
            if !self.force_fetch {
                match cache.load(url.as_str()).await {
                    Ok(Some(body)) => return Ok(body),
                    Ok(None) => {}
                    Err(e) => warn!(%url, error = %e, "cache read failed"),
                }
            }
        }

        debug!(%url, "fetching page");
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| unavailable(url.as_str(), format!("request failed: {}", e)))?;
        let response = response
            .error_for_status()
            .map_err(|e| unavailable(url.as_str(), e))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty() && !is_textual(&content_type) {
            return Err(unavailable(
                url.as_str(),
                format!("unsupported content type '{}'", content_type),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| unavailable(url.as_str(), format!("read failed: {}", e)))?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(url.as_str(), &body).await {
                warn!(%url, error = %e, "cache write failed");
            }
        }

        Ok(body)
    }
}

#[async_trait]
impl Extract for WebExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn extract(&self, origin: &str) -> Result<Vec<ExtractedUnit>> {
        let url = Url::parse(origin)
            .map_err(|e| EngineError::InvalidReference(format!("{}: {}", origin, e)))?;
        let page = self.fetch_page(&url).await?;
        if page.text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ExtractedUnit {
            text: page.text,
            title: page.title,
            provenance: UnitProvenance::Body,
        }])
    }
}

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("html") || ct.contains("xml") || ct.contains("json")
}

/// Parse HTML into title, readable text, and outgoing links.
pub fn parse_page(url: &Url, html: &str) -> WebPage {
    let doc = Html::parse_document(html);

    let title = page_title(&doc);
    let mut raw = String::new();
    collect_text(*content_root(&doc), &mut raw);

    WebPage {
        url: url.clone(),
        title,
        text: tidy_text(&raw),
        links: extract_links(&doc, url),
    }
}

fn css(selector: &str) -> Option<Selector> {
    Selector::parse(selector).ok()
}

fn first_match<'a>(doc: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    css(selector).and_then(|sel| doc.select(&sel).next())
}

/// Page title from `<title>`, falling back to the first `<h1>`.
fn page_title(doc: &Html) -> Option<String> {
    for selector in ["title", "h1"] {
        if let Some(el) = first_match(doc, selector) {
            let text = tidy_text(&el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text.replace('\n', " "));
            }
        }
    }
    None
}

fn content_root(doc: &Html) -> ElementRef<'_> {
    for selector in MAIN_SELECTORS {
        if let Some(el) = first_match(doc, selector) {
            return el;
        }
    }
    doc.root_element()
}

/// Depth-first text collection that skips boilerplate subtrees.
fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&text),
            Node::Element(el) => {
                let name = el.name();
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                if is_block(name) {
                    out.push('\n');
                }
                collect_text(child, out);
                if is_block(name) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn is_block(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "li"
            | "ul"
            | "ol"
            | "dl"
            | "dt"
            | "dd"
            | "table"
            | "tr"
            | "td"
            | "th"
            | "br"
            | "hr"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "blockquote"
            | "pre"
            | "figure"
            | "figcaption"
    )
}

/// Collapse runs of whitespace; one line per block of text.
fn tidy_text(raw: &str) -> String {
    let mut lines = Vec::new();
    for line in raw.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// All same-protocol links in document order, resolved and deduplicated.
fn extract_links(doc: &Html, base: &Url) -> Vec<Url> {
    let mut links: Vec<Url> = Vec::new();
    let Some(selector) = css("a[href]") else {
        return links;
    };
    for el in doc.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(mut link) = base.join(href) else {
            continue;
        };
        if !matches!(link.scheme(), "http" | "https") {
            continue;
        }
        link.set_fragment(None);
        if !links.iter().any(|existing| existing == &link) {
            links.push(link);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> WebPage {
        let url = Url::parse("https://example.com/docs/intro").unwrap();
        parse_page(&url, html)
    }

    #[test]
    fn test_strips_boilerplate() {
        let html = r#"
            <html><head><title>Intro</title><script>var x = 1;</script></head>
            <body>
              <nav><a href="/home">Home</a> site navigation</nav>
              <p>Real content about parsers.</p>
              <footer>Copyright notice</footer>
            </body></html>
        "#;
        let p = page(html);
        assert!(p.text.contains("Real content about parsers."));
        assert!(!p.text.contains("site navigation"));
        assert!(!p.text.contains("Copyright"));
        assert!(!p.text.contains("var x"));
    }

    #[test]
    fn test_prefers_main_region() {
        let html = r#"
            <html><body>
              <div>Promo banner outside the main region</div>
              <main><p>Only this paragraph matters.</p></main>
            </body></html>
        "#;
        let p = page(html);
        assert_eq!(p.text, "Only this paragraph matters.");
    }

    #[test]
    fn test_title_with_h1_fallback() {
        let with_title = page("<html><head><title> The   Guide </title></head><body></body></html>");
        assert_eq!(with_title.title.as_deref(), Some("The Guide"));

        let with_h1 = page("<html><body><h1>Heading Only</h1></body></html>");
        assert_eq!(with_h1.title.as_deref(), Some("Heading Only"));

        let untitled = page("<html><body><p>text</p></body></html>");
        assert_eq!(untitled.title, None);
    }

    #[test]
    fn test_blocks_become_lines() {
        let html = "<html><body><p>First.</p><p>Second.</p><ul><li>A</li><li>B</li></ul></body></html>";
        let p = page(html);
        let lines: Vec<&str> = p.text.lines().collect();
        assert_eq!(lines, vec!["First.", "Second.", "A", "B"]);
    }

    #[test]
    fn test_extract_links_resolves_and_dedupes() {
        let html = r##"
            <html><body>
              <a href="setup">Setup</a>
              <a href="/api/reference">API</a>
              <a href="setup">Setup again</a>
              <a href="#section">Anchor</a>
              <a href="mailto:team@example.com">Mail</a>
              <a href="https://other.org/page#frag">External</a>
            </body></html>
        "##;
        let p = page(html);
        let links: Vec<String> = p.links.iter().map(|u| u.to_string()).collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/docs/setup",
                "https://example.com/api/reference",
                "https://other.org/page",
            ]
        );
    }

    #[test]
    fn test_empty_body_yields_empty_text() {
        let p = page("<html><body><script>only()</script></body></html>");
        assert!(p.text.is_empty());
    }

    #[test]
    fn test_tidy_text_collapses_whitespace() {
        assert_eq!(tidy_text("  a   b \n\n\n c\t d  "), "a b\nc d");
    }
}
