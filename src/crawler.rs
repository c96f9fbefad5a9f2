//! Website crawler.
//!
//! Designed for stateless workflow execution: each call to
//! [`Crawler::iterate`] processes exactly one URL from the queue, and the
//! whole crawl position lives in the serializable
//! [`CrawlState`](crate::models::CrawlState). A URL is marked processed
//! before its outcome is known, so a page that fails is never retried within
//! the same crawl.

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use url::Url;
use uuid::Uuid;

use crate::config::CrawlerConfig;
use crate::error::Result;
use crate::ingest::{ChunkOrchestrator, ChunkRequest};
use crate::models::{CrawlState, Document, Workspace};
use crate::splitter;

pub struct Crawler {
    http: reqwest::Client,
    orchestrator: Arc<ChunkOrchestrator>,
}

/// Outcome of one crawl iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The page was fetched and its chunks were indexed.
    Indexed { url: String, chunks: u64 },
    /// The URL was consumed but produced nothing (wrong content type, fetch
    /// failure, or empty text).
    Skipped { url: String },
    /// The queue is empty or the page limit was reached.
    Done,
}

impl Crawler {
    pub fn new(config: &CrawlerConfig, orchestrator: Arc<ChunkOrchestrator>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, orchestrator })
    }

    /// Process the next queued URL.
    ///
    /// Fetch or parse failures are logged and skipped; a broken page must not
    /// abort the rest of the crawl.
    pub async fn iterate(
        &self,
        workspace: &Workspace,
        document: &Document,
        state: &mut CrawlState,
    ) -> Result<IterationOutcome> {
        if !state.has_work() {
            return Ok(IterationOutcome::Done);
        }
        // has_work() guarantees a queued URL.
        let Some(url) = state.queue.pop_front() else {
            return Ok(IterationOutcome::Done);
        };
        state.processed.insert(url.clone());
        state.iteration += 1;

        let page = match self.fetch(&url, &state.content_types).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                tracing::debug!(url, "skipped: content type not eligible");
                return Ok(IterationOutcome::Skipped { url });
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "page fetch failed, skipping");
                return Ok(IterationOutcome::Skipped { url });
            }
        };

        let extracted = extract_page(&page.body, &url);

        if state.follow_links {
            for link in &extracted.links {
                if !state.processed.contains(link) && !state.queue.contains(link) {
                    state.queue.push_back(link.clone());
                }
            }
        }

        if extracted.text.is_empty() {
            tracing::debug!(url, "skipped: no visible text");
            return Ok(IterationOutcome::Skipped { url });
        }

        let texts = splitter::split(&extracted.text, workspace.chunk_size, workspace.chunk_overlap);
        let outcome = self
            .orchestrator
            .add_chunks(
                workspace,
                document,
                ChunkRequest {
                    texts,
                    document_sub_id: Some(Uuid::new_v4().to_string()),
                    document_sub_type: Some("page".to_string()),
                    title: extracted.title,
                    path: Some(url.clone()),
                    replace: false,
                    ..Default::default()
                },
            )
            .await?;

        state.indexed += 1;
        tracing::info!(url, chunks = outcome.added, "page indexed");
        Ok(IterationOutcome::Indexed {
            url,
            chunks: outcome.added,
        })
    }

    /// Drain the queue up to the state's page limit.
    pub async fn crawl(
        &self,
        workspace: &Workspace,
        document: &Document,
        state: &mut CrawlState,
    ) -> Result<()> {
        while state.has_work() {
            self.iterate(workspace, document, state).await?;
        }
        self.finish(workspace, document, state).await
    }

    /// Record the final sub-document count once the crawl is over.
    pub async fn finish(
        &self,
        workspace: &Workspace,
        document: &Document,
        state: &CrawlState,
    ) -> Result<()> {
        self.orchestrator
            .workspace_store()
            .set_document_subdocuments(
                &workspace.id,
                &document.document_id,
                state.processed.len() as u64,
            )
            .await
    }

    /// Fetch a URL; `Ok(None)` means the response content type is not
    /// eligible for indexing.
    async fn fetch(&self, url: &str, content_types: &[String]) -> Result<Option<FetchedPage>> {
        let response = self.http.get(url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
            .unwrap_or_default();

        if !content_types.iter().any(|ct| ct == &content_type) {
            return Ok(None);
        }

        let body = response.text().await?;
        Ok(Some(FetchedPage { body }))
    }
}

struct FetchedPage {
    body: String,
}

struct ExtractedPage {
    text: String,
    title: Option<String>,
    links: Vec<String>,
}

/// Parse HTML into visible text, the page title, and same-origin links.
/// Synchronous on purpose: the parsed DOM is not `Send` and must not live
/// across an await point.
fn extract_page(html: &str, page_url: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let mut text = String::new();
    collect_text(&document.root_element(), &mut text);
    let text = normalize_whitespace(&text);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|t| normalize_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let links = match Url::parse(page_url) {
        Ok(base) => extract_links(&document, &base),
        Err(_) => Vec::new(),
    };

    ExtractedPage { text, title, links }
}

/// Walk the DOM accumulating text nodes, skipping subtrees that never render.
fn collect_text(element: &scraper::ElementRef<'_>, out: &mut String) {
    const INVISIBLE: [&str; 4] = ["script", "style", "noscript", "head"];
    if INVISIBLE.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            scraper::Node::Text(t) => {
                out.push_str(t);
                out.push(' ');
            }
            scraper::Node::Element(_) => {
                if let Some(child_element) = scraper::ElementRef::wrap(child) {
                    collect_text(&child_element, out);
                }
            }
            _ => {}
        }
    }
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);

        let same_origin = resolved.scheme() == base.scheme()
            && resolved.host() == base.host()
            && resolved.port_or_known_default() == base.port_or_known_default();
        let is_http = matches!(resolved.scheme(), "http" | "https");

        if same_origin && is_http {
            let url = resolved.to_string();
            if !links.contains(&url) {
                links.push(url);
            }
        }
    }
    links
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_text_excludes_scripts_and_styles() {
        let html = r#"
            <html><head><title>Page</title><style>.x{color:red}</style></head>
            <body><h1>Hello</h1><script>alert("no")</script><p>world</p></body></html>
        "#;
        let page = extract_page(html, "https://a.test/");
        assert_eq!(page.text, "Hello world");
        assert_eq!(page.title.as_deref(), Some("Page"));
    }

    #[test]
    fn links_are_same_origin_and_fragment_free() {
        let html = r#"
            <body>
              <a href="/about#team">About</a>
              <a href="https://a.test/contact">Contact</a>
              <a href="https://other.test/">Elsewhere</a>
              <a href="mailto:x@a.test">Mail</a>
            </body>
        "#;
        let page = extract_page(html, "https://a.test/index.html");
        assert_eq!(
            page.links,
            vec![
                "https://a.test/about".to_string(),
                "https://a.test/contact".to_string(),
            ]
        );
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(normalize_whitespace("  a \n\n b\tc  "), "a b c");
    }
}
