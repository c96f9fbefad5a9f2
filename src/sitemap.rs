//! Sitemap expansion.
//!
//! Turns a sitemap URL into the flat list of page URLs it covers, expanding
//! nested sitemap indexes and transparently decompressing gzipped payloads.
//! A sitemap that fails to download or parse contributes nothing rather than
//! failing the whole expansion; crawl seeding should degrade, not abort.

use std::collections::BTreeSet;
use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::CrawlerConfig;
use crate::error::Result;

/// Nested index expansion is bounded; real sitemap trees are shallow and an
/// unbounded walk could loop on self-referencing indexes.
const MAX_DEPTH: usize = 3;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct SitemapFetcher {
    http: reqwest::Client,
}

/// URLs found in one sitemap document.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedSitemap {
    /// Page URLs (`<urlset>` entries).
    pub page_urls: Vec<String>,
    /// Nested sitemap URLs (`<sitemapindex>` entries).
    pub sitemap_urls: Vec<String>,
}

impl SitemapFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http })
    }

    /// Fetch a sitemap and return every page URL it covers, including pages
    /// listed by nested sitemap indexes.
    pub async fn extract_urls(&self, sitemap_url: &str) -> Result<Vec<String>> {
        let mut pages: Vec<String> = Vec::new();
        let mut seen_pages: BTreeSet<String> = BTreeSet::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut worklist: Vec<(String, usize)> = vec![(sitemap_url.to_string(), 0)];

        while let Some((url, depth)) = worklist.pop() {
            if !visited.insert(url.clone()) {
                continue;
            }

            let bytes = match self.fetch(&url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(url, error = %e, "sitemap fetch failed, skipping");
                    continue;
                }
            };

            let parsed = parse(&bytes);
            for page in parsed.page_urls {
                if seen_pages.insert(page.clone()) {
                    pages.push(page);
                }
            }

            if depth + 1 > MAX_DEPTH {
                tracing::warn!(url, "sitemap nesting too deep, not expanding further");
                continue;
            }
            for nested in parsed.sitemap_urls {
                worklist.push((nested, depth + 1));
            }
        }

        Ok(pages)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Parse sitemap XML bytes, decompressing gzip payloads first. Malformed
/// input yields an empty result with a logged warning.
pub fn parse(bytes: &[u8]) -> ParsedSitemap {
    let decompressed;
    let xml: &[u8] = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        match GzDecoder::new(bytes).read_to_end(&mut out) {
            Ok(_) => {
                decompressed = out;
                &decompressed
            }
            Err(e) => {
                tracing::warn!(error = %e, "gzip sitemap failed to decompress");
                return ParsedSitemap::default();
            }
        }
    } else {
        bytes
    };

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedSitemap::default();
    let mut in_nested_entry = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_nested_entry = true,
                b"url" => in_nested_entry = false,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_nested_entry = false,
                b"loc" => in_loc = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_loc => {
                let Ok(text) = t.unescape() else {
                    continue;
                };
                let url = text.trim().to_string();
                if url.is_empty() {
                    continue;
                }
                if in_nested_entry {
                    parsed.sitemap_urls.push(url);
                } else {
                    parsed.page_urls.push(url);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "malformed sitemap XML");
                return ParsedSitemap::default();
            }
            _ => {}
        }
        buf.clear();
    }

    parsed
}
