//! HTTP source fetcher - unit listings and chapter text from static HTML sites
//!
//! Uses reqwest for requests and the scraper crate for CSS selection. Listing
//! pages are walked sequentially with a politeness delay; pagination comes
//! from a hidden `#total-page` input or, failing that, `trang-N` links, and is
//! capped at `max_listing_pages`.
//!
//! Limitations:
//! - No JavaScript rendering (use for static HTML sites only)

use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::traits::{BaseSourceFetcher, FetchError};
use crate::domains::crawl_jobs::models::NewUnit;

lazy_static! {
    static ref ORDINAL: Regex = Regex::new(r"(?i)(?:chương|chapter)\s+(\d+)").expect("valid regex");
    static ref ORDINAL_PREFIX: Regex =
        Regex::new(r"(?i)^\s*(?:chương|chapter)\s+\d+\s*[:.\-]?\s*").expect("valid regex");
    static ref PAGE_NUMBER: Regex = Regex::new(r"trang-(\d+)").expect("valid regex");
}

/// CSS selectors for one source site layout.
#[derive(Debug, Clone)]
pub struct SourceSelectors {
    pub unit_links: String,
    pub total_pages: String,
    pub pagination_links: String,
    /// Tried in order; the first non-empty match wins.
    pub content: Vec<String>,
}

impl Default for SourceSelectors {
    fn default() -> Self {
        Self {
            unit_links: "#list-chapter .list-chapter li a".to_string(),
            total_pages: "#total-page".to_string(),
            pagination_links: ".pagination li a".to_string(),
            content: vec!["#chapter-c".to_string(), ".chapter-content".to_string()],
        }
    }
}

pub const DEFAULT_MAX_LISTING_PAGES: u32 = 200;

pub struct HttpSourceFetcher {
    client: reqwest::Client,
    selectors: SourceSelectors,
    page_delay: Duration,
    max_listing_pages: u32,
}

impl HttpSourceFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_selectors(timeout, SourceSelectors::default())
    }

    pub fn with_selectors(timeout: Duration, selectors: SourceSelectors) -> Result<Self> {
        let user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("vi-VN,vi;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            selectors,
            page_delay: Duration::from_secs(1),
            max_listing_pages: DEFAULT_MAX_LISTING_PAGES,
        })
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_max_listing_pages(mut self, max_pages: u32) -> Self {
        self.max_listing_pages = max_pages.max(1);
        self
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| transport_error(url, e))
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Invalid(format!("selector {}: {}", css, e)))
}

/// URL of listing page `page` (1-based) for a work.
pub fn listing_page_url(source_url: &str, page: u32) -> String {
    if page <= 1 {
        return source_url.to_string();
    }
    if source_url.ends_with('/') {
        format!("{}trang-{}/", source_url, page)
    } else {
        format!("{}/trang-{}/", source_url, page)
    }
}

/// Number of listing pages advertised by the first page.
pub fn parse_total_pages(html: &str, selectors: &SourceSelectors) -> Result<u32, FetchError> {
    let document = Html::parse_document(html);

    let hidden = selector(&selectors.total_pages)?;
    if let Some(total) = document
        .select(&hidden)
        .next()
        .and_then(|el| el.value().attr("value"))
        .and_then(|v| v.trim().parse::<u32>().ok())
    {
        return Ok(total.max(1));
    }

    let links = selector(&selectors.pagination_links)?;
    let max_page = document
        .select(&links)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| PAGE_NUMBER.captures(href))
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .max()
        .unwrap_or(1);
    Ok(max_page)
}

/// Pages actually walked for a listing that advertises `advertised`.
pub fn cap_pages(advertised: u32, max_pages: u32) -> u32 {
    advertised.clamp(1, max_pages.max(1))
}

/// Units linked from one listing page. Anchors without a recognisable ordinal
/// are skipped.
pub fn parse_listing_page(
    html: &str,
    base: &Url,
    selectors: &SourceSelectors,
) -> Result<Vec<NewUnit>, FetchError> {
    let document = Html::parse_document(html);
    let anchors = selector(&selectors.unit_links)?;

    let units = document
        .select(&anchors)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let text = el.text().collect::<String>();
            let text = text.trim();
            let ordinal = ORDINAL.captures(text)?[1].parse::<i32>().ok()?;
            let title = ORDINAL_PREFIX.replace(text, "").trim().to_string();
            let url = base.join(href).ok()?;
            Some(NewUnit {
                ordinal,
                title: (!title.is_empty()).then_some(title),
                source_url: url.to_string(),
            })
        })
        .collect();
    Ok(units)
}

/// Plain text of the first non-empty content container.
pub fn extract_content(html: &str, selectors: &SourceSelectors) -> Result<Option<String>, FetchError> {
    let document = Html::parse_document(html);
    for css in &selectors.content {
        let sel = selector(css)?;
        if let Some(el) = document.select(&sel).next() {
            let text = el
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

#[async_trait]
impl BaseSourceFetcher for HttpSourceFetcher {
    async fn list_units(&self, source_url: &str) -> Result<Vec<NewUnit>, FetchError> {
        let base = Url::parse(source_url)
            .map_err(|e| FetchError::Invalid(format!("{}: {}", source_url, e)))?;

        let first = self.fetch_html(source_url).await?;
        let advertised = parse_total_pages(&first, &self.selectors)?;
        let total_pages = cap_pages(advertised, self.max_listing_pages);
        if total_pages < advertised {
            warn!(
                source_url,
                advertised,
                max_pages = self.max_listing_pages,
                "Listing advertises more pages than allowed, truncating"
            );
        }
        info!(source_url, total_pages, "Listing source units");

        let mut units = parse_listing_page(&first, &base, &self.selectors)?;
        for page in 2..=total_pages {
            tokio::time::sleep(self.page_delay).await;
            let url = listing_page_url(source_url, page);
            debug!(page, total_pages, "Fetching listing page");
            let html = self.fetch_html(&url).await?;
            units.extend(parse_listing_page(&html, &base, &self.selectors)?);
        }

        let mut seen = HashSet::new();
        units.retain(|u| seen.insert(u.ordinal));
        units.sort_by_key(|u| u.ordinal);
        info!(source_url, units = units.len(), "Source listing complete");
        Ok(units)
    }

    async fn fetch_content(&self, url: &str) -> Result<String, FetchError> {
        let html = self.fetch_html(url).await?;
        extract_content(&html, &self.selectors)?.ok_or_else(|| FetchError::Empty {
            url: url.to_string(),
        })
    }
}
