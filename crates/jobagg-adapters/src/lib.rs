//! Portal adapter contract and the concrete job-portal adapters.

mod jobs_contact;
mod prace_cz;

use std::sync::Arc;

use async_trait::async_trait;
use jobagg_core::{external_id_for_url, PortalDescriptor};
use jobagg_storage::{ContentFetcher, FetchError};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use jobs_contact::JobsContactAdapter;
pub use prace_cz::PraceCzAdapter;

pub const CRATE_NAME: &str = "jobagg-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

/// When pagination stops, besides running out of listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Walk exactly `max_pages` pages; dedup alone keeps results fresh.
    BoundedPages,
    /// Stop after the first page that contains a listing already stored by
    /// external id. Only valid for reverse-chronological feeds.
    EarlyStopOnKnown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub max_pages: u32,
    pub max_parallelism: usize,
    pub stop_policy: StopPolicy,
    pub currency: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_pages: 2,
            max_parallelism: 10,
            stop_policy: StopPolicy::BoundedPages,
            currency: "CZK".to_string(),
        }
    }
}

/// Per-portal settings read from the registry file; unset fields keep the
/// adapter's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub max_pages: Option<u32>,
    pub max_parallelism: Option<usize>,
    pub stop_policy: Option<StopPolicy>,
    pub currency: Option<String>,
}

impl AdapterConfig {
    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(max_pages) = overrides.max_pages {
            self.max_pages = max_pages.max(1);
        }
        if let Some(max_parallelism) = overrides.max_parallelism {
            self.max_parallelism = max_parallelism.max(1);
        }
        if let Some(stop_policy) = overrides.stop_policy {
            self.stop_policy = stop_policy;
        }
        if let Some(currency) = &overrides.currency {
            self.currency = currency.clone();
        }
        self
    }
}

/// One job ad on a results page, kept as an owned HTML fragment so it can
/// cross task boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingHandle {
    html: String,
}

impl ListingHandle {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn first_attr(&self, selector: &str, attr: &str) -> Result<Option<String>, AdapterError> {
        let fragment = Html::parse_fragment(&self.html);
        let sel = parse_selector(selector)?;
        Ok(fragment
            .select(&sel)
            .next()
            .and_then(|n| n.value().attr(attr))
            .and_then(|s| text_or_none(s.to_string())))
    }

    pub fn first_text(&self, selector: &str) -> Result<Option<String>, AdapterError> {
        let fragment = Html::parse_fragment(&self.html);
        let sel = parse_selector(selector)?;
        Ok(fragment
            .select(&sel)
            .next()
            .and_then(|n| text_or_none(n.text().collect::<String>())))
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|_| AdapterError::Selector(selector.to_string()))
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Splits a results page into listing handles, dropping elements `keep`
/// rejects.
pub(crate) fn collect_listings(
    page_html: &str,
    selector: &str,
    keep: impl Fn(&ElementRef<'_>) -> bool,
) -> Result<Vec<ListingHandle>, AdapterError> {
    let document = Html::parse_document(page_html);
    let sel = parse_selector(selector)?;
    Ok(document
        .select(&sel)
        .filter(|el| keep(el))
        .map(|el| ListingHandle::new(el.html()))
        .collect())
}

/// Resolves a possibly relative href against the portal base URL.
pub(crate) fn absolute_url(base_url: &str, href: &str) -> Option<String> {
    let base = url::Url::parse(base_url).ok()?;
    base.join(href.trim()).ok().map(String::from)
}

/// Contract every job portal implements. Pagination, concurrency and dedup
/// live in the orchestrator; adapters only know their site's markup.
#[async_trait]
pub trait PortalAdapter: Send + Sync {
    fn descriptor(&self) -> &PortalDescriptor;

    fn config(&self) -> &AdapterConfig;

    fn page_url(&self, page_number: u32) -> String;

    /// `Err` is a page failure; an empty list means the feed is exhausted.
    async fn listings_on_page(&self, page_url: &str) -> Result<Vec<ListingHandle>, AdapterError>;

    fn extract_listing_url(&self, listing: &ListingHandle) -> Option<String>;

    /// Stable source id. Defaults to a digest of the job URL.
    fn external_id(&self, _listing: &ListingHandle, job_url: &str) -> String {
        external_id_for_url(job_url)
    }

    /// Detail content for extraction; an empty string means nothing usable.
    async fn fetch_content(&self, job_url: &str) -> Result<String, AdapterError>;
}

/// Every built-in adapter with its default configuration.
pub fn builtin_adapters(fetcher: Arc<ContentFetcher>) -> Vec<Arc<dyn PortalAdapter>> {
    vec![
        Arc::new(PraceCzAdapter::new(fetcher.clone())),
        Arc::new(JobsContactAdapter::new(fetcher)),
    ]
}

/// Builds the named adapter with `overrides` applied.
pub fn adapter_by_name(
    name: &str,
    fetcher: Arc<ContentFetcher>,
    overrides: &ConfigOverrides,
) -> Option<Arc<dyn PortalAdapter>> {
    match name {
        prace_cz::PORTAL_NAME => {
            let adapter = PraceCzAdapter::new(fetcher);
            let config = adapter.config().clone().apply(overrides);
            Some(Arc::new(adapter.with_config(config)))
        }
        jobs_contact::PORTAL_NAME => {
            let adapter = JobsContactAdapter::new(fetcher);
            let config = adapter.config().clone().apply(overrides);
            Some(Arc::new(adapter.with_config(config)))
        }
        _ => None,
    }
}
