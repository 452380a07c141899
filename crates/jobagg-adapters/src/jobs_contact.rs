use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobagg_core::{external_id_for_url, PortalDescriptor};
use jobagg_storage::{ContentFetcher, DetailFetchPolicy, RenderWait};
use scraper::Html;

use crate::{
    absolute_url, collect_listings, parse_selector, text_or_none, AdapterConfig, AdapterError,
    ListingHandle, PortalAdapter, StopPolicy,
};

pub(crate) const PORTAL_NAME: &str = "JobsContact.cz";
const BASE_URL: &str = "https://www.jobscontact.cz";

const LISTING_SELECTOR: &str = "div.job-box";
const LINK_SELECTOR: &str = "a[href]";
const DETAIL_SELECTOR: &str = ".job-content .content";
/// Everything after this heading is boilerplate about the agency.
const TRAILER_MARKER: &str = "Doplňující informace";
const ID_MARKER: &str = "_id";

pub struct JobsContactAdapter {
    descriptor: PortalDescriptor,
    config: AdapterConfig,
    detail_policy: DetailFetchPolicy,
    fetcher: Arc<ContentFetcher>,
}

impl JobsContactAdapter {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        let descriptor = PortalDescriptor::new(PORTAL_NAME, BASE_URL);
        let detail_policy = DetailFetchPolicy {
            min_content_chars: 1_000,
            wait: RenderWait {
                markers: vec![DETAIL_SELECTOR.to_string()],
                page_load_timeout: Duration::from_secs(60),
                marker_timeout: Duration::from_secs(10),
            },
        };
        Self {
            descriptor,
            config: AdapterConfig {
                max_pages: 5,
                max_parallelism: 5,
                stop_policy: StopPolicy::EarlyStopOnKnown,
                ..AdapterConfig::default()
            },
            detail_policy,
            fetcher,
        }
    }

    pub fn with_config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn parse_listings(page_html: &str) -> Result<Vec<ListingHandle>, AdapterError> {
        collect_listings(page_html, LISTING_SELECTOR, |_| true)
    }

    /// Id embedded in detail URLs such as `/prace/skladnik_id12345`.
    pub fn id_from_url(url: &str) -> Option<String> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let (_, id) = path.rsplit_once(ID_MARKER)?;
        text_or_none(id.trim_end_matches('/').to_string())
    }

    /// Text of the posting body up to the agency trailer.
    pub fn detail_text(html: &str) -> Result<String, AdapterError> {
        let document = Html::parse_document(html);
        let sel = parse_selector(DETAIL_SELECTOR)?;
        let Some(node) = document.select(&sel).next() else {
            return Ok(String::new());
        };
        let text = node
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let text = match text.find(TRAILER_MARKER) {
            Some(index) => &text[..index],
            None => text.as_str(),
        };
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl PortalAdapter for JobsContactAdapter {
    fn descriptor(&self) -> &PortalDescriptor {
        &self.descriptor
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn page_url(&self, page_number: u32) -> String {
        format!("{BASE_URL}/prace?page={page_number}")
    }

    async fn listings_on_page(&self, page_url: &str) -> Result<Vec<ListingHandle>, AdapterError> {
        let page = self.fetcher.fetch_page(page_url).await?;
        Self::parse_listings(&page.body)
    }

    fn extract_listing_url(&self, listing: &ListingHandle) -> Option<String> {
        let href = listing.first_attr(LINK_SELECTOR, "href").ok().flatten()?;
        absolute_url(BASE_URL, &href)
    }

    fn external_id(&self, _listing: &ListingHandle, job_url: &str) -> String {
        Self::id_from_url(job_url).unwrap_or_else(|| external_id_for_url(job_url))
    }

    async fn fetch_content(&self, job_url: &str) -> Result<String, AdapterError> {
        let content = self.fetcher.fetch_detail(job_url, &self.detail_policy).await?;
        Self::detail_text(&content.html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobagg_storage::{HttpClientConfig, HttpFetcher};

    fn adapter() -> JobsContactAdapter {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        JobsContactAdapter::new(Arc::new(ContentFetcher::new(http)))
    }

    #[test]
    fn listing_urls_and_native_ids() {
        let page = r#"<html><body>
            <div class="job-box"><a href="/prace/skladnik-brno_id4521"><h2>Skladník</h2><p>Brno</p></a></div>
            <div class="job-box"><a href="/prace/ridic"><h2>Řidič</h2></a></div>
            <div class="job-box"><h2>Bez odkazu</h2></div>
        </body></html>"#;
        let adapter = adapter();
        let listings = JobsContactAdapter::parse_listings(page).unwrap();
        assert_eq!(listings.len(), 3);

        let url = adapter.extract_listing_url(&listings[0]).unwrap();
        assert_eq!(url, "https://www.jobscontact.cz/prace/skladnik-brno_id4521");
        assert_eq!(adapter.external_id(&listings[0], &url), "4521");

        let url = adapter.extract_listing_url(&listings[1]).unwrap();
        assert_eq!(adapter.external_id(&listings[1], &url), external_id_for_url(&url));

        assert_eq!(adapter.extract_listing_url(&listings[2]), None);
    }

    #[test]
    fn id_parsing_ignores_query_and_trailing_slash() {
        assert_eq!(JobsContactAdapter::id_from_url("/prace/x_id77/?utm=1").as_deref(), Some("77"));
        assert_eq!(JobsContactAdapter::id_from_url("/prace/x_id"), None);
        assert_eq!(JobsContactAdapter::id_from_url("/prace/x"), None);
    }

    #[test]
    fn detail_text_is_cut_at_trailer() {
        let html = r#"<html><body><div class="job-content"><div class="content">
            <p>Hledáme skladníka.</p><ul><li>Noční směny</li></ul>
            <h3>Doplňující informace</h3><p>O agentuře</p>
        </div></div></body></html>"#;
        assert_eq!(
            JobsContactAdapter::detail_text(html).unwrap(),
            "Hledáme skladníka.\nNoční směny"
        );
        assert_eq!(JobsContactAdapter::detail_text("<html></html>").unwrap(), "");
    }

    #[test]
    fn defaults() {
        let adapter = adapter();
        assert_eq!(adapter.page_url(2), "https://www.jobscontact.cz/prace?page=2");
        assert_eq!(adapter.config().max_parallelism, 5);
        assert_eq!(adapter.descriptor().base_url, "https://www.jobscontact.cz");
    }
}
