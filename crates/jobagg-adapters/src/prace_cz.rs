use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobagg_core::{external_id_for_url, PortalDescriptor};
use jobagg_storage::{ContentFetcher, DetailFetchPolicy, FetchPath, RenderWait};
use scraper::Html;
use tracing::debug;

use crate::{
    absolute_url, collect_listings, parse_selector, AdapterConfig, AdapterError, ListingHandle,
    PortalAdapter, StopPolicy,
};

pub(crate) const PORTAL_NAME: &str = "Prace.cz";
const BASE_URL: &str = "https://www.prace.cz";
const LOGO_URL: &str = "https://pracecdn.cz/images/logo-beata.svg";

const LISTING_SELECTOR: &str = "li.search-result__advert";
const LINK_SELECTOR: &str = "h3 a";
const DETAIL_SELECTOR: &str = ".advert__richtext";
/// Promo tile rendered inside the results list.
const SIGN_UP_TILE_ID: &str = "signUpWrapper";

pub struct PraceCzAdapter {
    descriptor: PortalDescriptor,
    config: AdapterConfig,
    detail_policy: DetailFetchPolicy,
    fetcher: Arc<ContentFetcher>,
}

impl PraceCzAdapter {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        let descriptor = PortalDescriptor::new(PORTAL_NAME, BASE_URL).with_logo(LOGO_URL);
        let detail_policy = DetailFetchPolicy {
            min_content_chars: 2_000,
            wait: RenderWait {
                markers: vec![DETAIL_SELECTOR.to_string()],
                page_load_timeout: Duration::from_secs(60),
                marker_timeout: Duration::from_secs(15),
            },
        };
        Self {
            descriptor,
            config: AdapterConfig {
                max_pages: 5,
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
        collect_listings(page_html, LISTING_SELECTOR, |el| {
            el.value().id() != Some(SIGN_UP_TILE_ID)
        })
    }

    /// Inner HTML of the advert body. Adverts hosted on an employer's own
    /// site have no such block; the whole `<body>` is used then.
    pub fn detail_body(html: &str) -> Result<String, AdapterError> {
        let document = Html::parse_document(html);
        let detail = parse_selector(DETAIL_SELECTOR)?;
        if let Some(node) = document.select(&detail).next() {
            return Ok(node.inner_html().trim().to_string());
        }
        let body = parse_selector("body")?;
        Ok(document
            .select(&body)
            .next()
            .map(|n| n.inner_html().trim().to_string())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PortalAdapter for PraceCzAdapter {
    fn descriptor(&self) -> &PortalDescriptor {
        &self.descriptor
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn page_url(&self, page_number: u32) -> String {
        format!("{BASE_URL}/nabidky/?page={page_number}")
    }

    async fn listings_on_page(&self, page_url: &str) -> Result<Vec<ListingHandle>, AdapterError> {
        let page = self.fetcher.fetch_page(page_url).await?;
        Self::parse_listings(&page.body)
    }

    fn extract_listing_url(&self, listing: &ListingHandle) -> Option<String> {
        let href = listing.first_attr(LINK_SELECTOR, "href").ok().flatten()?;
        absolute_url(BASE_URL, &href)
    }

    fn external_id(&self, listing: &ListingHandle, job_url: &str) -> String {
        listing
            .first_attr(LINK_SELECTOR, "data-jd")
            .ok()
            .flatten()
            .unwrap_or_else(|| external_id_for_url(job_url))
    }

    async fn fetch_content(&self, job_url: &str) -> Result<String, AdapterError> {
        let content = self.fetcher.fetch_detail(job_url, &self.detail_policy).await?;
        if content.path == FetchPath::Rendered {
            debug!(job_url, "detail served by renderer");
        }
        Self::detail_body(&content.html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobagg_storage::{HttpClientConfig, HttpFetcher};

    const RESULTS_PAGE: &str = r#"
        <html><body><ul>
          <li class="search-result__advert" id="ad-1">
            <h3 class="half-standalone"><a href="/nabidky/1001/" data-jd="1001">Rust Developer</a></h3>
            <div class="search-result__advert__box__item--company">Acme</div>
          </li>
          <li class="search-result__advert" id="signUpWrapper"><a href="/registrace/">Sign up</a></li>
          <li class="search-result__advert" id="ad-2">
            <h3 class="half-standalone"><a href="https://acme.jobs.cz/detail/77">Tester</a></h3>
          </li>
          <li class="search-result__advert" id="ad-3"><span>no link here</span></li>
        </ul></body></html>"#;

    fn adapter() -> PraceCzAdapter {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        PraceCzAdapter::new(Arc::new(ContentFetcher::new(http)))
    }

    #[test]
    fn skips_sign_up_tile() {
        let listings = PraceCzAdapter::parse_listings(RESULTS_PAGE).unwrap();
        assert_eq!(listings.len(), 3);
        assert!(listings.iter().all(|l| !l.html().contains("signUpWrapper")));
    }

    #[test]
    fn urls_and_ids_from_listing() {
        let adapter = adapter();
        let listings = PraceCzAdapter::parse_listings(RESULTS_PAGE).unwrap();

        let first_url = adapter.extract_listing_url(&listings[0]).unwrap();
        assert_eq!(first_url, "https://www.prace.cz/nabidky/1001/");
        assert_eq!(adapter.external_id(&listings[0], &first_url), "1001");

        let second_url = adapter.extract_listing_url(&listings[1]).unwrap();
        assert_eq!(second_url, "https://acme.jobs.cz/detail/77");
        assert_eq!(adapter.external_id(&listings[1], &second_url), external_id_for_url(&second_url));

        assert_eq!(adapter.extract_listing_url(&listings[2]), None);
    }

    #[test]
    fn page_urls_and_defaults() {
        let adapter = adapter();
        assert_eq!(adapter.page_url(3), "https://www.prace.cz/nabidky/?page=3");
        assert_eq!(adapter.config().max_pages, 5);
        assert_eq!(adapter.config().stop_policy, StopPolicy::EarlyStopOnKnown);
        assert_eq!(adapter.descriptor().name, "Prace.cz");
    }

    #[test]
    fn detail_body_prefers_richtext_block() {
        let html = r#"<html><body><nav>menu</nav><div class="advert__richtext"><p>Build <b>things</b></p></div></body></html>"#;
        assert_eq!(PraceCzAdapter::detail_body(html).unwrap(), "<p>Build <b>things</b></p>");

        let foreign = r#"<html><body><main>Employer page</main></body></html>"#;
        assert_eq!(PraceCzAdapter::detail_body(foreign).unwrap(), "<main>Employer page</main>");
    }
}
