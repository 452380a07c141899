//! HTTP retrieval with per-host limits and retry, plus the hardened detail
//! fetch that falls back to a script-executing renderer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Browser-like UA; several portals serve a stripped page to unknown agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            global_concurrency: 32,
            per_host_concurrency: 10,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    /// Host the request ended on after redirects.
    pub final_host: Option<String>,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("rendering failed for {url}: {message}")]
    Render { url: String, message: String },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host_limit: config.per_host_concurrency.max(1),
            per_host: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    /// GET `url` as text. Non-success statuses are errors; 5xx/429 and
    /// transient transport failures are retried with backoff first.
    pub async fn fetch_text(&self, host: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");
        let per_host = self.per_host_semaphore(host).await;
        let _host = per_host.acquire().await.expect("semaphore not closed");

        let span = info_span!("http_fetch", host, url);
        self.fetch_with_retry(url).instrument(span).await
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let final_host = resp.url().host_str().map(str::to_owned);

                    if status.is_success() {
                        let body = resp.text().await?;
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            final_host,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(%status, attempt, "retrying after status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying after transport error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

/// What the renderer waits for, and for how long, before reading the DOM.
#[derive(Debug, Clone)]
pub struct RenderWait {
    pub markers: Vec<String>,
    pub page_load_timeout: Duration,
    pub marker_timeout: Duration,
}

impl Default for RenderWait {
    fn default() -> Self {
        Self {
            markers: Vec::new(),
            page_load_timeout: Duration::from_secs(60),
            marker_timeout: Duration::from_secs(15),
        }
    }
}

/// Heavier retrieval path that executes page scripts. Step timeouts must
/// yield the partial DOM rather than an error.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, wait: &RenderWait) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct DetailFetchPolicy {
    /// Bodies shorter than this (in chars) are treated as implausible.
    pub min_content_chars: usize,
    pub wait: RenderWait,
}

impl Default for DetailFetchPolicy {
    fn default() -> Self {
        Self {
            min_content_chars: 500,
            wait: RenderWait::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Failed(String),
    ForeignHost(String),
    TooShort(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPath {
    Primary,
    Rendered,
}

#[derive(Debug, Clone)]
pub struct DetailContent {
    pub html: String,
    pub final_url: String,
    pub path: FetchPath,
}

fn url_host(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_owned)
}

fn same_site(expected: &str, actual: &str) -> bool {
    let strip = |h: &str| h.trim_start_matches("www.").to_ascii_lowercase();
    strip(expected) == strip(actual)
}

/// Decides whether a primary result for `requested_url` needs the rendering
/// fallback. A foreign host means the request was redirected off the site it
/// was sent to; links that point off-portal to begin with are not redirects.
pub fn needs_fallback(
    requested_url: &str,
    primary: &Result<FetchedResponse, FetchError>,
    policy: &DetailFetchPolicy,
) -> Option<FallbackReason> {
    let resp = match primary {
        Ok(resp) => resp,
        Err(err) => return Some(FallbackReason::Failed(err.to_string())),
    };
    if let (Some(requested), Some(actual)) = (url_host(requested_url), resp.final_host.as_deref()) {
        if !same_site(&requested, actual) {
            return Some(FallbackReason::ForeignHost(actual.to_string()));
        }
    }
    let chars = resp.body.chars().count();
    if chars < policy.min_content_chars {
        return Some(FallbackReason::TooShort(chars));
    }
    None
}

/// Fetcher handed to adapters: plain pages for listings, hardened retrieval
/// for detail pages.
pub struct ContentFetcher {
    http: Arc<HttpFetcher>,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl ContentFetcher {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self {
            http,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    pub async fn fetch_page(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let host = url_host(url).unwrap_or_else(|| "unknown".to_string());
        self.http.fetch_text(&host, url).await
    }

    pub async fn fetch_detail(
        &self,
        url: &str,
        policy: &DetailFetchPolicy,
    ) -> Result<DetailContent, FetchError> {
        let primary = self.fetch_page(url).await;
        self.finish_detail(url, primary, policy).await
    }

    async fn finish_detail(
        &self,
        url: &str,
        primary: Result<FetchedResponse, FetchError>,
        policy: &DetailFetchPolicy,
    ) -> Result<DetailContent, FetchError> {
        let Some(reason) = needs_fallback(url, &primary, policy) else {
            let resp = primary?;
            return Ok(DetailContent {
                html: resp.body,
                final_url: resp.final_url,
                path: FetchPath::Primary,
            });
        };

        let Some(renderer) = &self.renderer else {
            debug!(url, ?reason, "no renderer configured; keeping primary result");
            let resp = primary?;
            return Ok(DetailContent {
                html: resp.body,
                final_url: resp.final_url,
                path: FetchPath::Primary,
            });
        };

        debug!(url, ?reason, "falling back to renderer");
        match renderer.render(url, &policy.wait).await {
            Ok(html) => Ok(DetailContent {
                html,
                final_url: url.to_string(),
                path: FetchPath::Rendered,
            }),
            Err(err) => {
                warn!(url, error = %err, "renderer failed");
                let resp = primary.map_err(|_| err)?;
                Ok(DetailContent {
                    html: resp.body,
                    final_url: resp.final_url,
                    path: FetchPath::Primary,
                })
            }
        }
    }
}

#[cfg(feature = "browser")]
pub use chromium::ChromiumRenderer;

#[cfg(feature = "browser")]
mod chromium {
    use super::{FetchError, PageRenderer, RenderWait};
    use async_trait::async_trait;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tracing::{debug, warn};

    /// Headless Chromium, launched on first use and shared afterwards.
    #[derive(Default)]
    pub struct ChromiumRenderer {
        browser: Mutex<Option<Browser>>,
    }

    impl ChromiumRenderer {
        pub fn new() -> Self {
            Self::default()
        }

        async fn new_page(&self, url: &str) -> Result<Page, FetchError> {
            let render_err = |message: String| FetchError::Render {
                url: url.to_string(),
                message,
            };
            let mut guard = self.browser.lock().await;
            if guard.is_none() {
                let config = BrowserConfig::builder().build().map_err(render_err)?;
                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| render_err(e.to_string()))?;
                tokio::spawn(async move {
                    while let Some(event) = handler.next().await {
                        if event.is_err() {
                            break;
                        }
                    }
                });
                *guard = Some(browser);
            }
            let browser = guard
                .as_ref()
                .ok_or_else(|| render_err("browser not initialized".to_string()))?;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| render_err(e.to_string()))
        }
    }

    #[async_trait]
    impl PageRenderer for ChromiumRenderer {
        async fn render(&self, url: &str, wait: &RenderWait) -> Result<String, FetchError> {
            let page = self.new_page(url).await?;

            match tokio::time::timeout(wait.page_load_timeout, page.goto(url)).await {
                Ok(Ok(_)) => debug!(url, "page loaded"),
                Ok(Err(e)) => warn!(url, error = %e, "navigation error; reading partial DOM"),
                Err(_) => warn!(url, "page load timed out; reading partial DOM"),
            }

            for marker in &wait.markers {
                match tokio::time::timeout(wait.marker_timeout, page.find_element(marker.as_str())).await {
                    Ok(Ok(_)) => debug!(url, %marker, "content marker present"),
                    Ok(Err(e)) => debug!(url, %marker, error = %e, "content marker missing"),
                    Err(_) => warn!(url, %marker, "timed out waiting for content marker"),
                }
            }

            let html = page.content().await.map_err(|e| FetchError::Render {
                url: url.to_string(),
                message: e.to_string(),
            });
            let _ = page.close().await;
            html
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedRenderer {
        html: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageRenderer for CannedRenderer {
        async fn render(&self, url: &str, _wait: &RenderWait) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.html.map(str::to_string).ok_or_else(|| FetchError::Render {
                url: url.to_string(),
                message: "boom".into(),
            })
        }
    }

    fn ok_response(final_url: &str, body: &str) -> Result<FetchedResponse, FetchError> {
        Ok(FetchedResponse {
            status: StatusCode::OK,
            final_url: final_url.to_string(),
            final_host: Url::parse(final_url).ok().and_then(|u| u.host_str().map(str::to_owned)),
            body: body.to_string(),
        })
    }

    fn policy() -> DetailFetchPolicy {
        DetailFetchPolicy {
            min_content_chars: 20,
            wait: RenderWait::default(),
        }
    }

    fn fetcher(renderer: Option<Arc<CannedRenderer>>) -> ContentFetcher {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let fetcher = ContentFetcher::new(http);
        match renderer {
            Some(r) => fetcher.with_renderer(r),
            None => fetcher,
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn only_server_errors_and_throttling_retry() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn fallback_triggers() {
        let p = policy();
        let long = "x".repeat(40);
        let requested = "https://www.prace.cz/a";
        assert_eq!(needs_fallback(requested, &ok_response("https://prace.cz/a", &long), &p), None);
        assert_eq!(
            needs_fallback(requested, &ok_response("https://login.example.com/a", &long), &p),
            Some(FallbackReason::ForeignHost("login.example.com".into()))
        );
        assert_eq!(
            needs_fallback(requested, &ok_response("https://www.prace.cz/a", "short"), &p),
            Some(FallbackReason::TooShort(5))
        );
        let failed = Err(FetchError::HttpStatus {
            status: 403,
            url: requested.into(),
        });
        assert!(matches!(needs_fallback(requested, &failed, &p), Some(FallbackReason::Failed(_))));
    }

    #[test]
    fn off_portal_link_without_redirect_is_not_foreign() {
        let long = "x".repeat(40);
        let employer = "https://acme.jobs.cz/detail/77";
        assert_eq!(needs_fallback(employer, &ok_response(employer, &long), &policy()), None);
        assert_eq!(
            needs_fallback(employer, &ok_response("https://sso.acme.test/login", &long), &policy()),
            Some(FallbackReason::ForeignHost("sso.acme.test".into()))
        );
    }

    #[test]
    fn bracketed_ipv6_hosts_compare_whole() {
        let long = "x".repeat(40);
        let requested = "http://[::1]:8080/jobs/1";
        assert_eq!(url_host(requested).as_deref(), Some("[::1]"));
        assert_eq!(needs_fallback(requested, &ok_response("http://[::1]:8080/jobs/1", &long), &policy()), None);
        assert_eq!(
            needs_fallback(requested, &ok_response("http://[::2]:8080/jobs/1", &long), &policy()),
            Some(FallbackReason::ForeignHost("[::2]".into()))
        );
        assert_eq!(url_host("not a url"), None);
    }

    #[tokio::test]
    async fn short_primary_uses_rendered_dom() {
        let renderer = Arc::new(CannedRenderer {
            html: Some("<div class=\"advert\">rendered</div>"),
            calls: AtomicUsize::new(0),
        });
        let content = fetcher(Some(renderer.clone()))
            .finish_detail("https://www.prace.cz/a", ok_response("https://www.prace.cz/a", "tiny"), &policy())
            .await
            .unwrap();
        assert_eq!(content.path, FetchPath::Rendered);
        assert!(content.html.contains("rendered"));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn renderer_failure_keeps_primary_body() {
        let renderer = Arc::new(CannedRenderer {
            html: None,
            calls: AtomicUsize::new(0),
        });
        let content = fetcher(Some(renderer))
            .finish_detail("https://www.prace.cz/a", ok_response("https://www.prace.cz/a", "tiny"), &policy())
            .await
            .unwrap();
        assert_eq!(content.path, FetchPath::Primary);
        assert_eq!(content.html, "tiny");
    }

    #[tokio::test]
    async fn failed_primary_without_renderer_is_an_error() {
        let failed = Err(FetchError::HttpStatus {
            status: 500,
            url: "https://www.prace.cz/a".into(),
        });
        let result = fetcher(None)
            .finish_detail("https://www.prace.cz/a", failed, &policy())
            .await;
        assert!(matches!(result, Err(FetchError::HttpStatus { status: 500, .. })));
    }

    #[tokio::test]
    async fn good_primary_skips_renderer() {
        let renderer = Arc::new(CannedRenderer {
            html: Some("never"),
            calls: AtomicUsize::new(0),
        });
        let body = "y".repeat(64);
        let content = fetcher(Some(renderer.clone()))
            .finish_detail("https://www.prace.cz/a", ok_response("https://prace.cz/a", &body), &policy())
            .await
            .unwrap();
        assert_eq!(content.path, FetchPath::Primary);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }
}
