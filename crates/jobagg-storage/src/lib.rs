pub mod fetch;
pub mod memory;
pub mod postgres;
pub mod store;

pub use fetch::{
    classify_reqwest_error, classify_status, needs_fallback, BackoffPolicy, ContentFetcher,
    DetailContent, DetailFetchPolicy, FallbackReason, FetchError, FetchPath, FetchedResponse,
    HttpClientConfig, HttpFetcher, PageRenderer, RenderWait, RetryDisposition, DEFAULT_USER_AGENT,
};
#[cfg(feature = "browser")]
pub use fetch::ChromiumRenderer;
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use store::{JobStore, StoreError};

pub const CRATE_NAME: &str = "jobagg-storage";
