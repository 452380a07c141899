//! JSON API over the posting store, plus a trigger for a scrape pass.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jobagg_core::{JobPostingId, SearchCriteria, SuggestionField};
use jobagg_storage::{JobStore, StoreError};
use jobagg_sync::FleetManager;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "jobagg-web";

const DEFAULT_SEARCH_PAGE_SIZE: u32 = 9;
const DEFAULT_LATEST_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub fleet: Arc<FleetManager>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, fleet: Arc<FleetManager>) -> Self {
        Self { store, fleet }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchQuery {
    keywords: Option<String>,
    location: Option<String>,
    company_name: Option<String>,
    job_type: Option<String>,
    page_number: Option<u32>,
    page_size: Option<u32>,
}

impl SearchQuery {
    fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            keywords: self.keywords.clone(),
            location: self.location.clone(),
            company_name: self.company_name.clone(),
            job_type: self.job_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PageQuery {
    page_number: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TermQuery {
    #[serde(default)]
    term: String,
}

fn paging(page_number: Option<u32>, page_size: Option<u32>, default_size: u32) -> (u32, u32) {
    (
        page_number.unwrap_or(1).max(1),
        page_size.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE),
    )
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/scraping/start", post(start_scraping_handler))
        .route("/api/jobpostings", get(search_handler))
        .route("/api/jobpostings/latest", get(latest_handler))
        .route("/api/jobpostings/autocomplete/{field}", get(autocomplete_handler))
        .route("/api/jobpostings/{id}", get(posting_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn port_from_env() -> u16 {
    std::env::var("JOBAGG_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

/// Blocks until the pass finishes. A second request while a pass is running
/// waits for it and then runs its own.
async fn start_scraping_handler(State(state): State<Arc<AppState>>) -> Response {
    let summary = state.fleet.scrape_all().await;
    Json(json!({
        "message": format!("Scraping finished: {} new postings", summary.inserted()),
        "summary": summary,
    }))
    .into_response()
}

async fn search_handler(State(state): State<Arc<AppState>>, Query(query): Query<SearchQuery>) -> Response {
    let (page_number, page_size) = paging(query.page_number, query.page_size, DEFAULT_SEARCH_PAGE_SIZE);
    match state.store.search(&query.criteria(), page_number, page_size).await {
        Ok(postings) => Json(postings).into_response(),
        Err(err) => server_error(err),
    }
}

async fn latest_handler(State(state): State<Arc<AppState>>, Query(query): Query<PageQuery>) -> Response {
    let (page_number, page_size) = paging(query.page_number, query.page_size, DEFAULT_LATEST_PAGE_SIZE);
    match state.store.latest(page_number, page_size).await {
        Ok(postings) => Json(postings).into_response(),
        Err(err) => server_error(err),
    }
}

async fn posting_handler(State(state): State<Arc<AppState>>, Path(id): Path<JobPostingId>) -> Response {
    match state.store.get_posting(id).await {
        Ok(Some(posting)) => Json(posting).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("job posting {id} not found") })),
        )
            .into_response(),
        Err(err) => server_error(err),
    }
}

async fn autocomplete_handler(
    State(state): State<Arc<AppState>>,
    Path(field): Path<SuggestionField>,
    Query(query): Query<TermQuery>,
) -> Response {
    match state.store.suggestions(field, query.term.trim()).await {
        Ok(values) => Json(values).into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: StoreError) -> Response {
    error!(error = %err, "store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
