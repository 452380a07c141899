//! Scrape pipeline: per-portal orchestration, dedup, company resolution,
//! the sequential fleet runner and its scheduler.

pub mod config;
pub mod dedup;
pub mod fleet;
pub mod identity;
pub mod orchestrator;
pub mod schedule;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobagg_adapters::{adapter_by_name, builtin_adapters, PortalAdapter};
use jobagg_extract::Extractor;
use jobagg_storage::{ContentFetcher, HttpClientConfig, HttpFetcher, JobStore};
use tracing::{info, warn};

pub use config::{PortalEntry, PortalRegistry, SyncConfig};
pub use dedup::DedupGate;
pub use fleet::{FleetManager, PortalRunSummary, PortalStatus, ScrapeSummary};
pub use identity::{ensure_portal, CompanyResolver};
pub use orchestrator::{Orchestrator, ScrapeReport, StopReason};
pub use schedule::{default_windows, next_fire_time, ScrapeScheduler, ScrapeWindow};
pub use service::{JobPostingService, PersistOutcome};

pub const CRATE_NAME: &str = "jobagg-sync";

pub fn build_content_fetcher(config: &SyncConfig) -> Result<ContentFetcher> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })?;
    let fetcher = ContentFetcher::new(Arc::new(http));

    #[cfg(feature = "browser")]
    if config.browser_enabled {
        info!("rendering fallback enabled");
        return Ok(fetcher.with_renderer(Arc::new(jobagg_storage::ChromiumRenderer::new())));
    }
    if config.browser_enabled && !fetcher.has_renderer() {
        warn!("built without the browser feature; rendering fallback disabled");
    }
    Ok(fetcher)
}

/// Adapters named in the registry file, in file order. Without a registry
/// file every built-in adapter runs with its defaults.
pub fn build_adapters(config: &SyncConfig, fetcher: Arc<ContentFetcher>) -> Result<Vec<Arc<dyn PortalAdapter>>> {
    if !config.portals_file.exists() {
        warn!(path = %config.portals_file.display(), "no portal registry; using built-in adapters");
        return Ok(builtin_adapters(fetcher));
    }
    let registry = PortalRegistry::load(&config.portals_file)?;
    registry
        .enabled()
        .map(|entry| {
            adapter_by_name(&entry.name, fetcher.clone(), &entry.overrides)
                .with_context(|| format!("no adapter registered for portal {}", entry.name))
        })
        .collect()
}

pub fn build_fleet(
    config: &SyncConfig,
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
) -> Result<FleetManager> {
    let fetcher = Arc::new(build_content_fetcher(config)?);
    let adapters = build_adapters(config, fetcher)?;
    info!(
        portals = ?adapters.iter().map(|a| a.descriptor().name.as_str()).collect::<Vec<_>>(),
        "fleet ready"
    );
    Ok(FleetManager::new(adapters, store, extractor))
}
