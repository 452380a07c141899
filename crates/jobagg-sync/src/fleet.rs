use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobagg_adapters::PortalAdapter;
use jobagg_extract::Extractor;
use jobagg_storage::JobStore;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::dedup::DedupGate;
use crate::orchestrator::{Orchestrator, StopReason};
use crate::service::JobPostingService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum PortalStatus {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PortalRunSummary {
    pub portal: String,
    pub status: PortalStatus,
    pub pages_fetched: u32,
    pub new_postings: usize,
    pub inserted: usize,
    pub skipped_duplicates: usize,
    pub stop_reason: Option<StopReason>,
}

impl PortalRunSummary {
    fn failed(portal: &str, error: String) -> Self {
        Self {
            portal: portal.to_string(),
            status: PortalStatus::Failed(error),
            pages_fetched: 0,
            new_postings: 0,
            inserted: 0,
            skipped_duplicates: 0,
            stop_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub portals: Vec<PortalRunSummary>,
}

impl ScrapeSummary {
    pub fn inserted(&self) -> usize {
        self.portals.iter().map(|p| p.inserted).sum()
    }
}

/// Runs every registered adapter one after another and persists each
/// adapter's batch before moving on.
pub struct FleetManager {
    adapters: Vec<Arc<dyn PortalAdapter>>,
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    gate: Arc<DedupGate>,
    service: JobPostingService,
    running: Mutex<()>,
}

impl FleetManager {
    pub fn new(
        adapters: Vec<Arc<dyn PortalAdapter>>,
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            adapters,
            gate: Arc::new(DedupGate::new(store.clone())),
            service: JobPostingService::new(store.clone()),
            store,
            extractor,
            running: Mutex::new(()),
        }
    }

    pub fn portal_names(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|a| a.descriptor().name.clone())
            .collect()
    }

    /// One full pass over all portals. Concurrent calls queue behind the
    /// running pass. An adapter that errors or panics is recorded as failed
    /// and the next one still runs.
    pub async fn scrape_all(&self) -> ScrapeSummary {
        let _running = self.running.lock().await;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("scrape_all", %run_id);

        let portals = async {
            let mut portals = Vec::with_capacity(self.adapters.len());
            for adapter in &self.adapters {
                portals.push(self.run_adapter(adapter.clone()).await);
            }
            portals
        }
        .instrument(span)
        .await;

        let summary = ScrapeSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            portals,
        };
        info!(%run_id, inserted = summary.inserted(), "scrape pass finished");
        summary
    }

    async fn run_adapter(&self, adapter: Arc<dyn PortalAdapter>) -> PortalRunSummary {
        let name = adapter.descriptor().name.clone();
        let orchestrator = Orchestrator::new(
            adapter,
            self.store.clone(),
            self.extractor.clone(),
            self.gate.clone(),
        );

        let report = match tokio::spawn(async move { orchestrator.scrape().await }).await {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                error!(portal = %name, error = %err, "scrape failed");
                return PortalRunSummary::failed(&name, err.to_string());
            }
            Err(join_err) => {
                error!(portal = %name, error = %join_err, "scrape task aborted");
                return PortalRunSummary::failed(&name, join_err.to_string());
            }
        };

        let new_postings = report.postings.len();
        match self.service.add_postings(report.postings).await {
            Ok(outcome) => PortalRunSummary {
                portal: name,
                status: PortalStatus::Completed,
                pages_fetched: report.pages_fetched,
                new_postings,
                inserted: outcome.inserted,
                skipped_duplicates: outcome.skipped_duplicates,
                stop_reason: Some(report.stop_reason),
            },
            Err(err) => {
                error!(portal = %name, error = %err, "persisting postings failed");
                PortalRunSummary {
                    status: PortalStatus::Failed(err.to_string()),
                    pages_fetched: report.pages_fetched,
                    new_postings,
                    stop_reason: Some(report.stop_reason),
                    ..PortalRunSummary::failed(&name, String::new())
                }
            }
        }
    }
}
