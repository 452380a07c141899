use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use jobagg_adapters::{ListingHandle, PortalAdapter, StopPolicy};
use jobagg_core::{JobPostingDraft, Portal};
use jobagg_extract::Extractor;
use jobagg_storage::{JobStore, StoreError};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dedup::DedupGate;
use crate::identity::{ensure_portal, CompanyResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    MaxPages,
    KnownPosting,
    PageFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingOutcome {
    Accepted,
    /// Already stored under its external id.
    Known,
    /// Assembled, but its hash or id is already stored or taken this run.
    Duplicate,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub portal: Portal,
    pub postings: Vec<JobPostingDraft>,
    pub pages_fetched: u32,
    pub known: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub stop_reason: StopReason,
}

/// Postings accepted so far in one run, with their keys so a posting seen
/// twice within the run is only kept once.
#[derive(Default)]
struct RunAccumulator {
    inner: Mutex<AccumulatorState>,
}

#[derive(Default)]
struct AccumulatorState {
    postings: Vec<JobPostingDraft>,
    hashes: HashSet<String>,
    external_ids: HashSet<String>,
}

impl RunAccumulator {
    fn lock(&self) -> std::sync::MutexGuard<'_, AccumulatorState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn has_external_id(&self, external_id: &str) -> bool {
        self.lock().external_ids.contains(external_id)
    }

    fn accept(&self, draft: JobPostingDraft) -> bool {
        let mut state = self.lock();
        let hash_taken = draft
            .content_hash
            .as_ref()
            .is_some_and(|h| state.hashes.contains(h));
        let id_taken = draft
            .external_id
            .as_ref()
            .is_some_and(|id| state.external_ids.contains(id));
        if hash_taken || id_taken {
            return false;
        }
        if let Some(hash) = &draft.content_hash {
            state.hashes.insert(hash.clone());
        }
        if let Some(id) = &draft.external_id {
            state.external_ids.insert(id.clone());
        }
        state.postings.push(draft);
        true
    }

    fn into_postings(self) -> Vec<JobPostingDraft> {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .postings
    }
}

/// Drives one adapter through its pages and returns the postings that are
/// new as of this run. Nothing is written except portal and company rows.
pub struct Orchestrator {
    adapter: Arc<dyn PortalAdapter>,
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    gate: Arc<DedupGate>,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn PortalAdapter>,
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        gate: Arc<DedupGate>,
    ) -> Self {
        Self {
            adapter,
            store,
            extractor,
            gate,
        }
    }

    pub async fn scrape(&self) -> Result<ScrapeReport, StoreError> {
        let descriptor = self.adapter.descriptor();
        let config = self.adapter.config();
        let span = info_span!("scrape", portal = %descriptor.name);

        async {
            let portal = ensure_portal(self.store.as_ref(), descriptor).await?;
            let companies = CompanyResolver::new(self.store.clone(), self.extractor.clone());
            let accumulator = RunAccumulator::default();

            let mut pages_fetched = 0;
            let (mut known, mut duplicates, mut skipped) = (0, 0, 0);
            let mut stop_reason = StopReason::MaxPages;

            for page_number in 1..=config.max_pages {
                let page_url = self.adapter.page_url(page_number);
                pages_fetched += 1;
                let listings = match self.adapter.listings_on_page(&page_url).await {
                    Ok(listings) => listings,
                    Err(err) => {
                        warn!(page_number, %page_url, error = %err, "page fetch failed; ending run");
                        stop_reason = StopReason::PageFailed;
                        break;
                    }
                };
                if listings.is_empty() {
                    info!(page_number, "no listings; feed exhausted");
                    stop_reason = StopReason::Exhausted;
                    break;
                }
                debug!(page_number, listings = listings.len(), "processing page");

                let outcomes = stream::iter(listings)
                    .map(|listing| self.process_listing(&portal, &companies, &accumulator, listing))
                    .buffer_unordered(config.max_parallelism.max(1))
                    .collect::<Vec<_>>()
                    .await;

                let mut page_known = 0;
                for outcome in outcomes {
                    match outcome {
                        ListingOutcome::Accepted => {}
                        ListingOutcome::Known => page_known += 1,
                        ListingOutcome::Duplicate => duplicates += 1,
                        ListingOutcome::Skipped => skipped += 1,
                    }
                }
                known += page_known;

                if config.stop_policy == StopPolicy::EarlyStopOnKnown && page_known > 0 {
                    info!(page_number, known = page_known, "reached known postings; stopping");
                    stop_reason = StopReason::KnownPosting;
                    break;
                }
            }

            let postings = accumulator.into_postings();
            info!(
                new = postings.len(),
                pages = pages_fetched,
                known,
                duplicates,
                skipped,
                ?stop_reason,
                "scrape finished"
            );
            Ok::<_, StoreError>(ScrapeReport {
                portal,
                postings,
                pages_fetched,
                known,
                duplicates,
                skipped,
                stop_reason,
            })
        }
        .instrument(span)
        .await
    }

    async fn process_listing(
        &self,
        portal: &Portal,
        companies: &CompanyResolver,
        accumulator: &RunAccumulator,
        listing: ListingHandle,
    ) -> ListingOutcome {
        let Some(job_url) = self.adapter.extract_listing_url(&listing) else {
            warn!("listing has no job URL; skipping");
            return ListingOutcome::Skipped;
        };
        let external_id = self.adapter.external_id(&listing, &job_url);

        let _guard = self.gate.acquire(&external_id).await;

        if accumulator.has_external_id(&external_id) {
            debug!(%job_url, %external_id, "listing already taken this run");
            return ListingOutcome::Duplicate;
        }
        match self.gate.exists_by_external_id(&external_id).await {
            Ok(true) => {
                debug!(%job_url, %external_id, "posting already stored");
                return ListingOutcome::Known;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%job_url, error = %err, "external id lookup failed; skipping");
                return ListingOutcome::Skipped;
            }
        }

        let content = match self.adapter.fetch_content(&job_url).await {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => {
                warn!(%job_url, "detail content empty; skipping");
                return ListingOutcome::Skipped;
            }
            Err(err) => {
                warn!(%job_url, error = %err, "detail fetch failed; skipping");
                return ListingOutcome::Skipped;
            }
        };

        let descriptor = self.adapter.descriptor();
        let Some(mut job) = self.extractor.extract_job(&content, &job_url, descriptor).await else {
            warn!(%job_url, "extraction returned nothing; skipping");
            return ListingOutcome::Skipped;
        };
        if job.company_name.trim().is_empty() {
            job.company_name = descriptor.name.clone();
        }
        job.apply_url = job_url.clone();

        let company = match companies.resolve(job.company_name.trim()).await {
            Ok(company) => company,
            Err(err) => {
                warn!(%job_url, company = %job.company_name, error = %err, "company resolution failed; skipping");
                return ListingOutcome::Skipped;
            }
        };

        let draft = JobPostingDraft::assemble(
            job,
            Some(external_id),
            portal.id,
            company.id,
            &self.adapter.config().currency,
            Utc::now(),
        );

        if let Some(hash) = &draft.content_hash {
            match self.gate.exists_by_hash(hash).await {
                Ok(true) => {
                    debug!(%job_url, "same title and URL already stored");
                    return ListingOutcome::Duplicate;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(%job_url, error = %err, "hash lookup failed; skipping");
                    return ListingOutcome::Skipped;
                }
            }
        }

        if accumulator.accept(draft) {
            ListingOutcome::Accepted
        } else {
            debug!(%job_url, "duplicate within this run");
            ListingOutcome::Duplicate
        }
    }
}
