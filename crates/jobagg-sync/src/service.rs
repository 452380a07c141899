use std::sync::Arc;

use jobagg_core::JobPostingDraft;
use jobagg_storage::{JobStore, StoreError};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub skipped_duplicates: usize,
}

/// Persistence side of a scrape: stores assembled postings, treating any
/// posting that became known in the meantime as a skip.
#[derive(Clone)]
pub struct JobPostingService {
    store: Arc<dyn JobStore>,
}

impl JobPostingService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn add_postings(&self, drafts: Vec<JobPostingDraft>) -> Result<PersistOutcome, StoreError> {
        let mut outcome = PersistOutcome::default();
        for draft in drafts {
            if let Some(hash) = &draft.content_hash {
                if self.store.exists_by_hash(hash).await? {
                    debug!(title = %draft.title, "posting already stored; skipping");
                    outcome.skipped_duplicates += 1;
                    continue;
                }
            }
            match self.store.add_posting(&draft).await {
                Ok(posting) => {
                    debug!(posting_id = posting.id, title = %posting.title, "stored posting");
                    outcome.inserted += 1;
                }
                Err(err) if err.is_duplicate() => {
                    debug!(title = %draft.title, error = %err, "lost insert race; skipping");
                    outcome.skipped_duplicates += 1;
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped_duplicates,
            "persisted scrape batch"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobagg_core::{content_hash, JobData};
    use jobagg_storage::MemoryJobStore;

    fn draft(title: &str, url: &str, external_id: &str) -> JobPostingDraft {
        let job = JobData {
            title: Some(title.into()),
            company_name: "Acme".into(),
            apply_url: url.into(),
            ..Default::default()
        };
        JobPostingDraft::assemble(job, Some(external_id.into()), 1, 1, "CZK", Utc::now())
    }

    #[tokio::test]
    async fn duplicates_count_as_skips() {
        let store = Arc::new(MemoryJobStore::new());
        let service = JobPostingService::new(store.clone());

        let first = service
            .add_postings(vec![draft("Dev", "https://x/1", "1"), draft("QA", "https://x/2", "2")])
            .await
            .unwrap();
        assert_eq!(first, PersistOutcome { inserted: 2, skipped_duplicates: 0 });

        let again = service
            .add_postings(vec![
                draft("Dev", "https://x/1", "9"),
                draft("Ops", "https://x/3", "2"),
                draft("Ops", "https://x/3", "3"),
            ])
            .await
            .unwrap();
        assert_eq!(again, PersistOutcome { inserted: 1, skipped_duplicates: 2 });
        assert!(store.exists_by_hash(&content_hash("Ops", "https://x/3")).await.unwrap());
        assert_eq!(store.postings().await.len(), 3);
    }
}
