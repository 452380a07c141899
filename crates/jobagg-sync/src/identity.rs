use std::collections::HashMap;
use std::sync::Arc;

use jobagg_core::{Company, CompanyDraft, Portal, PortalDescriptor};
use jobagg_extract::Extractor;
use jobagg_storage::{JobStore, StoreError};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Read-or-create for the portal row. A concurrent creator winning the
/// insert race is resolved by re-reading.
pub async fn ensure_portal(store: &dyn JobStore, descriptor: &PortalDescriptor) -> Result<Portal, StoreError> {
    if let Some(portal) = store.get_portal_by_name(&descriptor.name).await? {
        return Ok(portal);
    }
    match store.add_portal(descriptor).await {
        Ok(portal) => {
            info!(portal = %portal.name, portal_id = portal.id, "created portal");
            Ok(portal)
        }
        Err(err) if err.is_duplicate() => store
            .get_portal_by_name(&descriptor.name)
            .await?
            .ok_or(err),
        Err(err) => Err(err),
    }
}

/// Run-scoped company resolution. Concurrent callers for one name share a
/// single lookup, enrichment call and insert. A failed resolution is not
/// cached, so the next caller retries.
pub struct CompanyResolver {
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    cells: Mutex<HashMap<String, Arc<OnceCell<Company>>>>,
}

impl CompanyResolver {
    pub fn new(store: Arc<dyn JobStore>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            store,
            extractor,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, name: &str) -> Result<Company, StoreError> {
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(name.to_string()).or_default().clone()
        };
        cell.get_or_try_init(|| self.load_or_create(name))
            .await
            .cloned()
    }

    async fn load_or_create(&self, name: &str) -> Result<Company, StoreError> {
        if let Some(company) = self.store.get_company_by_name(name).await? {
            debug!(company = name, company_id = company.id, "company already stored");
            return Ok(company);
        }
        let draft = match self.extractor.extract_company(name).await {
            Some(data) => CompanyDraft::from_company_data(name, data),
            None => {
                debug!(company = name, "no enrichment; using placeholder");
                CompanyDraft::placeholder(name)
            }
        };
        let company = self.store.add_company(&draft).await?;
        info!(company = name, company_id = company.id, "created company");
        Ok(company)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobagg_core::{CompanyData, JobData, PLACEHOLDER_COMPANY_DESCRIPTION};
    use jobagg_storage::MemoryJobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowEnricher {
        calls: AtomicUsize,
        enrich: bool,
    }

    #[async_trait]
    impl Extractor for SlowEnricher {
        async fn extract_job(&self, _: &str, _: &str, _: &PortalDescriptor) -> Option<JobData> {
            None
        }

        async fn extract_company(&self, name: &str) -> Option<CompanyData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.enrich.then(|| CompanyData {
                company_name: name.to_uppercase(),
                industry: Some("Software".into()),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn concurrent_resolution_enriches_once() {
        let store = Arc::new(MemoryJobStore::new());
        let enricher = Arc::new(SlowEnricher {
            calls: AtomicUsize::new(0),
            enrich: true,
        });
        let resolver = Arc::new(CompanyResolver::new(store.clone(), enricher.clone()));

        let tasks = (0..10)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("Acme").await.unwrap().id })
            })
            .collect::<Vec<_>>();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
        let companies = store.companies().await;
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].name, "Acme");
        assert_eq!(companies[0].industry.as_deref(), Some("Software"));
        // Enrichment without a description keeps the placeholder text.
        assert_eq!(companies[0].description.as_deref(), Some(PLACEHOLDER_COMPANY_DESCRIPTION));
    }

    #[tokio::test]
    async fn stored_company_skips_enrichment() {
        let store = Arc::new(MemoryJobStore::new());
        let existing = store.add_company(&CompanyDraft::placeholder("Acme")).await.unwrap();
        let enricher = Arc::new(SlowEnricher {
            calls: AtomicUsize::new(0),
            enrich: true,
        });
        let resolver = CompanyResolver::new(store.clone(), enricher.clone());
        assert_eq!(resolver.resolve("Acme").await.unwrap().id, existing.id);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_enrichment_uses_placeholder() {
        let store = Arc::new(MemoryJobStore::new());
        let enricher = Arc::new(SlowEnricher {
            calls: AtomicUsize::new(0),
            enrich: false,
        });
        let resolver = CompanyResolver::new(store, enricher);
        let company = resolver.resolve("Globex").await.unwrap();
        assert_eq!(company.description.as_deref(), Some(PLACEHOLDER_COMPANY_DESCRIPTION));
    }

    #[tokio::test]
    async fn portal_is_created_once() {
        let store = MemoryJobStore::new();
        let descriptor = PortalDescriptor::new("Prace.cz", "https://www.prace.cz");
        let first = ensure_portal(&store, &descriptor).await.unwrap();
        let second = ensure_portal(&store, &descriptor).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.portals().await.len(), 1);
    }
}
