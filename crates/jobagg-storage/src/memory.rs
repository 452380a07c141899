use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use jobagg_core::{
    page_offset, Company, CompanyDraft, JobPosting, JobPostingDetails, JobPostingDraft, JobPostingId,
    Portal, PortalDescriptor, SearchCriteria, SuggestionField, MAX_SUGGESTIONS,
};
use tokio::sync::RwLock;

use crate::store::{JobStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    portals: Vec<Portal>,
    companies: Vec<Company>,
    postings: Vec<JobPosting>,
}

/// In-process store with the same uniqueness rules as the Postgres one.
/// Used by tests and by `scrape --dry-run`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: RwLock<Tables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn postings(&self) -> Vec<JobPosting> {
        self.tables.read().await.postings.clone()
    }

    pub async fn companies(&self) -> Vec<Company> {
        self.tables.read().await.companies.clone()
    }

    pub async fn portals(&self) -> Vec<Portal> {
        self.tables.read().await.portals.clone()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn filter_set(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Tables {
    fn details(&self, posting: &JobPosting) -> JobPostingDetails {
        JobPostingDetails {
            posting: posting.clone(),
            portal: self.portals.iter().find(|p| p.id == posting.portal_id).cloned(),
            company: self.companies.iter().find(|c| c.id == posting.company_id).cloned(),
        }
    }

    fn matches(&self, posting: &JobPosting, criteria: &SearchCriteria) -> bool {
        if let Some(keywords) = filter_set(&criteria.keywords) {
            let in_title = contains_ci(&posting.title, keywords);
            let in_description = posting
                .description
                .as_deref()
                .is_some_and(|d| contains_ci(d, keywords));
            if !in_title && !in_description {
                return false;
            }
        }
        if let Some(location) = filter_set(&criteria.location) {
            if !posting.location.as_deref().is_some_and(|l| contains_ci(l, location)) {
                return false;
            }
        }
        if let Some(job_type) = filter_set(&criteria.job_type) {
            if !contains_ci(&posting.job_type, job_type) {
                return false;
            }
        }
        if let Some(company_name) = filter_set(&criteria.company_name) {
            let company = self.companies.iter().find(|c| c.id == posting.company_id);
            if !company.is_some_and(|c| contains_ci(&c.name, company_name)) {
                return false;
            }
        }
        true
    }

    fn page(
        &self,
        criteria: &SearchCriteria,
        page_number: u32,
        page_size: u32,
    ) -> Vec<JobPostingDetails> {
        let mut hits = self
            .postings
            .iter()
            .filter(|p| self.matches(p, criteria))
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        hits.into_iter()
            .skip(page_offset(page_number, page_size))
            .take(page_size as usize)
            .map(|p| self.details(p))
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn exists_by_hash(&self, content_hash: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .postings
            .iter()
            .any(|p| p.content_hash.as_deref() == Some(content_hash)))
    }

    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .postings
            .iter()
            .any(|p| p.external_id.as_deref() == Some(external_id)))
    }

    async fn add_posting(&self, draft: &JobPostingDraft) -> Result<JobPosting, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(external_id) = &draft.external_id {
            if tables
                .postings
                .iter()
                .any(|p| p.external_id.as_ref() == Some(external_id))
            {
                return Err(StoreError::Duplicate {
                    entity: "job_posting.external_id",
                    key: external_id.clone(),
                });
            }
        }
        if let Some(hash) = &draft.content_hash {
            if tables.postings.iter().any(|p| p.content_hash.as_ref() == Some(hash)) {
                return Err(StoreError::Duplicate {
                    entity: "job_posting.content_hash",
                    key: hash.clone(),
                });
            }
        }

        let now = Utc::now();
        let posting = JobPosting {
            id: tables.postings.len() as JobPostingId + 1,
            title: draft.title.clone(),
            location: draft.location.clone(),
            description: draft.description.clone(),
            salary_from: draft.salary_from,
            salary_to: draft.salary_to,
            currency: draft.currency.clone(),
            job_type: draft.job_type.clone(),
            apply_url: draft.apply_url.clone(),
            external_id: draft.external_id.clone(),
            content_hash: draft.content_hash.clone(),
            scraped_at: draft.scraped_at,
            is_active: true,
            created_at: now,
            updated_at: now,
            portal_id: draft.portal_id,
            company_id: draft.company_id,
        };
        tables.postings.push(posting.clone());
        Ok(posting)
    }

    async fn get_portal_by_name(&self, name: &str) -> Result<Option<Portal>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.portals.iter().find(|p| p.name == name).cloned())
    }

    async fn add_portal(&self, descriptor: &PortalDescriptor) -> Result<Portal, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.portals.iter().any(|p| p.name == descriptor.name) {
            return Err(StoreError::Duplicate {
                entity: "portal.name",
                key: descriptor.name.clone(),
            });
        }
        let now = Utc::now();
        let portal = Portal {
            id: tables.portals.len() as i64 + 1,
            name: descriptor.name.clone(),
            base_url: descriptor.base_url.clone(),
            logo_url: descriptor.logo_url.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.portals.push(portal.clone());
        Ok(portal)
    }

    async fn get_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.companies.iter().find(|c| c.name == name).cloned())
    }

    async fn add_company(&self, draft: &CompanyDraft) -> Result<Company, StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let company = Company {
            id: tables.companies.len() as i64 + 1,
            name: draft.name.clone(),
            description: draft.description.clone(),
            website_url: draft.website_url.clone(),
            logo_url: draft.logo_url.clone(),
            founded_year: draft.founded_year.clone(),
            headquarters: draft.headquarters.clone(),
            industry: draft.industry.clone(),
            employee_count: draft.employee_count.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.companies.push(company.clone());
        Ok(company)
    }

    async fn search(
        &self,
        criteria: &SearchCriteria,
        page_number: u32,
        page_size: u32,
    ) -> Result<Vec<JobPostingDetails>, StoreError> {
        Ok(self.tables.read().await.page(criteria, page_number, page_size))
    }

    async fn latest(&self, page_number: u32, page_size: u32) -> Result<Vec<JobPostingDetails>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .page(&SearchCriteria::default(), page_number, page_size))
    }

    async fn get_posting(&self, id: JobPostingId) -> Result<Option<JobPostingDetails>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .postings
            .iter()
            .find(|p| p.id == id)
            .map(|p| tables.details(p)))
    }

    async fn suggestions(&self, field: SuggestionField, term: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        let values: Vec<&str> = match field {
            SuggestionField::Keywords => tables.postings.iter().map(|p| p.title.as_str()).collect(),
            SuggestionField::Locations => tables
                .postings
                .iter()
                .filter_map(|p| p.location.as_deref())
                .collect(),
            SuggestionField::JobTypes => tables.postings.iter().map(|p| p.job_type.as_str()).collect(),
            SuggestionField::CompanyNames => tables.companies.iter().map(|c| c.name.as_str()).collect(),
        };
        Ok(values
            .into_iter()
            .filter(|v| contains_ci(v, term))
            .map(ToString::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .collect())
    }
}
