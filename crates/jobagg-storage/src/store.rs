use async_trait::async_trait;
use jobagg_core::{
    Company, CompanyDraft, JobPosting, JobPostingDetails, JobPostingDraft, JobPostingId, Portal,
    PortalDescriptor, SearchCriteria, SuggestionField,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

/// Persistence for portals, companies and postings.
///
/// Implementations must reject a second posting with an equal non-null
/// `external_id` or `content_hash` with [`StoreError::Duplicate`].
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn exists_by_hash(&self, content_hash: &str) -> Result<bool, StoreError>;
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, StoreError>;
    async fn add_posting(&self, draft: &JobPostingDraft) -> Result<JobPosting, StoreError>;

    async fn get_portal_by_name(&self, name: &str) -> Result<Option<Portal>, StoreError>;
    async fn add_portal(&self, descriptor: &PortalDescriptor) -> Result<Portal, StoreError>;

    async fn get_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError>;
    async fn add_company(&self, draft: &CompanyDraft) -> Result<Company, StoreError>;

    /// Newest first; `page_number` is 1-based.
    async fn search(
        &self,
        criteria: &SearchCriteria,
        page_number: u32,
        page_size: u32,
    ) -> Result<Vec<JobPostingDetails>, StoreError>;
    async fn latest(&self, page_number: u32, page_size: u32) -> Result<Vec<JobPostingDetails>, StoreError>;
    async fn get_posting(&self, id: JobPostingId) -> Result<Option<JobPostingDetails>, StoreError>;
    async fn suggestions(&self, field: SuggestionField, term: &str) -> Result<Vec<String>, StoreError>;
}
