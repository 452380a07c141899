//! Core domain model for the job aggregator: portals, companies, postings and
//! the dedup keys derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "jobagg-core";

pub type PortalId = i64;
pub type CompanyId = i64;
pub type JobPostingId = i64;

/// Placeholder stored when company enrichment yields nothing.
pub const PLACEHOLDER_COMPANY_DESCRIPTION: &str = "No description available.";

/// Marker used by the extraction step for missing free-text fields.
pub const MISSING_TEXT: &str = "none";

/// Static identity an adapter carries for its source site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalDescriptor {
    pub name: String,
    pub base_url: String,
    pub logo_url: Option<String>,
}

impl PortalDescriptor {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            logo_url: None,
        }
    }

    pub fn with_logo(mut self, logo_url: impl Into<String>) -> Self {
        self.logo_url = Some(logo_url.into());
        self
    }
}

/// Persisted portal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portal {
    pub id: PortalId,
    pub name: String,
    pub base_url: String,
    pub logo_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured job record produced by the extraction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobData {
    pub title: Option<String>,
    pub company_name: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub salary_from: Option<f64>,
    pub salary_to: Option<f64>,
    pub job_type: Option<String>,
    pub apply_url: String,
}

/// Best-effort company facts produced by the extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompanyData {
    pub company_name: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub website_url: Option<String>,
    pub founded_year: Option<String>,
    pub employee_count: Option<String>,
    pub headquarters: Option<String>,
    pub industry: Option<String>,
}

/// Company about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyDraft {
    pub name: String,
    pub description: Option<String>,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
    pub founded_year: Option<String>,
    pub headquarters: Option<String>,
    pub industry: Option<String>,
    /// Free text; ranges such as "50-100" are valid.
    pub employee_count: Option<String>,
}

impl CompanyDraft {
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(PLACEHOLDER_COMPANY_DESCRIPTION.to_string()),
            website_url: None,
            logo_url: None,
            founded_year: None,
            headquarters: None,
            industry: None,
            employee_count: None,
        }
    }

    /// Builds a draft from enrichment output. The row keeps `lookup_name`
    /// even if enrichment spelled it differently, so the next lookup by the
    /// same name finds it.
    pub fn from_company_data(lookup_name: &str, data: CompanyData) -> Self {
        Self {
            name: lookup_name.to_string(),
            description: data
                .description
                .or_else(|| Some(PLACEHOLDER_COMPANY_DESCRIPTION.to_string())),
            website_url: data.website_url,
            logo_url: data.logo_url,
            founded_year: data.founded_year,
            headquarters: data.headquarters,
            industry: data.industry,
            employee_count: data.employee_count,
        }
    }
}

/// Persisted company row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub description: Option<String>,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
    pub founded_year: Option<String>,
    pub headquarters: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Posting assembled by a scrape run, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPostingDraft {
    pub title: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub salary_from: Option<f64>,
    pub salary_to: Option<f64>,
    pub currency: String,
    pub job_type: String,
    pub apply_url: String,
    pub external_id: Option<String>,
    pub content_hash: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub portal_id: PortalId,
    pub company_id: CompanyId,
}

impl JobPostingDraft {
    /// Maps extracted data onto a posting for `portal_id`/`company_id` and
    /// derives its content hash.
    pub fn assemble(
        job: JobData,
        external_id: Option<String>,
        portal_id: PortalId,
        company_id: CompanyId,
        currency: &str,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        let title = job
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| MISSING_TEXT.to_string());
        let job_type = job
            .job_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| MISSING_TEXT.to_string());
        let content_hash = Some(content_hash(&title, &job.apply_url));
        Self {
            title,
            location: job.location,
            description: job.description,
            salary_from: job.salary_from,
            salary_to: job.salary_to,
            currency: currency.to_string(),
            job_type,
            apply_url: job.apply_url,
            external_id,
            content_hash,
            scraped_at,
            portal_id,
            company_id,
        }
    }
}

/// Persisted posting row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: JobPostingId,
    pub title: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub salary_from: Option<f64>,
    pub salary_to: Option<f64>,
    pub currency: String,
    pub job_type: String,
    pub apply_url: String,
    pub external_id: Option<String>,
    pub content_hash: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub portal_id: PortalId,
    pub company_id: CompanyId,
}

/// Posting joined with its portal and company, as served by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPostingDetails {
    #[serde(flatten)]
    pub posting: JobPosting,
    pub portal: Option<Portal>,
    pub company: Option<Company>,
}

/// Case-insensitive substring filters; empty fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchCriteria {
    pub keywords: Option<String>,
    pub location: Option<String>,
    pub company_name: Option<String>,
    pub job_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionField {
    Keywords,
    Locations,
    CompanyNames,
    JobTypes,
}

/// Maximum number of autocomplete suggestions returned per query.
pub const MAX_SUGGESTIONS: usize = 10;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Secondary dedup key: a pure function of title and apply URL.
pub fn content_hash(title: &str, apply_url: &str) -> String {
    sha256_hex(format!("{title}{apply_url}").as_bytes())
}

/// Default external id for sources that expose no native identifier.
pub fn external_id_for_url(url: &str) -> String {
    sha256_hex(url.as_bytes())
}

/// 1-based page number to row offset.
pub fn page_offset(page_number: u32, page_size: u32) -> usize {
    (page_number.max(1) as usize - 1) * page_size as usize
}
