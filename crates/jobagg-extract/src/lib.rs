//! Turns raw posting content into structured records and enriches company
//! names, backed by a chat-completions model.

pub mod clean;
pub mod openai;

use async_trait::async_trait;
use jobagg_core::{CompanyData, JobData, PortalDescriptor};
use thiserror::Error;

pub use openai::{ExtractionConfig, OpenAiExtractor};

pub const CRATE_NAME: &str = "jobagg-extract";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("invalid extraction config: {0}")]
    Config(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response had no content")]
    EmptyResponse,
    #[error("could not parse model output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Extraction never fails the caller; an unusable result is `None`.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_job(&self, content: &str, job_url: &str, portal: &PortalDescriptor) -> Option<JobData>;

    async fn extract_company(&self, company_name: &str) -> Option<CompanyData>;
}
