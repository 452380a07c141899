use std::time::Duration;

use async_trait::async_trait;
use jobagg_core::{CompanyData, JobData, PortalDescriptor, MISSING_TEXT};
use reqwest::{header, Client};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::clean::{balance_braces, clean_value, logo_url_for, sanitize_html, strip_code_fence};
use crate::{ExtractError, Extractor};

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ExtractionConfig {
    /// Fails when `OPENAI_API_KEY` is missing so a misconfigured deployment
    /// stops at startup instead of skipping every listing.
    pub fn from_env() -> Result<Self, ExtractError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ExtractError> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ExtractError::MissingApiKey)?;
        let timeout_secs = match lookup("JOBAGG_EXTRACT_TIMEOUT_SECS") {
            Some(v) => v
                .parse()
                .map_err(|_| ExtractError::Config(format!("JOBAGG_EXTRACT_TIMEOUT_SECS={v}")))?,
            None => 300,
        };
        Ok(Self {
            api_key,
            model: lookup("JOBAGG_OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: lookup("JOBAGG_OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout: Duration::from_secs(timeout_secs),
            max_tokens: 3000,
            temperature: 0.2,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

fn first_choice_content(body: &str) -> Result<String, ExtractError> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let choice = response.choices.into_iter().next().ok_or(ExtractError::EmptyResponse)?;
    if choice.finish_reason.as_deref() == Some("length") {
        warn!("model output was truncated (finish_reason=length)");
    }
    choice
        .message
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(ExtractError::EmptyResponse)
}

/// Lowercases keys and drops underscores so `CompanyName`, `companyName` and
/// `company_name` all land on the same field.
fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_lowercase().replace('_', ""), v))
                .collect(),
        ),
        other => other,
    }
}

fn parse_model_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, ExtractError> {
    let stripped = strip_code_fence(raw);
    let repaired = balance_braces(stripped);
    if repaired.len() != stripped.len() {
        warn!("model output had unbalanced braces; appended closers");
    }
    let value: Value = serde_json::from_str(&repaired)?;
    Ok(serde_json::from_value(normalize_keys(value))?)
}

fn lenient_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.replace([' ', '\u{a0}'], "").replace(',', ".").parse().ok(),
        _ => None,
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJob {
    #[serde(deserialize_with = "lenient_text")]
    title: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    companyname: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    location: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    description: Option<String>,
    #[serde(deserialize_with = "lenient_amount")]
    salaryfrom: Option<f64>,
    #[serde(deserialize_with = "lenient_amount")]
    salaryto: Option<f64>,
    #[serde(deserialize_with = "lenient_text")]
    jobtype: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCompany {
    #[serde(deserialize_with = "lenient_text")]
    companyname: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    description: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    websiteurl: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    foundedyear: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    headquarters: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    industry: Option<String>,
    #[serde(deserialize_with = "lenient_text", alias = "employeecount")]
    numberofemployees: Option<String>,
}

/// Maps model output onto a [`JobData`] with the portal and URL context the
/// model cannot be trusted with.
pub fn job_from_model_output(raw: &str, job_url: &str, portal: &PortalDescriptor) -> Result<JobData, ExtractError> {
    let job: RawJob = parse_model_json(raw)?;
    let description = clean_value(job.description.as_deref());
    Ok(JobData {
        title: clean_value(job.title.as_deref()),
        company_name: clean_value(job.companyname.as_deref()).unwrap_or_else(|| portal.name.clone()),
        location: Some(clean_value(job.location.as_deref()).unwrap_or_else(|| MISSING_TEXT.to_string())),
        description: Some(sanitize_html(description.as_deref())),
        salary_from: job.salaryfrom,
        salary_to: job.salaryto,
        job_type: clean_value(job.jobtype.as_deref()),
        apply_url: job_url.to_string(),
    })
}

pub fn company_from_model_output(raw: &str) -> Result<CompanyData, ExtractError> {
    let company: RawCompany = parse_model_json(raw)?;
    let website_url = clean_value(company.websiteurl.as_deref());
    let description = clean_value(company.description.as_deref());
    Ok(CompanyData {
        company_name: clean_value(company.companyname.as_deref()).unwrap_or_default(),
        description: Some(sanitize_html(description.as_deref())),
        logo_url: logo_url_for(website_url.as_deref()),
        website_url,
        founded_year: clean_value(company.foundedyear.as_deref()),
        employee_count: clean_value(company.numberofemployees.as_deref()),
        headquarters: clean_value(company.headquarters.as_deref()),
        industry: clean_value(company.industry.as_deref()),
    })
}

fn job_prompt(content: &str, portal: &PortalDescriptor) -> String {
    format!(
        r#"Extract the job posting below into a single JSON object. Output plain JSON only: no markdown fences, no trailing commas, every key and string quoted, inner quotes escaped.
Use only information stated in the posting; use null when unsure.

Keys:
{{
  "Title": "original title",
  "CompanyName": "exact employer name, or '{portal_name}' when none is given",
  "Location": "City, Region",
  "Description": "the posting body as HTML; keep paragraphs, lists and emphasis, drop buttons and links; keep Czech diacritics",
  "SalaryFrom": number or null,
  "SalaryTo": number or null,
  "JobType": "Full-time / Part-time / Contract / ..."
}}

Salary rules: "35-50k" gives 35000 and 50000; "od 45k" gives 45000 and null; hourly rates give null and null.
If the output would be too long, shorten Description first and always close the object.

Source portal: {portal_name} ({portal_url})

POSTING:
{content}
"#,
        portal_name = portal.name,
        portal_url = portal.base_url,
    )
}

fn company_prompt(company_name: &str) -> String {
    format!(
        r#"Give publicly known facts about the company "{company_name}" as a single JSON object. Do not invent anything; use null for unknown values.
Output plain JSON only: no markdown fences, no trailing commas.

Keys:
{{
  "CompanyName": "{company_name}",
  "Description": "3-5 sentences on what the company does (in Czech)",
  "WebsiteUrl": "official website URL or null",
  "FoundedYear": "YYYY or null",
  "Headquarters": "City, Region, Country or null",
  "Industry": "primary industry (in Czech)",
  "NumberOfEmployees": "exact number or a range such as 50-100"
}}
"#
    )
}

#[derive(Debug, Clone)]
pub struct OpenAiExtractor {
    http: Client,
    config: ExtractionConfig,
}

impl OpenAiExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, ExtractError> {
        Self::new(ExtractionConfig::from_env()?)
    }

    async fn complete(&self, prompt: &str) -> Result<String, ExtractError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a data extraction assistant.",
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            n: 1,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(%status, bytes = body.len(), "chat completion response");
        if !status.is_success() {
            return Err(ExtractError::Api {
                status: status.as_u16(),
                body,
            });
        }
        first_choice_content(&body)
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract_job(&self, content: &str, job_url: &str, portal: &PortalDescriptor) -> Option<JobData> {
        let raw = match self.complete(&job_prompt(content, portal)).await {
            Ok(raw) => raw,
            Err(err) => {
                error!(job_url, error = %err, "job extraction call failed");
                return None;
            }
        };
        match job_from_model_output(&raw, job_url, portal) {
            Ok(job) => Some(job),
            Err(err) => {
                warn!(job_url, error = %err, "could not parse job extraction output");
                None
            }
        }
    }

    async fn extract_company(&self, company_name: &str) -> Option<CompanyData> {
        let raw = match self.complete(&company_prompt(company_name)).await {
            Ok(raw) => raw,
            Err(err) => {
                error!(company_name, error = %err, "company enrichment call failed");
                return None;
            }
        };
        match company_from_model_output(&raw) {
            Ok(company) => Some(company),
            Err(err) => {
                warn!(company_name, error = %err, "could not parse company enrichment output");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn portal() -> PortalDescriptor {
        PortalDescriptor::new("JobsContact", "https://www.jobscontact.cz")
    }

    #[test]
    fn config_requires_api_key() {
        let empty: HashMap<&str, &str> = HashMap::new();
        let result = ExtractionConfig::from_lookup(|k| empty.get(k).map(|v| v.to_string()));
        assert!(matches!(result, Err(ExtractError::MissingApiKey)));

        let vars = HashMap::from([("OPENAI_API_KEY", "sk-test"), ("JOBAGG_OPENAI_MODEL", "gpt-test")]);
        let config = ExtractionConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.model, "gpt-test");
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.max_tokens, 3000);
    }

    #[test]
    fn reads_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  {\"Title\":\"Dev\"}  "},"finish_reason":"length"}]}"#;
        assert_eq!(first_choice_content(body).unwrap(), "{\"Title\":\"Dev\"}");
        assert!(matches!(first_choice_content(r#"{"choices":[]}"#), Err(ExtractError::EmptyResponse)));
    }

    #[test]
    fn job_output_is_cleaned_and_bound_to_context() {
        let raw = "```json\n{\"title\":\"Rust Developer\",\"CompanyName\":\"null\",\"LOCATION\":\"none\",\"Description\":\"<p onclick=\\\"x\\\">Build things</p><a href=\\\"#\\\">Apply</a>\",\"SalaryFrom\":\"45000\",\"salary_to\":60000,\"JobType\":\"Full-time\"\n```";
        let job = job_from_model_output(raw, "https://www.jobscontact.cz/prace/dev_id42", &portal()).unwrap();
        assert_eq!(job.title.as_deref(), Some("Rust Developer"));
        assert_eq!(job.company_name, "JobsContact");
        assert_eq!(job.location.as_deref(), Some("none"));
        assert_eq!(job.description.as_deref(), Some("<p>Build things</p>Apply"));
        assert_eq!(job.salary_from, Some(45000.0));
        assert_eq!(job.salary_to, Some(60000.0));
        assert_eq!(job.apply_url, "https://www.jobscontact.cz/prace/dev_id42");
    }

    #[test]
    fn unparseable_output_is_an_error() {
        assert!(job_from_model_output("Sorry, I can't help with that.", "u", &portal()).is_err());
    }

    #[test]
    fn company_output_derives_logo() {
        let raw = r#"{"CompanyName":"Acme s.r.o.","Description":null,"WebsiteUrl":"https://acme.cz","FoundedYear":1999,"NumberOfEmployees":"50-100","Industry":"NONE"}"#;
        let company = company_from_model_output(raw).unwrap();
        assert_eq!(company.company_name, "Acme s.r.o.");
        assert_eq!(company.logo_url.as_deref(), Some("https://logo.clearbit.com/acme.cz?size=500"));
        assert_eq!(company.founded_year.as_deref(), Some("1999"));
        assert_eq!(company.employee_count.as_deref(), Some("50-100"));
        assert_eq!(company.industry, None);
        assert_eq!(company.description.as_deref(), Some("none"));
    }
}
