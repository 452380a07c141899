use std::time::Duration;

use async_trait::async_trait;
use jobagg_core::{
    page_offset, Company, CompanyDraft, JobPosting, JobPostingDetails, JobPostingDraft, JobPostingId,
    Portal, PortalDescriptor, SearchCriteria, SuggestionField, MAX_SUGGESTIONS,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;

use crate::store::{JobStore, StoreError};

const DETAILS_SELECT: &str = r#"
    SELECT jp.id, jp.title, jp.location, jp.description, jp.salary_from, jp.salary_to,
           jp.currency, jp.job_type, jp.apply_url, jp.external_id, jp.content_hash,
           jp.scraped_at, jp.is_active, jp.created_at, jp.updated_at, jp.portal_id, jp.company_id,
           p.name AS portal_name, p.base_url AS portal_base_url, p.logo_url AS portal_logo_url,
           p.is_active AS portal_is_active, p.created_at AS portal_created_at,
           p.updated_at AS portal_updated_at,
           c.name AS company_name, c.description AS company_description,
           c.website_url AS company_website_url, c.logo_url AS company_logo_url,
           c.founded_year AS company_founded_year, c.headquarters AS company_headquarters,
           c.industry AS company_industry, c.employee_count AS company_employee_count,
           c.created_at AS company_created_at, c.updated_at AS company_updated_at
      FROM job_postings jp
      LEFT JOIN portals p ON p.id = jp.portal_id
      LEFT JOIN companies c ON c.id = jp.company_id
"#;

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn fetch_details(
        &self,
        criteria: &SearchCriteria,
        page_number: u32,
        page_size: u32,
    ) -> Result<Vec<JobPostingDetails>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(DETAILS_SELECT);
        qb.push(" WHERE TRUE");

        if let Some(keywords) = like_pattern(&criteria.keywords) {
            qb.push(" AND (jp.title ILIKE ")
                .push_bind(keywords.clone())
                .push(" OR jp.description ILIKE ")
                .push_bind(keywords)
                .push(")");
        }
        if let Some(location) = like_pattern(&criteria.location) {
            qb.push(" AND jp.location ILIKE ").push_bind(location);
        }
        if let Some(job_type) = like_pattern(&criteria.job_type) {
            qb.push(" AND jp.job_type ILIKE ").push_bind(job_type);
        }
        if let Some(company_name) = like_pattern(&criteria.company_name) {
            qb.push(" AND c.name ILIKE ").push_bind(company_name);
        }

        qb.push(" ORDER BY jp.updated_at DESC, jp.id DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(page_offset(page_number, page_size) as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(details_from_row).collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn like_pattern(value: &Option<String>) -> Option<String> {
    let value = value.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{escaped}%"))
}

fn map_unique(err: sqlx::Error, entity: &'static str, key: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Duplicate {
                entity,
                key: key.to_string(),
            };
        }
    }
    StoreError::Database(err)
}

fn posting_from_row(row: &PgRow) -> Result<JobPosting, sqlx::Error> {
    Ok(JobPosting {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        location: row.try_get("location")?,
        description: row.try_get("description")?,
        salary_from: row.try_get("salary_from")?,
        salary_to: row.try_get("salary_to")?,
        currency: row.try_get("currency")?,
        job_type: row.try_get("job_type")?,
        apply_url: row.try_get("apply_url")?,
        external_id: row.try_get("external_id")?,
        content_hash: row.try_get("content_hash")?,
        scraped_at: row.try_get("scraped_at")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        portal_id: row.try_get("portal_id")?,
        company_id: row.try_get("company_id")?,
    })
}

fn portal_from_row(row: &PgRow) -> Result<Portal, sqlx::Error> {
    Ok(Portal {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        base_url: row.try_get("base_url")?,
        logo_url: row.try_get("logo_url")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn company_from_row(row: &PgRow) -> Result<Company, sqlx::Error> {
    Ok(Company {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        website_url: row.try_get("website_url")?,
        logo_url: row.try_get("logo_url")?,
        founded_year: row.try_get("founded_year")?,
        headquarters: row.try_get("headquarters")?,
        industry: row.try_get("industry")?,
        employee_count: row.try_get("employee_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn details_from_row(row: &PgRow) -> Result<JobPostingDetails, sqlx::Error> {
    let posting = posting_from_row(row)?;

    let portal = match row.try_get::<Option<String>, _>("portal_name")? {
        Some(name) => Some(Portal {
            id: posting.portal_id,
            name,
            base_url: row.try_get("portal_base_url")?,
            logo_url: row.try_get("portal_logo_url")?,
            is_active: row.try_get("portal_is_active")?,
            created_at: row.try_get("portal_created_at")?,
            updated_at: row.try_get("portal_updated_at")?,
        }),
        None => None,
    };

    let company = match row.try_get::<Option<String>, _>("company_name")? {
        Some(name) => Some(Company {
            id: posting.company_id,
            name,
            description: row.try_get("company_description")?,
            website_url: row.try_get("company_website_url")?,
            logo_url: row.try_get("company_logo_url")?,
            founded_year: row.try_get("company_founded_year")?,
            headquarters: row.try_get("company_headquarters")?,
            industry: row.try_get("company_industry")?,
            employee_count: row.try_get("company_employee_count")?,
            created_at: row.try_get("company_created_at")?,
            updated_at: row.try_get("company_updated_at")?,
        }),
        None => None,
    };

    Ok(JobPostingDetails {
        posting,
        portal,
        company,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn exists_by_hash(&self, content_hash: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM job_postings WHERE content_hash = $1)")
                .bind(content_hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM job_postings WHERE external_id = $1)")
                .bind(external_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn add_posting(&self, draft: &JobPostingDraft) -> Result<JobPosting, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_postings (
                title, location, description, salary_from, salary_to, currency, job_type,
                apply_url, external_id, content_hash, scraped_at, portal_id, company_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, title, location, description, salary_from, salary_to, currency, job_type,
                      apply_url, external_id, content_hash, scraped_at, is_active, created_at,
                      updated_at, portal_id, company_id
            "#,
        )
        .bind(&draft.title)
        .bind(&draft.location)
        .bind(&draft.description)
        .bind(draft.salary_from)
        .bind(draft.salary_to)
        .bind(&draft.currency)
        .bind(&draft.job_type)
        .bind(&draft.apply_url)
        .bind(&draft.external_id)
        .bind(&draft.content_hash)
        .bind(draft.scraped_at)
        .bind(draft.portal_id)
        .bind(draft.company_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            let key = draft
                .external_id
                .as_deref()
                .or(draft.content_hash.as_deref())
                .unwrap_or(&draft.apply_url);
            map_unique(err, "job_posting", key)
        })?;
        Ok(posting_from_row(&row)?)
    }

    async fn get_portal_by_name(&self, name: &str) -> Result<Option<Portal>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, base_url, logo_url, is_active, created_at, updated_at
              FROM portals
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(portal_from_row).transpose()?)
    }

    async fn add_portal(&self, descriptor: &PortalDescriptor) -> Result<Portal, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO portals (name, base_url, logo_url)
            VALUES ($1, $2, $3)
            RETURNING id, name, base_url, logo_url, is_active, created_at, updated_at
            "#,
        )
        .bind(&descriptor.name)
        .bind(&descriptor.base_url)
        .bind(&descriptor.logo_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_unique(err, "portal.name", &descriptor.name))?;
        Ok(portal_from_row(&row)?)
    }

    async fn get_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, website_url, logo_url, founded_year, headquarters,
                   industry, employee_count, created_at, updated_at
              FROM companies
             WHERE name = $1
             ORDER BY id
             LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(company_from_row).transpose()?)
    }

    async fn add_company(&self, draft: &CompanyDraft) -> Result<Company, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO companies (
                name, description, website_url, logo_url, founded_year, headquarters,
                industry, employee_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, name, description, website_url, logo_url, founded_year, headquarters,
                      industry, employee_count, created_at, updated_at
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(&draft.website_url)
        .bind(&draft.logo_url)
        .bind(&draft.founded_year)
        .bind(&draft.headquarters)
        .bind(&draft.industry)
        .bind(&draft.employee_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(company_from_row(&row)?)
    }

    async fn search(
        &self,
        criteria: &SearchCriteria,
        page_number: u32,
        page_size: u32,
    ) -> Result<Vec<JobPostingDetails>, StoreError> {
        self.fetch_details(criteria, page_number, page_size).await
    }

    async fn latest(&self, page_number: u32, page_size: u32) -> Result<Vec<JobPostingDetails>, StoreError> {
        self.fetch_details(&SearchCriteria::default(), page_number, page_size)
            .await
    }

    async fn get_posting(&self, id: JobPostingId) -> Result<Option<JobPostingDetails>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(DETAILS_SELECT);
        qb.push(" WHERE jp.id = ").push_bind(id);
        let row = qb.build().fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(details_from_row).transpose()?)
    }

    async fn suggestions(&self, field: SuggestionField, term: &str) -> Result<Vec<String>, StoreError> {
        let (column, table) = match field {
            SuggestionField::Keywords => ("title", "job_postings"),
            SuggestionField::Locations => ("location", "job_postings"),
            SuggestionField::JobTypes => ("job_type", "job_postings"),
            SuggestionField::CompanyNames => ("name", "companies"),
        };
        let pattern = like_pattern(&Some(term.to_string())).unwrap_or_else(|| "%".to_string());

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT DISTINCT ");
        qb.push(column)
            .push(" AS value FROM ")
            .push(table)
            .push(" WHERE ")
            .push(column)
            .push(" IS NOT NULL AND ")
            .push(column)
            .push(" ILIKE ")
            .push_bind(pattern)
            .push(" ORDER BY value LIMIT ")
            .push_bind(MAX_SUGGESTIONS as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("value"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}
