// src/ingest/providers/linkedin.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{run_strategies, AdapterDeps, ProviderConfig, ProviderStrategies};
use crate::error::FetchError;
use crate::ingest::http::PageRequest;
use crate::ingest::scrape::{CardLayout, Selector};
use crate::ingest::types::{SearchFilters, SourceAdapter};
use crate::ingest::{
    normalize_opt, normalize_text, parse_listing_type, parse_posted, parse_stipend,
};
use crate::listing::{Location, LocationType, RawListing, Requirements, Stipend};

pub const SOURCE: &str = "linkedin";
pub const DEFAULT_API_URL: &str = "https://jsearch.p.rapidapi.com/search";
pub const DEFAULT_SEARCH_URL: &str = "https://www.linkedin.com/jobs/search";

static LAYOUT: CardLayout = CardLayout {
    card: Selector::new("div", "base-card"),
    id_attr: Some("data-entity-urn"),
    title: Selector::new("h3", "base-search-card__title"),
    company: Selector::new("h4", "base-search-card__subtitle"),
    location: Selector::new("span", "job-search-card__location"),
    link: Selector::new("a", "base-card__full-link"),
    stipend: Some(Selector::new("span", "job-search-card__salary-info")),
    duration: None,
    posted: Some(Selector::new("time", "job-search-card__listdate")),
    base_url: "https://www.linkedin.com",
};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiJob {
    job_id: Option<String>,
    job_title: Option<String>,
    employer_name: Option<String>,
    employer_logo: Option<String>,
    job_description: Option<String>,
    job_city: Option<String>,
    job_state: Option<String>,
    job_country: Option<String>,
    #[serde(default)]
    job_is_remote: bool,
    job_employment_type: Option<String>,
    job_apply_link: Option<String>,
    job_posted_at_datetime_utc: Option<String>,
    job_min_salary: Option<f64>,
    job_salary_currency: Option<String>,
    job_salary_period: Option<String>,
    job_required_skills: Option<Vec<String>>,
}

impl ApiJob {
    fn into_raw(self, now: DateTime<Utc>) -> Option<RawListing> {
        let title = normalize_opt(self.job_title.as_deref())?;
        let company = normalize_opt(self.employer_name.as_deref())?;

        let stipend = match self.job_min_salary {
            Some(amount) if amount > 0.0 => {
                let text = format!(
                    "{amount} {} per {}",
                    self.job_salary_currency.as_deref().unwrap_or("USD"),
                    self.job_salary_period.as_deref().unwrap_or("month")
                );
                parse_stipend(&text, "USD")
            }
            _ => Stipend::unspecified(),
        };

        Some(RawListing {
            source: SOURCE.to_string(),
            external_id: normalize_opt(self.job_id.as_deref()),
            title,
            company,
            company_logo: normalize_opt(self.employer_logo.as_deref()),
            description: self
                .job_description
                .as_deref()
                .map(normalize_text)
                .unwrap_or_default(),
            location: Location {
                city: normalize_opt(self.job_city.as_deref()),
                state: normalize_opt(self.job_state.as_deref()),
                country: normalize_opt(self.job_country.as_deref()),
                kind: if self.job_is_remote {
                    LocationType::Remote
                } else {
                    LocationType::Onsite
                },
            },
            kind: parse_listing_type(self.job_employment_type.as_deref().unwrap_or_default()),
            duration: None,
            stipend,
            requirements: Requirements {
                skills: self
                    .job_required_skills
                    .unwrap_or_default()
                    .iter()
                    .map(|s| normalize_text(s))
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            apply_url: normalize_opt(self.job_apply_link.as_deref()),
            posted_date: self
                .job_posted_at_datetime_utc
                .as_deref()
                .map(|p| parse_posted(p, now))
                .unwrap_or(now),
        })
    }
}

/// Parse a search response body; items that do not fit the schema are skipped.
pub fn parse_api_body(body: &str, now: DateTime<Utc>) -> Result<Vec<RawListing>, FetchError> {
    let resp: ApiResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("linkedin api: {e}")))?;
    Ok(resp
        .data
        .into_iter()
        .filter_map(|v| serde_json::from_value::<ApiJob>(v).ok())
        .filter_map(|job| job.into_raw(now))
        .collect())
}

pub struct LinkedInAdapter {
    api_key: Option<String>,
    api_url: String,
    search_url: String,
    deps: AdapterDeps,
}

impl LinkedInAdapter {
    pub fn new(cfg: &ProviderConfig, deps: AdapterDeps) -> Self {
        Self {
            api_key: cfg.api_key().map(str::to_string),
            api_url: cfg.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            search_url: cfg
                .search_url
                .clone()
                .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
            deps,
        }
    }
}

impl ProviderStrategies for LinkedInAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn deps(&self) -> &AdapterDeps {
        &self.deps
    }

    fn default_currency(&self) -> &'static str {
        "USD"
    }

    fn layout(&self) -> &'static CardLayout {
        &LAYOUT
    }

    fn api_request(&self, query: &str, filters: &SearchFilters) -> Option<PageRequest> {
        let key = self.api_key.as_deref()?;
        let mut q = format!("{query} internship");
        if let Some(loc) = filters.location.as_deref() {
            q.push_str(" in ");
            q.push_str(loc);
        }
        let mut req = PageRequest::new(&self.api_url)
            .param("query", q)
            .param("page", "1")
            .param("num_pages", "1")
            .param("employment_types", "INTERN")
            .header("X-RapidAPI-Key", key);
        if filters.remote_only {
            req = req.param("remote_jobs_only", "true");
        }
        Some(req)
    }

    fn parse_api(&self, body: &str, now: DateTime<Utc>) -> Result<Vec<RawListing>, FetchError> {
        parse_api_body(body, now)
    }

    fn page_request(&self, query: &str, filters: &SearchFilters) -> PageRequest {
        let mut req = PageRequest::new(&self.search_url)
            .param("keywords", query)
            // Experience level: internship
            .param("f_E", "1");
        if let Some(loc) = filters.location.as_deref() {
            req = req.param("location", loc);
        }
        if filters.remote_only {
            req = req.param("f_WT", "2");
        }
        req
    }
}

#[async_trait]
impl SourceAdapter for LinkedInAdapter {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<RawListing>, FetchError> {
        run_strategies(self, query, filters).await
    }
}
