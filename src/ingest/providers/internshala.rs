// src/ingest/providers/internshala.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{run_strategies, AdapterDeps, ProviderConfig, ProviderStrategies};
use crate::error::FetchError;
use crate::ingest::http::PageRequest;
use crate::ingest::scrape::{absolute_url, CardLayout, Selector};
use crate::ingest::types::{SearchFilters, SourceAdapter};
use crate::ingest::{classify_location, normalize_opt, normalize_text, parse_posted, parse_stipend};
use crate::listing::{ListingType, Location, LocationType, RawListing, Requirements, Stipend};

pub const SOURCE: &str = "internshala";
pub const DEFAULT_API_URL: &str = "https://internshala.com/api/v1/internships";
pub const DEFAULT_SEARCH_URL: &str = "https://internshala.com/internships";
const BASE_URL: &str = "https://internshala.com";

static LAYOUT: CardLayout = CardLayout {
    card: Selector::new("div", "individual_internship"),
    id_attr: Some("internshipid"),
    title: Selector::new("h3", "job-internship-name"),
    company: Selector::new("p", "company-name"),
    location: Selector::new("div", "locations"),
    link: Selector::new("a", "job-title-href"),
    stipend: Some(Selector::new("span", "stipend")),
    duration: Some(Selector::new("span", "duration")),
    posted: Some(Selector::new("div", "status-inactive")),
    base_url: BASE_URL,
};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    internships: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStipend {
    salary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiInternship {
    /// Numeric on some payloads, string on others.
    id: Option<Value>,
    title: Option<String>,
    company_name: Option<String>,
    company_logo: Option<String>,
    #[serde(default)]
    location_names: Vec<String>,
    #[serde(default)]
    work_from_home: bool,
    duration: Option<String>,
    #[serde(default)]
    stipend: ApiStipend,
    posted_on: Option<String>,
    url: Option<String>,
    #[serde(default)]
    skills: Vec<String>,
    description: Option<String>,
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => normalize_opt(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ApiInternship {
    fn into_raw(self, now: DateTime<Utc>) -> Option<RawListing> {
        let title = normalize_opt(self.title.as_deref())?;
        let company = normalize_opt(self.company_name.as_deref())?;

        let location = if self.work_from_home {
            Location {
                kind: LocationType::Remote,
                ..Default::default()
            }
        } else {
            self.location_names
                .first()
                .map(|l| classify_location(l))
                .unwrap_or_default()
        };

        Some(RawListing {
            source: SOURCE.to_string(),
            external_id: self.id.as_ref().and_then(id_string),
            description: self
                .description
                .as_deref()
                .map(normalize_text)
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| format!("{title} at {company}")),
            title,
            company,
            company_logo: normalize_opt(self.company_logo.as_deref()),
            location,
            kind: ListingType::Internship,
            duration: normalize_opt(self.duration.as_deref()),
            stipend: self
                .stipend
                .salary
                .as_deref()
                .map(|s| parse_stipend(s, "INR"))
                .unwrap_or_else(Stipend::unspecified),
            requirements: Requirements {
                skills: self
                    .skills
                    .iter()
                    .map(|s| normalize_text(s))
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            apply_url: self
                .url
                .as_deref()
                .and_then(|u| absolute_url(BASE_URL, u)),
            posted_date: self
                .posted_on
                .as_deref()
                .map(|p| parse_posted(p, now))
                .unwrap_or(now),
        })
    }
}

pub fn parse_api_body(body: &str, now: DateTime<Utc>) -> Result<Vec<RawListing>, FetchError> {
    let resp: ApiResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("internshala api: {e}")))?;
    Ok(resp
        .internships
        .into_iter()
        .filter_map(|v| serde_json::from_value::<ApiInternship>(v).ok())
        .filter_map(|i| i.into_raw(now))
        .collect())
}

/// "data science" -> "data-science"; the site routes keyword searches by slug.
fn slug(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub struct InternshalaAdapter {
    api_key: Option<String>,
    api_url: String,
    search_url: String,
    deps: AdapterDeps,
}

impl InternshalaAdapter {
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

impl ProviderStrategies for InternshalaAdapter {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn deps(&self) -> &AdapterDeps {
        &self.deps
    }

    fn default_currency(&self) -> &'static str {
        "INR"
    }

    fn layout(&self) -> &'static CardLayout {
        &LAYOUT
    }

    fn api_request(&self, query: &str, filters: &SearchFilters) -> Option<PageRequest> {
        let key = self.api_key.as_deref()?;
        let mut req = PageRequest::new(&self.api_url)
            .param("keywords", query)
            .header("Authorization", format!("Bearer {key}"));
        if let Some(loc) = filters.location.as_deref() {
            req = req.param("location", loc);
        }
        if filters.remote_only {
            req = req.param("work_from_home", "true");
        }
        Some(req)
    }

    fn parse_api(&self, body: &str, now: DateTime<Utc>) -> Result<Vec<RawListing>, FetchError> {
        parse_api_body(body, now)
    }

    fn page_request(&self, query: &str, filters: &SearchFilters) -> PageRequest {
        let base = self.search_url.trim_end_matches('/');
        let mut path = String::from(base);
        if filters.remote_only {
            path.push_str("/work-from-home");
        }
        let kw = slug(query);
        if !kw.is_empty() {
            path.push_str(&format!("/{kw}-internship"));
        }
        if let Some(loc) = filters.location.as_deref().map(slug).filter(|l| !l.is_empty()) {
            if !filters.remote_only {
                path.push_str(&format!("-in-{loc}"));
            }
        }
        PageRequest::new(path)
    }
}

#[async_trait]
impl SourceAdapter for InternshalaAdapter {
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
