// src/ingest/providers/indeed.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{run_strategies, AdapterDeps, ProviderConfig, ProviderStrategies};
use crate::error::FetchError;
use crate::ingest::http::PageRequest;
use crate::ingest::scrape::{CardLayout, Selector};
use crate::ingest::types::{SearchFilters, SourceAdapter};
use crate::ingest::{
    classify_location, normalize_opt, normalize_text, parse_listing_type, parse_posted,
    parse_stipend,
};
use crate::listing::{Location, RawListing, Requirements, Stipend};

pub const SOURCE: &str = "indeed";
pub const DEFAULT_API_URL: &str = "https://api.indeed.com/ads/apisearch";
pub const DEFAULT_SEARCH_URL: &str = "https://www.indeed.com/jobs";

static LAYOUT: CardLayout = CardLayout {
    card: Selector::new("div", "job_seen_beacon"),
    id_attr: Some("data-jk"),
    title: Selector::new("h2", "jobTitle"),
    company: Selector::new("span", "companyName"),
    location: Selector::new("div", "companyLocation"),
    link: Selector::new("a", "jcs-JobTitle"),
    stipend: Some(Selector::new("div", "salary-snippet")),
    duration: None,
    posted: Some(Selector::new("span", "date")),
    base_url: "https://www.indeed.com",
};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    jobkey: Option<String>,
    jobtitle: Option<String>,
    company: Option<String>,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    #[serde(rename = "formattedLocation")]
    formatted_location: Option<String>,
    snippet: Option<String>,
    url: Option<String>,
    date: Option<String>,
    salary: Option<String>,
    jobtype: Option<String>,
}

impl ApiResult {
    fn into_raw(self, now: DateTime<Utc>) -> Option<RawListing> {
        let title = normalize_opt(self.jobtitle.as_deref())?;
        let company = normalize_opt(self.company.as_deref())?;

        // The formatted string carries remote/hybrid markers the split fields lack.
        let classified = classify_location(self.formatted_location.as_deref().unwrap_or_default());
        let location = Location {
            city: normalize_opt(self.city.as_deref()).or(classified.city),
            state: normalize_opt(self.state.as_deref()).or(classified.state),
            country: normalize_opt(self.country.as_deref()).or(classified.country),
            kind: classified.kind,
        };

        Some(RawListing {
            source: SOURCE.to_string(),
            external_id: normalize_opt(self.jobkey.as_deref()),
            description: self
                .snippet
                .as_deref()
                .map(normalize_text)
                .unwrap_or_default(),
            title,
            company,
            company_logo: None,
            location,
            kind: parse_listing_type(self.jobtype.as_deref().unwrap_or("internship")),
            duration: None,
            stipend: self
                .salary
                .as_deref()
                .map(|s| parse_stipend(s, "USD"))
                .unwrap_or_else(Stipend::unspecified),
            requirements: Requirements::default(),
            apply_url: normalize_opt(self.url.as_deref()),
            posted_date: self
                .date
                .as_deref()
                .map(|d| parse_posted(d, now))
                .unwrap_or(now),
        })
    }
}

pub fn parse_api_body(body: &str, now: DateTime<Utc>) -> Result<Vec<RawListing>, FetchError> {
    let resp: ApiResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("indeed api: {e}")))?;
    Ok(resp
        .results
        .into_iter()
        .filter_map(|v| serde_json::from_value::<ApiResult>(v).ok())
        .filter_map(|r| r.into_raw(now))
        .collect())
}

pub struct IndeedAdapter {
    publisher_key: Option<String>,
    api_url: String,
    search_url: String,
    deps: AdapterDeps,
}

impl IndeedAdapter {
    pub fn new(cfg: &ProviderConfig, deps: AdapterDeps) -> Self {
        Self {
            publisher_key: cfg.api_key().map(str::to_string),
            api_url: cfg.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            search_url: cfg
                .search_url
                .clone()
                .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
            deps,
        }
    }
}

impl ProviderStrategies for IndeedAdapter {
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
        let key = self.publisher_key.as_deref()?;
        let location = match (filters.remote_only, filters.location.as_deref()) {
            (true, _) => "remote",
            (false, Some(loc)) => loc,
            (false, None) => "",
        };
        Some(
            PageRequest::new(&self.api_url)
                .param("publisher", key)
                .param("q", format!("{query} internship"))
                .param("l", location)
                .param("jt", "internship")
                .param("limit", "25")
                .param("format", "json")
                .param("v", "2"),
        )
    }

    fn parse_api(&self, body: &str, now: DateTime<Utc>) -> Result<Vec<RawListing>, FetchError> {
        parse_api_body(body, now)
    }

    fn page_request(&self, query: &str, filters: &SearchFilters) -> PageRequest {
        let mut req = PageRequest::new(&self.search_url)
            .param("q", format!("{query} internship"))
            .param("sort", "date");
        if filters.remote_only {
            req = req.param("l", "remote");
        } else if let Some(loc) = filters.location.as_deref() {
            req = req.param("l", loc);
        }
        req
    }
}

#[async_trait]
impl SourceAdapter for IndeedAdapter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{LocationType, StipendPeriod};
    use chrono::TimeZone;

    #[test]
    fn formatted_location_supplies_remote_kind() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let body = r#"{"results":[
            {"jobkey":"k1","jobtitle":"Marketing Intern","company":"Brandly",
             "city":"Austin","state":"TX","country":"US",
             "formattedLocation":"Austin, TX (Remote)",
             "snippet":"Run <b>social media</b> campaigns",
             "url":"https://www.indeed.com/viewjob?jk=k1",
             "date":"Thu, 30 May 2024 08:00:00 GMT",
             "salary":"$500 per week"}
        ]}"#;
        let items = parse_api_body(body, now).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.location.city.as_deref(), Some("Austin"));
        assert_eq!(it.location.kind, LocationType::Remote);
        assert_eq!(it.description, "Run social media campaigns");
        assert_eq!(it.stipend.amount, 500.0);
        assert_eq!(it.stipend.period, StipendPeriod::Week);
        assert_eq!(
            it.posted_date,
            Utc.with_ymd_and_hms(2024, 5, 30, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_results_field_is_empty() {
        let now = Utc::now();
        assert!(parse_api_body(r#"{"totalResults":0}"#, now).unwrap().is_empty());
    }
}
