// src/ingest/providers/mod.rs
//! Source adapters and the strategy chain they share:
//! primary API -> fallback page scrape -> synthetic placeholders.

pub mod indeed;
pub mod internshala;
pub mod linkedin;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::FetchError;
use crate::ingest::cache::ResponseCache;
use crate::ingest::http::{PageFetcher, PageRequest};
use crate::ingest::scrape::{extract_cards, CardLayout, ScrapedCard};
use crate::ingest::types::{SearchFilters, SourceAdapter, Strategy};
use crate::ingest::{classify_location, parse_posted, parse_stipend, short_digest};
use crate::listing::{ListingType, Location, LocationType, RawListing, Requirements, Stipend};

/// How many placeholder listings the last-resort strategy produces.
pub const SYNTHETIC_COUNT: usize = 3;

/// Outbound fetches one adapter call can make in sequence (primary API, then page).
pub const FETCHES_PER_CALL: u32 = 2;

fn default_enabled() -> bool {
    true
}

/// Per-provider settings. URLs default to the adapter's public endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Primary API credential; the API strategy is skipped without one.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub search_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_url: None,
            search_url: None,
        }
    }
}

impl ProviderConfig {
    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Shared collaborators every adapter needs; built once per process.
#[derive(Clone)]
pub struct AdapterDeps {
    pub fetcher: Arc<dyn PageFetcher>,
    pub cache: Arc<ResponseCache>,
    pub clock: Arc<dyn Clock>,
    pub synthetic_fallback: bool,
    /// Bound on each single outbound fetch.
    pub fetch_timeout: Duration,
}

/// Provider-specific pieces plugged into [`run_strategies`].
pub(crate) trait ProviderStrategies: Send + Sync {
    fn source(&self) -> &'static str;
    fn deps(&self) -> &AdapterDeps;
    fn default_currency(&self) -> &'static str;
    fn layout(&self) -> &'static CardLayout;

    /// `None` when the primary API is unavailable (e.g. no key configured).
    fn api_request(&self, query: &str, filters: &SearchFilters) -> Option<PageRequest>;

    /// Parse the API body. Malformed items are skipped; only a body that cannot be
    /// read at all is an error.
    fn parse_api(&self, body: &str, now: DateTime<Utc>) -> Result<Vec<RawListing>, FetchError>;

    fn page_request(&self, query: &str, filters: &SearchFilters) -> PageRequest;
}

/// Fetch through the response cache. The body is cached only once `parse` accepts it.
async fn fetch_cached<T>(
    deps: &AdapterDeps,
    key: String,
    req: &PageRequest,
    parse: impl Fn(&str) -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    if let Some(body) = deps.cache.get(&key).await {
        if let Ok(parsed) = parse(&body) {
            return Ok(parsed);
        }
    }
    let body = match tokio::time::timeout(deps.fetch_timeout, deps.fetcher.get(req)).await {
        Ok(res) => res?,
        Err(_) => return Err(FetchError::Timeout(deps.fetch_timeout.as_millis() as u64)),
    };
    let parsed = parse(&body)?;
    deps.cache.put(key, body).await;
    Ok(parsed)
}

pub(crate) async fn run_strategies<P: ProviderStrategies>(
    p: &P,
    query: &str,
    filters: &SearchFilters,
) -> Result<Vec<RawListing>, FetchError> {
    let source = p.source();
    let deps = p.deps();
    let now = deps.clock.now();

    // 1) Primary API
    if let Some(req) = p.api_request(query, filters) {
        let key = ResponseCache::key(source, Strategy::Api, query, filters);
        match fetch_cached(deps, key, &req, |b| p.parse_api(b, now)).await {
            Ok(items) if !items.is_empty() => {
                debug!(target: "aggregator", source, query, count = items.len(), "primary api");
                return Ok(items);
            }
            Ok(_) => debug!(target: "aggregator", source, query, "primary api returned nothing"),
            Err(e) => warn!(
                target: "aggregator",
                source, query, kind = e.kind().as_str(), error = %e,
                "primary api failed, falling back to page"
            ),
        }
    }

    // 2) Fallback page extraction; a failed fetch here is the operation-level failure.
    let req = p.page_request(query, filters);
    let key = ResponseCache::key(source, Strategy::Scrape, query, filters);
    let cards = fetch_cached(deps, key, &req, |b| Ok(extract_cards(b, p.layout()))).await?;
    let items = cards_to_listings(source, cards, p.default_currency(), filters, now);
    if !items.is_empty() {
        debug!(target: "aggregator", source, query, count = items.len(), "page extraction");
        return Ok(items);
    }

    // 3) Last resort
    if deps.synthetic_fallback {
        let strategy = Strategy::Synthetic.as_str();
        info!(target: "aggregator", source, query, strategy, "no listings extracted, using placeholders");
        counter!("aggregator_synthetic_total", "source" => source, "strategy" => strategy)
            .increment(SYNTHETIC_COUNT as u64);
        return Ok(synthetic_listings(source, query, filters, now));
    }
    Ok(Vec::new())
}

/// Convert scraped cards; cards without a title or company are dropped.
pub(crate) fn cards_to_listings(
    source: &str,
    cards: Vec<ScrapedCard>,
    default_currency: &str,
    filters: &SearchFilters,
    now: DateTime<Utc>,
) -> Vec<RawListing> {
    let mut out = Vec::with_capacity(cards.len());
    for card in cards {
        let (Some(title), Some(company)) = (card.title, card.company) else {
            debug!(target: "aggregator", source, "skipping card without title/company");
            counter!("aggregator_items_skipped_total", "source" => source.to_string())
                .increment(1);
            continue;
        };
        let location = classify_location(card.location.as_deref().unwrap_or_default());
        out.push(RawListing {
            source: source.to_string(),
            external_id: card.id,
            description: format!("{title} at {company}"),
            title,
            company,
            company_logo: None,
            location,
            kind: filters.listing_type.unwrap_or_default(),
            duration: card.duration,
            stipend: card
                .stipend
                .as_deref()
                .map(|s| parse_stipend(s, default_currency))
                .unwrap_or_else(Stipend::unspecified),
            requirements: Requirements::default(),
            apply_url: card.apply_url,
            posted_date: card
                .posted
                .as_deref()
                .map(|p| parse_posted(p, now))
                .unwrap_or(now),
        });
    }
    out
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plausible placeholders so a dark source degrades instead of returning nothing.
/// Ids derive from (source, query, slot), so re-runs refresh rather than duplicate.
pub fn synthetic_listings(
    source: &str,
    query: &str,
    filters: &SearchFilters,
    now: DateTime<Utc>,
) -> Vec<RawListing> {
    let topic = match title_case(query) {
        t if t.is_empty() => "General".to_string(),
        t => t,
    };
    let titles = [
        format!("{topic} Intern"),
        format!("Junior {topic} Associate"),
        format!("{topic} Trainee"),
    ];
    let location = if filters.remote_only {
        Location {
            kind: LocationType::Remote,
            ..Default::default()
        }
    } else {
        filters
            .location
            .as_deref()
            .map(classify_location)
            .unwrap_or_else(|| Location {
                kind: LocationType::Remote,
                ..Default::default()
            })
    };

    titles
        .into_iter()
        .take(SYNTHETIC_COUNT)
        .enumerate()
        .map(|(slot, title)| RawListing {
            source: source.to_string(),
            external_id: Some(format!(
                "synthetic-{}",
                short_digest(&[source, query, &slot.to_string()])
            )),
            description: format!(
                "Placeholder {topic} opening listed while {source} results are unavailable."
            ),
            company: format!("{} Partner Company {}", title_case(source), slot + 1),
            title,
            company_logo: None,
            location: location.clone(),
            kind: filters.listing_type.unwrap_or(ListingType::Internship),
            duration: Some("3 Months".to_string()),
            stipend: Stipend::unspecified(),
            requirements: Requirements {
                skills: query.split_whitespace().map(title_case).collect(),
            },
            apply_url: None,
            posted_date: now,
        })
        .collect()
}

/// Build the enabled adapters from configuration.
pub fn build_adapters(
    cfg: &crate::config::ProvidersConfig,
    deps: &AdapterDeps,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if cfg.linkedin.enabled {
        out.push(Arc::new(linkedin::LinkedInAdapter::new(
            &cfg.linkedin,
            deps.clone(),
        )));
    }
    if cfg.indeed.enabled {
        out.push(Arc::new(indeed::IndeedAdapter::new(&cfg.indeed, deps.clone())));
    }
    if cfg.internshala.enabled {
        out.push(Arc::new(internshala::InternshalaAdapter::new(
            &cfg.internshala,
            deps.clone(),
        )));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn synthetic_ids_are_stable_per_query() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let f = SearchFilters::default();
        let a = synthetic_listings("indeed", "data science", &f, now);
        let b = synthetic_listings("indeed", "data science", &f, now);
        assert_eq!(a.len(), SYNTHETIC_COUNT);
        assert_eq!(a, b);
        assert_eq!(a[0].title, "Data Science Intern");
        assert!(a.iter().all(|l| l.source == "indeed"));
        assert!(a
            .iter()
            .all(|l| l.external_id.as_deref().unwrap().starts_with("synthetic-")));
    }

    #[test]
    fn cards_without_company_are_skipped() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let cards = vec![
            ScrapedCard {
                title: Some("Design Intern".into()),
                company: Some("Studio".into()),
                location: Some("Remote".into()),
                stipend: Some("₹ 5,000 /month".into()),
                ..Default::default()
            },
            ScrapedCard {
                title: Some("Orphan".into()),
                ..Default::default()
            },
        ];
        let out = cards_to_listings("internshala", cards, "INR", &SearchFilters::default(), now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].location.kind, LocationType::Remote);
        assert_eq!(out[0].stipend.amount, 5_000.0);
        assert_eq!(out[0].posted_date, now);
    }
}
