// src/ingest/mod.rs
pub mod cache;
pub mod categorize;
pub mod http;
pub mod orchestrator;
pub mod providers;
pub mod scheduler;
pub mod scrape;
pub mod types;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::listing::{ListingType, Location, LocationType, Stipend, StipendPeriod};

/// Longest text we keep for any normalized field.
pub const MAX_TEXT_CHARS: usize = 4000;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregator_runs_total", "Completed aggregation runs.");
        describe_counter!(
            "aggregator_runs_rejected_total",
            "Sync triggers rejected because a run was already active."
        );
        describe_counter!(
            "aggregator_listings_upserted_total",
            "Listings upserted into the store."
        );
        describe_counter!(
            "aggregator_source_errors_total",
            "Query-level source failures (after retries or short-circuit)."
        );
        describe_counter!(
            "aggregator_items_skipped_total",
            "Provider items skipped as malformed."
        );
        describe_counter!(
            "aggregator_synthetic_total",
            "Placeholder listings produced by the last-resort strategy."
        );
        describe_counter!(
            "resilience_failures_total",
            "Failed provider call attempts by kind."
        );
        describe_counter!(
            "resilience_short_circuits_total",
            "Calls skipped because the circuit was open."
        );
        describe_counter!(
            "resilience_circuit_opened_total",
            "Times a source circuit tripped open."
        );
        describe_counter!(
            "store_expired_purged_total",
            "Listings purged by freshness expiry."
        );
        describe_counter!("cache_hits_total", "Response cache hits.");
        describe_counter!("cache_misses_total", "Response cache misses.");
        describe_histogram!("aggregator_run_ms", "Aggregation run duration in milliseconds.");
        describe_gauge!(
            "aggregator_last_run_ts",
            "Unix ts when the aggregation run last finished."
        );
        describe_gauge!("store_listings", "Listings currently held by the store.");
        describe_gauge!("aggregator_cache_ttl_ms", "Provider response cache TTL.");
        describe_gauge!("store_retention_secs", "Freshness window for stored listings.");
        describe_gauge!(
            "resilience_attempt_budget_secs",
            "Per-attempt budget covering one adapter's strategy chain."
        );
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// Normalize an optional field, mapping empty results to `None`.
pub fn normalize_opt(s: Option<&str>) -> Option<String> {
    s.map(normalize_text).filter(|t| !t.is_empty())
}

/// Parse stipend text such as "₹ 10,000 /month", "$1.5k per week" or "Unpaid".
///
/// Only the first numeric amount is used (ranges keep their lower bound).
/// `default_currency` applies when an amount is present but no currency marker is.
pub fn parse_stipend(text: &str, default_currency: &str) -> Stipend {
    static RE_AMOUNT: OnceCell<Regex> = OnceCell::new();
    let re = RE_AMOUNT
        .get_or_init(|| Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(k\b)?").unwrap());

    let t = normalize_text(text);
    let lower = t.to_lowercase();
    if lower.contains("unpaid") {
        return Stipend::unspecified();
    }

    let Some(caps) = re.captures(&t) else {
        return Stipend::unspecified();
    };
    let Ok(mut amount) = caps[1].replace(',', "").parse::<f64>() else {
        return Stipend::unspecified();
    };
    if caps.get(2).is_some() {
        amount *= 1_000.0;
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Stipend::unspecified();
    }

    static RE_RUPEE: OnceCell<Regex> = OnceCell::new();
    let re_rupee = RE_RUPEE.get_or_init(|| Regex::new(r"(?i)\b(inr|rs)\b").unwrap());

    let currency = if t.contains('₹') || re_rupee.is_match(&t) {
        "INR"
    } else if t.contains('$') || lower.contains("usd") {
        "USD"
    } else if t.contains('€') || lower.contains("eur") {
        "EUR"
    } else if t.contains('£') || lower.contains("gbp") {
        "GBP"
    } else {
        default_currency
    };

    static RE_HOURLY: OnceCell<Regex> = OnceCell::new();
    let re_hourly = RE_HOURLY.get_or_init(|| Regex::new(r"\b(hour|hourly|hr|hrs)\b").unwrap());

    let period = if lower.contains("lump") {
        StipendPeriod::Lumpsum
    } else if re_hourly.is_match(&lower) {
        StipendPeriod::Hour
    } else if lower.contains("week") || lower.contains("/wk") {
        StipendPeriod::Week
    } else if lower.contains("year") || lower.contains("annum") || lower.contains("/yr") {
        StipendPeriod::Year
    } else {
        StipendPeriod::Month
    };

    Stipend {
        amount,
        currency: currency.to_string(),
        period,
    }
}

/// Classify free-text location ("Bengaluru, Karnataka, India", "Remote", "Austin, TX (Hybrid)").
pub fn classify_location(text: &str) -> Location {
    let t = normalize_text(text);
    let lower = t.to_lowercase();
    let kind = if lower.contains("remote") || lower.contains("work from home") || lower == "wfh" {
        LocationType::Remote
    } else if lower.contains("hybrid") {
        LocationType::Hybrid
    } else {
        LocationType::Onsite
    };

    static RE_PARENS: OnceCell<Regex> = OnceCell::new();
    let re_parens = RE_PARENS.get_or_init(|| Regex::new(r"\([^)]*\)").unwrap());
    let stripped = re_parens.replace_all(&t, "");

    let parts: Vec<String> = stripped
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| {
            let l = p.to_lowercase();
            !p.is_empty()
                && l != "remote"
                && l != "hybrid"
                && l != "work from home"
                && l != "wfh"
        })
        .collect();

    let mut it = parts.into_iter();
    let (city, state, country) = (it.next(), it.next(), it.next());
    Location {
        city,
        state,
        country,
        kind,
    }
}

/// Map free-text employment type to the listing type enum.
pub fn parse_listing_type(text: &str) -> ListingType {
    let lower = text.to_lowercase();
    let is_intern = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| matches!(w, "intern" | "interns" | "internship" | "internships"));
    if is_intern {
        ListingType::Internship
    } else if lower.contains("part") {
        ListingType::PartTime
    } else if lower.contains("full") {
        ListingType::FullTime
    } else if lower.contains("project") || lower.contains("contract") || lower.contains("freelance")
    {
        ListingType::Project
    } else {
        ListingType::Internship
    }
}

/// Parse a posted-date string; unknown formats fall back to `now`.
pub fn parse_posted(text: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let t = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(t) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Utc.from_utc_datetime(&dt);
        }
    }
    if t.len() >= 9 && t.chars().all(|c| c.is_ascii_digit()) {
        if let Some(dt) = t.parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single()) {
            return dt;
        }
    }

    let lower = t.to_lowercase();
    if lower.contains("yesterday") {
        return now - Duration::days(1);
    }

    static RE_AGO: OnceCell<Regex> = OnceCell::new();
    let re = RE_AGO.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\+?\s*(minute|min|hour|hr|day|week|month)s?\s+ago").unwrap()
    });
    if let Some(caps) = re.captures(&lower) {
        let n: i64 = caps[1].parse().unwrap_or(0);
        let delta = match &caps[2] {
            "minute" | "min" => Duration::minutes(n),
            "hour" | "hr" => Duration::hours(n),
            "day" => Duration::days(n),
            "week" => Duration::weeks(n),
            _ => Duration::days(30 * n),
        };
        return now - delta;
    }
    now
}

/// Short hex digest (sha256) of the joined parts.
pub(crate) fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.trim().to_lowercase().as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Deterministic id for items that arrive without a provider id.
pub fn generate_external_id(source: &str, title: &str, company: &str, location: &str) -> String {
    format!("gen-{}", short_digest(&[source, title, company, location]))
}
