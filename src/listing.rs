//! Canonical listing shape shared by the adapters, the orchestrator and the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Remote,
    #[default]
    Onsite,
    Hybrid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ListingType {
    #[default]
    Internship,
    Project,
    FullTime,
    PartTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Location {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: LocationType,
}

impl Location {
    /// All textual parts, for substring matching.
    pub fn parts(&self) -> impl Iterator<Item = &str> {
        [&self.city, &self.state, &self.country]
            .into_iter()
            .filter_map(|p| p.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StipendPeriod {
    Hour,
    Week,
    #[default]
    Month,
    Year,
    Lumpsum,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Stipend {
    pub amount: f64,
    /// ISO code, or "unspecified" when the text carried none.
    pub currency: String,
    pub period: StipendPeriod,
}

impl Stipend {
    pub fn unspecified() -> Self {
        Self {
            amount: 0.0,
            currency: "unspecified".to_string(),
            period: StipendPeriod::Month,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Requirements {
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Adapter output: canonical fields minus category/isActive/lastSyncedAt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawListing {
    pub source: String,
    /// Provider-supplied id, when the provider has one.
    pub external_id: Option<String>,
    pub title: String,
    pub company: String,
    pub company_logo: Option<String>,
    pub description: String,
    pub location: Location,
    #[serde(rename = "type")]
    pub kind: ListingType,
    pub duration: Option<String>,
    pub stipend: Stipend,
    pub requirements: Requirements,
    pub apply_url: Option<String>,
    pub posted_date: DateTime<Utc>,
}

/// Persisted record, unique per (source, externalId).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalListing {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub company: String,
    pub company_logo: Option<String>,
    pub description: String,
    pub location: Location,
    #[serde(rename = "type")]
    pub kind: ListingType,
    pub category: String,
    pub duration: Option<String>,
    pub stipend: Stipend,
    pub requirements: Requirements,
    pub apply_url: Option<String>,
    pub posted_date: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub is_active: bool,
}

impl ExternalListing {
    /// Build an active record from adapter output. `first_seen_at` starts at `now`;
    /// the store keeps the original value on later upserts.
    pub fn from_raw(
        raw: RawListing,
        external_id: String,
        category: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source: raw.source,
            external_id,
            title: raw.title,
            company: raw.company,
            company_logo: raw.company_logo,
            description: raw.description,
            location: raw.location,
            kind: raw.kind,
            category,
            duration: raw.duration,
            stipend: raw.stipend,
            requirements: raw.requirements,
            apply_url: raw.apply_url,
            posted_date: raw.posted_date,
            first_seen_at: now,
            last_synced_at: now,
            is_active: true,
        }
    }

    pub fn key(&self) -> ListingKey {
        ListingKey {
            source: self.source.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListingKey {
    pub source: String,
    pub external_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_type_serializes_kebab_case() {
        let s = serde_json::to_string(&ListingType::FullTime).unwrap();
        assert_eq!(s, "\"full-time\"");
        let back: ListingType = serde_json::from_str("\"part-time\"").unwrap();
        assert_eq!(back, ListingType::PartTime);
    }

    #[test]
    fn location_type_field_is_named_type() {
        let loc = Location {
            city: Some("Pune".into()),
            kind: LocationType::Hybrid,
            ..Default::default()
        };
        let v = serde_json::to_value(&loc).unwrap();
        assert_eq!(v["type"], "hybrid");
        assert_eq!(loc.parts().collect::<Vec<_>>(), vec!["Pune"]);
    }
}
