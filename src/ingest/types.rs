// src/ingest/types.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::listing::{ListingType, RawListing};

/// Provider-agnostic search filters; each adapter maps them to its own parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchFilters {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub remote_only: bool,
    #[serde(default)]
    pub listing_type: Option<ListingType>,
}

/// Which step of the adapter strategy chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Api,
    Scrape,
    Synthetic,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Api => "api",
            Strategy::Scrape => "scrape",
            Strategy::Synthetic => "synthetic",
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable source name; also the circuit-breaker key and the `source` field of listings.
    fn name(&self) -> &str;

    /// Search the provider. Errors only for operation-level failure; bad items are skipped.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<RawListing>, FetchError>;
}
