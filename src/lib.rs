// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod ingest;
pub mod listing;
pub mod metrics;
pub mod resilience;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::ingest::orchestrator::{Aggregator, AggregatorStatus, SyncOutcome, SyncSummary};
pub use crate::listing::{ExternalListing, RawListing};
pub use crate::store::{ListingStore, MemoryListingStore};
