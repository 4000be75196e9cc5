// src/store/mod.rs
//! Canonical listing store with freshness expiry.
//!
//! Records are keyed by (source, externalId). A record whose `lastSyncedAt` is older
//! than the retention window is invisible to every read, whether or not the purge
//! task has run yet.

pub mod blend;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::listing::{ExternalListing, ListingKey, LocationType};

pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingFilters {
    #[serde(default)]
    pub source: Option<String>,
    /// Case-insensitive exact match.
    #[serde(default)]
    pub category: Option<String>,
    /// Free text over title, company and description.
    #[serde(default)]
    pub search: Option<String>,
    /// Substring of city, state or country.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub remote_only: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub pages: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: usize) -> Self {
        let limit = limit.max(1);
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(limit as usize) as u32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingPage {
    pub data: Vec<ExternalListing>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub count: usize,
    /// Mean stipend amount over the source's listings, unspecified ones counted as 0.
    pub avg_stipend: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub by_source: BTreeMap<String, SourceStats>,
}

/// Clamp to 1-based page and 1..=100 limit.
pub fn clamp_paging(page: u32, limit: u32) -> (u32, u32) {
    (page.max(1), limit.clamp(1, MAX_PAGE_LIMIT))
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Insert or refresh by (source, externalId). `firstSeenAt` survives refreshes.
    async fn upsert_listing(&self, listing: ExternalListing) -> Result<(), StoreError>;

    /// Active, unexpired records matching `filters`, newest `postedDate` first.
    async fn query(
        &self,
        filters: &ListingFilters,
        page: u32,
        limit: u32,
    ) -> Result<ListingPage, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Remove expired records; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Persist pending writes, if the store has a backing file.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct MemoryListingStore {
    records: RwLock<HashMap<ListingKey, ExternalListing>>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    snapshot: Option<PathBuf>,
    dirty: AtomicBool,
}

impl MemoryListingStore {
    pub fn new(clock: Arc<dyn Clock>, retention: chrono::Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
            retention,
            snapshot: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Back the store with a JSON snapshot at `path` (written by [`ListingStore::flush`]).
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot = Some(path.into());
        self
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Load the snapshot, skipping records that already expired. Missing file is not an error.
    pub async fn load_snapshot(&self) -> Result<usize, StoreError> {
        let Some(path) = self.snapshot.as_deref() else {
            return Ok(0);
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(target: "store", path = %path.display(), "no snapshot yet");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let items: Vec<ExternalListing> = serde_json::from_slice(&bytes)?;
        let now = self.clock.now();
        let total = items.len();

        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        let mut loaded = 0usize;
        for it in items {
            if self.is_fresh(&it, now) {
                records.insert(it.key(), it);
                loaded += 1;
            }
        }
        gauge!("store_listings").set(records.len() as f64);
        drop(records);

        info!(
            target: "store",
            path = %path.display(),
            loaded,
            dropped_expired = total - loaded,
            "snapshot loaded"
        );
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    fn is_fresh(&self, l: &ExternalListing, now: DateTime<Utc>) -> bool {
        l.last_synced_at >= self.cutoff(now)
    }

    /// Snapshot of the readable records.
    fn visible(&self) -> Vec<ExternalListing> {
        let now = self.clock.now();
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        records
            .values()
            .filter(|l| l.is_active && self.is_fresh(l, now))
            .cloned()
            .collect()
    }
}

fn contains_ci(hay: &str, needle_lower: &str) -> bool {
    hay.to_lowercase().contains(needle_lower)
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

fn matches(l: &ExternalListing, f: &ListingFilters) -> bool {
    if let Some(src) = non_empty(&f.source) {
        if l.source.to_lowercase() != src {
            return false;
        }
    }
    if let Some(cat) = non_empty(&f.category) {
        if l.category.to_lowercase() != cat {
            return false;
        }
    }
    if let Some(q) = non_empty(&f.search) {
        if !(contains_ci(&l.title, &q)
            || contains_ci(&l.company, &q)
            || contains_ci(&l.description, &q))
        {
            return false;
        }
    }
    if let Some(loc) = non_empty(&f.location) {
        if !l.location.parts().any(|p| contains_ci(p, &loc)) {
            return false;
        }
    }
    if f.remote_only && l.location.kind != LocationType::Remote {
        return false;
    }
    true
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn upsert_listing(&self, mut listing: ExternalListing) -> Result<(), StoreError> {
        if listing.source.trim().is_empty() || listing.external_id.trim().is_empty() {
            return Err(StoreError::Invalid(
                "source and externalId must be non-empty".to_string(),
            ));
        }
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        let key = listing.key();
        if let Some(prev) = records.get(&key) {
            listing.first_seen_at = prev.first_seen_at.min(listing.first_seen_at);
        }
        records.insert(key, listing);
        gauge!("store_listings").set(records.len() as f64);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn query(
        &self,
        filters: &ListingFilters,
        page: u32,
        limit: u32,
    ) -> Result<ListingPage, StoreError> {
        let (page, limit) = clamp_paging(page, limit);
        let mut hits: Vec<ExternalListing> = self
            .visible()
            .into_iter()
            .filter(|l| matches(l, filters))
            .collect();
        hits.sort_by(|a, b| {
            b.posted_date
                .cmp(&a.posted_date)
                .then_with(|| a.title.cmp(&b.title))
        });

        let total = hits.len();
        let skip = (page as usize - 1).saturating_mul(limit as usize);
        let data = hits.into_iter().skip(skip).take(limit as usize).collect();
        Ok(ListingPage {
            data,
            pagination: Pagination::new(page, limit, total),
        })
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut sums: BTreeMap<String, (usize, f64)> = BTreeMap::new();
        let visible = self.visible();
        for l in &visible {
            let e = sums.entry(l.source.clone()).or_insert((0, 0.0));
            e.0 += 1;
            e.1 += l.stipend.amount;
        }
        Ok(StoreStats {
            total: visible.len(),
            by_source: sums
                .into_iter()
                .map(|(src, (count, sum))| {
                    let avg = if count == 0 { 0.0 } else { sum / count as f64 };
                    (
                        src,
                        SourceStats {
                            count,
                            avg_stipend: (avg * 100.0).round() / 100.0,
                        },
                    )
                })
                .collect(),
        })
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let removed = {
            let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
            let before = records.len();
            records.retain(|_, l| l.last_synced_at >= cutoff);
            gauge!("store_listings").set(records.len() as f64);
            before - records.len()
        };
        if removed > 0 {
            counter!("store_expired_purged_total").increment(removed as u64);
            self.dirty.store(true, Ordering::Release);
            info!(target: "store", removed, cutoff = %cutoff.to_rfc3339(), "purged expired listings");
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = self.snapshot.as_deref() else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut items: Vec<ExternalListing> = {
            let records = self.records.read().unwrap_or_else(|p| p.into_inner());
            records.values().cloned().collect()
        };
        items.sort_by(|a, b| a.key().cmp(&b.key()));

        let write = async {
            let body = serde_json::to_vec_pretty(&items)?;
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, body).await?;
            tokio::fs::rename(&tmp, path).await?;
            Ok::<(), StoreError>(())
        };
        if let Err(e) = write.await {
            // Keep the data marked dirty so the next flush retries.
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(target: "store", path = %path.display(), count = items.len(), "snapshot written");
        Ok(())
    }
}

/// Purge expired records every `interval`, independent of sync runs.
pub fn spawn_expiry_task(store: Arc<dyn ListingStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(_) => {
                    if let Err(e) = store.flush().await {
                        warn!(target: "store", error = %e, "snapshot write after purge failed");
                    }
                }
                Err(e) => warn!(target: "store", error = %e, "expiry purge failed"),
            }
        }
    })
}
