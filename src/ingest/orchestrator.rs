// src/ingest/orchestrator.rs
//! Aggregation runs: every query against every source, one call at a time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::ingest::categorize::categorize;
use crate::ingest::scheduler::ScheduledJob;
use crate::ingest::types::{SearchFilters, SourceAdapter};
use crate::ingest::{ensure_metrics_described, generate_external_id};
use crate::listing::{ExternalListing, RawListing};
use crate::resilience::{ResilienceExecutor, SourceHealth};
use crate::store::ListingStore;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorScope {
    /// A whole (query, source) call failed or was short-circuited.
    Query,
    /// A single listing could not be stored.
    Item,
    /// The end-of-run snapshot write failed.
    Store,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    pub scope: ErrorScope,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub message: String,
}

/// Last-known statistics of a finished run.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub total_synced: usize,
    pub by_source: BTreeMap<String, usize>,
    pub errors: Vec<SyncErrorEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    AlreadyRunning,
    Completed(SyncSummary),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatus {
    pub is_running: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_stats: Option<SyncSummary>,
    pub api_health: BTreeMap<String, SourceHealth>,
}

/// In-flight bookkeeping for one run.
struct SyncRun {
    total_synced: usize,
    by_source: BTreeMap<String, usize>,
    errors: Vec<SyncErrorEntry>,
    started_at: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl SyncRun {
    fn start(now: DateTime<Utc>) -> Self {
        Self {
            total_synced: 0,
            by_source: BTreeMap::new(),
            errors: Vec::new(),
            started_at: now,
            started: tokio::time::Instant::now(),
        }
    }

    fn finish(self, now: DateTime<Utc>) -> SyncSummary {
        SyncSummary {
            total_synced: self.total_synced,
            by_source: self.by_source,
            errors: self.errors,
            started_at: self.started_at,
            finished_at: now,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Releases the running flag on drop, including when a run panics.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    executor: Arc<ResilienceExecutor>,
    store: Arc<dyn ListingStore>,
    clock: Arc<dyn Clock>,
    politeness_delay: Duration,
    filters: SearchFilters,
    queries: Vec<String>,
    running: Arc<AtomicBool>,
    last: Mutex<Option<SyncSummary>>,
}

impl Aggregator {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        executor: Arc<ResilienceExecutor>,
        store: Arc<dyn ListingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            adapters,
            executor,
            store,
            clock,
            politeness_delay: Duration::from_secs(2),
            filters: SearchFilters::default(),
            queries: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            last: Mutex::new(None),
        }
    }

    pub fn with_politeness_delay(mut self, d: Duration) -> Self {
        self.politeness_delay = d;
        self
    }

    /// Query set used by scheduled and manually triggered runs.
    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = queries;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn validate(&self, queries: &[String]) -> Result<Vec<String>, SyncError> {
        if self.adapters.is_empty() {
            return Err(SyncError::NoAdapters);
        }
        let queries: Vec<String> = queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return Err(SyncError::NoQueries);
        }
        Ok(queries)
    }

    /// Run every query against every source. A second call while a run is active
    /// returns [`SyncOutcome::AlreadyRunning`] without starting anything.
    pub async fn sync_all_platforms(&self, queries: &[String]) -> Result<SyncOutcome, SyncError> {
        let queries = self.validate(queries)?;
        let Some(guard) = RunGuard::claim(&self.running) else {
            counter!("aggregator_runs_rejected_total").increment(1);
            info!(target: "aggregator", "sync already in progress, rejecting trigger");
            return Ok(SyncOutcome::AlreadyRunning);
        };
        let summary = self.run_sync(&queries).await;
        drop(guard);
        Ok(SyncOutcome::Completed(summary))
    }

    /// Claim the run synchronously and continue in the background with the
    /// configured queries. `Ok(None)` when a run is already active.
    pub fn trigger(self: &Arc<Self>) -> Result<Option<JoinHandle<SyncSummary>>, SyncError> {
        let queries = self.validate(&self.queries)?;
        let Some(guard) = RunGuard::claim(&self.running) else {
            counter!("aggregator_runs_rejected_total").increment(1);
            info!(target: "aggregator", "sync already in progress, rejecting trigger");
            return Ok(None);
        };
        let this = Arc::clone(self);
        Ok(Some(tokio::spawn(async move {
            let _guard = guard;
            this.run_sync(&queries).await
        })))
    }

    async fn run_sync(&self, queries: &[String]) -> SyncSummary {
        let mut run = SyncRun::start(self.clock.now());
        info!(
            target: "aggregator",
            queries = queries.len(),
            sources = self.adapters.len(),
            "sync run started"
        );

        let mut first_call = true;
        for query in queries {
            for adapter in &self.adapters {
                if !first_call && !self.politeness_delay.is_zero() {
                    tokio::time::sleep(self.politeness_delay).await;
                }
                first_call = false;

                let source = adapter.name().to_string();
                let filters = &self.filters;
                let result = self
                    .executor
                    .execute(&source, || adapter.search(query, filters))
                    .await;

                match result {
                    Ok(items) => {
                        debug!(target: "aggregator", source = %source, query = %query, count = items.len(), "source returned");
                        run.by_source.entry(source.clone()).or_insert(0);
                        for raw in items {
                            self.ingest_item(&mut run, &source, raw).await;
                        }
                    }
                    Err(e) => {
                        counter!("aggregator_source_errors_total", "source" => source.clone())
                            .increment(1);
                        warn!(target: "aggregator", source = %source, query = %query, error = %e, "source call failed");
                        run.errors.push(SyncErrorEntry {
                            scope: ErrorScope::Query,
                            source,
                            query: Some(query.clone()),
                            external_id: None,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if let Err(e) = self.store.flush().await {
            warn!(target: "aggregator", error = %e, "store flush failed");
            run.errors.push(SyncErrorEntry {
                scope: ErrorScope::Store,
                source: "store".to_string(),
                query: None,
                external_id: None,
                message: e.to_string(),
            });
        }

        let summary = run.finish(self.clock.now());
        counter!("aggregator_runs_total").increment(1);
        histogram!("aggregator_run_ms").record(summary.duration_ms as f64);
        gauge!("aggregator_last_run_ts").set(summary.finished_at.timestamp() as f64);
        info!(
            target: "aggregator",
            total_synced = summary.total_synced,
            errors = summary.errors.len(),
            duration_ms = summary.duration_ms,
            by_source = ?summary.by_source,
            "sync run finished"
        );

        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(summary.clone());
        summary
    }

    async fn ingest_item(&self, run: &mut SyncRun, source: &str, mut raw: RawListing) {
        raw.source = source.to_string();
        let external_id = raw
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let loc = raw.location.parts().collect::<Vec<_>>().join(", ");
                generate_external_id(source, &raw.title, &raw.company, &loc)
            });
        let category = categorize(&raw).to_string();
        let listing = ExternalListing::from_raw(raw, external_id.clone(), category, self.clock.now());

        match self.store.upsert_listing(listing).await {
            Ok(()) => {
                run.total_synced += 1;
                *run.by_source.entry(source.to_string()).or_insert(0) += 1;
                counter!("aggregator_listings_upserted_total", "source" => source.to_string())
                    .increment(1);
            }
            Err(e) => {
                warn!(target: "aggregator", source, external_id = %external_id, error = %e, "upsert failed");
                run.errors.push(SyncErrorEntry {
                    scope: ErrorScope::Item,
                    source: source.to_string(),
                    query: None,
                    external_id: Some(external_id),
                    message: e.to_string(),
                });
            }
        }
    }

    pub fn last_summary(&self) -> Option<SyncSummary> {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Running flag, last run stats and per-source health (untouched sources are up).
    pub fn get_status(&self) -> AggregatorStatus {
        let mut api_health = self.executor.health();
        for a in &self.adapters {
            api_health
                .entry(a.name().to_string())
                .or_insert_with(SourceHealth::up);
        }
        let last = self.last_summary();
        AggregatorStatus {
            is_running: self.is_running(),
            last_sync_time: last.as_ref().map(|s| s.finished_at),
            last_sync_stats: last,
            api_health,
        }
    }
}

#[async_trait]
impl ScheduledJob for Aggregator {
    fn name(&self) -> &str {
        "external-sync"
    }

    async fn run(&self) {
        match self.sync_all_platforms(&self.queries).await {
            Ok(SyncOutcome::Completed(_)) => {}
            Ok(SyncOutcome::AlreadyRunning) => {
                info!(target: "scheduler", "scheduled run skipped, sync already in progress")
            }
            Err(e) => warn!(target: "scheduler", error = %e, "scheduled sync could not start"),
        }
    }
}
