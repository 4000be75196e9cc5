use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use internship_aggregator::clock::{Clock, ManualClock};
use internship_aggregator::error::{FetchError, StoreError, SyncError};
use internship_aggregator::ingest::orchestrator::{Aggregator, ErrorScope, SyncOutcome};
use internship_aggregator::ingest::types::{SearchFilters, SourceAdapter};
use internship_aggregator::listing::{
    ExternalListing, Location, RawListing, Requirements, Stipend,
};
use internship_aggregator::resilience::{HealthStatus, ResilienceConfig, ResilienceExecutor};
use internship_aggregator::store::{
    ListingFilters, ListingPage, ListingStore, MemoryListingStore, StoreStats,
};

enum Behavior {
    Items(Vec<RawListing>),
    Hang,
}

struct FakeAdapter {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicU32,
}

impl FakeAdapter {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn name(&self) -> &str {
        self.name
    }

    async fn search(
        &self,
        _query: &str,
        _filters: &SearchFilters,
    ) -> Result<Vec<RawListing>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Items(items) => Ok(items.clone()),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

fn raw(source: &str, id: Option<&str>, title: &str, company: &str) -> RawListing {
    RawListing {
        source: source.into(),
        external_id: id.map(String::from),
        title: title.into(),
        company: company.into(),
        company_logo: None,
        description: String::new(),
        location: Location::default(),
        kind: Default::default(),
        duration: None,
        stipend: Stipend::unspecified(),
        requirements: Requirements::default(),
        apply_url: None,
        posted_date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    }
}

fn executor(threshold: u32) -> Arc<ResilienceExecutor> {
    Arc::new(ResilienceExecutor::new(ResilienceConfig {
        max_attempts: 3,
        base_delay_ms: 1_000,
        failure_threshold: threshold,
        cooldown_secs: 300,
        call_timeout_secs: 15,
        rate_limit_weight: 2,
    }))
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 2, 2, 0, 0).unwrap(),
    ))
}

#[tokio::test(start_paused = true)]
async fn partial_failure_does_not_abort_the_run() {
    let a = FakeAdapter::new(
        "A",
        Behavior::Items(vec![
            raw("A", Some("a-1"), "React Frontend Intern", "Acme"),
            raw("A", None, "Financial Analyst Intern", "Ledger"),
        ]),
    );
    let b = FakeAdapter::new("B", Behavior::Hang);
    let c = FakeAdapter::new(
        "C",
        Behavior::Items(vec![raw("C", Some("c-1"), "Event Volunteer", "Fest")]),
    );

    let clock = clock();
    let store = Arc::new(MemoryListingStore::new(clock.clone(), chrono::Duration::days(30)));
    let agg = Aggregator::new(
        vec![a.clone(), b.clone(), c.clone()],
        executor(3),
        store.clone(),
        clock.clone(),
    );

    let outcome = agg
        .sync_all_platforms(&["internship".to_string()])
        .await
        .unwrap();
    let SyncOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run");
    };

    assert_eq!(summary.total_synced, 3);
    assert_eq!(summary.by_source.len(), 2);
    assert_eq!(summary.by_source["A"], 2);
    assert_eq!(summary.by_source["C"], 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].source, "B");
    assert_eq!(summary.errors[0].scope, ErrorScope::Query);

    // B timed out on every attempt; three timeouts trip its circuit.
    assert_eq!(b.calls.load(Ordering::SeqCst), 3);
    let status = agg.get_status();
    assert!(!status.is_running);
    assert_eq!(status.last_sync_time, Some(summary.finished_at));
    assert_eq!(status.api_health["B"].status, HealthStatus::Down);
    assert!(status.api_health["B"].circuit_open);
    assert_eq!(status.api_health["A"].status, HealthStatus::Up);
    assert_eq!(status.api_health["C"].status, HealthStatus::Up);

    // Stored with categories and generated ids where the provider had none.
    let page = store
        .query(&ListingFilters::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 3);
    let by_title = |t: &str| page.data.iter().find(|l| l.title == t).unwrap().clone();
    assert_eq!(by_title("React Frontend Intern").category, "Web Development");
    let fin = by_title("Financial Analyst Intern");
    assert_eq!(fin.category, "Finance");
    assert!(fin.external_id.starts_with("gen-"));
    assert_eq!(by_title("Event Volunteer").category, "Other");
    assert!(page.data.iter().all(|l| l.is_active && l.last_synced_at == clock.now()));

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["isRunning"], false);
    assert_eq!(json["lastSyncStats"]["totalSynced"], 3);
    assert_eq!(json["apiHealth"]["B"]["circuitOpen"], true);
}

#[tokio::test(start_paused = true)]
async fn generated_ids_are_stable_across_runs() {
    let a = FakeAdapter::new(
        "A",
        Behavior::Items(vec![raw("A", None, "Data Analyst Intern", "Numbers Co")]),
    );
    let clock = clock();
    let store = Arc::new(MemoryListingStore::new(clock.clone(), chrono::Duration::days(30)));
    let agg = Aggregator::new(vec![a], executor(5), store.clone(), clock.clone());

    let q = vec!["data".to_string()];
    agg.sync_all_platforms(&q).await.unwrap();
    clock.advance(chrono::Duration::days(1));
    agg.sync_all_platforms(&q).await.unwrap();

    assert_eq!(store.len(), 1);
    let page = store.query(&ListingFilters::default(), 1, 10).await.unwrap();
    assert_eq!(page.data[0].last_synced_at, clock.now());
}

#[tokio::test(start_paused = true)]
async fn second_trigger_while_running_is_rejected() {
    let slow = FakeAdapter::new("slow", Behavior::Hang);
    let clock = clock();
    let store = Arc::new(MemoryListingStore::new(clock.clone(), chrono::Duration::days(30)));
    let agg = Arc::new(
        Aggregator::new(vec![slow.clone()], executor(5), store, clock)
            .with_queries(vec!["design".into()]),
    );

    let handle = agg.trigger().unwrap().expect("first trigger starts a run");
    assert!(agg.is_running());

    assert!(agg.trigger().unwrap().is_none());
    let second = agg
        .sync_all_platforms(&["design".to_string()])
        .await
        .unwrap();
    assert_eq!(second, SyncOutcome::AlreadyRunning);

    let summary = handle.await.unwrap();
    assert_eq!(summary.errors.len(), 1);
    assert!(!agg.is_running());
    // Only the first run ever reached the adapter.
    assert_eq!(slow.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn initialization_errors_are_returned() {
    let clock = clock();
    let store = Arc::new(MemoryListingStore::new(clock.clone(), chrono::Duration::days(30)));
    let none = Aggregator::new(vec![], executor(5), store.clone(), clock.clone());
    assert_eq!(
        none.sync_all_platforms(&["x".into()]).await.unwrap_err(),
        SyncError::NoAdapters
    );

    let a = FakeAdapter::new("A", Behavior::Items(vec![]));
    let agg = Aggregator::new(vec![a], executor(5), store, clock);
    assert_eq!(
        agg.sync_all_platforms(&["  ".into()]).await.unwrap_err(),
        SyncError::NoQueries
    );
}

/// Store that rejects one external id and delegates everything else.
struct RejectingStore {
    inner: MemoryListingStore,
    reject_id: &'static str,
}

#[async_trait]
impl ListingStore for RejectingStore {
    async fn upsert_listing(&self, listing: ExternalListing) -> Result<(), StoreError> {
        if listing.external_id == self.reject_id {
            return Err(StoreError::Invalid("disk full".into()));
        }
        self.inner.upsert_listing(listing).await
    }

    async fn query(
        &self,
        filters: &ListingFilters,
        page: u32,
        limit: u32,
    ) -> Result<ListingPage, StoreError> {
        self.inner.query(filters, page, limit).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.inner.purge_expired().await
    }
}

#[tokio::test(start_paused = true)]
async fn failed_upsert_is_recorded_per_item_and_run_continues() {
    let a = FakeAdapter::new(
        "A",
        Behavior::Items(vec![
            raw("A", Some("a-1"), "Audit Intern", "Ledger"),
            raw("A", Some("bad"), "Broken Intern", "Ledger"),
            raw("A", Some("a-3"), "Tax Intern", "Ledger"),
        ]),
    );
    let clock = clock();
    let store = Arc::new(RejectingStore {
        inner: MemoryListingStore::new(clock.clone(), chrono::Duration::days(30)),
        reject_id: "bad",
    });
    let agg = Aggregator::new(vec![a], executor(5), store.clone(), clock);

    let SyncOutcome::Completed(summary) = agg
        .sync_all_platforms(&["finance".to_string()])
        .await
        .unwrap()
    else {
        panic!("expected a completed run");
    };

    assert_eq!(summary.total_synced, 2);
    assert_eq!(summary.by_source["A"], 2);
    assert_eq!(summary.errors.len(), 1);
    let err = &summary.errors[0];
    assert_eq!(err.scope, ErrorScope::Item);
    assert_eq!(err.source, "A");
    assert_eq!(err.external_id.as_deref(), Some("bad"));
    assert!(err.message.contains("disk full"));
    assert_eq!(store.inner.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn politeness_delay_separates_every_call() {
    let a = FakeAdapter::new("A", Behavior::Items(vec![]));
    let b = FakeAdapter::new("B", Behavior::Items(vec![]));
    let clock = clock();
    let store = Arc::new(MemoryListingStore::new(clock.clone(), chrono::Duration::days(30)));
    let agg = Aggregator::new(vec![a.clone(), b.clone()], executor(5), store, clock)
        .with_politeness_delay(Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    agg.sync_all_platforms(&["design".to_string(), "finance".to_string()])
        .await
        .unwrap();
    let waited = started.elapsed();

    // 2 queries x 2 sources = 4 calls, 3 gaps between them.
    assert_eq!(a.calls.load(Ordering::SeqCst), 2);
    assert_eq!(b.calls.load(Ordering::SeqCst), 2);
    assert!(waited >= Duration::from_secs(6), "waited {waited:?}");
    assert!(waited < Duration::from_secs(7), "waited {waited:?}");
}
