use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use internship_aggregator::clock::ManualClock;
use internship_aggregator::listing::{
    ExternalListing, Location, LocationType, RawListing, Requirements, Stipend, StipendPeriod,
};
use internship_aggregator::store::blend::get_external_jobs;
use internship_aggregator::store::{
    spawn_expiry_task, ListingFilters, ListingStore, MemoryListingStore,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn listing(
    source: &str,
    id: &str,
    title: &str,
    category: &str,
    posted: DateTime<Utc>,
    synced: DateTime<Utc>,
) -> ExternalListing {
    let raw = RawListing {
        source: source.into(),
        external_id: Some(id.into()),
        title: title.into(),
        company: "Northwind".into(),
        company_logo: None,
        description: format!("{title} role"),
        location: Location {
            city: Some("Bengaluru".into()),
            state: Some("Karnataka".into()),
            country: Some("India".into()),
            kind: LocationType::Onsite,
        },
        kind: Default::default(),
        duration: Some("3 Months".into()),
        stipend: Stipend {
            amount: 10_000.0,
            currency: "INR".into(),
            period: StipendPeriod::Month,
        },
        requirements: Requirements::default(),
        apply_url: None,
        posted_date: posted,
    };
    ExternalListing::from_raw(raw, id.into(), category.into(), synced)
}

fn store(clock: &Arc<ManualClock>) -> MemoryListingStore {
    MemoryListingStore::new(clock.clone(), Duration::days(30))
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let clock = Arc::new(ManualClock::new(t0()));
    let s = store(&clock);
    let l = listing("indeed", "x1", "Audit Intern", "Finance", t0(), t0());
    s.upsert_listing(l.clone()).await.unwrap();
    s.upsert_listing(l.clone()).await.unwrap();

    let page = s.query(&ListingFilters::default(), 1, 20).await.unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.data[0], l);
}

#[tokio::test]
async fn expired_records_are_hidden_before_purge() {
    let clock = Arc::new(ManualClock::new(t0()));
    let s = store(&clock);
    s.upsert_listing(listing("indeed", "old", "Old", "Other", t0(), t0()))
        .await
        .unwrap();

    clock.advance(Duration::days(31));
    let fresh_at = clock_now(&clock);
    s.upsert_listing(listing("indeed", "new", "New", "Other", fresh_at, fresh_at))
        .await
        .unwrap();

    // Not purged yet, but invisible to reads and stats.
    assert_eq!(s.len(), 2);
    let page = s.query(&ListingFilters::default(), 1, 20).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].external_id, "new");
    assert_eq!(s.stats().await.unwrap().total, 1);

    assert_eq!(s.purge_expired().await.unwrap(), 1);
    assert_eq!(s.len(), 1);
}

fn clock_now(clock: &ManualClock) -> DateTime<Utc> {
    use internship_aggregator::clock::Clock;
    clock.now()
}

#[tokio::test]
async fn resync_refreshes_freshness() {
    let clock = Arc::new(ManualClock::new(t0()));
    let s = store(&clock);
    s.upsert_listing(listing("linkedin", "a", "A", "Other", t0(), t0()))
        .await
        .unwrap();

    clock.advance(Duration::days(20));
    let now = clock_now(&clock);
    s.upsert_listing(listing("linkedin", "a", "A", "Other", t0(), now))
        .await
        .unwrap();

    clock.advance(Duration::days(20));
    let page = s.query(&ListingFilters::default(), 1, 20).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].first_seen_at, t0());
}

#[tokio::test]
async fn category_filter_is_sorted_and_marked_external() {
    let clock = Arc::new(ManualClock::new(t0()));
    let s = store(&clock);
    let day = Duration::days(1);
    for (id, title, cat, posted) in [
        ("f1", "Equity Research Intern", "Finance", t0() - day * 3),
        ("f2", "Accounting Intern", "Finance", t0() - day),
        ("f3", "Audit Intern", "Finance", t0() - day),
        ("w1", "React Intern", "Web Development", t0()),
    ] {
        s.upsert_listing(listing("internshala", id, title, cat, posted, t0()))
            .await
            .unwrap();
    }

    let filters = ListingFilters {
        category: Some("finance".into()),
        ..Default::default()
    };
    let page = get_external_jobs(&s, &filters, 1, 20).await.unwrap();
    let ids: Vec<&str> = page
        .data
        .iter()
        .map(|j| j.listing.external_id.as_str())
        .collect();
    // Newest first; equal dates ordered by title.
    assert_eq!(ids, vec!["f2", "f3", "f1"]);
    assert!(page.data.iter().all(|j| j.is_external));
    assert_eq!(page.pagination.total, 3);

    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["data"][0]["isExternal"], true);
    assert_eq!(json["data"][0]["externalId"], "f2");
    assert_eq!(json["pagination"]["pages"], 1);
}

#[tokio::test]
async fn text_location_remote_filters_and_paging() {
    let clock = Arc::new(ManualClock::new(t0()));
    let s = store(&clock);
    for i in 0..25 {
        let mut l = listing(
            "indeed",
            &format!("id{i:02}"),
            &format!("Role {i:02}"),
            "Other",
            t0() - Duration::minutes(i),
            t0(),
        );
        if i % 5 == 0 {
            l.location.kind = LocationType::Remote;
        }
        s.upsert_listing(l).await.unwrap();
    }

    let page2 = s.query(&ListingFilters::default(), 2, 10).await.unwrap();
    assert_eq!(page2.data.len(), 10);
    assert_eq!(page2.data[0].external_id, "id10");
    assert_eq!(page2.pagination.pages, 3);

    let remote = ListingFilters {
        remote_only: true,
        ..Default::default()
    };
    assert_eq!(s.query(&remote, 1, 100).await.unwrap().pagination.total, 5);

    let loc = ListingFilters {
        location: Some("karnat".into()),
        search: Some("ROLE 1".into()),
        ..Default::default()
    };
    // "Role 10".."Role 19"
    assert_eq!(s.query(&loc, 1, 100).await.unwrap().pagination.total, 10);

    let none = ListingFilters {
        source: Some("linkedin".into()),
        ..Default::default()
    };
    assert!(s.query(&none, 1, 10).await.unwrap().data.is_empty());
}

#[tokio::test]
async fn stats_group_by_source() {
    let clock = Arc::new(ManualClock::new(t0()));
    let s = store(&clock);
    let mut a = listing("indeed", "1", "A", "Other", t0(), t0());
    a.stipend.amount = 5_000.0;
    let b = listing("indeed", "2", "B", "Other", t0(), t0());
    let c = listing("internshala", "3", "C", "Other", t0(), t0());
    for l in [a, b, c] {
        s.upsert_listing(l).await.unwrap();
    }
    let stats = s.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_source["indeed"].count, 2);
    assert_eq!(stats.by_source["indeed"].avg_stipend, 7_500.0);
    assert_eq!(stats.by_source["internshala"].count, 1);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["bySource"]["indeed"]["avgStipend"], 7_500.0);
}

#[tokio::test]
async fn snapshot_round_trip_drops_expired() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("listings.json");
    let clock = Arc::new(ManualClock::new(t0()));

    let s = store(&clock).with_snapshot(&path);
    assert_eq!(s.snapshot_path(), Some(path.as_path()));
    s.upsert_listing(listing("indeed", "old", "Old", "Other", t0(), t0()))
        .await
        .unwrap();
    let later = t0() + Duration::days(10);
    s.upsert_listing(listing("indeed", "new", "New", "Other", later, later))
        .await
        .unwrap();
    s.flush().await.unwrap();
    assert!(path.exists());

    // 35 days after t0: "old" is past retention, "new" is 25 days old.
    clock.set(t0() + Duration::days(35));
    let reloaded = store(&clock).with_snapshot(&path);
    assert_eq!(reloaded.load_snapshot().await.unwrap(), 1);
    let page = reloaded
        .query(&ListingFilters::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].external_id, "new");
}

#[tokio::test]
async fn missing_snapshot_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let s = store(&clock).with_snapshot(dir.path().join("nope.json"));
    assert_eq!(s.load_snapshot().await.unwrap(), 0);
    assert!(s.is_empty());
}

#[tokio::test(start_paused = true)]
async fn expiry_task_purges_on_its_own() {
    let clock = Arc::new(ManualClock::new(t0()));
    let s = Arc::new(store(&clock));
    s.upsert_listing(listing("indeed", "a", "A", "Other", t0(), t0()))
        .await
        .unwrap();

    let handle = spawn_expiry_task(s.clone(), std::time::Duration::from_secs(3600));
    // First tick runs immediately; nothing is stale yet.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    assert_eq!(s.len(), 1);

    clock.advance(Duration::days(31));
    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    assert_eq!(s.len(), 0);

    handle.abort();
}
