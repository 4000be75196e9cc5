//! Internship aggregator: binary entrypoint.
//! Boots the Axum HTTP server, the daily sync scheduler and the store expiry task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use internship_aggregator::clock::{Clock, SystemClock};
use internship_aggregator::config::{parse_daily_at, AggregatorConfig};
use internship_aggregator::ingest::cache::ResponseCache;
use internship_aggregator::ingest::http::HttpFetcher;
use internship_aggregator::ingest::providers::{build_adapters, AdapterDeps};
use internship_aggregator::ingest::scheduler::{spawn_scheduler, SchedulerCfg};
use internship_aggregator::metrics::Metrics;
use internship_aggregator::resilience::ResilienceExecutor;
use internship_aggregator::store::{spawn_expiry_task, ListingStore, MemoryListingStore};
use internship_aggregator::{router, Aggregator, AppState};

/// Compact logs by default, JSON when LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("aggregator=info,resilience=info,store=info,scheduler=info,warn")
    });
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: the platform may already have installed a subscriber.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AggregatorConfig::load_default().context("loading aggregator config")?;
    let metrics = Metrics::init(&cfg).context("installing prometheus recorder")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // --- Store ---
    let mut store = MemoryListingStore::new(clock.clone(), cfg.retention());
    if let Some(path) = cfg.store.snapshot_path.clone() {
        store = store.with_snapshot(path);
    }
    let loaded = store.load_snapshot().await.context("loading listing snapshot")?;
    if let Some(path) = store.snapshot_path() {
        tracing::info!(target: "store", path = %path.display(), loaded, "listing snapshot enabled");
    }
    let store: Arc<dyn ListingStore> = Arc::new(store);
    spawn_expiry_task(store.clone(), cfg.purge_interval());

    // --- Sources ---
    let fetcher = HttpFetcher::new(cfg.http_timeout(), &cfg.http.user_agent)?;
    let deps = AdapterDeps {
        fetcher: Arc::new(fetcher),
        cache: Arc::new(ResponseCache::new(cfg.cache_ttl())),
        clock: clock.clone(),
        synthetic_fallback: cfg.providers.synthetic_fallback,
        fetch_timeout: cfg.http_timeout(),
    };
    let adapters = build_adapters(&cfg.providers, &deps);
    tracing::info!(
        target: "aggregator",
        sources = ?adapters.iter().map(|a| a.name().to_string()).collect::<Vec<_>>(),
        queries = cfg.sync.queries.len(),
        "sources configured"
    );

    let executor = Arc::new(ResilienceExecutor::new(cfg.resilience.clone()));
    let aggregator = Arc::new(
        Aggregator::new(adapters, executor, store.clone(), clock)
            .with_politeness_delay(cfg.politeness_delay())
            .with_queries(cfg.sync.queries.clone()),
    );

    // --- Scheduler ---
    if cfg.sync.scheduler_enabled {
        spawn_scheduler(
            aggregator.clone(),
            SchedulerCfg {
                initial_delay: Duration::from_secs(cfg.sync.initial_delay_secs),
                daily_at: parse_daily_at(&cfg.sync.daily_at)?,
            },
        );
    }

    let state = AppState { aggregator, store };
    let router = router(state).merge(metrics.router());

    Ok(router.into())
}
