use axum::{extract::State, routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::config::AggregatorConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder, describe the crate's series and
    /// publish the effective freshness settings as static gauges.
    pub fn init(cfg: &AggregatorConfig) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        crate::ingest::ensure_metrics_described();

        gauge!("aggregator_cache_ttl_ms").set(cfg.cache_ttl().as_millis() as f64);
        gauge!("store_retention_secs").set(cfg.retention().num_seconds() as f64);
        gauge!("resilience_attempt_budget_secs").set(cfg.resilience.call_timeout_secs as f64);

        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render))
            .with_state(self.handle.clone())
    }
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
