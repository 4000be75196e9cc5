use std::sync::Arc;

use serde::{de, Deserialize, Deserializer};
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::ingest::orchestrator::{Aggregator, AggregatorStatus};
use crate::store::blend::{get_external_jobs, ExternalJobsPage};
use crate::store::{ListingFilters, ListingStore, StoreStats, DEFAULT_PAGE_LIMIT};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub store: Arc<dyn ListingStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/external/jobs", get(external_jobs))
        .route("/api/external/stats", get(external_stats))
        .route("/api/external/status", get(external_status))
        .route("/api/external/sync", post(trigger_sync))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct JobsQuery {
    source: Option<String>,
    category: Option<String>,
    search: Option<String>,
    location: Option<String>,
    #[serde(default, deserialize_with = "query_flag")]
    remote: Option<bool>,
    page: Option<u32>,
    limit: Option<u32>,
}

/// Accepts `true`/`false`, `1`/`0` and `yes`/`no`; an empty value means unset.
fn query_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            other => Err(de::Error::custom(format!("invalid flag value '{other}'"))),
        },
    }
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

async fn external_jobs(
    State(state): State<AppState>,
    Query(q): Query<JobsQuery>,
) -> Result<Json<ExternalJobsPage>, ApiError> {
    let filters = ListingFilters {
        source: q.source,
        category: q.category,
        search: q.search,
        location: q.location,
        remote_only: q.remote.unwrap_or(false),
    };
    let page = q.page.unwrap_or(1);
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    get_external_jobs(state.store.as_ref(), &filters, page, limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(target: "store", error = %e, "external jobs query failed");
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

async fn external_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
    state
        .store
        .stats()
        .await
        .map(Json)
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn external_status(State(state): State<AppState>) -> Json<AggregatorStatus> {
    Json(state.aggregator.get_status())
}

async fn trigger_sync(State(state): State<AppState>) -> Response {
    match state.aggregator.trigger() {
        Ok(Some(_)) => (StatusCode::ACCEPTED, Json(json!({ "started": true }))).into_response(),
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "reason": "already running" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "started": false, "reason": e.to_string() })),
        )
            .into_response(),
    }
}
