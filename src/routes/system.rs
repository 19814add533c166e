//! System and health endpoints.

use axum::extract::{Json, State};
use axum::response::IntoResponse;

use crate::state::AppState;

use super::types::HealthResponse;

/// Check server health.
///
/// Returns server status, version, uptime, and engine counters.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse),
    ),
    tag = "System"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (evaluated, blocked) = state.engine().counters();
    let (geo_hits, geo_misses) = state.engine().geo_cache_stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_secs(),
        evaluated_requests: evaluated,
        blocked_requests: blocked,
        rules_version: state.rules().snapshot().version,
        geo_cache_hits: geo_hits,
        geo_cache_misses: geo_misses,
        audit_records: state.audit_log().len(),
    })
}
