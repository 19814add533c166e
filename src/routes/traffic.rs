//! Monitor table, traffic stats, and the blocked-attempt audit feed.

use axum::extract::{Json, Query, State};
use chrono::Utc;

use crate::audit::parse_range;
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

use super::types::{
    AttemptsQuery, AttemptsResponse, EntriesQuery, EntriesResponse, StatsQuery, StatsResponse,
};

const DEFAULT_PER_PAGE: usize = 50;
const MAX_PER_PAGE: usize = 500;

fn range_or_default(range: Option<&str>) -> Result<chrono::Duration, ApiError> {
    match range {
        None => Ok(chrono::Duration::hours(24)),
        Some(r) => parse_range(r)
            .ok_or_else(|| ApiError::bad_request(format!("invalid range '{r}', expected 1h|6h|24h|7d"))),
    }
}

/// List live window entries for the rate-limit monitor table.
///
/// `status=blocked` returns only currently blocked identifiers;
/// `status=active` only counting, not-yet-blocked ones.
#[utoipa::path(
    get,
    path = "/entries",
    params(EntriesQuery),
    responses(
        (status = 200, description = "Window entries", body = EntriesResponse),
        (status = 400, description = "Invalid query", body = ErrorBody),
    ),
    tag = "Traffic"
)]
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>, ApiError> {
    // Windows only live as long as their rule's duration, so the range
    // parameter mostly matters for symmetry with /stats; validate it anyway.
    range_or_default(query.range.as_deref())?;
    let now = Utc::now();

    let mut entries = state.engine().window_entries(now);

    match query.status.as_deref().unwrap_or("all") {
        "all" => {}
        "blocked" => entries.retain(|e| e.blocked),
        "active" => entries.retain(|e| !e.blocked),
        other => {
            return Err(ApiError::bad_request(format!(
                "invalid status '{other}', expected all|blocked|active"
            )));
        }
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        let needle = search.to_lowercase();
        entries.retain(|e| {
            e.identifier.to_lowercase().contains(&needle)
                || e.rule_id.to_string().contains(&needle)
        });
    }

    // Busiest windows first.
    entries.sort_by(|a, b| b.count.cmp(&a.count));

    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let page = query.page.unwrap_or(1).max(1);
    let total = entries.len();
    let entries = entries
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    Ok(Json(EntriesResponse {
        entries,
        total,
        page,
        per_page,
    }))
}

/// Traffic statistics for the dashboard.
#[utoipa::path(
    get,
    path = "/stats",
    params(StatsQuery),
    responses(
        (status = 200, description = "Aggregated traffic stats", body = StatsResponse),
        (status = 400, description = "Invalid range", body = ErrorBody),
    ),
    tag = "Traffic"
)]
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    let range = range_or_default(query.range.as_deref())?;
    Ok(Json(state.engine().stats_summary(range, Utc::now())))
}

/// Blocked-attempt audit feed, newest first.
#[utoipa::path(
    get,
    path = "/attempts",
    params(AttemptsQuery),
    responses(
        (status = 200, description = "Audit records", body = AttemptsResponse),
        (status = 400, description = "Invalid query", body = ErrorBody),
    ),
    tag = "Traffic"
)]
pub async fn list_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<AttemptsResponse>, ApiError> {
    let range = range_or_default(query.range.as_deref())?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1_000);

    let attempts = state.audit_log().query(
        Some(Utc::now() - range),
        query.reason,
        query.search.as_deref().filter(|s| !s.is_empty()),
        limit,
    );
    Ok(Json(AttemptsResponse { attempts }))
}
