//! Geo rule management and the dry-run test endpoint.

use std::net::IpAddr;

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use chrono::Utc;

use crate::error::{ApiError, ErrorBody};
use crate::rules::GeoRule;
use crate::state::AppState;
use crate::types::RequestContext;

use super::types::{GeoRuleResponse, TestGeoRequest, TestGeoResponse, VersionResponse};

/// Get the current geo rule.
#[utoipa::path(
    get,
    path = "/geo-rules",
    responses(
        (status = 200, description = "Current geo rule", body = GeoRuleResponse),
    ),
    tag = "Geo"
)]
pub async fn get_geo_rule(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.rules().snapshot();
    Json(GeoRuleResponse {
        geo_rule: snapshot.geo.clone(),
        version: snapshot.version,
    })
}

/// Replace the geo rule.
///
/// Full replacement: omitted fields reset to defaults rather than being
/// silently merged. Country codes are normalized to uppercase.
#[utoipa::path(
    put,
    path = "/geo-rules",
    request_body = GeoRule,
    responses(
        (status = 200, description = "Geo rule replaced", body = VersionResponse),
        (status = 400, description = "Invalid geo rule", body = ErrorBody),
    ),
    tag = "Geo"
)]
pub async fn put_geo_rule(
    State(state): State<AppState>,
    Json(geo): Json<GeoRule>,
) -> Result<Json<VersionResponse>, ApiError> {
    let version = state.rules().set_geo_rule(geo)?;
    Ok(Json(VersionResponse { version }))
}

/// Dry-run a request against the current rules.
///
/// Runs the full decision path for an IP without consuming a rate-limit
/// slot, writing audit records, or touching stats.
#[utoipa::path(
    post,
    path = "/geo-rules/test",
    request_body = TestGeoRequest,
    responses(
        (status = 200, description = "Evaluation result", body = TestGeoResponse),
        (status = 400, description = "Invalid IP address", body = ErrorBody),
    ),
    tag = "Geo"
)]
pub async fn test_geo_rule(
    State(state): State<AppState>,
    Json(req): Json<TestGeoRequest>,
) -> Result<Json<TestGeoResponse>, ApiError> {
    let ip: IpAddr = req
        .ip
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid IP address '{}'", req.ip)))?;

    let ctx = RequestContext {
        identifier: req.identifier.unwrap_or_else(|| req.ip.clone()),
        endpoint: req.endpoint.unwrap_or_else(|| "/".to_string()),
        ip,
        user_agent: None,
        now: Utc::now(),
    };

    let (verdict, location) = state.engine().preview(&ctx).await;
    Ok(Json(TestGeoResponse {
        allowed: verdict.allowed,
        reason: verdict.reason,
        location,
        risk_score: verdict.risk_score,
    }))
}
