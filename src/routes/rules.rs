//! Rate-limit rule management endpoints.

use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{ApiError, ErrorBody};
use crate::rules::{RateLimitRule, RulePatch};
use crate::state::AppState;

use super::types::{CreateRuleRequest, CreateRuleResponse, ListRulesResponse, VersionResponse};

/// List rate-limit rules.
///
/// Rules are returned in match order (most specific pattern first).
#[utoipa::path(
    get,
    path = "/rules",
    responses(
        (status = 200, description = "Current rule set", body = ListRulesResponse),
    ),
    tag = "Rules"
)]
pub async fn list_rules(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.rules().snapshot();
    Json(ListRulesResponse {
        rules: snapshot.rate_limits().to_vec(),
        version: snapshot.version,
    })
}

/// Create a rate-limit rule.
///
/// Rejects rules with `maxRequests` or `windowMs` of zero; invalid rules are
/// never stored.
#[utoipa::path(
    post,
    path = "/rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 200, description = "Rule created", body = CreateRuleResponse),
        (status = 400, description = "Invalid rule", body = ErrorBody),
    ),
    tag = "Rules"
)]
pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<Json<CreateRuleResponse>, ApiError> {
    let mut rule = RateLimitRule::new(req.endpoint, req.window_ms, req.max_requests, Utc::now());
    if let Some(description) = req.description {
        rule.description = description;
    }
    if let Some(mode) = req.fail_mode {
        rule.fail_mode = mode;
    }
    let id = rule.id;
    state.rules().insert(rule)?;
    Ok(Json(CreateRuleResponse { id }))
}

/// Update a rate-limit rule.
///
/// Partial update: only the provided fields change. The patched rule is
/// re-validated before the swap.
#[utoipa::path(
    patch,
    path = "/rules/{id}",
    params(
        ("id" = Uuid, Path, description = "Rule id"),
    ),
    request_body = RulePatch,
    responses(
        (status = 200, description = "Rule updated", body = VersionResponse),
        (status = 400, description = "Patch makes the rule invalid", body = ErrorBody),
        (status = 404, description = "Rule not found", body = ErrorBody),
    ),
    tag = "Rules"
)]
pub async fn patch_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<RulePatch>,
) -> Result<Json<VersionResponse>, ApiError> {
    let version = state.rules().patch(id, &patch, Utc::now())?;
    Ok(Json(VersionResponse { version }))
}

/// Delete a rate-limit rule.
#[utoipa::path(
    delete,
    path = "/rules/{id}",
    params(
        ("id" = Uuid, Path, description = "Rule id"),
    ),
    responses(
        (status = 200, description = "Rule deleted", body = VersionResponse),
        (status = 404, description = "Rule not found", body = ErrorBody),
    ),
    tag = "Rules"
)]
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VersionResponse>, ApiError> {
    let version = state.rules().remove(id)?;
    Ok(Json(VersionResponse { version }))
}
