//! The enforcement entry point called by the edge proxy.

use std::net::IpAddr;

use axum::extract::{Json, State};
use chrono::Utc;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;
use crate::types::{RequestContext, Verdict};

use super::types::EvaluateRequest;

/// Evaluate one inbound request.
///
/// Counts the request against matching rate-limit rules, resolves the IP's
/// location, scores it against the geo rule, and returns the verdict. The
/// caller enforces the decision; blocked decisions are audited.
#[utoipa::path(
    post,
    path = "/evaluate",
    request_body = EvaluateRequest,
    responses(
        (status = 200, description = "Verdict for the request", body = Verdict),
        (status = 400, description = "Invalid request", body = ErrorBody),
    ),
    tag = "Evaluate"
)]
pub async fn evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<Verdict>, ApiError> {
    let ip: IpAddr = req
        .ip
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid IP address '{}'", req.ip)))?;
    if req.identifier.trim().is_empty() {
        return Err(ApiError::bad_request("identifier must not be empty"));
    }
    if req.endpoint.trim().is_empty() {
        return Err(ApiError::bad_request("endpoint must not be empty"));
    }

    let ctx = RequestContext {
        identifier: req.identifier,
        endpoint: req.endpoint,
        ip,
        user_agent: req.user_agent,
        now: Utc::now(),
    };

    Ok(Json(state.engine().evaluate(&ctx).await))
}
