//! Manual IP block management.

use std::net::IpAddr;

use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use chrono::Utc;

use crate::engine::IpBlock;
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

use super::types::{IpBlockRequest, IpBlocksResponse};

/// List active manual IP blocks.
#[utoipa::path(
    get,
    path = "/ip-blocks",
    responses(
        (status = 200, description = "Active blocks", body = IpBlocksResponse),
    ),
    tag = "Blocks"
)]
pub async fn list_blocks(State(state): State<AppState>) -> impl IntoResponse {
    Json(IpBlocksResponse {
        blocks: state.engine().ip_blocks(Utc::now()),
    })
}

/// Block an IP manually, independent of computed rules.
#[utoipa::path(
    post,
    path = "/ip-blocks",
    request_body = IpBlockRequest,
    responses(
        (status = 200, description = "Block added", body = IpBlock),
        (status = 400, description = "Invalid IP or duration", body = ErrorBody),
    ),
    tag = "Blocks"
)]
pub async fn create_block(
    State(state): State<AppState>,
    Json(req): Json<IpBlockRequest>,
) -> Result<Json<IpBlock>, ApiError> {
    let ip: IpAddr = req
        .ip
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid IP address '{}'", req.ip)))?;
    if req.duration_hours == 0 {
        return Err(ApiError::bad_request("durationHours must be > 0"));
    }

    let blocked_until = state.engine().block_ip(ip, req.duration_hours, Utc::now());
    Ok(Json(IpBlock { ip, blocked_until }))
}

/// Remove a manual IP block.
#[utoipa::path(
    delete,
    path = "/ip-blocks/{ip}",
    params(
        ("ip" = String, Path, description = "Blocked IP address"),
    ),
    responses(
        (status = 200, description = "Block removed"),
        (status = 404, description = "No block for this IP", body = ErrorBody),
    ),
    tag = "Blocks"
)]
pub async fn delete_block(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid IP address '{ip}'")))?;
    if !state.engine().unblock_ip(ip) {
        return Err(ApiError::not_found(format!("no manual block for {ip}")));
    }
    Ok(Json(serde_json::json!({ "unblocked": ip.to_string() })))
}
