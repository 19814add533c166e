//! Request/response types for the EdgeGate HTTP API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::BlockedAttempt;
use crate::engine::IpBlock;
use crate::geo::LocationInfo;
use crate::rules::{FailMode, GeoRule, RateLimitRule};
use crate::stats::StatsSummary;
use crate::types::Reason;
use crate::window::WindowEntry;

// ---------------------------------------------------------------------------
// Rate-limit rules
// ---------------------------------------------------------------------------

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    /// Endpoint glob, e.g. "/api/auth/*".
    pub endpoint: String,
    /// Window duration in milliseconds.
    pub window_ms: u64,
    /// Maximum requests per identifier per window.
    pub max_requests: u64,
    #[serde(default)]
    pub description: Option<String>,
    /// Fail-open (default) or fail-closed when the counter store is down.
    #[serde(default)]
    pub fail_mode: Option<FailMode>,
}

#[derive(Serialize, ToSchema)]
pub struct CreateRuleResponse {
    pub id: Uuid,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListRulesResponse {
    pub rules: Vec<RateLimitRule>,
    /// Rule-set version, bumped on every change.
    pub version: u64,
}

#[derive(Serialize, ToSchema)]
pub struct VersionResponse {
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Geo rules
// ---------------------------------------------------------------------------

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeoRuleResponse {
    pub geo_rule: GeoRule,
    pub version: u64,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestGeoRequest {
    /// IP to test, e.g. "8.8.8.8".
    pub ip: String,
    /// Endpoint used for rate-limit rule matching (defaults to "/").
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Identifier used for window lookup (defaults to the IP).
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestGeoResponse {
    pub allowed: bool,
    pub reason: Reason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationInfo>,
    pub risk_score: u8,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    /// Caller-selected identifier: client IP, user id, or API key.
    pub identifier: String,
    pub endpoint: String,
    pub ip: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

// ---------------------------------------------------------------------------
// Monitor table and stats
// ---------------------------------------------------------------------------

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct EntriesQuery {
    /// Lookback range: 1h, 6h, 24h (default), or 7d.
    pub range: Option<String>,
    /// Filter: "all" (default), "blocked", or "active".
    pub status: Option<String>,
    /// Substring match on identifier or rule id.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntriesResponse {
    pub entries: Vec<WindowEntry>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

#[derive(Deserialize, IntoParams)]
pub struct StatsQuery {
    /// Lookback range: 1h, 6h, 24h (default), or 7d.
    pub range: Option<String>,
}

pub type StatsResponse = StatsSummary;

#[derive(Deserialize, IntoParams)]
pub struct AttemptsQuery {
    /// Lookback range: 1h, 6h, 24h (default), or 7d.
    pub range: Option<String>,
    /// Filter by verdict reason (e.g. "GEO_BLOCKED").
    pub reason: Option<Reason>,
    /// Substring match on identifier, IP, endpoint, or country.
    pub search: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct AttemptsResponse {
    pub attempts: Vec<BlockedAttempt>,
}

// ---------------------------------------------------------------------------
// Manual IP blocks
// ---------------------------------------------------------------------------

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpBlockRequest {
    pub ip: String,
    pub duration_hours: u32,
}

#[derive(Serialize, ToSchema)]
pub struct IpBlocksResponse {
    pub blocks: Vec<IpBlock>,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status ("ok").
    pub status: String,
    /// Server version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_seconds: u64,
    /// Requests evaluated since startup.
    pub evaluated_requests: u64,
    /// Requests blocked since startup.
    pub blocked_requests: u64,
    /// Current rule-set version.
    pub rules_version: u64,
    pub geo_cache_hits: u64,
    pub geo_cache_misses: u64,
    /// Audit records currently retained.
    pub audit_records: usize,
}
