//! Core decision types shared across the engine modules.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Machine-readable reason attached to every verdict and audit record.
///
/// The dashboard surfaces these directly, so the wire form is stable
/// SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Ok,
    RateLimited,
    GeoBlocked,
    VpnBlocked,
    ProxyBlocked,
    TorBlocked,
    CustomRule,
    TimeRestricted,
}

impl Reason {
    /// Stable wire string, for log fields and audit search.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::RateLimited => "RATE_LIMITED",
            Self::GeoBlocked => "GEO_BLOCKED",
            Self::VpnBlocked => "VPN_BLOCKED",
            Self::ProxyBlocked => "PROXY_BLOCKED",
            Self::TorBlocked => "TOR_BLOCKED",
            Self::CustomRule => "CUSTOM_RULE",
            Self::TimeRestricted => "TIME_RESTRICTED",
        }
    }
}

/// One evaluated request: the engine's allow/block decision plus metadata.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Reason,
    /// 0-100. Accumulated risk signals, decoupled from the allow/block
    /// decision; used by the dashboard for ranking only.
    pub risk_score: u8,
    /// Suggested wait before retrying, for rate-limited verdicts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// The rate-limit rule that matched the endpoint, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule_id: Option<Uuid>,
}

impl Verdict {
    /// An unconditional allow with no risk signals.
    pub fn ok() -> Self {
        Self {
            allowed: true,
            reason: Reason::Ok,
            risk_score: 0,
            retry_after_ms: None,
            matched_rule_id: None,
        }
    }
}

/// Everything the engine needs to know about one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Caller-selected identifier: client IP, user id, or API key.
    pub identifier: String,
    /// Request path, matched against rule endpoint patterns.
    pub endpoint: String,
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    /// Evaluation time. Injected so tests can replay traffic.
    pub now: DateTime<Utc>,
}
