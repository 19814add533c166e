//! Rate-limit and geo rule model, validation, and the hot-swappable store.
//!
//! `RuleStore` keeps the entire rule configuration in one immutable
//! [`RuleSet`] behind an atomically swapped `Arc`. Readers clone the `Arc`
//! and evaluate against that snapshot for the rest of the request; writers
//! build a complete new set and swap it in, so an in-flight evaluation never
//! observes a half-updated configuration.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Rate-limit rules
// ---------------------------------------------------------------------------

/// Behavior when the counter store is unavailable.
///
/// Authentication endpoints should be `Closed` (block on failure); everything
/// else defaults to `Open`. This is a property of the rule, never hardcoded
/// in the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    #[default]
    Open,
    Closed,
}

/// Upper bound on a rule window: one year in milliseconds. Keeps accepted
/// rules far away from `i64` date arithmetic limits.
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// A per-endpoint request budget over a fixed time window.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    pub id: Uuid,
    /// Glob over the request path, e.g. `/api/auth/*`. `*` matches any
    /// sequence, `?` a single character. Most-specific pattern wins.
    pub endpoint_pattern: String,
    pub window_ms: u64,
    pub max_requests: u64,
    pub enabled: bool,
    #[serde(default)]
    pub fail_mode: FailMode,
    #[serde(default)]
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRule {
    /// Creates an enabled rule with a fresh id.
    pub fn new(
        endpoint_pattern: impl Into<String>,
        window_ms: u64,
        max_requests: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_pattern: endpoint_pattern.into(),
            window_ms,
            max_requests,
            enabled: true,
            fail_mode: FailMode::Open,
            description: String::new(),
            updated_at: now,
        }
    }

    /// Window duration as a chrono duration.
    pub fn window(&self) -> chrono::Duration {
        // window_ms is capped at MAX_WINDOW_MS by validate(), well inside i64.
        chrono::Duration::milliseconds(self.window_ms as i64)
    }

    /// Validates rule invariants. Invalid rules are never stored.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_pattern.trim().is_empty() {
            return Err(ConfigError::InvalidRule(
                "endpointPattern must not be empty".into(),
            ));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidRule("maxRequests must be > 0".into()));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::InvalidRule("windowMs must be > 0".into()));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(ConfigError::InvalidRule(
                "windowMs must not exceed one year".into(),
            ));
        }
        Ok(())
    }

    /// Number of literal (non-wildcard) characters; higher is more specific.
    fn specificity(&self) -> usize {
        self.endpoint_pattern
            .chars()
            .filter(|c| *c != '*' && *c != '?')
            .count()
    }
}

/// Matches a glob pattern against a path. `*` matches any sequence
/// (including `/`), `?` matches exactly one character.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = path.chars().collect();

    // Iterative backtracking matcher: remember the last `*` position and
    // retry from there with a longer consumed span.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

// ---------------------------------------------------------------------------
// Geo rules
// ---------------------------------------------------------------------------

/// Time-of-day access restriction, evaluated in the rule's timezone.
///
/// Days use 0 = Monday .. 6 = Sunday. Empty `allowed_hours`/`allowed_days`
/// means no restriction on that axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeRestriction {
    /// Offset from UTC in minutes (e.g. -300 for US Eastern standard time).
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub allowed_hours: Vec<u8>,
    #[serde(default)]
    pub allowed_days: Vec<u8>,
}

/// Geographic and network-reputation access policy.
///
/// A non-empty `allowed_countries` acts as an allow-list (everything else is
/// denied); `blocked_countries` is a deny-list layered on top, and an
/// explicit block always wins over an explicit allow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeoRule {
    #[serde(default)]
    pub allowed_countries: HashSet<String>,
    #[serde(default)]
    pub blocked_countries: HashSet<String>,
    #[serde(default)]
    pub allowed_regions: HashSet<String>,
    #[serde(default)]
    pub blocked_regions: HashSet<String>,
    #[serde(default)]
    pub vpn_blocking: bool,
    #[serde(default)]
    pub proxy_blocking: bool,
    #[serde(default)]
    pub tor_blocking: bool,
    /// CIDR ranges that are always blocked.
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub ip_ranges: Vec<IpNet>,
    #[serde(default)]
    pub asn_denylist: HashSet<u32>,
    #[serde(default)]
    pub time_restrictions: Option<TimeRestriction>,
}

impl GeoRule {
    /// Validates field ranges and normalizes country/region casing.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if let Some(tr) = &self.time_restrictions {
            if tr.utc_offset_minutes.abs() > 18 * 60 {
                return Err(ConfigError::InvalidRule(
                    "utcOffsetMinutes out of range".into(),
                ));
            }
            if tr.allowed_hours.iter().any(|h| *h > 23) {
                return Err(ConfigError::InvalidRule(
                    "allowedHours values must be 0-23".into(),
                ));
            }
            if tr.allowed_days.iter().any(|d| *d > 6) {
                return Err(ConfigError::InvalidRule(
                    "allowedDays values must be 0-6 (0 = Monday)".into(),
                ));
            }
        }
        self.allowed_countries = upper(self.allowed_countries);
        self.blocked_countries = upper(self.blocked_countries);
        self.allowed_regions = upper(self.allowed_regions);
        self.blocked_regions = upper(self.blocked_regions);
        Ok(self)
    }
}

fn upper(set: HashSet<String>) -> HashSet<String> {
    set.into_iter().map(|s| s.to_uppercase()).collect()
}

// ---------------------------------------------------------------------------
// Immutable snapshot + store
// ---------------------------------------------------------------------------

/// An immutable, versioned view of the full rule configuration.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub version: u64,
    /// Sorted most-specific-first, then most-recently-updated.
    rate_limits: Vec<RateLimitRule>,
    pub geo: GeoRule,
}

impl RuleSet {
    fn new(version: u64, mut rate_limits: Vec<RateLimitRule>, geo: GeoRule) -> Self {
        rate_limits.sort_by(|a, b| {
            b.specificity()
                .cmp(&a.specificity())
                .then(b.updated_at.cmp(&a.updated_at))
        });
        Self {
            version,
            rate_limits,
            geo,
        }
    }

    /// Returns the matching enabled rule for a path, longest pattern wins.
    pub fn match_endpoint(&self, path: &str) -> Option<&RateLimitRule> {
        self.rate_limits
            .iter()
            .find(|r| r.enabled && glob_match(&r.endpoint_pattern, path))
    }

    /// All rules, in match order.
    pub fn rate_limits(&self) -> &[RateLimitRule] {
        &self.rate_limits
    }

    pub fn rule(&self, id: Uuid) -> Option<&RateLimitRule> {
        self.rate_limits.iter().find(|r| r.id == id)
    }
}

/// Optional fields for `PATCH /rules/{id}`.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    pub enabled: Option<bool>,
    pub max_requests: Option<u64>,
    pub window_ms: Option<u64>,
    pub description: Option<String>,
    pub fail_mode: Option<FailMode>,
}

/// Single source of truth for configuration, with atomic hot-swap.
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSet::new(0, Vec::new(), GeoRule::default()))),
        }
    }

    /// Cheap lock-free-read snapshot; the caller keeps evaluating against it
    /// even if a replace happens concurrently.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }

    /// Validates and inserts a new rate-limit rule. Returns the new version.
    pub fn insert(&self, rule: RateLimitRule) -> Result<u64, ConfigError> {
        rule.validate()?;
        self.swap(|set| {
            let mut rules = set.rate_limits.clone();
            rules.push(rule.clone());
            Ok((rules, set.geo.clone()))
        })
    }

    /// Applies a partial update to an existing rule.
    pub fn patch(&self, id: Uuid, patch: &RulePatch, now: DateTime<Utc>) -> Result<u64, ConfigError> {
        self.swap(|set| {
            let mut rules = set.rate_limits.clone();
            let rule = rules
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(ConfigError::RuleNotFound(id))?;
            if let Some(enabled) = patch.enabled {
                rule.enabled = enabled;
            }
            if let Some(max) = patch.max_requests {
                rule.max_requests = max;
            }
            if let Some(window) = patch.window_ms {
                rule.window_ms = window;
            }
            if let Some(desc) = &patch.description {
                rule.description = desc.clone();
            }
            if let Some(mode) = patch.fail_mode {
                rule.fail_mode = mode;
            }
            rule.updated_at = now;
            rule.validate()?;
            Ok((rules, set.geo.clone()))
        })
    }

    /// Removes a rule by id.
    pub fn remove(&self, id: Uuid) -> Result<u64, ConfigError> {
        self.swap(|set| {
            let mut rules = set.rate_limits.clone();
            let before = rules.len();
            rules.retain(|r| r.id != id);
            if rules.len() == before {
                return Err(ConfigError::RuleNotFound(id));
            }
            Ok((rules, set.geo.clone()))
        })
    }

    /// Replaces the entire rate-limit rule set atomically.
    pub fn replace_rate_limits(&self, rules: Vec<RateLimitRule>) -> Result<u64, ConfigError> {
        for rule in &rules {
            rule.validate()?;
        }
        self.swap(|set| Ok((rules.clone(), set.geo.clone())))
    }

    /// Replaces the geo rule atomically.
    pub fn set_geo_rule(&self, geo: GeoRule) -> Result<u64, ConfigError> {
        let geo = geo.validated()?;
        self.swap(|set| Ok((set.rate_limits.clone(), geo.clone())))
    }

    fn swap(
        &self,
        build: impl FnOnce(&RuleSet) -> Result<(Vec<RateLimitRule>, GeoRule), ConfigError>,
    ) -> Result<u64, ConfigError> {
        let mut current = self.current.write();
        let (rules, geo) = build(&current)?;
        let version = current.version + 1;
        *current = Arc::new(RuleSet::new(version, rules, geo));
        Ok(version)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
