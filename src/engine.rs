//! The decision engine: one verdict per inbound request.
//!
//! Evaluation order is the latency-control decision: manual IP blocks and
//! the in-memory window counter run before any network-bound geo lookup, so
//! most repeat traffic is decided purely from local memory. The geo call is
//! the only awaited operation; counter increments complete synchronously
//! before it, so a client disconnect never loses the "this request happened"
//! side effect.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditLog, AuditSink, BlockedAttempt};
use crate::geo::{GeoProvider, GeoResolver, LocationInfo};
use crate::rules::{FailMode, RuleStore};
use crate::score;
use crate::stats::{StatsSummary, TrafficStats};
use crate::types::{Reason, RequestContext, Verdict};
use crate::window::{CounterStore, WindowCounter, WindowEntry};

/// Engine tuning knobs, wired from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub geo_cache_capacity: usize,
    pub geo_cache_ttl: chrono::Duration,
    pub geo_timeout: std::time::Duration,
    /// Block when geo resolution fails. Defaults off: geo-blocking is a
    /// defense-in-depth layer, not the authentication boundary.
    pub geo_fail_closed: bool,
    pub audit_buffer: usize,
    /// Audit 1-in-N allowed decisions (0 disables allowed sampling).
    pub allow_sample_rate: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            geo_cache_capacity: 10_000,
            geo_cache_ttl: chrono::Duration::hours(24),
            geo_timeout: std::time::Duration::from_millis(500),
            geo_fail_closed: false,
            audit_buffer: 1024,
            allow_sample_rate: 100,
        }
    }
}

/// A manual IP block, independent of computed rules.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpBlock {
    #[schema(value_type = String)]
    pub ip: IpAddr,
    pub blocked_until: DateTime<Utc>,
}

/// Orchestrates RuleStore, WindowCounter, GeoResolver, RiskScorer, and
/// AuditSink into one verdict per request.
pub struct DecisionEngine {
    rules: Arc<RuleStore>,
    windows: Arc<dyn CounterStore>,
    resolver: GeoResolver,
    audit: AuditSink,
    stats: TrafficStats,
    manual_blocks: DashMap<IpAddr, DateTime<Utc>>,
    geo_fail_closed: bool,
    allow_sample_rate: u64,
    evaluated: AtomicU64,
    blocked: AtomicU64,
}

impl DecisionEngine {
    pub fn new(
        rules: Arc<RuleStore>,
        provider: Arc<dyn GeoProvider>,
        audit_log: Arc<AuditLog>,
        opts: &EngineOptions,
    ) -> Self {
        Self::with_counter(rules, Arc::new(WindowCounter::new()), provider, audit_log, opts)
    }

    /// Builds the engine on an alternative counter backend (e.g. a
    /// remote-backed store, or a failing one in tests).
    pub fn with_counter(
        rules: Arc<RuleStore>,
        windows: Arc<dyn CounterStore>,
        provider: Arc<dyn GeoProvider>,
        audit_log: Arc<AuditLog>,
        opts: &EngineOptions,
    ) -> Self {
        Self {
            rules,
            windows,
            resolver: GeoResolver::new(
                provider,
                opts.geo_cache_capacity,
                opts.geo_cache_ttl,
                opts.geo_timeout,
            ),
            audit: AuditSink::spawn(audit_log, opts.audit_buffer),
            stats: TrafficStats::new(),
            manual_blocks: DashMap::new(),
            geo_fail_closed: opts.geo_fail_closed,
            allow_sample_rate: opts.allow_sample_rate,
            evaluated: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
        }
    }

    /// Evaluates one request: counts it, decides, and audits. The caller
    /// enforces the returned verdict.
    pub async fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        let seq = self.evaluated.fetch_add(1, Ordering::Relaxed);
        let (verdict, location) = self.decide(ctx, true).await;

        self.stats
            .record(ctx.now, ctx.ip, &ctx.endpoint, !verdict.allowed);

        if verdict.allowed {
            // Sampled allowed decisions keep the audit trail representative.
            if self.allow_sample_rate > 0 && seq % self.allow_sample_rate == 0 {
                self.audit.record(self.attempt(ctx, &verdict, location));
            }
        } else {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                identifier = %ctx.identifier,
                endpoint = %ctx.endpoint,
                reason = verdict.reason.as_str(),
                risk = verdict.risk_score,
                "request blocked",
            );
            self.audit.record(self.attempt(ctx, &verdict, location));
        }

        verdict
    }

    /// Dry-run for `POST /geo-rules/test`: same decision path, but consumes
    /// no rate-limit slot and writes no audit or stats.
    pub async fn preview(&self, ctx: &RequestContext) -> (Verdict, Option<LocationInfo>) {
        self.decide(ctx, false).await
    }

    async fn decide(&self, ctx: &RequestContext, enforce: bool) -> (Verdict, Option<LocationInfo>) {
        // Manual overrides first: cheapest check, operator-intended.
        if let Some(until) = self.manual_block_until(ctx.ip, ctx.now) {
            let verdict = Verdict {
                allowed: false,
                reason: Reason::CustomRule,
                risk_score: 100,
                retry_after_ms: millis_until(ctx.now, until),
                matched_rule_id: None,
            };
            return (verdict, None);
        }

        // One snapshot per request; a concurrent replace never tears it.
        let snapshot = self.rules.snapshot();
        let matched = snapshot.match_endpoint(&ctx.endpoint);

        if let Some(rule) = matched {
            let over_limit = if enforce {
                match self.windows.increment(&ctx.identifier, rule, ctx.now) {
                    Ok(status) => status.blocked.then_some(status.window_end),
                    Err(err) => match rule.fail_mode {
                        FailMode::Open => {
                            tracing::warn!(%err, rule = %rule.id, "counter store unavailable, failing open");
                            None
                        }
                        FailMode::Closed => {
                            tracing::warn!(%err, rule = %rule.id, "counter store unavailable, failing closed");
                            Some(ctx.now + rule.window())
                        }
                    },
                }
            } else {
                self.windows
                    .is_blocked(&ctx.identifier, rule.id, ctx.now)
                    .then(|| ctx.now + rule.window())
            };

            if let Some(window_end) = over_limit {
                let verdict = Verdict {
                    allowed: false,
                    reason: Reason::RateLimited,
                    risk_score: 0,
                    retry_after_ms: millis_until(ctx.now, window_end),
                    matched_rule_id: Some(rule.id),
                };
                // Over-limit short-circuits before any geo lookup.
                return (verdict, None);
            }
        }

        let matched_rule_id = matched.map(|r| r.id);

        let location = match self.resolver.resolve(ctx.ip, ctx.now).await {
            Ok(location) => location,
            Err(err) => {
                if self.geo_fail_closed {
                    tracing::warn!(ip = %ctx.ip, %err, "geo resolution failed, failing closed");
                    let verdict = Verdict {
                        allowed: false,
                        reason: Reason::GeoBlocked,
                        risk_score: 0,
                        retry_after_ms: None,
                        matched_rule_id,
                    };
                    return (verdict, None);
                }
                tracing::warn!(ip = %ctx.ip, %err, "geo resolution failed, failing open");
                let verdict = Verdict {
                    allowed: true,
                    reason: Reason::Ok,
                    risk_score: 0,
                    retry_after_ms: None,
                    matched_rule_id,
                };
                return (verdict, None);
            }
        };

        let eval = score::score(&location, &snapshot.geo, ctx.now);
        let verdict = Verdict {
            allowed: !eval.blocked,
            reason: eval.reason,
            risk_score: eval.score,
            retry_after_ms: None,
            matched_rule_id,
        };
        (verdict, Some(location))
    }

    fn attempt(
        &self,
        ctx: &RequestContext,
        verdict: &Verdict,
        location: Option<LocationInfo>,
    ) -> BlockedAttempt {
        BlockedAttempt {
            id: Uuid::new_v4(),
            identifier: ctx.identifier.clone(),
            ip: ctx.ip,
            location,
            endpoint: ctx.endpoint.clone(),
            reason: verdict.reason,
            risk_score: verdict.risk_score,
            user_agent: ctx.user_agent.clone(),
            created_at: ctx.now,
        }
    }

    // -----------------------------------------------------------------------
    // Manual IP blocks
    // -----------------------------------------------------------------------

    /// Blocks an IP until `now + duration_hours`, replacing any prior block.
    pub fn block_ip(&self, ip: IpAddr, duration_hours: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = now + chrono::Duration::hours(i64::from(duration_hours));
        self.manual_blocks.insert(ip, until);
        tracing::info!(%ip, %until, "manual IP block added");
        until
    }

    /// Removes a manual block. Returns whether one existed.
    pub fn unblock_ip(&self, ip: IpAddr) -> bool {
        self.manual_blocks.remove(&ip).is_some()
    }

    /// Active manual blocks.
    pub fn ip_blocks(&self, now: DateTime<Utc>) -> Vec<IpBlock> {
        self.manual_blocks
            .iter()
            .filter(|e| now < *e.value())
            .map(|e| IpBlock {
                ip: *e.key(),
                blocked_until: *e.value(),
            })
            .collect()
    }

    fn manual_block_until(&self, ip: IpAddr, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(entry) = self.manual_blocks.get(&ip) {
            if now < *entry.value() {
                return Some(*entry.value());
            }
            drop(entry);
            // Lazy expiry on touch.
            self.manual_blocks.remove_if(&ip, |_, until| now >= *until);
        }
        None
    }

    // -----------------------------------------------------------------------
    // Dashboard surfaces
    // -----------------------------------------------------------------------

    pub fn window_entries(&self, now: DateTime<Utc>) -> Vec<WindowEntry> {
        self.windows.entries(now)
    }

    pub fn stats_summary(&self, range: chrono::Duration, now: DateTime<Utc>) -> StatsSummary {
        self.stats.summary(range, now)
    }

    /// (evaluated, blocked) totals since startup.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.evaluated.load(Ordering::Relaxed),
            self.blocked.load(Ordering::Relaxed),
        )
    }

    /// Geo cache (hits, misses) since startup.
    pub fn geo_cache_stats(&self) -> (u64, u64) {
        self.resolver.cache_stats()
    }

    /// Periodic sweep: expired windows, expired manual blocks, old stats
    /// buckets. Returns the number of window entries removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        self.manual_blocks.retain(|_, until| now < *until);
        self.stats.prune(now);
        self.windows.cleanup(now)
    }
}

fn millis_until(now: DateTime<Utc>, until: DateTime<Utc>) -> Option<u64> {
    let ms = (until - now).num_milliseconds();
    (ms > 0).then(|| ms as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::StaticProvider;
    use crate::rules::{GeoRule, RateLimitRule};

    fn engine_with(provider: StaticProvider) -> (DecisionEngine, Arc<RuleStore>, Arc<AuditLog>) {
        let rules = Arc::new(RuleStore::new());
        let log = Arc::new(AuditLog::new(1000));
        let opts = EngineOptions {
            allow_sample_rate: 0,
            ..EngineOptions::default()
        };
        let engine = DecisionEngine::new(
            Arc::clone(&rules),
            Arc::new(provider),
            Arc::clone(&log),
            &opts,
        );
        (engine, rules, log)
    }

    fn ctx(identifier: &str, endpoint: &str, ip: &str, now: DateTime<Utc>) -> RequestContext {
        RequestContext {
            identifier: identifier.into(),
            endpoint: endpoint.into(),
            ip: ip.parse().unwrap(),
            user_agent: Some("test-agent".into()),
            now,
        }
    }

    fn us_location(ip: &str) -> LocationInfo {
        LocationInfo {
            country_code: "US".into(),
            ..LocationInfo::unknown(ip.parse().unwrap(), Utc::now())
        }
    }

    #[tokio::test]
    async fn scenario_a_six_requests_trip_the_auth_limit() {
        let provider = StaticProvider::new();
        provider.insert(us_location("203.0.113.7"));
        let (engine, rules, _) = engine_with(provider);
        rules
            .insert(RateLimitRule::new("/api/auth/*", 900_000, 5, Utc::now()))
            .unwrap();

        let now = Utc::now();
        for _ in 0..5 {
            let verdict = engine
                .evaluate(&ctx("ip1", "/api/auth/login", "203.0.113.7", now))
                .await;
            assert!(verdict.allowed);
            assert_eq!(verdict.reason, Reason::Ok);
        }

        let verdict = engine
            .evaluate(&ctx("ip1", "/api/auth/login", "203.0.113.7", now))
            .await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Reason::RateLimited);
        assert!(verdict.retry_after_ms.is_some_and(|ms| ms <= 900_000));
        assert!(verdict.matched_rule_id.is_some());
    }

    #[tokio::test]
    async fn rate_limited_short_circuits_before_geo_lookup() {
        // Provider has no entry for the IP: a geo lookup would fail open
        // with reason OK. A RATE_LIMITED verdict proves geo never ran.
        let (engine, rules, _) = engine_with(StaticProvider::new());
        rules
            .insert(RateLimitRule::new("/api/*", 60_000, 1, Utc::now()))
            .unwrap();

        let now = Utc::now();
        engine.evaluate(&ctx("ip1", "/api/x", "198.51.100.9", now)).await;
        let verdict = engine.evaluate(&ctx("ip1", "/api/x", "198.51.100.9", now)).await;
        assert_eq!(verdict.reason, Reason::RateLimited);
    }

    #[tokio::test]
    async fn no_matching_rule_skips_rate_limiting() {
        let provider = StaticProvider::new();
        provider.insert(us_location("203.0.113.7"));
        let (engine, rules, _) = engine_with(provider);
        rules
            .insert(RateLimitRule::new("/api/auth/*", 60_000, 1, Utc::now()))
            .unwrap();

        let now = Utc::now();
        for _ in 0..5 {
            let verdict = engine
                .evaluate(&ctx("ip1", "/api/videos", "203.0.113.7", now))
                .await;
            assert!(verdict.allowed);
            assert!(verdict.matched_rule_id.is_none());
        }
    }

    #[tokio::test]
    async fn geo_failure_fails_open_by_default() {
        let (engine, _, _) = engine_with(StaticProvider::new());
        let verdict = engine
            .evaluate(&ctx("ip1", "/api/videos", "198.51.100.9", Utc::now()))
            .await;
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, Reason::Ok);
    }

    /// A counter backend that is permanently down.
    struct FailingStore;

    impl CounterStore for FailingStore {
        fn increment(
            &self,
            _identifier: &str,
            _rule: &RateLimitRule,
            _now: DateTime<Utc>,
        ) -> Result<crate::window::WindowStatus, crate::error::StoreError> {
            Err(crate::error::StoreError("counter backend unreachable".into()))
        }

        fn is_blocked(&self, _identifier: &str, _rule_id: Uuid, _now: DateTime<Utc>) -> bool {
            false
        }

        fn entries(&self, _now: DateTime<Utc>) -> Vec<WindowEntry> {
            Vec::new()
        }

        fn cleanup(&self, _now: DateTime<Utc>) -> usize {
            0
        }
    }

    fn engine_with_failing_counter(provider: StaticProvider) -> (DecisionEngine, Arc<RuleStore>) {
        let rules = Arc::new(RuleStore::new());
        let opts = EngineOptions {
            allow_sample_rate: 0,
            ..EngineOptions::default()
        };
        let engine = DecisionEngine::with_counter(
            Arc::clone(&rules),
            Arc::new(FailingStore),
            Arc::new(provider),
            Arc::new(AuditLog::new(1000)),
            &opts,
        );
        (engine, rules)
    }

    #[tokio::test]
    async fn counter_outage_fails_open_for_open_rules() {
        let provider = StaticProvider::new();
        provider.insert(us_location("203.0.113.7"));
        let (engine, rules) = engine_with_failing_counter(provider);
        rules
            .insert(RateLimitRule::new("/api/videos/*", 60_000, 5, Utc::now()))
            .unwrap();

        // Default Open mode: the outage never blocks traffic.
        let verdict = engine
            .evaluate(&ctx("ip1", "/api/videos/42", "203.0.113.7", Utc::now()))
            .await;
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, Reason::Ok);
    }

    #[tokio::test]
    async fn counter_outage_fails_closed_for_closed_rules() {
        let provider = StaticProvider::new();
        provider.insert(us_location("203.0.113.7"));
        let (engine, rules) = engine_with_failing_counter(provider);
        let mut rule = RateLimitRule::new("/api/auth/*", 900_000, 5, Utc::now());
        rule.fail_mode = FailMode::Closed;
        rules.insert(rule).unwrap();

        let verdict = engine
            .evaluate(&ctx("ip1", "/api/auth/login", "203.0.113.7", Utc::now()))
            .await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Reason::RateLimited);
        assert!(verdict.retry_after_ms.is_some_and(|ms| ms <= 900_000));
    }

    #[tokio::test]
    async fn geo_blocked_request_is_audited() {
        let provider = StaticProvider::new();
        provider.insert(LocationInfo {
            country_code: "CN".into(),
            ..LocationInfo::unknown("203.0.113.7".parse().unwrap(), Utc::now())
        });
        let (engine, rules, log) = engine_with(provider);
        let mut geo = GeoRule::default();
        geo.blocked_countries.insert("CN".into());
        rules.set_geo_rule(geo).unwrap();

        let verdict = engine
            .evaluate(&ctx("ip1", "/api/videos", "203.0.113.7", Utc::now()))
            .await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Reason::GeoBlocked);

        for _ in 0..50 {
            if !log.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let records = log.query(None, None, None, 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, Reason::GeoBlocked);
        assert!(records[0].location.is_some());
    }

    #[tokio::test]
    async fn preview_consumes_no_rate_limit_slot() {
        // Scenario D: the dry-run allows and leaves the window untouched.
        let provider = StaticProvider::new();
        provider.insert(us_location("8.8.8.8"));
        let (engine, rules, _) = engine_with(provider);
        rules
            .insert(RateLimitRule::new("/api/*", 60_000, 2, Utc::now()))
            .unwrap();

        let now = Utc::now();
        for _ in 0..10 {
            let (verdict, location) =
                engine.preview(&ctx("ip1", "/api/videos", "8.8.8.8", now)).await;
            assert!(verdict.allowed);
            assert_eq!(verdict.reason, Reason::Ok);
            assert!(location.is_some());
        }
        assert!(engine.window_entries(now).is_empty());

        // Real traffic still has its full budget.
        let verdict = engine.evaluate(&ctx("ip1", "/api/videos", "8.8.8.8", now)).await;
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn preview_reports_existing_block_without_extending_it() {
        let provider = StaticProvider::new();
        provider.insert(us_location("8.8.8.8"));
        let (engine, rules, _) = engine_with(provider);
        rules
            .insert(RateLimitRule::new("/api/*", 60_000, 1, Utc::now()))
            .unwrap();

        let now = Utc::now();
        engine.evaluate(&ctx("ip1", "/api/videos", "8.8.8.8", now)).await;
        engine.evaluate(&ctx("ip1", "/api/videos", "8.8.8.8", now)).await;

        let (verdict, _) = engine.preview(&ctx("ip1", "/api/videos", "8.8.8.8", now)).await;
        assert_eq!(verdict.reason, Reason::RateLimited);
    }

    #[tokio::test]
    async fn manual_block_overrides_everything() {
        let provider = StaticProvider::new();
        provider.insert(us_location("203.0.113.7"));
        let (engine, _, _) = engine_with(provider);

        let now = Utc::now();
        let until = engine.block_ip("203.0.113.7".parse().unwrap(), 2, now);
        assert_eq!(until, now + chrono::Duration::hours(2));

        let verdict = engine
            .evaluate(&ctx("ip1", "/api/videos", "203.0.113.7", now))
            .await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Reason::CustomRule);
        assert_eq!(verdict.risk_score, 100);

        // Expired block no longer applies and is lazily dropped.
        let later = now + chrono::Duration::hours(3);
        let verdict = engine
            .evaluate(&ctx("ip1", "/api/videos", "203.0.113.7", later))
            .await;
        assert!(verdict.allowed);
        assert!(engine.ip_blocks(later).is_empty());
    }

    #[tokio::test]
    async fn cleanup_sweeps_windows_and_blocks() {
        let provider = StaticProvider::new();
        provider.insert(us_location("203.0.113.7"));
        let (engine, rules, _) = engine_with(provider);
        rules
            .insert(RateLimitRule::new("/api/*", 1_000, 5, Utc::now()))
            .unwrap();

        let now = Utc::now();
        engine.evaluate(&ctx("ip1", "/api/videos", "203.0.113.7", now)).await;
        engine.block_ip("198.51.100.1".parse().unwrap(), 1, now);

        let later = now + chrono::Duration::hours(2);
        let removed = engine.cleanup(later);
        assert_eq!(removed, 1);
        assert!(engine.ip_blocks(later).is_empty());
    }
}
