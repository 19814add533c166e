//! Shared application state: rule store, decision engine, audit log.

use std::sync::Arc;
use std::time::Instant;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::engine::{DecisionEngine, EngineOptions};
use crate::geo::{GeoProvider, StaticProvider};
use crate::rules::RuleStore;

/// Shared application state, cloneable across handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    rules: Arc<RuleStore>,
    engine: DecisionEngine,
    audit_log: Arc<AuditLog>,
    cors_origins: Vec<String>,
    start_time: Instant,
}

impl AppState {
    /// Creates application state from config with the given geo provider.
    pub fn new(config: &Config, provider: Arc<dyn GeoProvider>) -> Self {
        let opts = EngineOptions {
            geo_cache_capacity: config.geo_cache_capacity,
            geo_cache_ttl: chrono::Duration::seconds(config.geo_cache_ttl_secs),
            geo_timeout: std::time::Duration::from_millis(config.geo_timeout_ms),
            geo_fail_closed: config.geo_fail_closed,
            audit_buffer: config.audit_buffer,
            allow_sample_rate: config.allow_sample_rate,
        };
        Self::build(provider, config.audit_capacity, &opts, config.cors_origins.clone())
    }

    /// In-memory state with an empty static geo table (for tests and
    /// ephemeral use; geo lookups fail open).
    pub fn new_in_memory() -> Self {
        Self::new_in_memory_with_provider(Arc::new(StaticProvider::new()))
    }

    /// In-memory state with a caller-seeded geo provider (for tests).
    pub fn new_in_memory_with_provider(provider: Arc<dyn GeoProvider>) -> Self {
        let opts = EngineOptions {
            // Tests assert on the audit feed; sample nothing extra.
            allow_sample_rate: 0,
            ..EngineOptions::default()
        };
        Self::build(provider, 10_000, &opts, vec![])
    }

    fn build(
        provider: Arc<dyn GeoProvider>,
        audit_capacity: usize,
        opts: &EngineOptions,
        cors_origins: Vec<String>,
    ) -> Self {
        let rules = Arc::new(RuleStore::new());
        let audit_log = Arc::new(AuditLog::new(audit_capacity));
        let engine = DecisionEngine::new(
            Arc::clone(&rules),
            provider,
            Arc::clone(&audit_log),
            opts,
        );

        Self {
            inner: Arc::new(Inner {
                rules,
                engine,
                audit_log,
                cors_origins,
                start_time: Instant::now(),
            }),
        }
    }

    /// Returns the rule store (single source of truth for configuration).
    pub fn rules(&self) -> &RuleStore {
        &self.inner.rules
    }

    /// Returns the decision engine.
    pub fn engine(&self) -> &DecisionEngine {
        &self.inner.engine
    }

    /// Returns the audit log for dashboard queries.
    pub fn audit_log(&self) -> &AuditLog {
        &self.inner.audit_log
    }

    /// Returns the configured CORS allowed origins.
    pub fn cors_origins(&self) -> &[String] {
        &self.inner.cors_origins
    }

    /// Returns the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
