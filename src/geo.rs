//! IP geolocation and network-reputation resolution with a bounded cache.
//!
//! `GeoResolver` fronts a pluggable [`GeoProvider`] with an LRU cache keyed
//! by IP. Entries expire after a TTL (VPN/proxy status drifts) and the cache
//! is bounded by entry count, so either policy may evict first. The upstream
//! call is the only unbounded-latency operation on the request path and is
//! wrapped in a timeout; on failure a stale cached entry is served if one
//! exists, otherwise the caller applies its fail-open/fail-closed policy.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Resolved location and reputation attributes for one IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocationInfo {
    #[schema(value_type = String)]
    pub ip: IpAddr,
    /// ISO 3166-1 alpha-2, uppercase. "ZZ" when unknown.
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub asn: u32,
    pub isp: String,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_tor: bool,
    pub resolved_at: DateTime<Utc>,
}

impl LocationInfo {
    /// A placeholder record for an IP nothing is known about.
    pub fn unknown(ip: IpAddr, now: DateTime<Utc>) -> Self {
        Self {
            ip,
            country_code: "ZZ".into(),
            region: String::new(),
            city: String::new(),
            asn: 0,
            isp: String::new(),
            is_vpn: false,
            is_proxy: false,
            is_tor: false,
            resolved_at: now,
        }
    }
}

/// Resolution failure. Recovered locally via fail-open/fail-closed; never
/// surfaced to the request caller as a hard failure.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("geo provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("geo provider error: {0}")]
    Upstream(String),

    #[error("no geo data for {0}")]
    NotFound(IpAddr),
}

/// Pluggable upstream lookup (GeoIP database, HTTP reputation service...).
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<LocationInfo, ResolveError>;
}

/// Table-backed provider for tests and air-gapped deployments.
#[derive(Default)]
pub struct StaticProvider {
    table: RwLock<std::collections::HashMap<IpAddr, LocationInfo>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: LocationInfo) {
        self.table.write().insert(info.ip, info);
    }
}

#[async_trait]
impl GeoProvider for StaticProvider {
    async fn lookup(&self, ip: IpAddr) -> Result<LocationInfo, ResolveError> {
        self.table
            .read()
            .get(&ip)
            .cloned()
            .ok_or(ResolveError::NotFound(ip))
    }
}

struct CacheEntry {
    info: LocationInfo,
    cached_at: DateTime<Utc>,
}

/// Caching resolver in front of a [`GeoProvider`].
pub struct GeoResolver {
    provider: Arc<dyn GeoProvider>,
    cache: Mutex<LruCache<IpAddr, CacheEntry>>,
    ttl: chrono::Duration,
    timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GeoResolver {
    pub fn new(
        provider: Arc<dyn GeoProvider>,
        capacity: usize,
        ttl: chrono::Duration,
        timeout: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
            timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolves an IP, serving from cache within the TTL.
    ///
    /// On upstream failure or timeout a stale cached entry is returned if
    /// available; otherwise the error propagates for the caller's
    /// fail-open/fail-closed policy.
    pub async fn resolve(&self, ip: IpAddr, now: DateTime<Utc>) -> Result<LocationInfo, ResolveError> {
        if let Some(entry) = self.cache.lock().get(&ip) {
            if now - entry.cached_at < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.info.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.timeout, self.provider.lookup(ip)).await {
            Ok(Ok(mut info)) => {
                info.resolved_at = now;
                self.cache.lock().put(
                    ip,
                    CacheEntry {
                        info: info.clone(),
                        cached_at: now,
                    },
                );
                Ok(info)
            }
            Ok(Err(err)) => self.stale_or(ip, err),
            Err(_) => self.stale_or(ip, ResolveError::Timeout(self.timeout)),
        }
    }

    fn stale_or(&self, ip: IpAddr, err: ResolveError) -> Result<LocationInfo, ResolveError> {
        if let Some(entry) = self.cache.lock().peek(&ip) {
            tracing::warn!(%ip, error = %err, "geo lookup failed, serving stale cache entry");
            return Ok(entry.info.clone());
        }
        Err(err)
    }

    /// (cache hits, cache misses) since startup.
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
