//! Hourly traffic aggregation backing the dashboard's `/stats` endpoint.
//!
//! Counters are bucketed per hour so range queries (1h..7d) are a cheap
//! fold. Buckets past the longest dashboard range are pruned by the
//! maintenance task, which bounds total memory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use utoipa::ToSchema;

/// Buckets older than this are pruned (the widest dashboard range).
const RETENTION_DAYS: i64 = 7;
const TOP_N: usize = 10;

#[derive(Default)]
struct HourBucket {
    total: u64,
    blocked: u64,
    ips: HashSet<IpAddr>,
    endpoints: HashMap<String, u64>,
    ip_hits: HashMap<IpAddr, u64>,
}

/// One point of the hourly series.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HourlyStat {
    pub hour: DateTime<Utc>,
    pub total_requests: u64,
    pub blocked_requests: u64,
}

/// Ranked entry for topEndpoints / topIPs.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RankedCount {
    pub key: String,
    pub count: u64,
}

/// Aggregated answer for one range query.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub unique_ips: u64,
    pub top_endpoints: Vec<RankedCount>,
    pub top_ips: Vec<RankedCount>,
    pub hourly_stats: Vec<HourlyStat>,
}

/// Rolling per-hour traffic counters.
#[derive(Default)]
pub struct TrafficStats {
    buckets: Mutex<BTreeMap<i64, HourBucket>>,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one evaluated request.
    pub fn record(&self, now: DateTime<Utc>, ip: IpAddr, endpoint: &str, blocked: bool) {
        let hour = now.timestamp() - now.timestamp().rem_euclid(3600);
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(hour).or_default();
        bucket.total += 1;
        if blocked {
            bucket.blocked += 1;
        }
        bucket.ips.insert(ip);
        *bucket.endpoints.entry(endpoint.to_string()).or_insert(0) += 1;
        *bucket.ip_hits.entry(ip).or_insert(0) += 1;
    }

    /// Folds all buckets within `range` of `now` into a summary.
    ///
    /// Ranges are bucket-granular: the hour bucket the cutoff falls inside
    /// is included in full, so a query never drops requests made within the
    /// range just because they share a bucket with older ones.
    pub fn summary(&self, range: Duration, now: DateTime<Utc>) -> StatsSummary {
        let cutoff = (now - range).timestamp();
        let cutoff = cutoff - cutoff.rem_euclid(3600);
        let buckets = self.buckets.lock();

        let mut total = 0;
        let mut blocked = 0;
        let mut ips: HashSet<IpAddr> = HashSet::new();
        let mut endpoints: HashMap<&str, u64> = HashMap::new();
        let mut ip_hits: HashMap<IpAddr, u64> = HashMap::new();
        let mut hourly = Vec::new();

        for (hour, bucket) in buckets.range(cutoff..) {
            total += bucket.total;
            blocked += bucket.blocked;
            ips.extend(&bucket.ips);
            for (endpoint, count) in &bucket.endpoints {
                *endpoints.entry(endpoint).or_insert(0) += count;
            }
            for (ip, count) in &bucket.ip_hits {
                *ip_hits.entry(*ip).or_insert(0) += count;
            }
            hourly.push(HourlyStat {
                hour: Utc.timestamp_opt(*hour, 0).single().unwrap_or(now),
                total_requests: bucket.total,
                blocked_requests: bucket.blocked,
            });
        }

        StatsSummary {
            total_requests: total,
            blocked_requests: blocked,
            unique_ips: ips.len() as u64,
            top_endpoints: top_n(endpoints.into_iter().map(|(k, v)| (k.to_string(), v))),
            top_ips: top_n(ip_hits.into_iter().map(|(k, v)| (k.to_string(), v))),
            hourly_stats: hourly,
        }
    }

    /// Drops buckets past retention. Returns removed bucket count.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = (now - Duration::days(RETENTION_DAYS)).timestamp();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|hour, _| *hour >= cutoff);
        before - buckets.len()
    }
}

fn top_n(counts: impl Iterator<Item = (String, u64)>) -> Vec<RankedCount> {
    let mut ranked: Vec<RankedCount> = counts
        .map(|(key, count)| RankedCount { key, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));
    ranked.truncate(TOP_N);
    ranked
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
