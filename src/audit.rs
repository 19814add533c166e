//! Audit trail for blocked (and sampled allowed) decisions.
//!
//! `AuditSink::record` is fire-and-forget: attempts go over a bounded mpsc
//! channel and a background writer drains them in batches into the
//! [`AuditLog`]. The request path never waits on persistence; a full channel
//! drops the record with a warning. Delivery is at-least-once and the
//! dashboard de-duplicates by id, so redelivery duplicates are acceptable.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::geo::LocationInfo;
use crate::types::Reason;

/// One audited decision. Append-only; never mutated after the write.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockedAttempt {
    pub id: Uuid,
    pub identifier: String,
    #[schema(value_type = String)]
    pub ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationInfo>,
    pub endpoint: String,
    pub reason: Reason,
    pub risk_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bounded in-memory audit store, newest records first.
pub struct AuditLog {
    records: RwLock<VecDeque<BlockedAttempt>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Appends a record, evicting the oldest past capacity.
    pub fn push(&self, attempt: BlockedAttempt) {
        let mut records = self.records.write();
        if records.len() >= self.capacity {
            records.pop_back();
        }
        records.push_front(attempt);
    }

    /// Queries recent records, newest first.
    ///
    /// `since` bounds the lookback; `reason` and `search` (matched against
    /// identifier, IP, endpoint, and country) narrow the result.
    pub fn query(
        &self,
        since: Option<DateTime<Utc>>,
        reason: Option<Reason>,
        search: Option<&str>,
        limit: usize,
    ) -> Vec<BlockedAttempt> {
        let needle = search.map(str::to_lowercase);
        self.records
            .read()
            .iter()
            .filter(|rec| since.is_none_or(|s| rec.created_at >= s))
            .filter(|rec| reason.is_none_or(|r| rec.reason == r))
            .filter(|rec| {
                needle.as_deref().is_none_or(|needle| {
                    rec.identifier.to_lowercase().contains(needle)
                        || rec.ip.to_string().contains(needle)
                        || rec.endpoint.to_lowercase().contains(needle)
                        || rec
                            .location
                            .as_ref()
                            .is_some_and(|l| l.country_code.to_lowercase().contains(needle))
                })
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Fire-and-forget producer handle for the audit pipeline.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<BlockedAttempt>,
}

impl AuditSink {
    /// Creates the sink and spawns the background writer task.
    pub fn spawn(log: Arc<AuditLog>, buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<BlockedAttempt>(buffer.max(1));

        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(64);
            while rx.recv_many(&mut batch, 64).await > 0 {
                for attempt in batch.drain(..) {
                    log.push(attempt);
                }
            }
        });

        Self { tx }
    }

    /// Enqueues an attempt without blocking. A full buffer drops the record
    /// with a warning; the verdict is never affected.
    pub fn record(&self, attempt: BlockedAttempt) {
        if let Err(err) = self.tx.try_send(attempt) {
            tracing::warn!(%err, "audit buffer full, dropping record");
        }
    }
}

/// Lookback window for the dashboard's `range` query parameter.
pub fn parse_range(range: &str) -> Option<Duration> {
    match range {
        "1h" => Some(Duration::hours(1)),
        "6h" => Some(Duration::hours(6)),
        "24h" => Some(Duration::hours(24)),
        "7d" => Some(Duration::days(7)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
