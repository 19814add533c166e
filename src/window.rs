//! Per-identifier, per-rule fixed-window request counting.
//!
//! Fixed windows were chosen over a sliding log: O(1) memory per key and
//! O(1) update, at the cost of up to 2x the nominal rate across a window
//! boundary. Entries are keyed `(identifier, rule_id)` in a `DashMap`, so
//! concurrent increments on the same key serialize on the shard lock while
//! different keys proceed in parallel. Expired entries are dropped lazily on
//! the next touch and swept by the periodic cleanup task.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::StoreError;
use crate::rules::RateLimitRule;

/// Result of one counted request.
#[derive(Debug, Clone, Copy)]
pub struct WindowStatus {
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// True once the count has exceeded the rule's budget; stays true for
    /// the remainder of the window.
    pub blocked: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    count: u64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
}

/// Dashboard-facing summary of one live window.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WindowEntry {
    pub identifier: String,
    pub rule_id: Uuid,
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Counter backend the engine records requests against.
///
/// The in-memory implementation never fails; a remote-backed store returns
/// `StoreError` on outage and the engine applies the matched rule's
/// fail-open/fail-closed mode.
pub trait CounterStore: Send + Sync {
    /// Counts one request against `rule` and reports the window state.
    ///
    /// A fresh window starts when no entry exists or `now` has passed the
    /// current window's end; prior blocked state never carries over.
    fn increment(
        &self,
        identifier: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<WindowStatus, StoreError>;

    /// Whether the identifier is currently blocked under this rule, without
    /// consuming a slot.
    fn is_blocked(&self, identifier: &str, rule_id: Uuid, now: DateTime<Utc>) -> bool;

    /// Snapshot of all live windows for the monitor table.
    fn entries(&self, now: DateTime<Utc>) -> Vec<WindowEntry>;

    /// Drops entries whose window has fully expired. Returns removed count.
    fn cleanup(&self, now: DateTime<Utc>) -> usize;
}

/// In-memory window counter. Sole owner and writer of all window entries.
#[derive(Default)]
pub struct WindowCounter {
    windows: DashMap<(String, Uuid), Entry>,
}

impl CounterStore for WindowCounter {
    fn increment(
        &self,
        identifier: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<WindowStatus, StoreError> {
        let key = (identifier.to_string(), rule.id);
        let mut entry = self.windows.entry(key).or_insert_with(|| Entry {
            count: 0,
            window_start: now,
            window_end: now + rule.window(),
            blocked_until: None,
        });

        if now >= entry.window_end {
            entry.count = 1;
            entry.window_start = now;
            entry.window_end = now + rule.window();
            entry.blocked_until = None;
        } else {
            entry.count += 1;
            if entry.count > rule.max_requests {
                entry.blocked_until = Some(entry.window_end);
            }
        }

        Ok(WindowStatus {
            count: entry.count,
            window_start: entry.window_start,
            window_end: entry.window_end,
            blocked: entry.blocked_until.is_some_and(|until| now < until),
        })
    }

    fn is_blocked(&self, identifier: &str, rule_id: Uuid, now: DateTime<Utc>) -> bool {
        self.windows
            .get(&(identifier.to_string(), rule_id))
            .is_some_and(|e| now < e.window_end && e.blocked_until.is_some_and(|until| now < until))
    }

    fn entries(&self, now: DateTime<Utc>) -> Vec<WindowEntry> {
        self.windows
            .iter()
            .filter(|e| now < e.window_end)
            .map(|e| {
                let (identifier, rule_id) = e.key().clone();
                WindowEntry {
                    identifier,
                    rule_id,
                    count: e.count,
                    window_start: e.window_start,
                    window_end: e.window_end,
                    blocked: e.blocked_until.is_some_and(|until| now < until),
                    blocked_until: e.blocked_until,
                }
            })
            .collect()
    }

    fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, e| now < e.window_end);
        before - self.windows.len()
    }
}

impl WindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry count (monitoring).
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Removes all windows tracked for an identifier (e.g. after a manual
    /// unblock).
    pub fn forget(&self, identifier: &str) -> usize {
        let before = self.windows.len();
        self.windows.retain(|(id, _), _| id != identifier);
        before - self.windows.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
