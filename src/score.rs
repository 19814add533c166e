//! Risk scoring and geo/network policy evaluation.
//!
//! The block decision walks an ordered list of checks and the first match
//! supplies the reason; the risk score accumulates every signal regardless
//! of the verdict, so operators can watch risk rise before it crosses a
//! blocking threshold. Explicit deny has strictly higher precedence than any
//! allow rule, even for a country listed in both sets.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};

use crate::geo::LocationInfo;
use crate::rules::{GeoRule, TimeRestriction};
use crate::types::Reason;

// Signal weights (capped at 100).
const WEIGHT_TOR: u32 = 40;
const WEIGHT_PROXY: u32 = 25;
const WEIGHT_VPN: u32 = 15;
const WEIGHT_DENYLISTED_ASN: u32 = 10;

/// Outcome of scoring one request against the geo rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// 0-100 accumulated risk, independent of `blocked`.
    pub score: u8,
    pub blocked: bool,
    pub reason: Reason,
}

impl Evaluation {
    fn allow(score: u8) -> Self {
        Self {
            score,
            blocked: false,
            reason: Reason::Ok,
        }
    }

    fn block(score: u8, reason: Reason) -> Self {
        Self {
            score,
            blocked: true,
            reason,
        }
    }
}

/// Scores a resolved location against the geo rule.
///
/// Check order: CIDR/ASN denylist, blocked country/region, allow-list miss,
/// Tor, proxy, VPN, time restriction. First match wins for the reason.
pub fn score(location: &LocationInfo, rule: &GeoRule, now: DateTime<Utc>) -> Evaluation {
    let mut risk: u32 = 0;
    if location.is_tor {
        risk += WEIGHT_TOR;
    }
    if location.is_proxy {
        risk += WEIGHT_PROXY;
    }
    if location.is_vpn {
        risk += WEIGHT_VPN;
    }
    if rule.asn_denylist.contains(&location.asn) {
        risk += WEIGHT_DENYLISTED_ASN;
    }
    let risk = risk.min(100) as u8;

    // 1. Explicit IP-range or ASN denylist: immediate block, maximum score.
    if rule.ip_ranges.iter().any(|net| net.contains(&location.ip))
        || rule.asn_denylist.contains(&location.asn)
    {
        return Evaluation::block(100, Reason::CustomRule);
    }

    let country = location.country_code.to_uppercase();
    let region = location.region.to_uppercase();

    // 2. Explicit country/region deny. Wins over any allow rule below.
    if rule.blocked_countries.contains(&country)
        || (!region.is_empty() && rule.blocked_regions.contains(&region))
    {
        return Evaluation::block(risk, Reason::GeoBlocked);
    }

    // 3. Allow-list miss: a non-empty allow list denies everything else.
    if !rule.allowed_countries.is_empty() && !rule.allowed_countries.contains(&country) {
        return Evaluation::block(risk, Reason::GeoBlocked);
    }
    if !rule.allowed_regions.is_empty() && !rule.allowed_regions.contains(&region) {
        return Evaluation::block(risk, Reason::GeoBlocked);
    }

    // 4-6. Network reputation flags.
    if rule.tor_blocking && location.is_tor {
        return Evaluation::block(risk, Reason::TorBlocked);
    }
    if rule.proxy_blocking && location.is_proxy {
        return Evaluation::block(risk, Reason::ProxyBlocked);
    }
    if rule.vpn_blocking && location.is_vpn {
        return Evaluation::block(risk, Reason::VpnBlocked);
    }

    // 7. Time-of-day restriction in the rule's timezone.
    if let Some(tr) = &rule.time_restrictions {
        if !within_allowed_time(tr, now) {
            return Evaluation::block(risk, Reason::TimeRestricted);
        }
    }

    Evaluation::allow(risk)
}

fn within_allowed_time(tr: &TimeRestriction, now: DateTime<Utc>) -> bool {
    // Out-of-range offsets are rejected at write time; treat a bad stored
    // value as unrestricted rather than blocking everyone.
    let Some(offset) = FixedOffset::east_opt(tr.utc_offset_minutes * 60) else {
        return true;
    };
    let local = now.with_timezone(&offset);

    if !tr.allowed_hours.is_empty() {
        let hour = local.hour() as u8;
        if !tr.allowed_hours.contains(&hour) {
            return false;
        }
    }
    if !tr.allowed_days.is_empty() {
        let day = local.weekday().num_days_from_monday() as u8;
        if !tr.allowed_days.contains(&day) {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
