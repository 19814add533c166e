//! EdgeGate - edge access-control engine for the video platform.
//!
//! Per inbound request the engine decides allow, throttle, or block from:
//! - fixed-window request counting against per-endpoint rules, and
//! - a risk evaluation of the request's network origin (country, ASN,
//!   VPN/proxy/Tor, CIDR denylists, time-of-day restrictions).
//!
//! Rule sets hot-swap atomically without downtime, and every blocked (plus a
//! sample of allowed) decision lands in a query-able audit trail behind the
//! operator dashboard.

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod request_id;
pub mod routes;
pub mod rules;
pub mod score;
pub mod state;
pub mod stats;
pub mod types;
pub mod window;

pub use routes::router;
pub use state::AppState;
