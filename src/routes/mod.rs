//! HTTP API routes for EdgeGate.

mod blocks;
mod evaluate;
mod geo;
mod rules;
mod system;
mod traffic;
pub mod types;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ErrorBody;
use crate::request_id::request_id_middleware;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// OpenAPI
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "EdgeGate API",
        description = "Edge access-control engine for the video platform.\n\nPer inbound request the engine decides allow, throttle, or block from fixed-window rate limiting and a risk evaluation of the request's network origin (country, ASN, VPN/proxy/Tor, CIDR and time-of-day rules).\n\nRule changes hot-swap atomically; in-flight evaluations never observe a partial rule set.",
        version = "0.3.0",
        license(name = "Apache-2.0"),
    ),
    paths(
        evaluate::evaluate,
        rules::list_rules,
        rules::create_rule,
        rules::patch_rule,
        rules::delete_rule,
        geo::get_geo_rule,
        geo::put_geo_rule,
        geo::test_geo_rule,
        traffic::list_entries,
        traffic::stats,
        traffic::list_attempts,
        blocks::list_blocks,
        blocks::create_block,
        blocks::delete_block,
        system::health,
    ),
    components(
        schemas(
            types::CreateRuleRequest, types::CreateRuleResponse, types::ListRulesResponse,
            types::VersionResponse, types::GeoRuleResponse, types::TestGeoRequest,
            types::TestGeoResponse, types::EvaluateRequest, types::EntriesResponse,
            types::StatsResponse, types::AttemptsResponse, types::IpBlockRequest,
            types::IpBlocksResponse, types::HealthResponse, ErrorBody,
            crate::rules::RateLimitRule, crate::rules::GeoRule, crate::rules::RulePatch,
            crate::rules::FailMode, crate::rules::TimeRestriction,
            crate::types::Verdict, crate::types::Reason,
            crate::geo::LocationInfo, crate::window::WindowEntry,
            crate::audit::BlockedAttempt, crate::engine::IpBlock,
            crate::stats::StatsSummary, crate::stats::HourlyStat, crate::stats::RankedCount,
        )
    ),
    tags(
        (name = "Evaluate", description = "Per-request allow/block decisions"),
        (name = "Rules", description = "Rate-limit rule management"),
        (name = "Geo", description = "Geo rule management and dry-run testing"),
        (name = "Traffic", description = "Monitor table, stats, and audit feed"),
        (name = "Blocks", description = "Manual IP blocks"),
        (name = "System", description = "System and health endpoints"),
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the main application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Enforcement
        .route("/evaluate", post(evaluate::evaluate))
        // Rate-limit rules
        .route("/rules", get(rules::list_rules).post(rules::create_rule))
        .route(
            "/rules/{id}",
            axum::routing::patch(rules::patch_rule).delete(rules::delete_rule),
        )
        // Geo rules
        .route("/geo-rules", get(geo::get_geo_rule).put(geo::put_geo_rule))
        .route("/geo-rules/test", post(geo::test_geo_rule))
        // Monitor + stats
        .route("/entries", get(traffic::list_entries))
        .route("/stats", get(traffic::stats))
        .route("/attempts", get(traffic::list_attempts))
        // Manual IP blocks
        .route(
            "/ip-blocks",
            get(blocks::list_blocks).post(blocks::create_block),
        )
        .route("/ip-blocks/{ip}", axum::routing::delete(blocks::delete_block))
        // System
        .route("/health", get(system::health))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let api = api
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer(&state))
        .with_state(state);

    api.merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = state.cors_origins();

    // No origins configured → no CORS headers (deny cross-origin by default).
    // Use --cors-origins "*" for permissive or specify exact origins.
    if origins.is_empty() {
        return CorsLayer::new();
    }

    let x_request_id = axum::http::header::HeaderName::from_static("x-request-id");
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            x_request_id.clone(),
        ])
        .expose_headers([x_request_id]);

    if origins.len() == 1 && origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard origin, all cross-origin requests allowed");
        base.allow_origin(tower_http::cors::Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        base.allow_origin(parsed)
    }
}
