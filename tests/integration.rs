//! Integration tests for the EdgeGate HTTP API.
//!
//! Each test starts an in-memory server on an ephemeral port and uses
//! reqwest to exercise the endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use edgegate::geo::{LocationInfo, StaticProvider};

fn seeded_provider() -> Arc<StaticProvider> {
    let provider = StaticProvider::new();
    // Clean US address.
    provider.insert(LocationInfo {
        country_code: "US".into(),
        region: "CALIFORNIA".into(),
        city: "Mountain View".into(),
        asn: 15169,
        isp: "Google LLC".into(),
        ..LocationInfo::unknown("8.8.8.8".parse().unwrap(), chrono::Utc::now())
    });
    // China address, not a VPN.
    provider.insert(LocationInfo {
        country_code: "CN".into(),
        asn: 4134,
        ..LocationInfo::unknown("1.2.3.4".parse().unwrap(), chrono::Utc::now())
    });
    // Tor exit that is also a proxy.
    provider.insert(LocationInfo {
        country_code: "NL".into(),
        is_tor: true,
        is_proxy: true,
        ..LocationInfo::unknown("5.6.7.8".parse().unwrap(), chrono::Utc::now())
    });
    Arc::new(provider)
}

/// Boots an in-memory EdgeGate server on an OS-assigned port.
/// Returns the base URL (e.g. "http://127.0.0.1:12345").
async fn spawn_server() -> String {
    let state = edgegate::AppState::new_in_memory_with_provider(seeded_provider());
    let app = edgegate::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn evaluate(client: &Client, base: &str, identifier: &str, endpoint: &str, ip: &str) -> Value {
    client
        .post(format!("{base}/evaluate"))
        .json(&json!({
            "identifier": identifier,
            "endpoint": endpoint,
            "ip": ip,
            "userAgent": "integration-test",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["uptimeSeconds"].is_u64());
    assert_eq!(body["evaluatedRequests"], 0);
}

#[tokio::test]
async fn request_id_generated_when_absent() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    let request_id = resp
        .headers()
        .get("x-request-id")
        .expect("missing x-request-id");
    // UUID format: 8-4-4-4-12
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn request_id_preserved_when_provided() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/health"))
        .header("x-request-id", "my-custom-id-123")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("x-request-id").unwrap().to_str().unwrap(),
        "my-custom-id-123"
    );
}

// ---------------------------------------------------------------------------
// Rate-limit rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rule_crud_roundtrip() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/rules"))
        .json(&json!({"endpoint": "/api/auth/*", "windowMs": 900000, "maxRequests": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();

    let list: Value = client
        .get(format!("{base}/rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["rules"].as_array().unwrap().len(), 1);
    assert_eq!(list["rules"][0]["endpointPattern"], "/api/auth/*");
    assert_eq!(list["rules"][0]["enabled"], true);

    let resp = client
        .patch(format!("{base}/rules/{id}"))
        .json(&json!({"enabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let list: Value = client
        .get(format!("{base}/rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["rules"][0]["enabled"], false);

    let resp = client
        .delete(format!("{base}/rules/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{base}/rules/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn invalid_rules_are_rejected() {
    let base = spawn_server().await;
    let client = Client::new();

    for body in [
        json!({"endpoint": "/api/*", "windowMs": 60000, "maxRequests": 0}),
        json!({"endpoint": "/api/*", "windowMs": 0, "maxRequests": 5}),
        json!({"endpoint": "/api/*", "windowMs": 9_000_000_000_000_000_000_u64, "maxRequests": 5}),
        json!({"endpoint": "", "windowMs": 60000, "maxRequests": 5}),
    ] {
        let resp = client
            .post(format!("{base}/rules"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "bad_request");
    }

    let list: Value = client
        .get(format!("{base}/rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list["rules"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn six_auth_requests_trip_the_limit() {
    // Scenario A: 5 allowed, then RATE_LIMITED with retryAfter <= window.
    let base = spawn_server().await;
    let client = Client::new();

    client
        .post(format!("{base}/rules"))
        .json(&json!({"endpoint": "/api/auth/*", "windowMs": 900000, "maxRequests": 5}))
        .send()
        .await
        .unwrap();

    for _ in 0..5 {
        let verdict = evaluate(&client, &base, "ip1", "/api/auth/login", "8.8.8.8").await;
        assert_eq!(verdict["allowed"], true);
        assert_eq!(verdict["reason"], "OK");
    }

    let verdict = evaluate(&client, &base, "ip1", "/api/auth/login", "8.8.8.8").await;
    assert_eq!(verdict["allowed"], false);
    assert_eq!(verdict["reason"], "RATE_LIMITED");
    assert!(verdict["retryAfterMs"].as_u64().unwrap() <= 900_000);

    // A different identifier still has its own budget.
    let verdict = evaluate(&client, &base, "ip2", "/api/auth/login", "8.8.8.8").await;
    assert_eq!(verdict["allowed"], true);
}

#[tokio::test]
async fn geo_block_fires_before_vpn_check() {
    // Scenario B: blocked country wins over the VPN flag check.
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .put(format!("{base}/geo-rules"))
        .json(&json!({"blockedCountries": ["CN"], "vpnBlocking": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let verdict = evaluate(&client, &base, "ip1", "/api/videos", "1.2.3.4").await;
    assert_eq!(verdict["allowed"], false);
    assert_eq!(verdict["reason"], "GEO_BLOCKED");
}

#[tokio::test]
async fn tor_exit_blocked_as_proxy_when_tor_blocking_off() {
    // Scenario C: proxyBlocking catches a Tor exit when torBlocking is off.
    let base = spawn_server().await;
    let client = Client::new();

    client
        .put(format!("{base}/geo-rules"))
        .json(&json!({"torBlocking": false, "proxyBlocking": true}))
        .send()
        .await
        .unwrap();

    let verdict = evaluate(&client, &base, "ip1", "/api/videos", "5.6.7.8").await;
    assert_eq!(verdict["allowed"], false);
    assert_eq!(verdict["reason"], "PROXY_BLOCKED");
    // Risk score accumulates both the Tor and proxy signals.
    assert_eq!(verdict["riskScore"], 65);
}

#[tokio::test]
async fn deny_wins_when_country_in_both_lists() {
    let base = spawn_server().await;
    let client = Client::new();

    client
        .put(format!("{base}/geo-rules"))
        .json(&json!({"allowedCountries": ["CN"], "blockedCountries": ["CN"]}))
        .send()
        .await
        .unwrap();

    let verdict = evaluate(&client, &base, "ip1", "/api/videos", "1.2.3.4").await;
    assert_eq!(verdict["reason"], "GEO_BLOCKED");
}

#[tokio::test]
async fn unresolvable_ip_fails_open() {
    let base = spawn_server().await;
    let client = Client::new();

    let verdict = evaluate(&client, &base, "ip1", "/api/videos", "198.51.100.77").await;
    assert_eq!(verdict["allowed"], true);
    assert_eq!(verdict["reason"], "OK");
}

// ---------------------------------------------------------------------------
// Geo dry-run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dry_run_allows_and_consumes_no_slot() {
    // Scenario D: test endpoint reports OK and leaves windows untouched.
    let base = spawn_server().await;
    let client = Client::new();

    client
        .post(format!("{base}/rules"))
        .json(&json!({"endpoint": "/api/*", "windowMs": 60000, "maxRequests": 2}))
        .send()
        .await
        .unwrap();

    for _ in 0..5 {
        let resp = client
            .post(format!("{base}/geo-rules/test"))
            .json(&json!({"ip": "8.8.8.8", "endpoint": "/api/videos"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["allowed"], true);
        assert_eq!(body["reason"], "OK");
        assert_eq!(body["location"]["countryCode"], "US");
    }

    let entries: Value = client
        .get(format!("{base}/entries"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entries["total"], 0);
}

#[tokio::test]
async fn dry_run_rejects_bad_ip() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/geo-rules/test"))
        .json(&json!({"ip": "not-an-ip"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ---------------------------------------------------------------------------
// Monitor table, stats, audit feed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn entries_reports_blocked_windows() {
    let base = spawn_server().await;
    let client = Client::new();

    client
        .post(format!("{base}/rules"))
        .json(&json!({"endpoint": "/api/*", "windowMs": 60000, "maxRequests": 1}))
        .send()
        .await
        .unwrap();

    evaluate(&client, &base, "ip1", "/api/videos", "8.8.8.8").await;
    evaluate(&client, &base, "ip1", "/api/videos", "8.8.8.8").await;
    evaluate(&client, &base, "ip2", "/api/videos", "8.8.8.8").await;

    let all: Value = client
        .get(format!("{base}/entries"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["total"], 2);

    let blocked: Value = client
        .get(format!("{base}/entries?status=blocked"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(blocked["total"], 1);
    assert_eq!(blocked["entries"][0]["identifier"], "ip1");
    assert_eq!(blocked["entries"][0]["count"], 2);

    let searched: Value = client
        .get(format!("{base}/entries?search=ip2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(searched["total"], 1);

    let resp = client
        .get(format!("{base}/entries?status=bogus"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn stats_aggregates_traffic() {
    let base = spawn_server().await;
    let client = Client::new();

    client
        .post(format!("{base}/rules"))
        .json(&json!({"endpoint": "/api/auth/*", "windowMs": 60000, "maxRequests": 1}))
        .send()
        .await
        .unwrap();

    evaluate(&client, &base, "ip1", "/api/auth/login", "8.8.8.8").await;
    evaluate(&client, &base, "ip1", "/api/auth/login", "8.8.8.8").await; // blocked
    evaluate(&client, &base, "ip2", "/api/videos", "1.2.3.4").await;

    let stats: Value = client
        .get(format!("{base}/stats?range=1h"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalRequests"], 3);
    assert_eq!(stats["blockedRequests"], 1);
    assert_eq!(stats["uniqueIps"], 2);
    assert_eq!(stats["topEndpoints"][0]["key"], "/api/auth/login");
    assert!(!stats["hourlyStats"].as_array().unwrap().is_empty());

    let resp = client
        .get(format!("{base}/stats?range=99x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn blocked_attempts_land_in_audit_feed() {
    let base = spawn_server().await;
    let client = Client::new();

    client
        .put(format!("{base}/geo-rules"))
        .json(&json!({"blockedCountries": ["CN"]}))
        .send()
        .await
        .unwrap();

    evaluate(&client, &base, "ip1", "/api/videos", "1.2.3.4").await;

    // The audit writer is asynchronous; poll briefly.
    let mut attempts = Vec::new();
    for _ in 0..50 {
        let body: Value = client
            .get(format!("{base}/attempts?range=1h"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        attempts = body["attempts"].as_array().unwrap().clone();
        if !attempts.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["reason"], "GEO_BLOCKED");
    assert_eq!(attempts[0]["ip"], "1.2.3.4");
    assert_eq!(attempts[0]["location"]["countryCode"], "CN");
    assert_eq!(attempts[0]["userAgent"], "integration-test");
}

// ---------------------------------------------------------------------------
// Manual IP blocks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_block_lifecycle() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/ip-blocks"))
        .json(&json!({"ip": "8.8.8.8", "durationHours": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let verdict = evaluate(&client, &base, "ip1", "/api/videos", "8.8.8.8").await;
    assert_eq!(verdict["allowed"], false);
    assert_eq!(verdict["reason"], "CUSTOM_RULE");
    assert_eq!(verdict["riskScore"], 100);

    let list: Value = client
        .get(format!("{base}/ip-blocks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["blocks"].as_array().unwrap().len(), 1);

    let resp = client
        .delete(format!("{base}/ip-blocks/8.8.8.8"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let verdict = evaluate(&client, &base, "ip1", "/api/videos", "8.8.8.8").await;
    assert_eq!(verdict["allowed"], true);

    let resp = client
        .delete(format!("{base}/ip-blocks/8.8.8.8"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn manual_block_rejects_invalid_input() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/ip-blocks"))
        .json(&json!({"ip": "nope", "durationHours": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{base}/ip-blocks"))
        .json(&json!({"ip": "8.8.8.8", "durationHours": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ---------------------------------------------------------------------------
// Hot swap under load
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rule_replacement_does_not_disturb_other_traffic() {
    let base = spawn_server().await;
    let client = Client::new();

    client
        .post(format!("{base}/rules"))
        .json(&json!({"endpoint": "/api/auth/*", "windowMs": 60000, "maxRequests": 100}))
        .send()
        .await
        .unwrap();

    // Interleave evaluations with rule writes; every response must be a
    // complete verdict (never an error from a torn rule set).
    for i in 0..20 {
        let verdict = evaluate(&client, &base, "ip1", "/api/auth/login", "8.8.8.8").await;
        assert_eq!(verdict["allowed"], true);

        if i % 5 == 0 {
            let resp = client
                .post(format!("{base}/rules"))
                .json(&json!({
                    "endpoint": format!("/api/extra{i}/*"),
                    "windowMs": 60000,
                    "maxRequests": 10,
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }
    }
}
