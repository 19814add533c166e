//! EdgeGate server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use edgegate::AppState;
use edgegate::config::Config;
use edgegate::geo::StaticProvider;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    // Default deployment ships the table-backed provider; a GeoIP-backed
    // implementation plugs in through the same trait.
    let provider = Arc::new(StaticProvider::new());
    let state = AppState::new(&config, provider);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        geo_fail_closed = config.geo_fail_closed,
        "EdgeGate starting",
    );

    let app = edgegate::router(state.clone());

    let addr = SocketAddr::new(config.host.parse().expect("invalid host"), config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    // Spawn the expiry sweep: windows, manual blocks, stats buckets.
    let cleanup_state = state.clone();
    let interval = std::time::Duration::from_secs(config.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cleanup_state.engine().cleanup(chrono::Utc::now());
            if removed > 0 {
                tracing::info!(removed, "Cleaned up expired windows");
            }
        }
    });

    tracing::info!(%addr, "EdgeGate ready");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("EdgeGate shut down");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install signal handler");
    tracing::info!("Shutdown signal received");
}
