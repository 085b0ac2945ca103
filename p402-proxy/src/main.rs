//! p402 — transparent x402 payment proxy for MCP servers.
//!
//! # Usage
//!
//! ```bash
//! # EOA wallet, naive treasurer
//! P402_WALLET_PRIVATE_KEY=0x... p402-proxy
//!
//! # Smart account + remote policy service
//! P402_WALLET_SMART_ACCOUNT_ADDRESS=0x... \
//! P402_WALLET_SESSION_KEY_PRIVATE_KEY=0x... \
//! P402_TREASURER_POLICY_API_URL=https://policy.example.com/api \
//! p402-proxy
//! ```
//!
//! Point a buyer agent at `http://localhost:8402/mcp?target=<upstream-url>`
//! and it speaks plain MCP; the proxy absorbs the x402 payment flow.
//!
//! # Environment Variables
//!
//! See [`p402_proxy::config`] for the full key table. `RUST_LOG` controls
//! the log filter (default: `info`).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use tower_http::cors;
use tracing_subscriber::EnvFilter;

use p402_bridge::DEFAULT_MAX_PENDING;
use p402_proxy::config::ProxyConfig;
use p402_proxy::routes::{self, AppState};
use p402_proxy::session::SessionRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Proxy failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ProxyConfig::from_env()?;
    let wallet = config.wallet.build()?;
    let treasurer = config.build_treasurer(wallet.clone())?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        wallet = %wallet.address(),
        policy_api = config
            .treasurer
            .policy_api_url
            .as_ref()
            .map_or("none (naive treasurer)", url::Url::as_str),
        "Loaded configuration"
    );

    let state = Arc::new(AppState {
        registry: SessionRegistry::new(),
        treasurer,
        max_pending: DEFAULT_MAX_PENDING,
    });

    let app = routes::router(state).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("p402 proxy listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Proxy shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
