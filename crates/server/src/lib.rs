//! cco server library.
//!
//! Provides a reusable serve function used by the binary and by tests.

#![deny(missing_docs)]

mod auth;
mod health;
mod logger;

use std::{net::SocketAddr, time::Duration};

use anyhow::anyhow;
use axum::routing::get;
use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Grace period for in-flight connections to drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Configuration for serving the proxy.
pub struct ServeConfig {
    /// The socket address the server will bind to.
    pub listen_address: SocketAddr,
    /// The loaded configuration snapshot.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g. "info" or "llm=debug").
    pub log_filter: String,
    /// The version string to log on startup.
    pub version: String,
}

/// Starts and runs the proxy server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    log::info!("cco {version}");

    let proxy_key = config.server.proxy_key.clone();

    let app = llm::router(&config)
        .map_err(|error| anyhow!("Failed to initialize providers: {error}"))?
        .route("/health", get(health::health))
        .route("/", get(health::index))
        .layer(auth::AuthLayer::new(proxy_key));

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|error| anyhow!("Failed to bind to {listen_address}: {error}"))?;

    log::info!("Proxy endpoint: http://{listen_address}/");
    log::info!("Health endpoint: http://{listen_address}/health");

    let graceful = {
        let token = shutdown_signal.clone();
        axum::serve(listener, app).with_graceful_shutdown(async move { token.cancelled().await })
    };

    tokio::select! {
        result = graceful => {
            result.map_err(|error| anyhow!("Server error: {error}"))?;
        }
        _ = async {
            shutdown_signal.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            log::warn!("Shutdown grace period expired, closing remaining connections");
        }
    }

    Ok(())
}
