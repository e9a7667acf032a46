//! LinkStream session daemon
//!
//! Headless client session that:
//! - resolves the user's chat shard through the directory service
//! - keeps one live WebSocket to it, failing over when the shard dies
//! - maintains local timeline, chat-thread, and follow-map views
//! - exposes health/ready endpoints and Prometheus metrics

use anyhow::Result;
use linkstream_session::health::{self, AppState};
use linkstream_session::{Session, SessionConfig, SessionMetrics};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = SessionConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("linkstream_session={}", config.log_level).parse()?)
                .add_directive("tungstenite=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        username = %config.username,
        auth_server = %config.auth_server,
        "Starting LinkStream session"
    );

    let metrics = SessionMetrics::with_exporter();
    info!("Prometheus metrics initialized");

    let http_port = config.http_port;
    let session = Arc::new(Session::new(config, metrics.clone())?);

    // First connect + initial bulk load; failures degrade into the
    // failover loop rather than aborting startup.
    session.start().await;

    let app_state = AppState {
        connection: session.connection(),
        reconciler: session.reconciler(),
        metrics,
    };
    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], http_port).into();

    info!(port = http_port, "Starting HTTP server");
    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, health_router);

    tokio::select! {
        _ = session.run() => {
            error!("Session loop exited");
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down session...");
    session.shutdown().await;
    info!("Session shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
