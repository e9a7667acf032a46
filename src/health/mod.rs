//! Health check endpoints
//!
//! Liveness, readiness, and Prometheus metrics for the session daemon.

use crate::metrics::SessionMetrics;
use crate::reconcile::StateReconciler;
use crate::session::{ConnectionPhase, SessionConnection};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub username: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub phase: &'static str,
    pub shard: Option<String>,
    pub users: usize,
    pub timeline_posts: usize,
    pub chat_threads: usize,
    pub events_folded: u64,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<SessionConnection>,
    pub reconciler: StateReconciler,
    pub metrics: SessionMetrics,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if the process is running
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        username: state.connection.username().to_string(),
    })
}

/// Readiness endpoint - returns 200 while the shard connection is live
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let phase = state.connection.phase();
    let is_ready = phase == ConnectionPhase::Connected;

    let response = ReadyResponse {
        ready: is_ready,
        phase: phase.as_str(),
        shard: state.connection.shard(),
        users: state.reconciler.user_count(),
        timeline_posts: state.reconciler.timeline_len(),
        chat_threads: state.reconciler.thread_count(),
        events_folded: state.reconciler.events_folded(),
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state
        .metrics
        .set_connected(state.connection.phase() == ConnectionPhase::Connected);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
