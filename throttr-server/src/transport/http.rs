//! HTTP transport for health checks and observability
//!
//! Quota operations are only available over the native protocol; this
//! listener exposes read-only endpoints for orchestration and monitoring.
//!
//! # API Endpoints
//!
//! ## GET /health
//!
//! Health check endpoint. Returns "OK" with 200 status.
//!
//! ## GET /metrics
//!
//! Server metrics in Prometheus text format.
//!
//! ## GET /stats
//!
//! Store statistics as JSON:
//!
//! ```json
//! {
//!   "keys": 1250,
//!   "max_keys": 1000000,
//!   "max_key_length": 255,
//!   "shards": 64,
//!   "ttl_unit": "milliseconds",
//!   "uptime_seconds": 3600,
//!   "connections_active": 12,
//!   "requests_total": 48213
//! }
//! ```

use super::Transport;
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    http::header,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use throttr::QuotaEngine;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Store statistics served by `GET /stats`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Stored keys, including expired ones not yet swept
    pub keys: usize,
    pub max_keys: usize,
    pub max_key_length: usize,
    pub shards: usize,
    pub ttl_unit: String,
    pub uptime_seconds: u64,
    pub connections_active: usize,
    pub requests_total: u64,
}

/// HTTP transport implementation
pub struct HttpTransport {
    listener: TcpListener,
    metrics: Arc<Metrics>,
}

impl HttpTransport {
    pub async fn bind(addr: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP transport to {addr}"))?;
        Ok(Self { listener, metrics })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, engine: Arc<QuotaEngine>, shutdown: CancellationToken) -> Result<()> {
        let app = router(engine, self.metrics);

        tracing::info!(addr = %self.listener.local_addr()?, "HTTP server listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        tracing::info!("HTTP transport stopped");
        Ok(())
    }
}

struct AppState {
    engine: Arc<QuotaEngine>,
    metrics: Arc<Metrics>,
}

/// Build the HTTP router
pub fn router(engine: Arc<QuotaEngine>, metrics: Arc<Metrics>) -> Router {
    let app_state = Arc::new(AppState { engine, metrics });

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(handle_metrics))
        .route("/stats", get(handle_stats))
        .with_state(app_state)
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.update_active_keys(state.engine.key_count());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let store = state.engine.store();
    Json(StatsResponse {
        keys: store.len(),
        max_keys: store.max_keys(),
        max_key_length: store.max_key_length(),
        shards: store.shard_count(),
        ttl_unit: state.engine.ttl_unit().to_string(),
        uptime_seconds: state.metrics.uptime_seconds(),
        connections_active: state.metrics.connections_active.load(Ordering::Relaxed),
        requests_total: state.metrics.total_requests.load(Ordering::Relaxed),
    })
}
