//! HTTP surface of the service.
//!
//! Provides endpoints for:
//! - Loop packet and archive record ingest from the station driver
//! - The current field-complete snapshot
//! - Day statistics and the latest archive-derived aggregates
//! - Health and Prometheus metrics

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use rtd_common::{ArchiveRecord, LoopPacket, Timestamp, TimeSpan};
use rtd_core::{ArchiveStore, CoordinatorHandle, CoreError, ObservationStats, PeriodicStats};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    #[serde(rename = "dateTime")]
    pub date_time: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub day: TimeSpan,
    pub observations: BTreeMap<String, ObservationStats>,
    pub periodic: Option<PeriodicStats>,
}

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub as_of: Option<Timestamp>,
}

// ============================================================================
// Shared State
// ============================================================================

pub struct ServerState {
    pub coordinator: CoordinatorHandle,
    pub archive: Arc<dyn ArchiveStore>,
    pub metrics: Option<PrometheusHandle>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the service router.
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/loop", post(loop_handler))
        .route("/archive", post(archive_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(Extension(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /loop - Submit one loop packet
async fn loop_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Json(packet): Json<LoopPacket>,
) -> Response {
    if let Err(e) = packet.validate() {
        counter!("rtd_http_rejected_total", "kind" => "loop").increment(1);
        return error_response(StatusCode::BAD_REQUEST, &e);
    }
    let ts = packet.date_time;
    match state.coordinator.submit_packet(packet).await {
        Ok(()) => {
            debug!(ts, "Accepted loop packet");
            accepted(ts)
        }
        Err(e) => submit_error(e),
    }
}

/// POST /archive - Store an archive record and trigger the archive boundary
async fn archive_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Json(record): Json<ArchiveRecord>,
) -> Response {
    if let Err(e) = record.validate() {
        counter!("rtd_http_rejected_total", "kind" => "archive").increment(1);
        return error_response(StatusCode::BAD_REQUEST, &e);
    }
    let ts = record.date_time;
    // aggregates recomputed at the boundary must see this record
    if let Err(e) = state.archive.store_record(&record).await {
        warn!(ts, error = %e, "Failed to store archive record");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e);
    }
    match state.coordinator.submit_archive(record).await {
        Ok(()) => {
            info!(ts, "Accepted archive record");
            accepted(ts)
        }
        Err(e) => submit_error(e),
    }
}

/// GET /snapshot?as_of=... - Field-complete snapshot, defaulting to now
async fn snapshot_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<SnapshotQuery>,
) -> impl IntoResponse {
    let as_of = params.as_of.unwrap_or_else(|| Utc::now().timestamp());
    Json(state.coordinator.get_snapshot(as_of).await)
}

/// GET /stats - Day statistics and periodic aggregates
async fn stats_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    let buffer = state.coordinator.buffer();
    let (day, observations) = {
        let guard = buffer.read().await;
        (guard.active_day_span(), guard.all_stats())
    };
    Json(StatsResponse {
        day,
        observations,
        periodic: state.coordinator.latest_stats().await,
    })
}

/// GET /health - Health check endpoint
async fn health_handler(Extension(state): Extension<Arc<ServerState>>) -> Response {
    if state.coordinator.is_running() {
        Json(json!({ "status": "ok", "service": "rtd" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "stopped", "service": "rtd" })),
        )
            .into_response()
    }
}

/// GET /metrics - Prometheus text exposition
async fn metrics_handler(Extension(state): Extension<Arc<ServerState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn accepted(ts: Timestamp) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            date_time: ts,
        }),
    )
        .into_response()
}

fn error_response(status: StatusCode, error: &dyn std::fmt::Display) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn submit_error(error: CoreError) -> Response {
    let status = match error {
        CoreError::CoordinatorStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &error)
}

/// Serve until a shutdown signal arrives.
pub async fn run_server(
    state: Arc<ServerState>,
    listen: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(address = %listener.local_addr()?, "Starting ingest server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
        })
        .await?;

    info!("Ingest server stopped");
    Ok(())
}
