//! Status, health and metrics endpoints
//!
//! - `/` - Aggregated cluster health as JSON (200 when OK, 503 otherwise)
//! - `/checks/{name}` - One check's latest result (200/503, 404 if unknown)
//! - `/healthz` - Liveness: Is the process alive?
//! - `/readyz` - Readiness: Is the controller running (not starting or stopping)?
//! - `/metrics` - Prometheus metrics in text format
//!
//! Responses never depend on this replica's leadership, so every replica
//! answers the same way from the shared state.

use crate::controller::{AggregatedStatus, CheckResult, ControllerState, Lifecycle, StateAggregator};
use crate::server::metrics::SharedMetrics;
use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Wire form of the aggregated status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "OK")]
    pub ok: bool,
    #[serde(rename = "Errors")]
    pub errors: Vec<String>,
    #[serde(rename = "LastUpdate")]
    pub last_update: Option<String>,
    #[serde(rename = "CheckDetails")]
    pub check_details: BTreeMap<String, CheckDetail>,
}

/// Wire form of one check's latest result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckDetail {
    #[serde(rename = "OK")]
    pub ok: bool,
    pub errors: Vec<String>,
    pub last_run: String,
    pub run_duration_millis: u64,
    pub authoritative_pod: String,
}

impl From<&CheckResult> for CheckDetail {
    fn from(result: &CheckResult) -> Self {
        Self {
            ok: result.ok,
            errors: result.errors.clone(),
            last_run: result.completed_at.to_rfc3339(),
            run_duration_millis: result.duration.as_millis() as u64,
            authoritative_pod: result.authoritative_pod.clone(),
        }
    }
}

impl From<&AggregatedStatus> for StatusReport {
    fn from(status: &AggregatedStatus) -> Self {
        Self {
            ok: status.ok(),
            errors: status.errors(),
            last_update: status.last_update().map(|t| t.to_rfc3339()),
            check_details: status
                .checks()
                .iter()
                .map(|(name, result)| (name.clone(), CheckDetail::from(result)))
                .collect(),
        }
    }
}

/// Shared state for the status endpoints
#[derive(Clone)]
pub struct ServerState {
    aggregator: StateAggregator,
    controller: ControllerState,
    metrics: SharedMetrics,
}

impl ServerState {
    pub fn new(aggregator: StateAggregator, controller: ControllerState, metrics: SharedMetrics) -> Self {
        Self {
            aggregator,
            controller,
            metrics,
        }
    }
}

fn health_code(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Aggregated status handler
async fn status(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.aggregator.snapshot().await;
    let report = StatusReport::from(&snapshot);
    (health_code(report.ok), Json(report))
}

/// Single check handler
async fn check_status(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    let snapshot = state.aggregator.snapshot().await;
    match snapshot.get(&name) {
        Some(result) => (health_code(result.ok), Json(CheckDetail::from(result))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no result for check {:?}", name) })),
        )
            .into_response(),
    }
}

/// Liveness probe handler
///
/// Always returns 200 OK - if this responds, the process is alive.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe handler
///
/// Ready in both Active and Standby; standby replicas serve status too.
async fn readyz(State(state): State<ServerState>) -> StatusCode {
    match state.controller.lifecycle() {
        Lifecycle::Running(_) => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus metrics handler
async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the router for status, health and metrics endpoints
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/checks/{name}", get(check_status))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(self::metrics))
        .with_state(state)
}

/// Run the status server until the task is aborted
pub async fn run_status_server(addr: SocketAddr, state: ServerState) -> Result<(), std::io::Error> {
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    // Log after successful bind - server is actually listening
    info!(address = %addr, "Status server listening");

    axum::serve(listener, app)
        .await
        .map_err(std::io::Error::other)
}
