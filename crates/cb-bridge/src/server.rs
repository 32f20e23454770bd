//! Inbound HTTP endpoint
//!
//! The orchestrator delivers method calls as `POST /api/mcp/request` with a
//! `{"method", "params"}` body and receives a `{"success", "data"|"error"}`
//! envelope. `GET /health` reports the connector state.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use cb_protocol::{DispatchRequest, DispatchResponse, DispatchResult, REQUEST_PATH};

use crate::connector::{ConnectorState, ConnectorStatus};
use crate::dispatcher::MethodDispatcher;

pub const HEALTH_PATH: &str = "/health";

/// Shared state for the endpoint handlers
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<MethodDispatcher>,
    status: watch::Receiver<ConnectorStatus>,
}

impl AppState {
    pub fn new(dispatcher: Arc<MethodDispatcher>, status: watch::Receiver<ConnectorStatus>) -> Self {
        Self { dispatcher, status }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connector: ConnectorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_id: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(REQUEST_PATH, post(handle_request))
        .route(HEALTH_PATH, get(health_check))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn handle_request(
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> (StatusCode, Json<DispatchResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!("Rejected malformed request: {}", rejection.body_text());
            let result =
                DispatchResult::failure(format!("Invalid request: {}", rejection.body_text()));
            return (StatusCode::BAD_REQUEST, Json(result.into()));
        }
    };

    let result = state
        .dispatcher
        .dispatch(&request.method, request.params)
        .await;
    (StatusCode::OK, Json(result.into()))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.status.borrow().clone();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connector: status.state,
        server_id: status.server_id,
    })
}
