use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use shared::incident::{RelayRequest, RelayResponse};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin::{self, AdminStore};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::fanout::Relay;

#[derive(Clone)]
pub struct AppState {
    /// Absent when Telegram credentials are not configured.
    pub relay: Option<Arc<Relay>>,
    pub admin: Arc<AdminStore>,
    pub config: Arc<RelayConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/send-incident", post(send_incident))
        .merge(admin::routes::router())
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    relay_configured: bool,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        relay_configured: state.relay.is_some(),
    })
}

/// Fan an incident out to the primary channel and the reporter's contacts.
///
/// Per-recipient failures land in `results`; only an unreadable body or
/// missing credentials fail the request itself.
async fn send_incident(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RelayResponse>, RelayError> {
    let request: RelayRequest =
        serde_json::from_slice(&body).map_err(|e| RelayError::InvalidPayload(e.to_string()))?;

    let relay = state.relay.as_ref().ok_or(RelayError::MissingCredentials)?;

    let results = relay.dispatch(&request).await;
    info!(
        recipients = results.len(),
        delivered = results
            .iter()
            .filter(|r| r.status == shared::incident::DeliveryStatus::Sent)
            .count(),
        "Incident relayed"
    );

    Ok(Json(RelayResponse::delivered(results)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
