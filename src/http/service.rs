//! Routes served by the quota gate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::middleware::enforce_quota;
use crate::ratelimit::{HttpRemoteNamer, SliceLimiter};

/// Shared application state.
pub struct AppState {
    pub limiter: SliceLimiter,
    pub namer: HttpRemoteNamer,
}

impl AppState {
    pub fn new(limiter: SliceLimiter, namer: HttpRemoteNamer) -> Self {
        Self { limiter, namer }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Quota report for the calling client.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub identifier: String,
    pub limit: i64,
    pub remaining: i64,
    pub reset_in_ms: u64,
}

/// Build the router.
///
/// `/health` and `/quota` are never limited; every other path consumes one
/// operation from the caller's budget.
pub fn router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .fallback(accepted)
        .layer(middleware::from_fn_with_state(state.clone(), enforce_quota));

    Router::new()
        .route("/health", get(health))
        .route("/quota", get(quota))
        .merge(gated)
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Report the caller's budget without consuming any.
async fn quota(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<QuotaResponse> {
    let identifier = state.namer.name(&peer.to_string(), &headers);
    let status = state.limiter.status(&identifier);

    Json(QuotaResponse {
        identifier,
        limit: status.limit,
        remaining: status.remaining,
        reset_in_ms: status.reset_in.as_millis() as u64,
    })
}

async fn accepted() -> StatusCode {
    StatusCode::OK
}
