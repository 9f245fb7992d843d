//! Health check API endpoint.
//!
//! Provides a simple health check endpoint for monitoring and load balancers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "ingest_open": true,
    "merge_threshold_secs": 60,
    "retention_days": 28
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether the reading ingest queue accepts new readings.
    #[schema(example = true)]
    pub ingest_open: bool,

    /// Active merge threshold.
    #[schema(example = 60)]
    pub merge_threshold_secs: u32,

    /// Active retention window.
    #[schema(example = 28)]
    pub retention_days: u32,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns basic service status information. Use this endpoint \
        for load balancer health checks and monitoring.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let ingest_open = !state.ingest.is_closed();

    Json(HealthResponse {
        status: if ingest_open { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ingest_open,
        merge_threshold_secs: state.config.aggregation.merge_threshold_secs,
        retention_days: state.config.retention.days,
    })
}
