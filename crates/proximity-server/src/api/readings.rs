//! Reading ingest API endpoints.
//!
//! Single readings from the radio layer are queued per peer and recorded in
//! the background, so the endpoint acknowledges with `202 Accepted`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use proximity_core::{PeerId, Reading};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A single reading to record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "peer_id": "04330a56-ad45-4b0f-81ee-dd414910e1f5",
    "rssi": -62,
    "timestamp": 1_700_000_000_000_i64
}))]
pub struct SubmitReadingRequest {
    /// Peer identifier as a hyphenated UUID.
    #[schema(example = "04330a56-ad45-4b0f-81ee-dd414910e1f5")]
    pub peer_id: String,

    /// Signal strength in dBm.
    #[schema(example = -62)]
    pub rssi: i16,

    /// When the sample was taken, epoch milliseconds.
    #[schema(example = 1_700_000_000_000_i64)]
    pub timestamp: i64,
}

/// Acknowledgement that a reading was queued.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "queued": true,
    "peer_id": "04330a56-ad45-4b0f-81ee-dd414910e1f5",
    "timestamp": 1_700_000_000_000_i64
}))]
pub struct SubmitReadingResponse {
    /// Always true; failures are reported as errors.
    pub queued: bool,

    /// Normalised peer identifier.
    pub peer_id: String,

    /// Timestamp of the queued reading.
    pub timestamp: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue a single reading.
#[utoipa::path(
    post,
    path = "/api/readings",
    tag = "ingest",
    operation_id = "submitReading",
    summary = "Queue a proximity reading",
    description = "Queues one RSSI sample for its peer. Readings for the same peer \
        are recorded strictly in submission order; readings for different peers \
        are recorded concurrently.",
    request_body = SubmitReadingRequest,
    responses(
        (status = 202, description = "Reading queued", body = SubmitReadingResponse),
        (status = 400, description = "Invalid peer identifier", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Ingest queue closed", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn submit_reading(
    State(state): State<SharedState>,
    Json(request): Json<SubmitReadingRequest>,
) -> ApiResult<(StatusCode, Json<SubmitReadingResponse>)> {
    let peer_id: PeerId = request.peer_id.parse()?;
    let reading = Reading {
        peer_id,
        rssi: request.rssi,
        timestamp: request.timestamp,
    };

    state.ingest.submit(reading).await?;
    debug!(peer = %peer_id, timestamp = reading.timestamp, "Queued reading");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitReadingResponse {
            queued: true,
            peer_id: peer_id.to_string(),
            timestamp: reading.timestamp,
        }),
    ))
}
