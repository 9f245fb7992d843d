//! Contact event API endpoints.
//!
//! Batches of readings are recorded synchronously so the caller learns
//! whether a session was created or extended. Stored sessions can be listed
//! per peer.

use axum::extract::{Path, State};
use axum::Json;
use proximity_core::{ContactEvent, PeerId, ProximityError, RecordOutcome, StoredEvent};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A batch of readings for one peer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "peer_id": "04330a56-ad45-4b0f-81ee-dd414910e1f5",
    "rssi_values": [-60, -58],
    "rssi_timestamps": [2000, 3000],
    "duration": 60
}))]
pub struct RecordEventRequest {
    /// Peer identifier as a hyphenated UUID.
    pub peer_id: String,

    /// Signal strength samples in dBm.
    pub rssi_values: Vec<i16>,

    /// Sample times in epoch milliseconds, strictly ascending.
    pub rssi_timestamps: Vec<i64>,

    /// Dwell time in seconds; only used when the batch has a single sample.
    #[serde(default)]
    pub duration: u64,
}

/// All stored sessions for a peer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeerEventsResponse {
    /// Peer identifier.
    #[schema(example = "04330a56-ad45-4b0f-81ee-dd414910e1f5")]
    pub peer_id: String,

    /// Sessions, earliest first.
    pub events: Vec<StoredEvent>,

    /// Sum of session durations in seconds.
    #[schema(example = 61)]
    pub total_duration_secs: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Record a batch of readings.
#[utoipa::path(
    post,
    path = "/api/events",
    tag = "events",
    operation_id = "recordEvent",
    summary = "Record a batch of readings",
    description = "Merges the batch into the closest stored session for the peer \
        when it lies within the merge threshold, otherwise stores it as a new \
        session. Returns the session as stored.",
    request_body = RecordEventRequest,
    responses(
        (status = 200, description = "Batch recorded", body = RecordOutcome),
        (status = 400, description = "Malformed batch or peer identifier", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Batch overlaps several stored sessions", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn record_event(
    State(state): State<SharedState>,
    Json(request): Json<RecordEventRequest>,
) -> ApiResult<Json<RecordOutcome>> {
    let peer_id: PeerId = request.peer_id.parse()?;
    let event = ContactEvent::new(
        peer_id,
        request.rssi_values,
        request.rssi_timestamps,
        request.duration,
    )
    .map_err(ProximityError::from)?;

    let outcome = state.recorder.record_event(event).await?;
    Ok(Json(outcome))
}

/// List stored sessions for a peer.
#[utoipa::path(
    get,
    path = "/api/peers/{peer_id}/events",
    tag = "events",
    operation_id = "listPeerEvents",
    summary = "List sessions for a peer",
    params(
        ("peer_id" = String, Path, description = "Peer identifier as a hyphenated UUID")
    ),
    responses(
        (status = 200, description = "Sessions retrieved", body = PeerEventsResponse),
        (status = 400, description = "Invalid peer identifier", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn list_peer_events(
    State(state): State<SharedState>,
    Path(peer_id): Path<String>,
) -> ApiResult<Json<PeerEventsResponse>> {
    let peer_id: PeerId = peer_id.parse()?;
    let events = state.recorder.events_for_peer(&peer_id).await?;
    let total_duration_secs = events.iter().map(|stored| stored.event.duration).sum();

    Ok(Json(PeerEventsResponse {
        peer_id: peer_id.to_string(),
        events,
        total_duration_secs,
    }))
}
