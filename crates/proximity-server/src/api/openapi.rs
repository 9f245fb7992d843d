//! OpenAPI specification generation for the proximity API.
//!
//! The document is served at `/api/openapi.json`, browsable through Swagger UI
//! at `/swagger-ui`, and written to disk by the `gen-openapi` binary.

use axum::Json;
use proximity_core::{ContactEvent, EventId, RecordKind, RecordOutcome, StoredEvent};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::events::{PeerEventsResponse, RecordEventRequest};
use super::health::HealthResponse;
use super::readings::{SubmitReadingRequest, SubmitReadingResponse};
use super::retention::SweepResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for proximity.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "proximity API",
        version = "0.1.0",
        description = r#"
# proximity API

Coalesces radio proximity readings into contact events: contiguous,
non-overlapping sessions of proximity to one peer.

## Overview

1. **Readings**: single RSSI samples are queued per peer and recorded in the background
2. **Events**: batches are merged into the closest stored session within the merge threshold
3. **Retention**: sessions older than the retention window are deleted periodically

## Session rules

- Samples within a session are strictly ordered by timestamp; late readings are spliced in place
- A session's duration is the whole-second span between its first and last sample
- A session built from a single reading keeps the dwell time it was given
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local proximity server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "ingest", description = "Asynchronous reading ingest"),
        (name = "events", description = "Contact session recording and lookup"),
        (name = "retention", description = "Expiry of old sessions")
    ),
    paths(
        super::health::health_check,
        super::readings::submit_reading,
        super::events::record_event,
        super::events::list_peer_events,
        super::retention::sweep,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            SubmitReadingRequest,
            SubmitReadingResponse,
            RecordEventRequest,
            PeerEventsResponse,
            SweepResponse,
            ContactEvent,
            StoredEvent,
            EventId,
            RecordKind,
            RecordOutcome,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "proximity API");
        assert!(spec.paths.paths.contains_key("/api/peers/{peer_id}/events"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"proximity API\""));
    }
}
