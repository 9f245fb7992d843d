//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `readings` - Asynchronous single-reading ingest
//! - `events` - Synchronous batch recording and per-peer lookup
//! - `retention` - Manual retention sweep
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod error;
pub mod events;
pub mod health;
pub mod openapi;
pub mod readings;
pub mod retention;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                        - Health check
/// /swagger-ui                    - Swagger UI
/// /api
/// ├── /readings                  - Queue a single reading
/// ├── /events                    - Record a batch of readings
/// ├── /peers/{peer_id}/events    - Sessions for a peer
/// ├── /retention/sweep           - Delete expired sessions now
/// └── /openapi.json              - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/readings", post(readings::submit_reading))
                .route("/events", post(events::record_event))
                .route("/peers/{peer_id}/events", get(events::list_peer_events))
                .route("/retention/sweep", post(retention::sweep))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use proximity_core::{ProximityConfig, RecordKind, RecordOutcome};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::api::events::PeerEventsResponse;
    use crate::api::health::HealthResponse;
    use crate::api::retention::SweepResponse;
    use crate::state::AppState;

    const PEER: &str = "04330a56-ad45-4b0f-81ee-dd414910e1f5";

    fn server(dir: &TempDir) -> TestServer {
        let mut config = ProximityConfig::default();
        config.storage.data_dir = Some(dir.path().to_path_buf());
        let (state, _ingest) = AppState::new(config);
        TestServer::new(create_router(Arc::new(state))).unwrap()
    }

    async fn peer_events(server: &TestServer) -> PeerEventsResponse {
        server
            .get(&format!("/api/peers/{PEER}/events"))
            .await
            .json::<PeerEventsResponse>()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let response = server.get("/health").await;
        response.assert_status_ok();
        let health = response.json::<HealthResponse>();
        assert_eq!(health.status, "ok");
        assert!(health.ingest_open);
        assert_eq!(health.merge_threshold_secs, 60);
    }

    #[tokio::test]
    async fn test_batches_merge_into_one_session() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let first = server
            .post("/api/events")
            .json(&json!({
                "peer_id": PEER,
                "rssi_values": [1, 2, 3],
                "rssi_timestamps": [2000, 3000, 63000],
                "duration": 0
            }))
            .await;
        first.assert_status_ok();
        let first = first.json::<RecordOutcome>();
        assert_eq!(first.kind, RecordKind::Created);
        assert_eq!(first.event.event.duration, 61);

        let second = server
            .post("/api/events")
            .json(&json!({
                "peer_id": PEER,
                "rssi_values": [4],
                "rssi_timestamps": [4000],
                "duration": 60
            }))
            .await
            .json::<RecordOutcome>();
        assert_eq!(second.kind, RecordKind::Extended);
        assert_eq!(second.event.id, first.event.id);
        assert_eq!(second.event.event.rssi_values, vec![1, 2, 4, 3]);
        assert_eq!(second.event.event.rssi_timestamps, vec![2000, 3000, 4000, 63_000]);

        let listed = peer_events(&server).await;
        assert_eq!(listed.events.len(), 1);
        assert_eq!(listed.total_duration_secs, 61);
    }

    #[tokio::test]
    async fn test_malformed_batch_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let response = server
            .post("/api/events")
            .json(&json!({
                "peer_id": PEER,
                "rssi_values": [1, 2],
                "rssi_timestamps": [3000, 2000]
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body = response.json::<ErrorResponse>();
        assert_eq!(body.error, "invalid_event");
    }

    #[tokio::test]
    async fn test_invalid_peer_id_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let response = server.get("/api/peers/not-a-peer/events").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<ErrorResponse>().error, "invalid_peer_id");
    }

    #[tokio::test]
    async fn test_queued_readings_are_recorded() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        for timestamp in [10_000, 5000, 20_000] {
            server
                .post("/api/readings")
                .json(&json!({ "peer_id": PEER, "rssi": -65, "timestamp": timestamp }))
                .await
                .assert_status(StatusCode::ACCEPTED);
        }

        let mut listed = peer_events(&server).await;
        for _ in 0..100 {
            if listed.events.first().map(|stored| stored.event.len()) == Some(3) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            listed = peer_events(&server).await;
        }
        assert_eq!(listed.events.len(), 1);
        assert_eq!(listed.events[0].event.rssi_timestamps, vec![5000, 10_000, 20_000]);
        assert_eq!(listed.events[0].event.duration, 15);
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired_sessions() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        server
            .post("/api/events")
            .json(&json!({
                "peer_id": PEER,
                "rssi_values": [1],
                "rssi_timestamps": [1000],
                "duration": 60
            }))
            .await
            .assert_status_ok();

        let response = server.post("/api/retention/sweep").await;
        response.assert_status_ok();
        assert_eq!(response.json::<SweepResponse>().deleted, 1);
        assert!(peer_events(&server).await.events.is_empty());
    }

    #[tokio::test]
    async fn test_openapi_endpoint() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let response = server.get("/api/openapi.json").await;
        response.assert_status_ok();
        assert!(response.text().contains("proximity API"));
    }
}
