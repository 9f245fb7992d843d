//! Retention API endpoint.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Result of a manual retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "deleted": 3,
    "cutoff_utc": "2025-03-01T12:00:00+00:00",
    "swept_at_utc": "2025-03-29T12:00:00+00:00"
}))]
pub struct SweepResponse {
    /// Number of sessions deleted.
    pub deleted: usize,

    /// Sessions that ended before this instant were deleted.
    pub cutoff_utc: String,

    /// When the sweep ran.
    pub swept_at_utc: String,
}

/// Delete expired sessions now.
#[utoipa::path(
    post,
    path = "/api/retention/sweep",
    tag = "retention",
    operation_id = "sweepRetention",
    summary = "Run a retention sweep",
    description = "Deletes every session whose last sample is older than the \
        configured retention window. The same sweep also runs periodically.",
    responses(
        (status = 200, description = "Sweep completed", body = SweepResponse),
        (status = 500, description = "Event store failure", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn sweep(State(state): State<SharedState>) -> ApiResult<Json<SweepResponse>> {
    let now = Utc::now();
    let deleted = state.sweeper.sweep_at(now).await?;

    Ok(Json(SweepResponse {
        deleted,
        cutoff_utc: state.sweeper.cutoff(now).to_rfc3339(),
        swept_at_utc: now.to_rfc3339(),
    }))
}
