use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::queue::{Lane, LaneCounts};
use crate::ApiResponse;

/// Per-lane queue depths, keyed by lane name.
#[derive(Debug, Serialize)]
pub struct JobsStatusResponse {
    pub lanes: BTreeMap<String, LaneCounts>,
}

/// Queue depth snapshot across all lanes. Unauthenticated; meant for
/// operational probes rather than merchants.
async fn jobs_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<JobsStatusResponse>>, ServiceError> {
    let mut lanes = BTreeMap::new();
    for lane in Lane::ALL {
        let counts = state.queue.counts(lane).await?;
        lanes.insert(lane.as_str().to_string(), counts);
    }
    Ok(Json(ApiResponse::success(JobsStatusResponse { lanes })))
}

/// Job queue introspection routes
pub fn job_routes() -> Router<AppState> {
    Router::new().route("/status", get(jobs_status))
}
