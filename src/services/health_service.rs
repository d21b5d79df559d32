use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the battle store and report the service health.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let channels = state.hub().channel_count();
    match state.store().health_check().await {
        Ok(()) => HealthResponse::ok(channels),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded(channels)
        }
    }
}
