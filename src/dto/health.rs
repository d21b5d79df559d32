//! Health check response payload.

use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of broadcast channels currently tracked.
    pub channels: usize,
}

impl HealthResponse {
    /// Health response indicating the battle store is reachable.
    pub fn ok(channels: usize) -> Self {
        Self {
            status: "ok".to_string(),
            channels,
        }
    }

    /// Health response indicating the battle store failed its probe.
    pub fn degraded(channels: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            channels,
        }
    }
}
