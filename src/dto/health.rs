use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of sessions currently being tracked.
    pub open_sessions: usize,
    /// Number of presence feeds currently connected.
    pub feeds: usize,
}

impl HealthResponse {
    /// Create a health response indicating the store is reachable.
    pub fn ok(open_sessions: usize, feeds: usize) -> Self {
        Self {
            status: "ok".to_string(),
            open_sessions,
            feeds,
        }
    }

    /// Create a health response indicating the store is currently unreachable.
    pub fn degraded(open_sessions: usize, feeds: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            open_sessions,
            feeds,
        }
    }
}
