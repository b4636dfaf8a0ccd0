use tokio::time::timeout;
use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the store, logging connectivity issues, and report the degraded flag.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let probe = state.store().health_check();
    let outcome = match state.tracker().settings().retry.call_timeout {
        Some(limit) => timeout(limit, probe).await.ok(),
        None => Some(probe.await),
    };
    match outcome {
        Some(Ok(())) => {}
        Some(Err(err)) => warn!(error = %err, "storage health check failed"),
        None => warn!("storage health check timed out"),
    }

    let open_sessions = state.tracker().open_sessions();
    let feeds = state.feeds().connected();
    if state.is_degraded() {
        HealthResponse::degraded(open_sessions, feeds)
    } else {
        HealthResponse::ok(open_sessions, feeds)
    }
}
