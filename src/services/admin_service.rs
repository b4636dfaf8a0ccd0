use tracing::info;

use crate::{
    dto::admin::{SessionReportResponse, TrackedSessionItem},
    state::SharedState,
};

/// List every open session with its unflushed time.
pub fn list_tracked(state: &SharedState) -> Vec<TrackedSessionItem> {
    let now = state.tracker().now();
    state
        .tracker()
        .tracked()
        .iter()
        .map(|session| TrackedSessionItem::new(session, now))
        .collect()
}

/// Flush every open session immediately.
pub async fn flush_all(state: &SharedState) -> SessionReportResponse {
    let report = state.tracker().flush_all().await;
    info!(
        records_written = report.records_written,
        seconds_flushed = report.seconds_flushed,
        failures = report.failures,
        "admin flush completed"
    );
    report.into()
}

/// Close every open session; new joins are still accepted.
pub async fn drain(state: &SharedState) -> SessionReportResponse {
    state.tracker().drain().await.into()
}
