//! DTO definitions used by the admin REST API and documentation layer.

use std::time::SystemTime;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::MemberId,
    dto::format_system_time,
    services::tracker::SessionReport,
    state::registry::Session,
};

/// Projection of an open session for operators.
#[derive(Debug, Serialize, ToSchema)]
pub struct TrackedSessionItem {
    #[schema(value_type = u64)]
    pub member_id: MemberId,
    pub session_id: Uuid,
    pub started_at: String,
    pub last_checkpoint: String,
    /// Whole seconds accrued since the last successful flush.
    pub unflushed_seconds: u64,
}

impl TrackedSessionItem {
    pub fn new(session: &Session, now: SystemTime) -> Self {
        Self {
            member_id: session.member_id,
            session_id: session.id,
            started_at: format_system_time(session.started_at),
            last_checkpoint: format_system_time(session.last_checkpoint),
            unflushed_seconds: session.pending(now).as_secs(),
        }
    }
}

/// Outcome of a bulk flush, drain or shutdown.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionReportResponse {
    pub sessions_closed: usize,
    pub records_written: usize,
    pub seconds_flushed: u64,
    pub failures: usize,
}

impl From<SessionReport> for SessionReportResponse {
    fn from(report: SessionReport) -> Self {
        Self {
            sessions_closed: report.sessions_closed,
            records_written: report.records_written,
            seconds_flushed: report.seconds_flushed,
            failures: report.failures,
        }
    }
}
