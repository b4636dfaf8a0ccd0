use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::MemberId;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the storage backend is currently unreachable.
    pub degraded: bool,
    /// Number of sessions open at subscription time.
    pub open_sessions: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Emitted when a member starts a new session.
pub struct SessionOpenedEvent {
    #[schema(value_type = u64)]
    pub member_id: MemberId,
    pub session_id: Uuid,
    /// RFC 3339 timestamp of the join.
    pub started_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Emitted after a slice of a session has been persisted.
pub struct SessionFlushedEvent {
    #[schema(value_type = u64)]
    pub member_id: MemberId,
    pub session_id: Uuid,
    pub record_id: Uuid,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
/// Why a session was terminated.
pub enum CloseReason {
    /// The member left every trackable channel.
    Leave,
    /// A second join arrived while the session was still open.
    DuplicateJoin,
    /// Every open session was closed by an operator or a lost presence feed.
    Drain,
    /// The process is stopping.
    Shutdown,
}

#[derive(Debug, Serialize, ToSchema)]
/// Emitted once a session has been removed from the registry.
pub struct SessionClosedEvent {
    #[schema(value_type = u64)]
    pub member_id: MemberId,
    pub session_id: Uuid,
    pub reason: CloseReason,
    /// Seconds persisted by the final flush.
    pub final_seconds: u64,
    /// Seconds that could not be persisted and were dropped with the session.
    pub lost_seconds: u64,
}
