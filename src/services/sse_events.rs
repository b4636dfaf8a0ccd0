use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::SessionRecordEntity,
    dto::{
        format_system_time,
        sse::{
            ServerEvent, SessionClosedEvent, SessionFlushedEvent, SessionOpenedEvent,
            SystemStatus,
        },
    },
    services::tracker::ClosedSession,
    state::{
        registry::{Session, SessionId},
        sse::SseHub,
    },
};

const EVENT_SESSION_OPENED: &str = "session.opened";
const EVENT_SESSION_FLUSHED: &str = "session.flushed";
const EVENT_SESSION_CLOSED: &str = "session.closed";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast that a member started a new session.
pub fn broadcast_session_opened(hub: &SseHub, session: &Session) {
    let payload = SessionOpenedEvent {
        member_id: session.member_id,
        session_id: session.id,
        started_at: format_system_time(session.started_at),
    };
    send_event(hub, EVENT_SESSION_OPENED, &payload);
}

/// Broadcast that a slice of a session has been persisted.
pub fn broadcast_session_flushed(hub: &SseHub, session_id: SessionId, record: &SessionRecordEntity) {
    let payload = SessionFlushedEvent {
        member_id: record.member_id,
        session_id,
        record_id: record.id,
        start_time: format_system_time(record.start_time),
        end_time: format_system_time(record.end_time),
        duration_seconds: record.duration_seconds,
    };
    send_event(hub, EVENT_SESSION_FLUSHED, &payload);
}

/// Broadcast that a session has been removed from the registry.
pub fn broadcast_session_closed(hub: &SseHub, closed: &ClosedSession) {
    let payload = SessionClosedEvent {
        member_id: closed.session.member_id,
        session_id: closed.session.id,
        reason: closed.reason,
        final_seconds: closed.seconds_flushed,
        lost_seconds: closed.lost_seconds,
    };
    send_event(hub, EVENT_SESSION_CLOSED, &payload);
}

/// Broadcast a storage availability change.
pub fn broadcast_system_status(hub: &SseHub, degraded: bool) {
    send_event(hub, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

fn send_event(hub: &SseHub, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::dao::models::MemberId;

    #[test]
    fn flushed_event_carries_the_record_window() {
        let hub = SseHub::new(4);
        let mut receiver = hub.subscribe();
        let record = SessionRecordEntity::new(
            MemberId(5),
            SystemTime::UNIX_EPOCH + Duration::from_secs(60),
            60,
        );

        broadcast_session_flushed(&hub, uuid::Uuid::nil(), &record);

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_SESSION_FLUSHED));
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["member_id"], 5);
        assert_eq!(data["start_time"], "1970-01-01T00:01:00Z");
        assert_eq!(data["end_time"], "1970-01-01T00:02:00Z");
        assert_eq!(data["duration_seconds"], 60);
    }
}
