//! Wire format spoken by the presence bridge on `/presence`.
//!
//! Snowflake ids are accepted either as JSON numbers or as decimal strings, since
//! bridges written in JavaScript cannot represent them losslessly as numbers.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use crate::dao::models::{ChannelId, MemberId};

/// Message received from a presence bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceMessage {
    /// A single member's voice state changed.
    VoiceState(VoiceStateUpdate),
    /// Full list of members currently in voice, sent after a (re)connect.
    Snapshot(PresenceSnapshot),
}

/// Voice state transition for one member.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceStateUpdate {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub member_id: MemberId,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub before: Option<ChannelId>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub after: Option<ChannelId>,
    #[serde(default)]
    pub bot: bool,
}

/// Members present in voice at the time the bridge took the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceSnapshot {
    pub members: Vec<VoicePresence>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoicePresence {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub member_id: MemberId,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub channel: ChannelId,
    #[serde(default)]
    pub bot: bool,
}

/// Message sent back to a presence bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceReply {
    /// Sent once after the socket is accepted.
    Ready { open_sessions: usize },
    /// A snapshot was reconciled against the tracked sessions.
    SnapshotAccepted { joining: usize, leaving: usize },
    /// The last frame could not be processed.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_state_accepts_numeric_and_string_ids() {
        let numeric: PresenceMessage = serde_json::from_str(
            r#"{"type":"voice_state","member_id":42,"before":null,"after":7,"bot":false}"#,
        )
        .unwrap();
        let textual: PresenceMessage = serde_json::from_str(
            r#"{"type":"voice_state","member_id":"42","after":"7"}"#,
        )
        .unwrap();

        let expected = PresenceMessage::VoiceState(VoiceStateUpdate {
            member_id: MemberId(42),
            before: None,
            after: Some(7),
            bot: false,
        });
        assert_eq!(numeric, expected);
        assert_eq!(textual, expected);
    }

    #[test]
    fn snapshot_lists_members_with_channels() {
        let message: PresenceMessage = serde_json::from_str(
            r#"{"type":"snapshot","members":[{"member_id":"1","channel":9},{"member_id":2,"channel":"9","bot":true}]}"#,
        )
        .unwrap();

        let PresenceMessage::Snapshot(snapshot) = message else {
            panic!("expected a snapshot");
        };
        assert_eq!(snapshot.members.len(), 2);
        assert!(snapshot.members[1].bot);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let parsed = serde_json::from_str::<PresenceMessage>(r#"{"type":"typing","member_id":1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn replies_are_tagged() {
        let reply = serde_json::to_value(PresenceReply::SnapshotAccepted {
            joining: 2,
            leaving: 1,
        })
        .unwrap();
        assert_eq!(
            reply,
            serde_json::json!({"type": "snapshot_accepted", "joining": 2, "leaving": 1})
        );
    }
}
