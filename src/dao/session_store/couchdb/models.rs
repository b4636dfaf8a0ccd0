use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{MemberId, SessionRecordEntity};

pub const SESSION_PREFIX: &str = "session::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[allow(dead_code)]
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub session: SessionBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBody {
    pub record_id: Uuid,
    pub member_id: MemberId,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub duration_seconds: u64,
}

impl From<SessionRecordEntity> for CouchSessionDocument {
    fn from(record: SessionRecordEntity) -> Self {
        Self {
            id: session_doc_id(record.member_id, record.id),
            rev: None,
            session: SessionBody {
                record_id: record.id,
                member_id: record.member_id,
                start_time: record.start_time,
                end_time: record.end_time,
                duration_seconds: record.duration_seconds,
            },
        }
    }
}

impl From<CouchSessionDocument> for SessionRecordEntity {
    fn from(doc: CouchSessionDocument) -> Self {
        Self {
            id: doc.session.record_id,
            member_id: doc.session.member_id,
            start_time: doc.session.start_time,
            end_time: doc.session.end_time,
            duration_seconds: doc.session.duration_seconds,
        }
    }
}

/// Documents are grouped per member so a prefix scan over `_all_docs` yields one history.
pub fn member_prefix(member_id: MemberId) -> String {
    format!("{}{}::", SESSION_PREFIX, member_id)
}

pub fn session_doc_id(member_id: MemberId, record_id: Uuid) -> String {
    format!("{}{}", member_prefix(member_id), record_id)
}
