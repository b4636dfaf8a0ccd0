use mongodb::bson::{self, Bson, DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::dao::models::{MemberId, SessionRecordEntity, TimeRange};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionRecordDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    member_id: String,
    start_time: DateTime,
    end_time: DateTime,
    duration_seconds: i64,
}

impl From<SessionRecordEntity> for MongoSessionRecordDocument {
    fn from(value: SessionRecordEntity) -> Self {
        Self {
            id: bson::Uuid::from_bytes(value.id.into_bytes()),
            member_id: value.member_id.to_string(),
            start_time: DateTime::from_system_time(value.start_time),
            end_time: DateTime::from_system_time(value.end_time),
            duration_seconds: i64::try_from(value.duration_seconds).unwrap_or(i64::MAX),
        }
    }
}

impl MongoSessionRecordDocument {
    pub fn id(&self) -> bson::Uuid {
        self.id
    }
}

pub fn doc_id(id: bson::Uuid) -> Document {
    doc! {"_id": id}
}

/// `$match` stage selecting one member's records whose start falls in `range`.
pub fn member_range_filter(member_id: MemberId, range: TimeRange) -> Document {
    let mut filter = doc! {"member_id": member_id.to_string()};
    let mut start = Document::new();
    if let Some(from) = range.from {
        start.insert("$gte", DateTime::from_system_time(from));
    }
    if let Some(to) = range.to {
        start.insert("$lt", DateTime::from_system_time(to));
    }
    if !start.is_empty() {
        filter.insert("start_time", start);
    }
    filter
}

/// Read a numeric `$sum` accumulator regardless of the integer width Mongo picked.
pub fn accumulator_as_u64(value: Option<&Bson>) -> Result<u64, String> {
    match value {
        None | Some(Bson::Null) => Ok(0),
        Some(Bson::Int32(v)) => u64::try_from(*v).map_err(|err| err.to_string()),
        Some(Bson::Int64(v)) => u64::try_from(*v).map_err(|err| err.to_string()),
        Some(Bson::Double(v)) if *v >= 0.0 => Ok(*v as u64),
        Some(other) => Err(format!("unexpected accumulator value {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn open_range_only_matches_member() {
        let filter = member_range_filter(MemberId(42), TimeRange::default());
        assert_eq!(filter, doc! {"member_id": "42"});
    }

    #[test]
    fn bounded_range_adds_start_time_clause() {
        let from = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let filter = member_range_filter(
            MemberId(42),
            TimeRange {
                from: Some(from),
                to: None,
            },
        );
        assert_eq!(
            filter,
            doc! {
                "member_id": "42",
                "start_time": {"$gte": DateTime::from_system_time(from)},
            }
        );
    }

    #[test]
    fn accumulator_accepts_any_integer_width() {
        assert_eq!(accumulator_as_u64(None), Ok(0));
        assert_eq!(accumulator_as_u64(Some(&Bson::Int32(12))), Ok(12));
        assert_eq!(accumulator_as_u64(Some(&Bson::Int64(3_600))), Ok(3_600));
        assert!(accumulator_as_u64(Some(&Bson::Int64(-1))).is_err());
        assert!(accumulator_as_u64(Some(&Bson::String("x".into()))).is_err());
    }

    #[test]
    fn document_keeps_record_identity() {
        let record = SessionRecordEntity::new(
            MemberId(9),
            SystemTime::UNIX_EPOCH + Duration::from_secs(60),
            5,
        );
        let document = MongoSessionRecordDocument::from(record.clone());
        assert_eq!(document.id().bytes(), record.id.into_bytes());
        assert_eq!(document.member_id, "9");
        assert_eq!(document.duration_seconds, 5);
    }
}
