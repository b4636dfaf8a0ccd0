use serde::{Deserialize, Serialize};
use std::{
    fmt,
    num::ParseIntError,
    str::FromStr,
    time::{Duration, SystemTime},
};
use uuid::Uuid;

/// Stable identity of a tracked community member (a 64-bit snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemberId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(MemberId)
    }
}

impl From<u64> for MemberId {
    fn from(value: u64) -> Self {
        MemberId(value)
    }
}

/// Identifier of a voice channel as reported by the presence feed.
pub type ChannelId = u64;

/// One append-only row describing a persisted slice of a voice session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecordEntity {
    /// Record identifier, fixed before the first write attempt so retries are idempotent.
    pub id: Uuid,
    /// Member the slice belongs to.
    pub member_id: MemberId,
    /// Start of the persisted slice (the session checkpoint at flush time).
    pub start_time: SystemTime,
    /// End of the persisted slice, always `start_time + duration_seconds`.
    pub end_time: SystemTime,
    /// Whole seconds covered by the slice, never zero.
    pub duration_seconds: u64,
}

impl SessionRecordEntity {
    /// Build a record covering `duration_seconds` whole seconds from `start_time`.
    pub fn new(member_id: MemberId, start_time: SystemTime, duration_seconds: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            start_time,
            end_time: start_time + Duration::from_secs(duration_seconds),
            duration_seconds,
        }
    }
}

/// Half-open `[from, to)` window applied to record start times; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<SystemTime>,
    pub to: Option<SystemTime>,
}

impl TimeRange {
    /// Whether `instant` falls inside the window.
    pub fn contains(&self, instant: SystemTime) -> bool {
        self.from.is_none_or(|from| instant >= from) && self.to.is_none_or(|to| instant < to)
    }
}

/// Aggregated time for a member over a [`TimeRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberTotalEntity {
    pub member_id: MemberId,
    pub total_seconds: u64,
    pub record_count: u64,
}
