//! DTOs for the per-member totals query.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::{
    dao::models::{MemberId, MemberTotalEntity, TimeRange},
    dto::{
        parse_system_time,
        validation::{validate_rfc3339, validate_window},
    },
};

/// Optional half-open `[from, to)` window applied to record start times.
#[derive(Debug, Default, Deserialize, IntoParams, Validate)]
#[validate(schema(function = "validate_query_window"))]
#[into_params(parameter_in = Query)]
pub struct MemberTotalQuery {
    /// Inclusive lower bound (RFC 3339).
    #[validate(custom(function = "validate_rfc3339"))]
    pub from: Option<String>,
    /// Exclusive upper bound (RFC 3339).
    #[validate(custom(function = "validate_rfc3339"))]
    pub to: Option<String>,
}

fn validate_query_window(query: &MemberTotalQuery) -> Result<(), ValidationError> {
    validate_window(query.from.as_deref(), query.to.as_deref())
}

impl MemberTotalQuery {
    /// Convert the validated bounds into a store-level range.
    pub fn range(&self) -> TimeRange {
        TimeRange {
            from: self.from.as_deref().and_then(parse_system_time),
            to: self.to.as_deref().and_then(parse_system_time),
        }
    }
}

/// Persisted voice time for a member over the requested window.
#[derive(Debug, Serialize, ToSchema)]
pub struct MemberTotalResponse {
    #[schema(value_type = u64)]
    pub member_id: MemberId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub total_seconds: u64,
    pub record_count: u64,
}

impl MemberTotalResponse {
    pub fn new(query: MemberTotalQuery, total: MemberTotalEntity) -> Self {
        Self {
            member_id: total.member_id,
            from: query.from,
            to: query.to,
            total_seconds: total.total_seconds,
            record_count: total.record_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn empty_query_is_unbounded() {
        let query = MemberTotalQuery::default();
        assert!(query.validate().is_ok());
        assert_eq!(query.range(), TimeRange::default());
    }

    #[test]
    fn bounds_are_parsed_into_the_range() {
        let query = MemberTotalQuery {
            from: Some("1970-01-01T00:01:40Z".into()),
            to: None,
        };
        assert!(query.validate().is_ok());
        assert_eq!(
            query.range().from,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(100))
        );
    }

    #[test]
    fn malformed_or_inverted_bounds_are_rejected() {
        let malformed = MemberTotalQuery {
            from: Some("last week".into()),
            to: None,
        };
        assert!(malformed.validate().is_err());

        let inverted = MemberTotalQuery {
            from: Some("2024-05-02T00:00:00Z".into()),
            to: Some("2024-05-01T00:00:00Z".into()),
        };
        assert!(inverted.validate().is_err());
    }
}
