use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod admin;
pub mod health;
pub mod presence;
pub mod sse;
pub mod stats;
pub mod validation;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

pub(crate) fn parse_system_time(raw: &str) -> Option<SystemTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok().map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn rfc3339_round_trips_through_system_time() {
        let instant = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let formatted = format_system_time(instant);
        assert_eq!(formatted, "2023-11-14T22:13:20Z");
        assert_eq!(parse_system_time(&formatted), Some(instant));
    }

    #[test]
    fn parse_rejects_garbage_and_honours_offsets() {
        assert_eq!(parse_system_time("yesterday"), None);
        assert_eq!(
            parse_system_time("2023-11-14T23:13:20+01:00"),
            parse_system_time("2023-11-14T22:13:20Z")
        );
    }
}
