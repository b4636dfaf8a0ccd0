//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::dto::parse_system_time;

/// Validates that a query bound is an RFC 3339 timestamp.
///
/// # Examples
///
/// ```ignore
/// validate_rfc3339("2024-05-01T00:00:00Z")      // Ok
/// validate_rfc3339("2024-05-01T02:00:00+02:00") // Ok
/// validate_rfc3339("2024-05-01")                // Err - no time component
/// ```
pub fn validate_rfc3339(raw: &str) -> Result<(), ValidationError> {
    if parse_system_time(raw).is_some() {
        return Ok(());
    }
    let mut err = ValidationError::new("rfc3339");
    err.message = Some(format!("`{raw}` is not an RFC 3339 timestamp").into());
    Err(err)
}

/// Validates that an optional `[from, to)` window is not inverted.
pub fn validate_window(from: Option<&str>, to: Option<&str>) -> Result<(), ValidationError> {
    let (Some(from), Some(to)) = (
        from.and_then(parse_system_time),
        to.and_then(parse_system_time),
    ) else {
        return Ok(());
    };

    if from > to {
        let mut err = ValidationError::new("window_order");
        err.message = Some("`from` must not be later than `to`".into());
        return Err(err);
    }
    Ok(())
}
