//! HTTP-date codec (RFC 7231 IMF-fixdate)
//!
//! `Upload-Expires` values are always rendered in UTC with second precision.
//! Sub-second components are truncated.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

/// `Sun, 06 Nov 1994 08:49:37 GMT`
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Render a timestamp as an HTTP-date
pub fn format_http_date(timestamp: DateTime<Utc>) -> String {
    truncate_to_second(timestamp)
        .format(HTTP_DATE_FORMAT)
        .to_string()
}

/// Parse an HTTP-date back into a UTC timestamp
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), HTTP_DATE_FORMAT)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Drop everything below one second
pub fn truncate_to_second(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}
