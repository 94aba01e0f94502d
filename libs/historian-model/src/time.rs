//! Timestamp helpers
//!
//! Every timestamp in the historian is `i64` microseconds since the Unix
//! epoch. Strings are accepted at the edges and converted here.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{ModelError, Result};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a JSON timestamp: integer microseconds or a date-time string
///
/// Strings without an offset are taken as UTC.
pub fn parse_timestamp(raw: &Value) -> Result<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
            .ok_or_else(|| ModelError::InvalidTimestamp(n.to_string())),
        Value::String(s) => parse_timestamp_str(s),
        other => Err(ModelError::InvalidTimestamp(other.to_string())),
    }
}

fn parse_timestamp_str(s: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_micros());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_micros())
        .ok_or_else(|| ModelError::InvalidTimestamp(s.to_string()))
}

/// Render microseconds as an RFC 3339 string (UTC, microsecond precision)
pub fn format_timestamp(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_else(|| micros.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000_000_000_i64)), Ok(1_700_000_000_000_000));
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        assert_eq!(
            parse_timestamp(&json!("1970-01-01T01:00:00+01:00")),
            Ok(0)
        );
    }

    #[test]
    fn test_parse_naive_is_utc() {
        assert_eq!(
            parse_timestamp(&json!("1970-01-01 00:00:02.5")),
            Ok(2_500_000)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp(&json!("yesterday")).is_err());
        assert!(parse_timestamp(&json!(true)).is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_timestamp(1_500_000), "1970-01-01T00:00:01.500000Z");
    }
}
