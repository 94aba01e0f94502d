//! Data points
//!
//! A stored sample is `(value, timestamp, quality)`. On the wire it travels
//! as a JSON array in that order.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ModelError, Result};
use crate::time::parse_timestamp;
use crate::types::{TagValue, ValueType};

/// One sample of a tag
///
/// `timestamp` is microseconds since the Unix epoch. `value == None` is a
/// stored null and marks a gap in the series. `quality == None` means good.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub value: Option<TagValue>,
    pub timestamp: i64,
    pub quality: Option<i32>,
}

impl DataPoint {
    pub fn new(value: Option<TagValue>, timestamp: i64, quality: Option<i32>) -> Self {
        Self {
            value,
            timestamp,
            quality,
        }
    }

    /// Point with a value and good quality
    pub fn good(value: impl Into<TagValue>, timestamp: i64) -> Self {
        Self::new(Some(value.into()), timestamp, None)
    }

    /// Null point (gap marker or "no data")
    pub fn null(timestamp: i64) -> Self {
        Self::new(None, timestamp, None)
    }

    /// Same value and quality, moved to another timestamp
    pub fn at(&self, timestamp: i64) -> Self {
        Self {
            value: self.value.clone(),
            timestamp,
            quality: self.quality,
        }
    }

    /// Numeric value, `None` for nulls and non-numeric values
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(TagValue::as_f64)
    }
}

impl Serialize for DataPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (&self.value, self.timestamp, self.quality).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (value, timestamp, quality) =
            <(Option<TagValue>, i64, Option<i32>)>::deserialize(deserializer)?;
        Ok(Self {
            value,
            timestamp,
            quality,
        })
    }
}

// ============================================================================
// Upload wire form
// ============================================================================

/// A point as sent by a connector
///
/// Accepts arrays of one to three elements: `[value]`, `[value, x]` or
/// `[value, x, q]`. `x` may be integer microseconds or a date-time string.
/// The value is kept raw until the tag's type is known.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPoint {
    pub value: Value,
    pub timestamp: Option<i64>,
    pub quality: Option<i32>,
}

impl UploadPoint {
    /// Resolve against the tag's value type; missing timestamps become `now`
    pub fn resolve(&self, value_type: ValueType, now: i64) -> Result<DataPoint> {
        let value = if self.value.is_null() {
            None
        } else {
            let coerced = value_type.coerce(&self.value).ok_or_else(|| {
                ModelError::InvalidPoint(format!(
                    "value {} does not fit type {}",
                    self.value, value_type
                ))
            })?;
            Some(coerced)
        };
        Ok(DataPoint {
            value,
            timestamp: self.timestamp.unwrap_or(now),
            quality: self.quality,
        })
    }
}

impl<'de> Deserialize<'de> for UploadPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let items = Vec::<Value>::deserialize(deserializer)?;
        if items.is_empty() || items.len() > 3 {
            return Err(D::Error::custom(format!(
                "data point must have 1 to 3 elements, got {}",
                items.len()
            )));
        }
        let mut items = items.into_iter();
        let value = items.next().unwrap_or(Value::Null);
        let timestamp = match items.next() {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_timestamp(&raw).map_err(D::Error::custom)?),
        };
        let quality = match items.next() {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_i64()
                    .and_then(|q| i32::try_from(q).ok())
                    .ok_or_else(|| D::Error::custom(format!("invalid quality: {n}")))?,
            ),
            Some(other) => return Err(D::Error::custom(format!("invalid quality: {other}"))),
        };
        Ok(Self {
            value,
            timestamp,
            quality,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_point_serializes_as_tuple() {
        let point = DataPoint::new(Some(TagValue::Double(1.5)), 100, Some(192));
        assert_eq!(serde_json::to_value(&point).unwrap(), json!([1.5, 100, 192]));

        let null = DataPoint::null(7);
        assert_eq!(serde_json::to_value(&null).unwrap(), json!([null, 7, null]));
    }

    #[test]
    fn test_data_point_deserialize() {
        let point: DataPoint = serde_json::from_value(json!(["on", 5, null])).unwrap();
        assert_eq!(point, DataPoint::new(Some(TagValue::Str("on".into())), 5, None));
    }

    #[test]
    fn test_upload_point_short_forms() {
        let only_value: UploadPoint = serde_json::from_value(json!([3])).unwrap();
        assert_eq!(only_value.timestamp, None);
        assert_eq!(only_value.quality, None);

        let with_time: UploadPoint = serde_json::from_value(json!([3, 1000])).unwrap();
        assert_eq!(with_time.timestamp, Some(1000));

        let full: UploadPoint = serde_json::from_value(json!([3, 1000, 0])).unwrap();
        assert_eq!(full.quality, Some(0));
    }

    #[test]
    fn test_upload_point_rejects_bad_shapes() {
        assert!(serde_json::from_value::<UploadPoint>(json!([])).is_err());
        assert!(serde_json::from_value::<UploadPoint>(json!([1, 2, 3, 4])).is_err());
        assert!(serde_json::from_value::<UploadPoint>(json!([1, 2, "bad"])).is_err());
    }

    #[test]
    fn test_upload_point_string_timestamp() {
        let point: UploadPoint =
            serde_json::from_value(json!([1, "1970-01-01T00:00:01Z"])).unwrap();
        assert_eq!(point.timestamp, Some(1_000_000));
    }

    #[test]
    fn test_resolve_fills_now_and_coerces() {
        let point: UploadPoint = serde_json::from_value(json!([7.0])).unwrap();
        let resolved = point.resolve(ValueType::Int, 42).unwrap();
        assert_eq!(resolved, DataPoint::new(Some(TagValue::Int(7)), 42, None));

        let null: UploadPoint = serde_json::from_value(json!([null, 5])).unwrap();
        assert_eq!(null.resolve(ValueType::Int, 42).unwrap(), DataPoint::null(5));

        let wrong: UploadPoint = serde_json::from_value(json!(["x", 5])).unwrap();
        assert!(wrong.resolve(ValueType::Double, 42).is_err());
    }
}
