//! Directory entities: tags, alerts, storage locations, alarm records

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::types::{TagValue, ValueType};
use crate::validation::validate_location_name;

pub type TagId = String;
pub type AlertId = String;
pub type BackendId = String;

// ============================================================================
// Tag
// ============================================================================

/// Tag metadata as published by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: TagId,
    pub value_type: ValueType,
    /// Hold the value between samples instead of interpolating
    #[serde(default)]
    pub step: bool,
    /// A write at an existing timestamp replaces the stored value
    #[serde(default)]
    pub update: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Tag {
    /// Interpolation is linear only for numeric, non-step tags
    pub fn interpolates(&self) -> bool {
        !self.step && self.value_type.is_numeric()
    }
}

// ============================================================================
// Alert
// ============================================================================

/// Threshold alert attached to a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub tag_id: TagId,
    pub threshold: f64,
    /// Fire when `value >= threshold`; otherwise fire when `value < threshold`
    #[serde(default = "default_true")]
    pub direction_high: bool,
    #[serde(default)]
    pub auto_ack: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Alert {
    /// Whether `value` lies in the alarm region; non-numeric values never do
    pub fn in_alarm(&self, value: &TagValue) -> Option<bool> {
        let v = value.as_f64()?;
        Some(if self.direction_high {
            v >= self.threshold
        } else {
            v < self.threshold
        })
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Location
// ============================================================================

/// Per-tag (or per-alert) handle inside one backend: a table or metric name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Location(String);

impl Location {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_location_name(&name)?;
        Ok(Self(name))
    }

    /// `t_{tag_id}`
    pub fn default_for_tag(tag_id: &str) -> Result<Self> {
        Self::new(format!("t_{tag_id}"))
    }

    /// `a_{alert_id}`
    pub fn default_for_alert(alert_id: &str) -> Result<Self> {
        Self::new(format!("a_{alert_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Location {
    type Error = crate::error::ModelError;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl From<Location> for String {
    fn from(location: Location) -> String {
        location.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Alarm record
// ============================================================================

/// One persisted alarm episode: fired, optionally acked, optionally cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub id: i64,
    #[serde(rename = "x")]
    pub fired: i64,
    #[serde(rename = "cx")]
    pub acked: Option<i64>,
    #[serde(rename = "e")]
    pub off: Option<i64>,
}

impl AlarmRecord {
    /// Open records have not been cleared yet
    pub fn is_open(&self) -> bool {
        self.off.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_from_directory_yaml() {
        let yaml = "id: pump-1\nvalueType: 1\nstep: false\nupdate: true\n";
        let tag: Tag = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tag.value_type, ValueType::Double);
        assert!(tag.update);
        assert!(tag.active);
        assert!(tag.interpolates());
    }

    #[test]
    fn test_step_and_string_tags_do_not_interpolate() {
        let mut tag: Tag =
            serde_json::from_value(json!({"id": "t", "valueType": 0, "step": true})).unwrap();
        assert!(!tag.interpolates());
        tag.step = false;
        tag.value_type = ValueType::String;
        assert!(!tag.interpolates());
    }

    #[test]
    fn test_alert_regions() {
        let high: Alert =
            serde_json::from_value(json!({"id": "a", "tagId": "t", "threshold": 10.0})).unwrap();
        assert_eq!(high.in_alarm(&TagValue::Int(10)), Some(true));
        assert_eq!(high.in_alarm(&TagValue::Int(9)), Some(false));

        let low = Alert {
            direction_high: false,
            ..high
        };
        assert_eq!(low.in_alarm(&TagValue::Double(9.9)), Some(true));
        assert_eq!(low.in_alarm(&TagValue::Double(10.0)), Some(false));
        assert_eq!(low.in_alarm(&TagValue::Str("x".into())), None);
    }

    #[test]
    fn test_default_locations() {
        assert_eq!(Location::default_for_tag("abc-1").unwrap().as_str(), "t_abc-1");
        assert_eq!(Location::default_for_alert("9").unwrap().as_str(), "a_9");
        assert!(Location::default_for_tag("bad\"name").is_err());
    }

    #[test]
    fn test_location_serde_validates() {
        assert!(serde_json::from_value::<Location>(json!("t_ok")).is_ok());
        assert!(serde_json::from_value::<Location>(json!("drop table;")).is_err());
    }

    #[test]
    fn test_alarm_record_wire_names() {
        let record = AlarmRecord {
            id: 1,
            fired: 10,
            acked: None,
            off: None,
        };
        assert!(record.is_open());
        assert_eq!(
            serde_json::to_value(record).unwrap(),
            json!({"id": 1, "x": 10, "cx": null, "e": null})
        );
    }
}
