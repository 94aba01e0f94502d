//! Core value types
//!
//! `ValueType` is a closed union: adding a variant makes every `match` over
//! it fail to compile until the new type is handled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{ModelError, Result};

// ============================================================================
// Value Type
// ============================================================================

/// Physical type of a tag's values
///
/// Wire codes: `Int = 0`, `Double = 1`, `String = 2`, `Json = 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ValueType {
    Int,
    Double,
    String,
    Json,
}

impl ValueType {
    /// Wire code
    pub fn code(self) -> u8 {
        match self {
            ValueType::Int => 0,
            ValueType::Double => 1,
            ValueType::String => 2,
            ValueType::Json => 4,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ValueType::Int),
            1 => Ok(ValueType::Double),
            2 => Ok(ValueType::String),
            4 => Ok(ValueType::Json),
            other => Err(ModelError::UnknownValueType(other)),
        }
    }

    /// Whether values of this type can be linearly interpolated
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Double)
    }

    /// Convert an incoming JSON value into this type
    ///
    /// Returns `None` when the value does not fit. `null` is handled by the
    /// caller (it is a legal stored value for every type).
    pub fn coerce(self, value: &Value) -> Option<TagValue> {
        match self {
            ValueType::Int => match value {
                Value::Number(n) => n.as_i64().map(TagValue::Int).or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.is_finite())
                        .map(|f| TagValue::Int(f as i64))
                }),
                _ => None,
            },
            ValueType::Double => value.as_f64().map(TagValue::Double),
            ValueType::String => value.as_str().map(|s| TagValue::Str(s.to_string())),
            ValueType::Json => Some(TagValue::Json(value.clone())),
        }
    }

    /// Wrap an interpolated number, rounding for integer tags
    ///
    /// Non-numeric types never reach this path; they get `Double` as a
    /// fallback so the call stays total.
    pub fn from_interpolated(self, y: f64) -> TagValue {
        match self {
            ValueType::Int => TagValue::Int(y.round() as i64),
            ValueType::Double | ValueType::String | ValueType::Json => TagValue::Double(y),
        }
    }
}

impl TryFrom<u8> for ValueType {
    type Error = ModelError;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code)
    }
}

impl From<ValueType> for u8 {
    fn from(value_type: ValueType) -> u8 {
        value_type.code()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Json => "json",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Tag Value
// ============================================================================

/// A typed, non-null tag value
///
/// Serializes to the bare JSON value (`12`, `1.5`, `"on"`, `{...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Int(i64),
    Double(f64),
    Str(String),
    Json(Value),
}

impl TagValue {
    /// Numeric view, `None` for strings and json
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Int(v) => Some(*v as f64),
            TagValue::Double(v) => Some(*v),
            TagValue::Str(_) | TagValue::Json(_) => None,
        }
    }

    /// Convert back to a JSON value
    pub fn to_json(&self) -> Value {
        match self {
            TagValue::Int(v) => Value::from(*v),
            TagValue::Double(v) => Value::from(*v),
            TagValue::Str(s) => Value::String(s.clone()),
            TagValue::Json(v) => v.clone(),
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Double(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

// ============================================================================
// Value Set
// ============================================================================

/// Target values of a value-filtered read, already coerced to the tag type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSet {
    pub values: Vec<TagValue>,
    /// Match stored nulls as well
    pub include_null: bool,
}

impl ValueSet {
    /// Build from raw request values; values that do not fit the type are dropped
    pub fn from_json(raw: &[Value], value_type: ValueType) -> Self {
        let mut set = Self::default();
        for value in raw {
            if value.is_null() {
                set.include_null = true;
            } else if let Some(v) = value_type.coerce(value) {
                set.values.push(v);
            }
        }
        set
    }

    pub fn contains(&self, value: Option<&TagValue>) -> bool {
        match value {
            None => self.include_null,
            Some(v) => self.values.iter().any(|candidate| candidate == v),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && !self.include_null
    }
}

// ============================================================================
// Order
// ============================================================================

/// Row selection order for range reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}
