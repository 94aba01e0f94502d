//! `tags.downloadData` request and reply shapes

use historian_model::{format_timestamp, parse_timestamp, DataPoint};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::QueryError;

/// Read request for one or more tags
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    #[serde(deserialize_with = "one_or_many")]
    pub tag_id: Vec<String>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub start: Option<i64>,
    /// Defaults to "now" when absent
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub finish: Option<i64>,
    #[serde(default)]
    pub max_count: Option<usize>,
    /// Render reply timestamps as RFC 3339 strings
    #[serde(default)]
    pub format: bool,
    #[serde(default)]
    pub actual: bool,
    /// Target values; a scalar is a one-element set, `null` or `[]` means no filter
    #[serde(default, deserialize_with = "optional_values")]
    pub value: Option<Vec<Value>>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub time_step: Option<i64>,
}

/// Retrieval algorithm chosen from the request shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Actual,
    Grid(i64),
    Snapshot,
    Ranged,
}

impl DataRequest {
    pub fn for_tags<I, S>(tag_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag_id: tag_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// `actual` wins over everything; a value filter disables `timeStep`
    pub fn mode(&self) -> ReadMode {
        if self.actual {
            return ReadMode::Actual;
        }
        if self.value.is_none() {
            if let Some(step) = self.time_step {
                return ReadMode::Grid(step);
            }
            if self.start.is_none() && self.count.is_none() {
                return ReadMode::Snapshot;
            }
        }
        ReadMode::Ranged
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

fn optional_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => parse_timestamp(&raw).map(Some).map_err(D::Error::custom),
    }
}

fn optional_values<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<Value>>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::Array(values)) if values.is_empty() => None,
        Some(Value::Array(values)) => Some(values),
        Some(scalar) => Some(vec![scalar]),
    })
}

/// Series for one tag
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagData {
    pub tag_id: String,
    pub data: Vec<DataPoint>,
    /// Present only when the request carried `maxCount`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excess: Option<bool>,
}

/// Reply to a read request; tags that failed are absent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataResponse {
    pub data: Vec<TagData>,
}

impl DataResponse {
    /// Reply body, with string timestamps when `format` is set
    pub fn to_json(&self, format: bool) -> Result<Value, QueryError> {
        if !format {
            return Ok(serde_json::to_value(self)?);
        }
        let data: Vec<Value> = self
            .data
            .iter()
            .map(|tag| {
                let points: Vec<Value> = tag
                    .data
                    .iter()
                    .map(|p| {
                        json!([
                            p.value.as_ref().map(|v| v.to_json()),
                            format_timestamp(p.timestamp),
                            p.quality
                        ])
                    })
                    .collect();
                let mut item = json!({"tagId": tag.tag_id, "data": points});
                if let (Some(excess), Some(obj)) = (tag.excess, item.as_object_mut()) {
                    obj.insert("excess".to_string(), Value::Bool(excess));
                }
                item
            })
            .collect();
        Ok(json!({ "data": data }))
    }
}
