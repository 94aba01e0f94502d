//! Remote metrics backend
//!
//! Talks to a metrics store over HTTP: points are pushed as a JSON array of
//! `{metric, value, timestamp}` objects (millisecond timestamps) and read
//! back through a Prometheus-style range endpoint. The remote store cannot
//! answer "one row before/after", so the read window is widened by
//! `boundary_lookback_ms` and the range is cut client-side.

use async_trait::async_trait;
use dashmap::DashMap;
use historian_model::{AlarmRecord, DataPoint, Location, Tag, TagValue, ValueType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::{latest_per_timestamp, select_range, BackendKind, RangeQuery, StorageBackend};

/// Metrics endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Write endpoint, e.g. `http://vm:4242/api/put`
    pub put_url: String,
    /// Range query endpoint, e.g. `http://vm:8428/api/v1/query_range`
    pub get_url: String,
    /// How far past the requested range to look for boundary rows, and how
    /// far before `finish` reads without a start look
    #[serde(default = "default_lookback_ms")]
    pub boundary_lookback_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_lookback_ms() -> u64 {
    3_600_000
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    status: String,
    #[serde(default)]
    data: Option<RangeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// HTTP metrics backend
pub struct MetricsBackend {
    client: reqwest::Client,
    config: MetricsConfig,
    /// Metrics created through this process, used to refuse double creation
    created: DashMap<String, ValueType>,
}

impl MetricsBackend {
    pub fn new(config: MetricsConfig) -> Result<Self> {
        if config.put_url.is_empty() || config.get_url.is_empty() {
            return Err(StoreError::Config(
                "metrics backend needs both put_url and get_url".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config,
            created: DashMap::new(),
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn lookback_micros(&self) -> i64 {
        self.config.boundary_lookback_ms as i64 * 1_000
    }

    fn parse_sample(raw: &str, value_type: ValueType) -> Result<TagValue> {
        let number: f64 = raw
            .parse()
            .map_err(|_| StoreError::InvalidData(format!("non-numeric sample: {raw}")))?;
        Ok(match value_type {
            ValueType::Int => TagValue::Int(number.round() as i64),
            ValueType::Double | ValueType::String | ValueType::Json => TagValue::Double(number),
        })
    }

    fn unsupported(operation: &'static str) -> StoreError {
        StoreError::Unsupported {
            backend: "metrics",
            operation,
        }
    }
}

#[async_trait]
impl StorageBackend for MetricsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Metrics
    }

    fn default_location(&self, tag_id: &str) -> Result<Location> {
        Ok(Location::new(tag_id.replace('-', "_"))?)
    }

    async fn create_location(&self, tag: &Tag, location: &Location) -> Result<Location> {
        if !tag.value_type.is_numeric() {
            return Err(StoreError::Config(format!(
                "metrics backend cannot store {} values (tag {})",
                tag.value_type, tag.id
            )));
        }
        if self.created.contains_key(location.as_str()) {
            return Err(StoreError::LocationExists(location.to_string()));
        }
        self.created
            .insert(location.as_str().to_string(), tag.value_type);
        Ok(location.clone())
    }

    async fn drop_location(&self, location: &Location) -> Result<()> {
        self.created.remove(location.as_str());
        debug!(metric = %location, "Metric unlinked, remote samples are kept");
        Ok(())
    }

    async fn write(
        &self,
        location: &Location,
        _value_type: ValueType,
        points: &[DataPoint],
        update: bool,
    ) -> Result<usize> {
        let batch = if update {
            latest_per_timestamp(points)
        } else {
            points.to_vec()
        };
        let body: Vec<Value> = batch
            .iter()
            .filter_map(|p| {
                p.as_f64().map(|v| {
                    json!({
                        "metric": location.as_str(),
                        "value": v,
                        "timestamp": p.timestamp / 1_000,
                    })
                })
            })
            .collect();

        if body.len() < batch.len() {
            debug!(
                metric = %location,
                skipped = batch.len() - body.len(),
                "Skipping null samples"
            );
        }
        if body.is_empty() {
            return Ok(0);
        }

        self.client
            .post(&self.config.put_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(body.len())
    }

    async fn read_range(
        &self,
        location: &Location,
        value_type: ValueType,
        query: &RangeQuery,
    ) -> Result<Vec<DataPoint>> {
        let mut params: Vec<(&str, String)> = vec![("query", location.as_str().to_string())];
        // Without a start the remote default window would apply; look back
        // from finish instead so the latest row before it is found
        let from = match (query.start, query.finish) {
            (Some(start), _) if query.one_before => Some(start.saturating_sub(self.lookback_micros())),
            (Some(start), _) => Some(start),
            (None, Some(finish)) => Some(finish.saturating_sub(self.lookback_micros())),
            (None, None) => None,
        };
        if let Some(from) = from {
            params.push(("start", (from.max(0) as f64 / 1e6).to_string()));
        }
        if let Some(finish) = query.finish {
            let to = if query.one_after {
                finish + self.lookback_micros()
            } else {
                finish
            };
            params.push(("end", (to as f64 / 1e6).to_string()));
        }

        let response: RangeResponse = self
            .client
            .get(&self.config.get_url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "success" {
            return Err(StoreError::InvalidData(format!(
                "metrics query for {} failed: {}",
                location,
                response.error.unwrap_or(response.status)
            )));
        }

        let mut rows = Vec::new();
        for series in response.data.map(|d| d.result).unwrap_or_default() {
            for (seconds, raw) in series.values {
                let value = Self::parse_sample(&raw, value_type)?;
                rows.push(DataPoint::new(
                    Some(value),
                    (seconds * 1e6).round() as i64,
                    None,
                ));
            }
        }
        rows.sort_by_key(|p| p.timestamp);

        Ok(select_range(&rows, query))
    }

    async fn create_alert_location(&self, _location: &Location) -> Result<()> {
        Err(Self::unsupported("alarm history"))
    }

    async fn open_alarm(&self, _location: &Location, _fired: i64) -> Result<bool> {
        Err(Self::unsupported("alarm history"))
    }

    async fn ack_alarm(&self, _location: &Location, _acked: i64) -> Result<bool> {
        Err(Self::unsupported("alarm history"))
    }

    async fn close_alarm(&self, _location: &Location, _off: i64) -> Result<bool> {
        Err(Self::unsupported("alarm history"))
    }

    async fn last_alarm(&self, _location: &Location) -> Result<Option<AlarmRecord>> {
        Err(Self::unsupported("alarm history"))
    }
}
