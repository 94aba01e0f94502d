//! Trait definitions for storage backends

use async_trait::async_trait;
use historian_model::{AlarmRecord, DataPoint, Location, Order, Tag, ValueSet, ValueType};
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

/// Physical store family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Memory,
    Sqlite,
    Metrics,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw range read parameters
///
/// Rows in `[start, finish]` matching `values` are selected in `order` and
/// cut at `limit`. `one_before` adds the last row strictly before `start`,
/// `one_after` the first row strictly after `finish`; boundary rows ignore
/// the value filter and are only added when the matching bound is set.
/// Results are always returned ascending by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeQuery {
    pub start: Option<i64>,
    pub finish: Option<i64>,
    pub order: Order,
    pub limit: Option<usize>,
    pub one_before: bool,
    pub one_after: bool,
    pub values: Option<ValueSet>,
}

impl RangeQuery {
    pub fn between(start: Option<i64>, finish: Option<i64>) -> Self {
        Self {
            start,
            finish,
            ..Self::default()
        }
    }

    fn in_range(&self, timestamp: i64) -> bool {
        self.start.is_none_or(|s| timestamp >= s) && self.finish.is_none_or(|f| timestamp <= f)
    }
}

/// Storage backend trait
///
/// One implementation per physical store. Each tag owns one location per
/// backend it is bound to; alerts own an alert-history location.
///
/// Implementations:
/// - `MemoryBackend`: in-process store for tests and embedded use
/// - `SqliteBackend`: one table per tag
/// - `MetricsBackend`: remote HTTP metrics endpoint
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    // ========== Introspection ==========

    fn kind(&self) -> BackendKind;

    /// Location used when a link request does not name one
    fn default_location(&self, tag_id: &str) -> Result<Location> {
        Ok(Location::default_for_tag(tag_id)?)
    }

    /// Alert-history location used when a link request does not name one
    fn default_alert_location(&self, alert_id: &str) -> Result<Location> {
        Ok(Location::default_for_alert(alert_id)?)
    }

    // ========== Tag Locations ==========

    /// Create the physical location for a tag
    ///
    /// Fails with `LocationExists` if it is already there; callers drop
    /// first to rebind.
    async fn create_location(&self, tag: &Tag, location: &Location) -> Result<Location>;

    /// Drop a tag or alert location; missing locations are not an error
    async fn drop_location(&self, location: &Location) -> Result<()>;

    // ========== Points ==========

    /// Write a batch
    ///
    /// With `update` set, stored rows whose timestamp collides with the
    /// batch are replaced and the batch itself keeps only its last point per
    /// timestamp. Without it rows are appended unconditionally.
    async fn write(
        &self,
        location: &Location,
        value_type: ValueType,
        points: &[DataPoint],
        update: bool,
    ) -> Result<usize>;

    /// Raw range read, see `RangeQuery`
    async fn read_range(
        &self,
        location: &Location,
        value_type: ValueType,
        query: &RangeQuery,
    ) -> Result<Vec<DataPoint>>;

    // ========== Alert History ==========

    async fn create_alert_location(&self, location: &Location) -> Result<()>;

    /// Insert an open record unless one is open already; returns whether inserted
    async fn open_alarm(&self, location: &Location, fired: i64) -> Result<bool>;

    /// Set the ack time of the open record; false when none is open or it is acked
    async fn ack_alarm(&self, location: &Location, acked: i64) -> Result<bool>;

    /// Close the open record; false when none is open
    async fn close_alarm(&self, location: &Location, off: i64) -> Result<bool>;

    /// Most recent record by fire time
    async fn last_alarm(&self, location: &Location) -> Result<Option<AlarmRecord>>;
}

// ========== Helpers shared by implementations ==========

/// Keep only the last point per timestamp, preserving first-seen order
pub fn latest_per_timestamp(points: &[DataPoint]) -> Vec<DataPoint> {
    let mut slot: HashMap<i64, usize> = HashMap::with_capacity(points.len());
    let mut out: Vec<DataPoint> = Vec::with_capacity(points.len());
    for point in points {
        match slot.get(&point.timestamp) {
            Some(&idx) => out[idx] = point.clone(),
            None => {
                slot.insert(point.timestamp, out.len());
                out.push(point.clone());
            }
        }
    }
    out
}

/// Apply a `RangeQuery` to rows already sorted ascending by timestamp
///
/// Used by backends that cannot push the query down.
pub fn select_range(rows: &[DataPoint], query: &RangeQuery) -> Vec<DataPoint> {
    let matches = |p: &DataPoint| {
        query.in_range(p.timestamp)
            && query
                .values
                .as_ref()
                .is_none_or(|set| set.contains(p.value.as_ref()))
    };

    let limit = query.limit.unwrap_or(usize::MAX);
    let mut picked: Vec<usize> = match query.order {
        Order::Asc => (0..rows.len())
            .filter(|&i| matches(&rows[i]))
            .take(limit)
            .collect(),
        Order::Desc => (0..rows.len())
            .rev()
            .filter(|&i| matches(&rows[i]))
            .take(limit)
            .collect(),
    };

    if query.one_before {
        if let Some(start) = query.start {
            let idx = rows.partition_point(|p| p.timestamp < start);
            if idx > 0 {
                picked.push(idx - 1);
            }
        }
    }
    if query.one_after {
        if let Some(finish) = query.finish {
            let idx = rows.partition_point(|p| p.timestamp <= finish);
            if idx < rows.len() {
                picked.push(idx);
            }
        }
    }

    picked.sort_unstable();
    picked.dedup();
    picked.into_iter().map(|i| rows[i].clone()).collect()
}
