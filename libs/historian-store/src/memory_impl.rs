//! In-memory storage backend
//!
//! Uses DashMap so different tags never contend. Perfect for testing and
//! embedded scenarios; nothing survives a restart.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use historian_model::{AlarmRecord, DataPoint, Location, Tag, ValueType};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{Result, StoreError};
use crate::traits::{latest_per_timestamp, select_range, BackendKind, RangeQuery, StorageBackend};

struct Series {
    value_type: ValueType,
    /// Sorted by timestamp; equal timestamps keep insertion order
    rows: Vec<DataPoint>,
}

/// In-memory backend with concurrent access support
pub struct MemoryBackend {
    series: DashMap<String, Series>,
    alarms: DashMap<String, Vec<AlarmRecord>>,
    next_alarm_id: AtomicI64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
            alarms: DashMap::new(),
            next_alarm_id: AtomicI64::new(1),
        }
    }

    /// Get statistics about stored data
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            series_count: self.series.len(),
            row_count: self.series.iter().map(|s| s.rows.len()).sum(),
            alarm_tables: self.alarms.len(),
        }
    }

    /// Number of rows stored at one location (0 when missing)
    pub fn row_count(&self, location: &Location) -> usize {
        self.series
            .get(location.as_str())
            .map(|s| s.rows.len())
            .unwrap_or(0)
    }

    fn last_open_mut(records: &mut [AlarmRecord]) -> Option<&mut AlarmRecord> {
        records.last_mut().filter(|r| r.is_open())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory backend usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    pub series_count: usize,
    pub row_count: usize,
    pub alarm_tables: usize,
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create_location(&self, tag: &Tag, location: &Location) -> Result<Location> {
        match self.series.entry(location.as_str().to_string()) {
            Entry::Occupied(_) => Err(StoreError::LocationExists(location.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Series {
                    value_type: tag.value_type,
                    rows: Vec::new(),
                });
                Ok(location.clone())
            }
        }
    }

    async fn drop_location(&self, location: &Location) -> Result<()> {
        self.series.remove(location.as_str());
        self.alarms.remove(location.as_str());
        Ok(())
    }

    async fn write(
        &self,
        location: &Location,
        value_type: ValueType,
        points: &[DataPoint],
        update: bool,
    ) -> Result<usize> {
        let mut series = self
            .series
            .get_mut(location.as_str())
            .ok_or_else(|| StoreError::LocationNotFound(location.to_string()))?;
        if series.value_type != value_type {
            return Err(StoreError::InvalidData(format!(
                "{} stores {}, got {}",
                location, series.value_type, value_type
            )));
        }

        let batch = if update {
            let batch = latest_per_timestamp(points);
            let stamps: HashSet<i64> = batch.iter().map(|p| p.timestamp).collect();
            series.rows.retain(|row| !stamps.contains(&row.timestamp));
            batch
        } else {
            points.to_vec()
        };

        let written = batch.len();
        for point in batch {
            let idx = series.rows.partition_point(|row| row.timestamp <= point.timestamp);
            series.rows.insert(idx, point);
        }
        Ok(written)
    }

    async fn read_range(
        &self,
        location: &Location,
        _value_type: ValueType,
        query: &RangeQuery,
    ) -> Result<Vec<DataPoint>> {
        let series = self
            .series
            .get(location.as_str())
            .ok_or_else(|| StoreError::LocationNotFound(location.to_string()))?;
        Ok(select_range(&series.rows, query))
    }

    async fn create_alert_location(&self, location: &Location) -> Result<()> {
        match self.alarms.entry(location.as_str().to_string()) {
            Entry::Occupied(_) => Err(StoreError::LocationExists(location.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
                Ok(())
            }
        }
    }

    async fn open_alarm(&self, location: &Location, fired: i64) -> Result<bool> {
        let mut records = self
            .alarms
            .get_mut(location.as_str())
            .ok_or_else(|| StoreError::LocationNotFound(location.to_string()))?;
        if records.last().is_some_and(AlarmRecord::is_open) {
            return Ok(false);
        }
        records.push(AlarmRecord {
            id: self.next_alarm_id.fetch_add(1, Ordering::Relaxed),
            fired,
            acked: None,
            off: None,
        });
        Ok(true)
    }

    async fn ack_alarm(&self, location: &Location, acked: i64) -> Result<bool> {
        let mut records = self
            .alarms
            .get_mut(location.as_str())
            .ok_or_else(|| StoreError::LocationNotFound(location.to_string()))?;
        match Self::last_open_mut(&mut records) {
            Some(record) if record.acked.is_none() => {
                record.acked = Some(acked);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close_alarm(&self, location: &Location, off: i64) -> Result<bool> {
        let mut records = self
            .alarms
            .get_mut(location.as_str())
            .ok_or_else(|| StoreError::LocationNotFound(location.to_string()))?;
        match Self::last_open_mut(&mut records) {
            Some(record) => {
                record.off = Some(off);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn last_alarm(&self, location: &Location) -> Result<Option<AlarmRecord>> {
        let records = self
            .alarms
            .get(location.as_str())
            .ok_or_else(|| StoreError::LocationNotFound(location.to_string()))?;
        Ok(records.last().copied())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use historian_model::TagValue;

    fn tag(update: bool) -> Tag {
        Tag {
            id: "t1".into(),
            value_type: ValueType::Int,
            step: false,
            update,
            active: true,
        }
    }

    fn loc() -> Location {
        Location::new("t_t1").unwrap()
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let backend = MemoryBackend::new();
        backend.create_location(&tag(true), &loc()).await.unwrap();
        let err = backend.create_location(&tag(true), &loc()).await.unwrap_err();
        assert!(matches!(err, StoreError::LocationExists(_)));

        backend.drop_location(&loc()).await.unwrap();
        assert!(backend.create_location(&tag(true), &loc()).await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_order_write_is_sorted() {
        let backend = MemoryBackend::new();
        backend.create_location(&tag(false), &loc()).await.unwrap();
        let points = vec![
            DataPoint::good(3_i64, 300),
            DataPoint::good(1_i64, 100),
            DataPoint::good(2_i64, 200),
        ];
        backend
            .write(&loc(), ValueType::Int, &points, false)
            .await
            .unwrap();

        let rows = backend
            .read_range(&loc(), ValueType::Int, &RangeQuery::default())
            .await
            .unwrap();
        let ts: Vec<i64> = rows.iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn test_update_mode_replaces_rows() {
        let backend = MemoryBackend::new();
        backend.create_location(&tag(true), &loc()).await.unwrap();
        backend
            .write(&loc(), ValueType::Int, &[DataPoint::good(1_i64, 100)], true)
            .await
            .unwrap();
        backend
            .write(&loc(), ValueType::Int, &[DataPoint::good(2_i64, 100)], true)
            .await
            .unwrap();

        let rows = backend
            .read_range(&loc(), ValueType::Int, &RangeQuery::default())
            .await
            .unwrap();
        assert_eq!(rows, vec![DataPoint::good(2_i64, 100)]);
    }

    #[tokio::test]
    async fn test_append_mode_keeps_duplicates() {
        let backend = MemoryBackend::new();
        backend.create_location(&tag(false), &loc()).await.unwrap();
        let points = vec![DataPoint::good(1_i64, 100), DataPoint::good(2_i64, 100)];
        backend
            .write(&loc(), ValueType::Int, &points, false)
            .await
            .unwrap();
        assert_eq!(backend.row_count(&loc()), 2);
    }

    #[tokio::test]
    async fn test_write_type_mismatch() {
        let backend = MemoryBackend::new();
        backend.create_location(&tag(false), &loc()).await.unwrap();
        let err = backend
            .write(
                &loc(),
                ValueType::Double,
                &[DataPoint::new(Some(TagValue::Double(1.0)), 1, None)],
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_alarm_lifecycle() {
        let backend = MemoryBackend::new();
        let alarms = Location::new("a_1").unwrap();
        backend.create_alert_location(&alarms).await.unwrap();

        assert!(backend.open_alarm(&alarms, 10).await.unwrap());
        assert!(!backend.open_alarm(&alarms, 11).await.unwrap());
        assert!(backend.ack_alarm(&alarms, 12).await.unwrap());
        assert!(!backend.ack_alarm(&alarms, 13).await.unwrap());
        assert!(backend.close_alarm(&alarms, 14).await.unwrap());
        assert!(!backend.close_alarm(&alarms, 15).await.unwrap());

        let last = backend.last_alarm(&alarms).await.unwrap().unwrap();
        assert_eq!((last.fired, last.acked, last.off), (10, Some(12), Some(14)));

        assert!(backend.open_alarm(&alarms, 20).await.unwrap());
        assert_eq!(backend.stats().alarm_tables, 1);
    }
}
