//! Time-series reader
//!
//! Serves the four retrieval modes on top of the write buffer (tag cache
//! and read-your-writes flush) and the backend registry. A tag bound to
//! several backends is read from the one it was bound to first.

use futures::future::join_all;
use historian_model::{DataPoint, Location, Order, Tag, ValueSet};
use historian_store::{BackendRegistry, RangeQuery, StorageBackend, TimeProvider, WriteBuffer};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::decimate::decimate;
use crate::error::{QueryError, Result};
use crate::filter::ValueFilter;
use crate::interpolate::Interpolator;
use crate::request::{DataRequest, DataResponse, ReadMode, TagData};
use crate::resample::GridResampler;

/// Where a tag's history is read from
#[derive(Clone)]
pub struct TagSource {
    pub tag: Tag,
    pub backend_id: String,
    pub backend: Arc<dyn StorageBackend>,
    pub location: Location,
}

impl TagSource {
    async fn read(&self, query: &RangeQuery) -> Result<Vec<DataPoint>> {
        Ok(self
            .backend
            .read_range(&self.location, self.tag.value_type, query)
            .await?)
    }
}

pub struct TimeSeriesReader {
    buffer: Arc<WriteBuffer>,
    registry: Arc<BackendRegistry>,
    clock: Arc<dyn TimeProvider>,
}

impl TimeSeriesReader {
    pub fn new(
        buffer: Arc<WriteBuffer>,
        registry: Arc<BackendRegistry>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            buffer,
            registry,
            clock,
        }
    }

    /// Resolve the tag's metadata and its first-bound backend
    pub fn source(&self, tag_id: &str) -> Result<TagSource> {
        let tag = self
            .buffer
            .tag(tag_id)
            .ok_or_else(|| QueryError::TagNotBound(tag_id.to_string()))?;
        let (backend_id, location) = self
            .buffer
            .bindings(tag_id)
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::TagNotBound(tag_id.to_string()))?;
        let backend = self.registry.get(&backend_id)?;
        Ok(TagSource {
            tag,
            backend_id,
            backend,
            location,
        })
    }

    // ========== Request Dispatch ==========

    /// Serve a read request
    ///
    /// Pending writes of the requested tags are flushed first. Tags are
    /// read concurrently; a tag that fails is logged and left out.
    pub async fn read(&self, request: &DataRequest) -> DataResponse {
        self.buffer.flush_tags(&request.tag_id, &self.registry).await;

        let finish = request.finish.unwrap_or_else(|| self.clock.now_micros());
        let results = join_all(
            request
                .tag_id
                .iter()
                .map(|tag_id| self.read_tag(tag_id, request, finish)),
        )
        .await;

        let mut data = Vec::with_capacity(results.len());
        for (tag_id, result) in request.tag_id.iter().zip(results) {
            match result {
                Ok(tag_data) => data.push(tag_data),
                Err(e) => warn!(tag_id = %tag_id, error = %e, "Tag read failed, skipping"),
            }
        }
        DataResponse { data }
    }

    /// `finish` is the request's finish defaulted to now; ranged reads keep
    /// an open finish so rows past now are returned
    async fn read_tag(&self, tag_id: &str, request: &DataRequest, finish: i64) -> Result<TagData> {
        let source = self.source(tag_id)?;
        let targets = request
            .value
            .as_deref()
            .map(|raw| ValueSet::from_json(raw, source.tag.value_type));

        let mode = request.mode();
        debug!(tag_id, ?mode, "Reading tag");
        let mut points = match mode {
            ReadMode::Actual => {
                self.actual(&source, request.start, Some(finish), request.count, targets.as_ref())
                    .await?
            }
            ReadMode::Grid(time_step) => {
                self.grid(&source, request.start, Some(finish), request.count, time_step)
                    .await?
            }
            ReadMode::Snapshot => vec![self.snapshot(&source, finish).await?],
            ReadMode::Ranged => {
                self.ranged(&source, request.start, request.finish, request.count)
                    .await?
            }
        };

        if !request.actual {
            if let Some(targets) = targets {
                points = ValueFilter::new(targets, &source.tag).apply(&points);
                if request.start.is_none() {
                    points = points.pop().into_iter().collect();
                }
            }
        }

        let (points, excess) = match request.max_count {
            Some(max_count) => {
                let decimated = decimate(points, max_count);
                (decimated.points, Some(decimated.excess))
            }
            None => (points, None),
        };

        Ok(TagData {
            tag_id: tag_id.to_string(),
            data: points,
            excess,
        })
    }

    // ========== Retrieval Modes ==========

    /// Stored rows only, no synthesis
    ///
    /// Without `start` the last `count` rows (default 1) up to `finish`.
    pub async fn actual(
        &self,
        source: &TagSource,
        start: Option<i64>,
        finish: Option<i64>,
        count: Option<usize>,
        targets: Option<&ValueSet>,
    ) -> Result<Vec<DataPoint>> {
        let (order, limit) = match start {
            Some(_) => (Order::Asc, count),
            None => (Order::Desc, Some(count.filter(|c| *c > 0).unwrap_or(1))),
        };
        source
            .read(&RangeQuery {
                start,
                finish,
                order,
                limit,
                values: targets.cloned(),
                ..RangeQuery::default()
            })
            .await
    }

    /// The single value effective at `finish`, stamped at `finish`
    ///
    /// No stored row at or before `finish` gives `(null, finish, null)`.
    pub async fn snapshot(&self, source: &TagSource, finish: i64) -> Result<DataPoint> {
        let rows = source
            .read(&RangeQuery {
                finish: Some(finish),
                order: Order::Desc,
                limit: Some(1),
                one_after: !source.tag.step,
                ..RangeQuery::default()
            })
            .await?;

        let point = match rows.as_slice() {
            [] => DataPoint::null(finish),
            [first, ..] if first.timestamp > finish => DataPoint::null(finish),
            [only] => only.at(finish),
            [before, after, ..] => {
                let value = Interpolator::for_tag(&source.tag).between(before, after, finish);
                DataPoint::new(value, finish, before.quality)
            }
        };
        Ok(point)
    }

    /// Raw rows with points synthesized at `start` and `finish`
    ///
    /// With an open `finish` the last value is repeated at "now" when the
    /// series ends before it. `count` keeps the first rows when `start` is
    /// given, otherwise the last ones.
    pub async fn ranged(
        &self,
        source: &TagSource,
        start: Option<i64>,
        finish: Option<i64>,
        count: Option<usize>,
    ) -> Result<Vec<DataPoint>> {
        let order = if count.is_some() && start.is_none() {
            Order::Desc
        } else {
            Order::Asc
        };
        let mut data = source
            .read(&RangeQuery {
                start,
                finish,
                order,
                limit: count,
                one_before: true,
                one_after: true,
                values: None,
            })
            .await?;
        if data.is_empty() {
            return Ok(data);
        }

        let interpolator = Interpolator::for_tag(&source.tag);
        if let Some(start) = start {
            synthesize_start(&mut data, start, &interpolator);
        }
        if let Some(finish) = finish {
            synthesize_finish(&mut data, finish, &interpolator);
        } else if let Some(last) = data.last() {
            let now = self.clock.now_micros();
            if now > last.timestamp {
                let repeated = last.at(now);
                data.push(repeated);
            }
        }

        Ok(limit_data(data, count, start))
    }

    /// Evenly spaced series of `count` points with step `time_step`
    pub async fn grid(
        &self,
        source: &TagSource,
        start: Option<i64>,
        finish: Option<i64>,
        count: Option<usize>,
        time_step: i64,
    ) -> Result<Vec<DataPoint>> {
        let resampler = GridResampler::new(time_step)?;
        let row = resampler.timestamps(count, start, finish)?;
        let span_start = resampler.span_start(count, start, finish);

        let raw = self.ranged(source, span_start, finish, None).await?;
        Ok(resampler.resample(&Interpolator::for_tag(&source.tag), &raw, &row))
    }
}

/// Last row sharing the timestamp of `data[idx]`
fn last_at(data: &[DataPoint], idx: usize) -> &DataPoint {
    let ts = data[idx].timestamp;
    let mut end = idx;
    while end + 1 < data.len() && data[end + 1].timestamp == ts {
        end += 1;
    }
    &data[end]
}

fn synthesize_start(data: &mut Vec<DataPoint>, start: i64, interpolator: &Interpolator) {
    let first = data[0].clone();
    if first.timestamp > start {
        data.insert(0, DataPoint::null(start));
        return;
    }
    if data.len() == 1 {
        if first.timestamp < start {
            data[0] = first.at(start);
        }
        return;
    }

    let second = last_at(data, 1).clone();
    if second.timestamp == start {
        data.remove(0);
    } else if first.timestamp < start && start < second.timestamp {
        let value = interpolator.between(&first, &second, start);
        data[0] = DataPoint::new(value, start, first.quality);
    }
}

fn synthesize_finish(data: &mut Vec<DataPoint>, finish: i64, interpolator: &Interpolator) {
    let n = data.len();
    let last = data[n - 1].clone();
    if last.timestamp > finish {
        match n {
            1 => data[0] = DataPoint::null(finish),
            _ => {
                let prev = last_at(data, n - 2).clone();
                if prev.timestamp == finish {
                    data.pop();
                } else if prev.timestamp < finish {
                    let value = interpolator.between(&prev, &last, finish);
                    data[n - 1] = DataPoint::new(value, finish, data[n - 2].quality);
                }
            }
        }
    } else if last.timestamp < finish {
        data.push(last.at(finish));
    }
}

fn limit_data(mut data: Vec<DataPoint>, count: Option<usize>, start: Option<i64>) -> Vec<DataPoint> {
    let Some(count) = count.filter(|c| *c > 0) else {
        return data;
    };
    if start.is_some() {
        data.truncate(count);
    } else if data.len() > count {
        data.drain(..data.len() - count);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use historian_model::{TagValue, ValueType};

    fn stamps(data: &[DataPoint]) -> Vec<i64> {
        data.iter().map(|p| p.timestamp).collect()
    }

    #[test]
    fn test_synthesize_start_inserts_null_before_data() {
        let interp = Interpolator::new(ValueType::Int, false);
        let mut data = vec![DataPoint::good(1_i64, 20)];
        synthesize_start(&mut data, 10, &interp);
        assert_eq!(data[0], DataPoint::null(10));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_synthesize_start_interpolates() {
        let interp = Interpolator::new(ValueType::Int, false);
        let mut data = vec![DataPoint::good(0_i64, 0), DataPoint::good(100_i64, 100)];
        synthesize_start(&mut data, 40, &interp);
        assert_eq!(data[0], DataPoint::good(40_i64, 40));
    }

    #[test]
    fn test_synthesize_start_drops_redundant_before_row() {
        let interp = Interpolator::new(ValueType::Int, false);
        let mut data = vec![DataPoint::good(0_i64, 0), DataPoint::good(5_i64, 40)];
        synthesize_start(&mut data, 40, &interp);
        assert_eq!(stamps(&data), vec![40]);
    }

    #[test]
    fn test_synthesize_finish_step_holds_previous() {
        let interp = Interpolator::new(ValueType::Int, true);
        let mut data = vec![
            DataPoint::new(Some(TagValue::Int(7)), 10, Some(2)),
            DataPoint::good(9_i64, 100),
        ];
        synthesize_finish(&mut data, 50, &interp);
        assert_eq!(
            data[1],
            DataPoint::new(Some(TagValue::Int(7)), 50, Some(2))
        );
    }

    #[test]
    fn test_synthesize_finish_single_after_row() {
        let interp = Interpolator::new(ValueType::Int, false);
        let mut data = vec![DataPoint::good(9_i64, 100)];
        synthesize_finish(&mut data, 50, &interp);
        assert_eq!(data, vec![DataPoint::null(50)]);
    }

    #[test]
    fn test_synthesize_finish_extends_last_value() {
        let interp = Interpolator::new(ValueType::Int, false);
        let mut data = vec![DataPoint::good(9_i64, 10)];
        synthesize_finish(&mut data, 50, &interp);
        assert_eq!(stamps(&data), vec![10, 50]);
        assert_eq!(data[1].value, Some(TagValue::Int(9)));
    }

    #[test]
    fn test_limit_data() {
        let data: Vec<DataPoint> = (0..5).map(|i| DataPoint::good(i, i)).collect();
        assert_eq!(stamps(&limit_data(data.clone(), Some(2), Some(0))), vec![0, 1]);
        assert_eq!(stamps(&limit_data(data.clone(), Some(2), None)), vec![3, 4]);
        assert_eq!(limit_data(data.clone(), None, None).len(), 5);
    }
}
