//! Boundary synthesis and grid interpolation
//!
//! Numeric, non-step tags are interpolated linearly; everything else holds
//! the earlier point's value. Integer tags are rounded after interpolation.

use historian_model::{DataPoint, Tag, TagValue, ValueType};

/// Value synthesis rules for one tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpolator {
    value_type: ValueType,
    step: bool,
}

impl Interpolator {
    pub fn new(value_type: ValueType, step: bool) -> Self {
        Self { value_type, step }
    }

    pub fn for_tag(tag: &Tag) -> Self {
        Self::new(tag.value_type, tag.step)
    }

    /// Whether values between samples are computed rather than held
    pub fn is_linear(&self) -> bool {
        !self.step && self.value_type.is_numeric()
    }

    /// Value at `x` on the segment from `a` to `b`
    ///
    /// Falls back to `a`'s value for step tags, non-numeric values (null
    /// included), flat segments and zero-width segments.
    pub fn between(&self, a: &DataPoint, b: &DataPoint, x: i64) -> Option<TagValue> {
        if !self.is_linear() {
            return a.value.clone();
        }
        let (Some(y0), Some(y1)) = (a.as_f64(), b.as_f64()) else {
            return a.value.clone();
        };
        let (x0, x1) = (a.timestamp, b.timestamp);
        if y0 == y1 || x0 == x1 {
            return a.value.clone();
        }

        let y = (x - x0) as f64 / (x1 - x0) as f64 * (y1 - y0) + y0;
        Some(self.value_type.from_interpolated(y))
    }

    /// Values of `raw` at every timestamp in `grid`
    ///
    /// `raw` must be sorted by timestamp. Duplicated timestamps collapse to
    /// the last row. A stored null starts a gap: grid points after it stay
    /// null until the next non-null sample, grid points before it hold the
    /// previous value. Grid points before the first or after the last raw
    /// row are null. Synthesized points carry the forward-filled quality of
    /// the run they fall in.
    pub fn resample(&self, raw: &[DataPoint], grid: &[i64]) -> Vec<DataPoint> {
        let points = collapse_duplicates(raw);
        let qualities = forward_filled_quality(&points);

        grid.iter()
            .map(|&ts| {
                let idx = points.partition_point(|p| p.timestamp <= ts);
                if idx == 0 {
                    return DataPoint::null(ts);
                }
                let prev = &points[idx - 1];
                if prev.timestamp == ts {
                    return prev.clone();
                }
                if prev.value.is_none() {
                    return DataPoint::null(ts);
                }
                let Some(next) = points.get(idx) else {
                    return DataPoint::null(ts);
                };

                let value = match next.value {
                    None => prev.value.clone(),
                    Some(_) => self.between(prev, next, ts),
                };
                DataPoint::new(value, ts, qualities[idx - 1])
            })
            .collect()
    }
}

fn collapse_duplicates(raw: &[DataPoint]) -> Vec<DataPoint> {
    let mut out: Vec<DataPoint> = Vec::with_capacity(raw.len());
    for point in raw {
        match out.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point.clone(),
            _ => out.push(point.clone()),
        }
    }
    out
}

/// Quality carried forward inside runs; a null row resets it
fn forward_filled_quality(points: &[DataPoint]) -> Vec<Option<i32>> {
    let mut carried = None;
    points
        .iter()
        .map(|p| {
            if p.value.is_none() {
                carried = None;
                return p.quality;
            }
            carried = p.quality.or(carried);
            carried
        })
        .collect()
}
