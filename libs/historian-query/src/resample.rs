//! Fixed-step timestamp series for grid reads

use historian_model::DataPoint;

use crate::error::{QueryError, Result};
use crate::interpolate::Interpolator;

/// Upper bound on grid length for a single tag
pub const MAX_GRID_POINTS: usize = 1_000_000;

/// Evenly spaced grid anchored at `start` (ascending) or at `finish`
/// (built backwards, returned ascending)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridResampler {
    time_step: i64,
}

impl GridResampler {
    pub fn new(time_step: i64) -> Result<Self> {
        if time_step <= 0 {
            return Err(QueryError::InvalidRequest(format!(
                "timeStep must be positive, got {time_step}"
            )));
        }
        Ok(Self { time_step })
    }

    pub fn time_step(&self) -> i64 {
        self.time_step
    }

    /// Grid timestamps
    ///
    /// With `start` the grid runs `start, start + step, ...` up to `finish`
    /// (at most `count` points). Without it the grid ends at `finish` and
    /// has exactly `count` points, minus any that would be negative.
    pub fn timestamps(
        &self,
        count: Option<usize>,
        start: Option<i64>,
        finish: Option<i64>,
    ) -> Result<Vec<i64>> {
        let (anchor, step, limit) = match (start, finish, count) {
            (Some(start), Some(finish), count) => {
                let span = match finish.checked_sub(start) {
                    Some(width) if width < 0 => 0,
                    Some(width) => (width / self.time_step) as usize + 1,
                    None => usize::MAX,
                };
                (start, self.time_step, count.map_or(span, |c| c.min(span)))
            }
            (Some(start), None, Some(count)) => (start, self.time_step, count),
            (None, Some(finish), Some(count)) => (finish, -self.time_step, count),
            _ => {
                return Err(QueryError::InvalidRequest(
                    "grid read needs count unless both start and finish are given".to_string(),
                ))
            }
        };
        if limit > MAX_GRID_POINTS {
            return Err(QueryError::InvalidRequest(format!(
                "grid of {limit} points exceeds {MAX_GRID_POINTS}"
            )));
        }

        let mut row = Vec::with_capacity(limit);
        for i in 0..limit as i64 {
            let Some(ts) = i.checked_mul(step).and_then(|offset| anchor.checked_add(offset)) else {
                break;
            };
            if ts < 0 || finish.is_some_and(|f| ts > f) {
                break;
            }
            row.push(ts);
        }
        if step < 0 {
            row.reverse();
        }
        Ok(row)
    }

    /// First timestamp the raw read has to cover
    ///
    /// A grid reaching back past the epoch starts the read at 0.
    pub fn span_start(
        &self,
        count: Option<usize>,
        start: Option<i64>,
        finish: Option<i64>,
    ) -> Option<i64> {
        start.or_else(|| {
            let (finish, count) = (finish?, count?);
            let first = i64::try_from(count.saturating_sub(1))
                .ok()
                .and_then(|steps| self.time_step.checked_mul(steps))
                .and_then(|width| finish.checked_sub(width))
                .unwrap_or(0);
            Some(first.max(0))
        })
    }

    /// Interpolate `raw` onto `grid`; an empty series yields nulls
    pub fn resample(
        &self,
        interpolator: &Interpolator,
        raw: &[DataPoint],
        grid: &[i64],
    ) -> Vec<DataPoint> {
        if raw.is_empty() {
            return grid.iter().map(|&ts| DataPoint::null(ts)).collect();
        }
        interpolator.resample(raw, grid)
    }
}
