//! Result cardinality limit

use historian_model::DataPoint;

/// Series cut to `maxCount` with a truncation flag
#[derive(Debug, Clone, PartialEq)]
pub struct Decimated {
    pub points: Vec<DataPoint>,
    /// Set when points were dropped
    pub excess: bool,
}

/// Keep at most `max_count` points, always keeping the first and the last
///
/// `0` yields nothing, `1` the first point, `2` the first and last, larger
/// limits the first `max_count - 1` points plus the last.
pub fn decimate(mut points: Vec<DataPoint>, max_count: usize) -> Decimated {
    if points.len() <= max_count {
        return Decimated {
            points,
            excess: false,
        };
    }

    match max_count {
        0 => points.clear(),
        1 => points.truncate(1),
        _ => {
            let last = points.pop();
            points.truncate(max_count - 1);
            points.extend(last);
        }
    }
    Decimated {
        points,
        excess: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: i64) -> Vec<DataPoint> {
        (0..n).map(|i| DataPoint::good(i, i * 10)).collect()
    }

    #[test]
    fn test_within_limit_untouched() {
        let out = decimate(series(3), 3);
        assert_eq!(out.points, series(3));
        assert!(!out.excess);
    }

    #[test]
    fn test_zero_and_one() {
        let zero = decimate(series(3), 0);
        assert!(zero.points.is_empty());
        assert!(zero.excess);

        let one = decimate(series(3), 1);
        assert_eq!(one.points, vec![DataPoint::good(0_i64, 0)]);
        assert!(one.excess);
    }

    #[test]
    fn test_two_keeps_edges() {
        let out = decimate(series(5), 2);
        assert_eq!(
            out.points,
            vec![DataPoint::good(0_i64, 0), DataPoint::good(4_i64, 40)]
        );
    }

    #[test]
    fn test_larger_limit() {
        let out = decimate(series(10), 4);
        let stamps: Vec<i64> = out.points.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![0, 10, 20, 90]);
        assert!(out.excess);
    }

    #[test]
    fn test_empty_series_zero_limit() {
        let out = decimate(Vec::new(), 0);
        assert!(out.points.is_empty());
        assert!(!out.excess);
    }
}
