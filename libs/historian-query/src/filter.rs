//! Value-filtered reads: exact matches and linear crossings

use historian_model::{DataPoint, Tag, ValueSet};

use crate::interpolate::Interpolator;

/// Selects points whose value is in a target set
///
/// For linearly interpolated tags a target lying strictly between two
/// consecutive samples also yields a synthesized point at the estimated
/// crossing time (quality unset).
#[derive(Debug, Clone)]
pub struct ValueFilter {
    targets: ValueSet,
    interpolator: Interpolator,
}

impl ValueFilter {
    pub fn new(targets: ValueSet, tag: &Tag) -> Self {
        Self {
            targets,
            interpolator: Interpolator::for_tag(tag),
        }
    }

    pub fn targets(&self) -> &ValueSet {
        &self.targets
    }

    pub fn apply(&self, data: &[DataPoint]) -> Vec<DataPoint> {
        if !self.interpolator.is_linear() {
            return data
                .iter()
                .filter(|p| self.targets.contains(p.value.as_ref()))
                .cloned()
                .collect();
        }

        let Some(last) = data.last() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for pair in data.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.timestamp == b.timestamp {
                continue;
            }
            if self.targets.contains(a.value.as_ref()) {
                out.push(a.clone());
                continue;
            }
            let (Some(y1), Some(y2)) = (a.as_f64(), b.as_f64()) else {
                continue;
            };
            for target in &self.targets.values {
                let Some(y) = target.as_f64() else {
                    continue;
                };
                if (y1 < y && y < y2) || (y2 < y && y < y1) {
                    let x = crossing(a.timestamp, y1, b.timestamp, y2, y);
                    out.push(DataPoint::new(Some(target.clone()), x, None));
                }
            }
        }
        if self.targets.contains(last.value.as_ref()) {
            out.push(last.clone());
        }
        out
    }
}

/// Timestamp where the line through (x1, y1), (x2, y2) reaches `y`
fn crossing(x1: i64, y1: f64, x2: i64, y2: f64, y: f64) -> i64 {
    let k = (y2 - y1) / (x2 - x1) as f64;
    let b = y2 - k * x2 as f64;
    ((y - b) / k).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use historian_model::{TagValue, ValueType};

    fn tag(value_type: ValueType, step: bool) -> Tag {
        Tag {
            id: "t".into(),
            value_type,
            step,
            update: false,
            active: true,
        }
    }

    fn targets(values: Vec<TagValue>) -> ValueSet {
        ValueSet {
            values,
            include_null: false,
        }
    }

    #[test]
    fn test_crossing_midpoint() {
        let filter = ValueFilter::new(targets(vec![TagValue::Int(5)]), &tag(ValueType::Int, false));
        let data = vec![DataPoint::good(0_i64, 0), DataPoint::good(10_i64, 1_000)];
        assert_eq!(
            filter.apply(&data),
            vec![DataPoint::new(Some(TagValue::Int(5)), 500, None)]
        );
    }

    #[test]
    fn test_falling_crossing() {
        let filter = ValueFilter::new(
            targets(vec![TagValue::Double(2.5)]),
            &tag(ValueType::Double, false),
        );
        let data = vec![DataPoint::good(10.0, 0), DataPoint::good(0.0, 100)];
        let out = filter.apply(&data);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, 75);
    }

    #[test]
    fn test_exact_matches_and_last_point() {
        let filter = ValueFilter::new(targets(vec![TagValue::Int(5)]), &tag(ValueType::Int, false));
        let data = vec![
            DataPoint::good(5_i64, 0),
            DataPoint::good(5_i64, 10),
            DataPoint::good(5_i64, 20),
        ];
        assert_eq!(filter.apply(&data), data);
    }

    #[test]
    fn test_null_pairs_skipped() {
        let filter = ValueFilter::new(targets(vec![TagValue::Int(5)]), &tag(ValueType::Int, false));
        let data = vec![DataPoint::good(0_i64, 0), DataPoint::null(10), DataPoint::good(10_i64, 20)];
        assert!(filter.apply(&data).is_empty());
    }

    #[test]
    fn test_step_tag_exact_only() {
        let filter = ValueFilter::new(targets(vec![TagValue::Int(5)]), &tag(ValueType::Int, true));
        let data = vec![
            DataPoint::good(0_i64, 0),
            DataPoint::good(10_i64, 10),
            DataPoint::good(5_i64, 20),
        ];
        assert_eq!(filter.apply(&data), vec![DataPoint::good(5_i64, 20)]);
    }

    #[test]
    fn test_string_tag_exact_with_null() {
        let set = ValueSet {
            values: vec![TagValue::from("on")],
            include_null: true,
        };
        let filter = ValueFilter::new(set, &tag(ValueType::String, false));
        let data = vec![
            DataPoint::good("off", 0),
            DataPoint::good("on", 10),
            DataPoint::null(20),
        ];
        assert_eq!(filter.apply(&data).len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let filter = ValueFilter::new(targets(vec![TagValue::Int(5)]), &tag(ValueType::Int, false));
        assert!(filter.apply(&[]).is_empty());
    }
}
