//! Weighted-median aggregation with outlier rejection.
//!
//! Readings are combined in two passes: a weighted median over every reading,
//! rejection of readings deviating from it by more than the tolerance, and a
//! second weighted median over the survivors.

use pulse_chain::{PulseData, SourceId};
use std::collections::BTreeMap;

use crate::error::AggregationError;

/// Reading excluded from the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Outlier {
    pub source: SourceId,
    pub value: f64,
    /// First-pass median the value was compared against
    pub median: f64,
    /// Deviation from the median (relative, absolute when the median is zero)
    pub deviation: f64,
}

/// Combined value of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateValue {
    /// Weighted median of the surviving readings
    pub value: f64,
    /// Sources whose readings contributed, in input order
    pub contributors: Vec<SourceId>,
    /// Readings rejected as outliers
    pub outliers: Vec<Outlier>,
    /// Agreement indicator in `[0, 1]`
    pub confidence: f64,
}

/// Pure combination step, parameterised by tolerance and quorum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationAlgorithm {
    tolerance: f64,
    quorum: usize,
}

#[derive(Debug, Clone, Copy)]
struct Point<'a> {
    source: &'a str,
    value: f64,
    weight: f64,
}

impl AggregationAlgorithm {
    pub fn new(tolerance: f64, quorum: usize) -> Self {
        Self { tolerance, quorum }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Combine readings into one value.
    ///
    /// Sources missing from `weights` weigh 1.0.
    pub fn combine(
        &self,
        readings: &[PulseData],
        weights: &BTreeMap<SourceId, f64>,
    ) -> Result<AggregateValue, AggregationError> {
        match readings {
            [] => Err(AggregationError::NoReadings),
            [only] => Ok(AggregateValue {
                value: only.value,
                contributors: vec![only.source.clone()],
                outliers: Vec::new(),
                confidence: 0.0,
            }),
            _ => self.combine_many(readings, weights),
        }
    }

    fn combine_many(
        &self,
        readings: &[PulseData],
        weights: &BTreeMap<SourceId, f64>,
    ) -> Result<AggregateValue, AggregationError> {
        let points: Vec<Point<'_>> = readings
            .iter()
            .map(|r| Point {
                source: &r.source,
                value: r.value,
                weight: weights.get(&r.source).copied().unwrap_or(1.0),
            })
            .collect();

        let first_median = weighted_median(&points);

        let mut survivors = Vec::with_capacity(points.len());
        let mut outliers = Vec::new();
        for point in &points {
            let deviation = deviation(point.value, first_median);
            if deviation > self.tolerance {
                outliers.push(Outlier {
                    source: point.source.to_string(),
                    value: point.value,
                    median: first_median,
                    deviation,
                });
            } else {
                survivors.push(*point);
            }
        }

        if survivors.len() < self.quorum {
            return Err(AggregationError::QuorumLost {
                required: self.quorum,
                survivors: survivors.len(),
                outliers,
            });
        }

        let value = weighted_median(&survivors);
        let confidence = self.confidence(&points, &survivors, value);

        Ok(AggregateValue {
            value,
            contributors: survivors.iter().map(|p| p.source.to_string()).collect(),
            outliers,
            confidence,
        })
    }

    /// Surviving weight share scaled by how tightly survivors agree.
    fn confidence(&self, all: &[Point<'_>], survivors: &[Point<'_>], median: f64) -> f64 {
        let total: f64 = all.iter().map(|p| p.weight).sum();
        let kept: f64 = survivors.iter().map(|p| p.weight).sum();
        let share = if total > 0.0 {
            kept / total
        } else {
            survivors.len() as f64 / all.len() as f64
        };

        let max_deviation = survivors
            .iter()
            .map(|p| deviation(p.value, median))
            .fold(0.0_f64, f64::max);
        let agreement = 1.0 - max_deviation / self.tolerance;

        (share * agreement).clamp(0.0, 1.0)
    }
}

/// Deviation of `value` from `median`: relative, or absolute when the median is zero.
fn deviation(value: f64, median: f64) -> f64 {
    if median == 0.0 {
        value.abs()
    } else {
        (value - median).abs() / median.abs()
    }
}

/// Weighted median over a non-empty set.
///
/// Points are ordered by (value, source). When the cumulative weight lands
/// exactly on half the total, the tie between that point and the next
/// weighted point goes to the lower source identifier. All-zero weights
/// fall back to equal weights.
fn weighted_median(points: &[Point<'_>]) -> f64 {
    let mut sorted: Vec<Point<'_>> = points.to_vec();
    sorted.sort_by(|a, b| a.value.total_cmp(&b.value).then_with(|| a.source.cmp(b.source)));

    let mut total: f64 = sorted.iter().map(|p| p.weight).sum();
    if total <= 0.0 {
        for point in &mut sorted {
            point.weight = 1.0;
        }
        total = sorted.len() as f64;
    }

    let half = total / 2.0;
    let epsilon = total * 1e-12;
    let mut cumulative = 0.0;

    for (i, point) in sorted.iter().enumerate() {
        if point.weight <= 0.0 {
            continue;
        }
        cumulative += point.weight;

        if (cumulative - half).abs() <= epsilon {
            let next = sorted[i + 1..].iter().find(|p| p.weight > 0.0);
            return match next {
                Some(next) if next.source < point.source => next.value,
                _ => point.value,
            };
        }

        if cumulative > half {
            return point.value;
        }
    }

    // Unreachable for a non-empty set with positive total weight
    sorted.last().map(|p| p.value).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;
    use std::time::Duration;

    fn reading(source: &str, value: f64) -> PulseData {
        PulseData {
            source: source.to_string(),
            value,
            pulse_id: 1,
            data_hash: B256::ZERO,
            reported_at: 1_700_000_000,
            latency: Duration::from_millis(50),
        }
    }

    fn weights(entries: &[(&str, f64)]) -> BTreeMap<SourceId, f64> {
        entries.iter().map(|(s, w)| (s.to_string(), *w)).collect()
    }

    #[test]
    fn test_no_readings() {
        let algo = AggregationAlgorithm::new(0.05, 1);
        assert_eq!(
            algo.combine(&[], &BTreeMap::new()),
            Err(AggregationError::NoReadings)
        );
    }

    #[test]
    fn test_single_reading_minimal_confidence() {
        let algo = AggregationAlgorithm::new(0.05, 1);
        let result = algo.combine(&[reading("a", 94.0)], &BTreeMap::new()).unwrap();

        assert_eq!(result.value, 94.0);
        assert_eq!(result.contributors, vec!["a".to_string()]);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_equal_values_ignore_weights() {
        let algo = AggregationAlgorithm::new(0.01, 3);
        let readings = vec![reading("a", 42.0), reading("b", 42.0), reading("c", 42.0)];
        let w = weights(&[("a", 10.0), ("b", 0.5), ("c", 0.0)]);

        let result = algo.combine(&readings, &w).unwrap();
        assert_eq!(result.value, 42.0);
        assert!(result.outliers.is_empty());
        assert_eq!(result.contributors.len(), 3);
    }

    #[test]
    fn test_outlier_rejected() {
        let algo = AggregationAlgorithm::new(0.05, 3);
        let readings = vec![
            reading("a", 10.0),
            reading("b", 10.1),
            reading("c", 9.9),
            reading("d", 1000.0),
        ];

        let result = algo.combine(&readings, &BTreeMap::new()).unwrap();
        assert_eq!(result.value, 10.0);
        assert_eq!(result.outliers.len(), 1);
        assert_eq!(result.outliers[0].source, "d");
        assert_eq!(result.contributors, vec!["a", "b", "c"]);
        assert!(result.confidence > 0.0 && result.confidence < 1.0);
    }

    #[test]
    fn test_quorum_lost_after_rejection() {
        let algo = AggregationAlgorithm::new(0.05, 3);
        let readings = vec![reading("a", 10.0), reading("b", 10.2), reading("c", 50.0)];

        match algo.combine(&readings, &BTreeMap::new()) {
            Err(AggregationError::QuorumLost {
                required,
                survivors,
                outliers,
            }) => {
                assert_eq!(required, 3);
                assert_eq!(survivors, 2);
                assert_eq!(outliers.len(), 1);
                assert_eq!(outliers[0].source, "c");
                assert_eq!(outliers[0].median, 10.2);
            }
            other => panic!("expected quorum loss, got {:?}", other),
        }
    }

    #[test]
    fn test_weighted_median_follows_weight() {
        let algo = AggregationAlgorithm::new(1.0, 1);
        let readings = vec![reading("a", 90.0), reading("b", 91.0), reading("c", 95.0)];
        let w = weights(&[("a", 1.0), ("b", 1.0), ("c", 5.0)]);

        assert_eq!(algo.combine(&readings, &w).unwrap().value, 95.0);
    }

    #[test]
    fn test_tie_prefers_lowest_source_id() {
        let algo = AggregationAlgorithm::new(1.0, 1);

        // Cumulative weight hits exactly half after the first point
        let readings = vec![reading("b", 90.0), reading("a", 92.0)];
        assert_eq!(algo.combine(&readings, &BTreeMap::new()).unwrap().value, 92.0);

        let readings = vec![reading("a", 90.0), reading("b", 92.0)];
        assert_eq!(algo.combine(&readings, &BTreeMap::new()).unwrap().value, 90.0);
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_equal() {
        let algo = AggregationAlgorithm::new(1.0, 1);
        let readings = vec![reading("a", 1.0), reading("b", 2.0), reading("c", 3.0)];
        let w = weights(&[("a", 0.0), ("b", 0.0), ("c", 0.0)]);

        assert_eq!(algo.combine(&readings, &w).unwrap().value, 2.0);
    }

    #[test]
    fn test_zero_median_uses_absolute_deviation() {
        assert_eq!(deviation(0.02, 0.0), 0.02);
        assert!((deviation(11.0, 10.0) - 0.1).abs() < 1e-12);

        let algo = AggregationAlgorithm::new(0.05, 1);
        let readings = vec![reading("a", 0.0), reading("b", 0.0), reading("c", 0.5)];
        let result = algo.combine(&readings, &BTreeMap::new()).unwrap();
        assert_eq!(result.value, 0.0);
        assert_eq!(result.outliers[0].source, "c");
    }

    #[test]
    fn test_full_agreement_confidence() {
        let algo = AggregationAlgorithm::new(0.05, 2);
        let readings = vec![reading("a", 80.0), reading("b", 80.0)];

        let result = algo.combine(&readings, &BTreeMap::new()).unwrap();
        assert_eq!(result.confidence, 1.0);
    }
}
