//! Robust reduction of latency samples.
//!
//! Provides:
//! - [`SampleSeries`]: append-only sample buffer, sorted once before reduction
//! - Lower median (robust to scheduler-preemption outliers)
//! - Interquartile mean and range (for repeated whole-benchmark estimates)
//! - Mean, standard deviation and coefficient of variation for run-to-run spread

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};

/// Append-only series of measurements, one per trial or run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleSeries {
    values: Vec<f64>,
    sorted: bool,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            sorted: false,
        }
    }

    /// Append a sample; a sorted series becomes unsorted again
    pub fn push(&mut self, value: f64) {
        self.values.push(value);
        self.sorted = false;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Samples in their current order
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Sort in place (once) and return the sorted samples
    pub fn sorted(&mut self) -> &[f64] {
        if !self.sorted {
            self.values.sort_by(|a, b| a.total_cmp(b));
            self.sorted = true;
        }
        &self.values
    }
}

impl FromIterator<f64> for SampleSeries {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            sorted: false,
        }
    }
}

/// Reduction applied to a series; fixed per experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReductionPolicy {
    /// Middle element (lower middle for even lengths)
    Median,
    /// Mean of the middle half after dropping the bottom and top quarters
    InterquartileMean,
}

impl ReductionPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            ReductionPolicy::Median => "median",
            ReductionPolicy::InterquartileMean => "interquartile mean",
        }
    }
}

/// Result of reducing a series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Policy that produced `value`
    pub policy: ReductionPolicy,
    /// Reduced value
    pub value: f64,
    /// `Q3 - Q1`, reported with the interquartile mean
    pub iqr: Option<f64>,
    /// Number of samples reduced
    pub count: usize,
    /// Arithmetic mean of all samples
    pub mean: f64,
    /// Coefficient of variation across all samples
    pub cv: f64,
}

/// Reduce `samples` with `policy`
pub fn reduce(samples: &mut SampleSeries, policy: ReductionPolicy) -> Result<Summary> {
    if samples.is_empty() {
        return Err(BenchError::EmptySamples);
    }

    let sorted = samples.sorted();
    let (value, iqr) = match policy {
        ReductionPolicy::Median => (median(sorted), None),
        ReductionPolicy::InterquartileMean => {
            (interquartile_mean(sorted), Some(interquartile_range(sorted)))
        }
    };

    Ok(Summary {
        policy,
        value,
        iqr,
        count: sorted.len(),
        mean: mean(sorted),
        cv: coefficient_of_variation(sorted),
    })
}

/// Lower median. Expects sorted, non-empty input
pub fn median(sorted_samples: &[f64]) -> f64 {
    sorted_samples[(sorted_samples.len() - 1) / 2]
}

/// Index range `[q1, q3)` of the middle half of `len` sorted samples.
///
/// `len / 4` samples are dropped from each end, so series shorter than
/// four samples keep every element.
pub fn interquartile_bounds(len: usize) -> (usize, usize) {
    let quarter = len / 4;
    (quarter, len - quarter)
}

/// Mean of the middle half. Expects sorted, non-empty input
pub fn interquartile_mean(sorted_samples: &[f64]) -> f64 {
    let (q1, q3) = interquartile_bounds(sorted_samples.len());
    mean(&sorted_samples[q1..q3])
}

/// `Q3 - Q1`, where Q3 is the first sample above the middle half.
///
/// When nothing is dropped (fewer than four samples) Q3 is the maximum.
/// Expects sorted, non-empty input.
pub fn interquartile_range(sorted_samples: &[f64]) -> f64 {
    let (q1, q3) = interquartile_bounds(sorted_samples.len());
    let q3 = q3.min(sorted_samples.len() - 1);
    sorted_samples[q3] - sorted_samples[q1]
}

/// Calculate arithmetic mean
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Calculate standard deviation (population)
pub fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples
        .iter()
        .map(|&x| {
            let diff = x - m;
            diff * diff
        })
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt()
}

/// Calculate coefficient of variation (CV = std_dev / |mean|)
pub fn coefficient_of_variation(samples: &[f64]) -> f64 {
    let m = mean(samples);
    if m == 0.0 {
        return 0.0;
    }
    std_dev(samples) / m.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series(values: &[f64]) -> SampleSeries {
        values.iter().copied().collect()
    }

    #[test]
    fn test_median_odd() {
        let mut s = series(&[5.0, 1.0, 9.0, 3.0, 7.0]);
        let summary = reduce(&mut s, ReductionPolicy::Median).unwrap();
        assert_eq!(summary.value, 5.0);
        assert_eq!(summary.iqr, None);
    }

    #[test]
    fn test_median_even_takes_lower_middle() {
        let mut s = series(&[400.0, 100.0, 300.0, 200.0]);
        let summary = reduce(&mut s, ReductionPolicy::Median).unwrap();
        assert_eq!(summary.value, 200.0);
    }

    #[test]
    fn test_interquartile_mean_five() {
        let mut s = series(&[5.0, 1.0, 9.0, 3.0, 7.0]);
        let summary = reduce(&mut s, ReductionPolicy::InterquartileMean).unwrap();
        assert!((summary.value - 5.0).abs() < 1e-12);
        assert_eq!(summary.iqr, Some(6.0));
    }

    #[test]
    fn test_interquartile_mean_drops_outliers() {
        let mut s = series(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 10_000.0]);
        let summary = reduce(&mut s, ReductionPolicy::InterquartileMean).unwrap();
        // Middle half: 12, 13, 14, 15
        assert!((summary.value - 13.5).abs() < 1e-12);
        assert!(summary.mean > 1_000.0);
    }

    #[test]
    fn test_short_series_keeps_everything() {
        assert_eq!(interquartile_bounds(3), (0, 3));
        let sorted = [1.0, 2.0, 6.0];
        assert!((interquartile_mean(&sorted) - 3.0).abs() < 1e-12);
        assert_eq!(interquartile_range(&sorted), 5.0);
        assert_eq!(interquartile_range(&[4.0]), 0.0);
    }

    #[test]
    fn test_negative_samples_reduce() {
        let mut s = series(&[-3.0, -1.0, 2.0]);
        let summary = reduce(&mut s, ReductionPolicy::InterquartileMean).unwrap();
        assert!((summary.value + 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_series_rejected() {
        let mut s = SampleSeries::new();
        assert!(matches!(
            reduce(&mut s, ReductionPolicy::Median),
            Err(BenchError::EmptySamples)
        ));
    }

    #[test]
    fn test_push_after_sort_resorts() {
        let mut s = series(&[3.0, 1.0]);
        assert_eq!(s.sorted(), &[1.0, 3.0]);
        s.push(2.0);
        assert_eq!(s.sorted(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_std_dev() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&samples) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cv() {
        let steady = [100.0; 4];
        assert!(coefficient_of_variation(&steady).abs() < 0.001);

        let variable = [50.0, 100.0, 150.0, 200.0];
        assert!(coefficient_of_variation(&variable) > 0.3);
    }

    proptest! {
        #[test]
        fn prop_median_permutation_invariant(
            values in proptest::collection::vec(-1e6f64..1e6, 1..64),
            seed in any::<u64>(),
        ) {
            let mut shuffled = values.clone();
            // Deterministic Fisher-Yates driven by an LCG
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let j = ((state >> 33) as usize) % (i + 1);
                shuffled.swap(i, j);
            }

            let a = reduce(&mut series(&values), ReductionPolicy::Median).unwrap();
            let b = reduce(&mut series(&shuffled), ReductionPolicy::Median).unwrap();
            prop_assert_eq!(a.value, b.value);
        }

        #[test]
        fn prop_median_duplication_invariant(
            values in proptest::collection::vec(-1e6f64..1e6, 1..64),
        ) {
            let doubled: Vec<f64> = values.iter().flat_map(|&v| [v, v]).collect();
            let a = reduce(&mut series(&values), ReductionPolicy::Median).unwrap();
            let b = reduce(&mut series(&doubled), ReductionPolicy::Median).unwrap();
            prop_assert_eq!(a.value, b.value);
        }

        #[test]
        fn prop_iqm_near_mean_for_tight_values(
            base in 1.0f64..1e6,
            jitter in proptest::collection::vec(0.0f64..1e-6, 1..64),
        ) {
            let values: Vec<f64> = jitter.iter().map(|j| base + j).collect();
            let summary = reduce(&mut series(&values), ReductionPolicy::InterquartileMean).unwrap();
            prop_assert!((summary.value - summary.mean).abs() <= 1e-5);
        }
    }
}
