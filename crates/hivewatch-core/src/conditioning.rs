//! Robust averaging of noisy analog samples.
//!
//! Outlier rejection depends on how many valid samples are available:
//!
//! | Valid samples | Rejection |
//! |---------------|-----------|
//! | 1-2 | none, plain mean |
//! | 3-49 | drop the single lowest and single highest sample |
//! | 50+ | 1.3 x IQR fences, kept only if at least 75% of samples survive |
//!
//! Non-finite samples (NaN, infinities) are discarded before anything else.
//!
//! # Example
//!
//! ```
//! use hivewatch_core::conditioning::condition;
//!
//! let value = condition(&[10.0, 10.2, 9.9, 10.1, 50.0]).unwrap();
//! assert!((value.mean - 10.1).abs() < 1e-9);
//! assert_eq!(value.outliers_removed, 2);
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sample count at which IQR rejection replaces min/max trimming.
pub const IQR_MIN_SAMPLES: usize = 50;

/// Sample count at which min/max trimming starts.
pub const TRIM_MIN_SAMPLES: usize = 3;

/// Fence multiplier applied to the interquartile range.
pub const IQR_FENCE: f64 = 1.3;

/// Minimum fraction of samples the IQR filter must retain to be applied.
pub const IQR_MIN_RETAINED: f64 = 0.75;

/// z-score for a two-sided 95% confidence interval.
pub const Z_95: f64 = 1.96;

/// Outlier rejection applied to a sample set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Too few samples; nothing rejected.
    None,
    /// Single lowest and highest samples dropped.
    TrimExtremes,
    /// IQR fences applied.
    Iqr,
    /// IQR fences would have removed too much; all samples kept.
    IqrSkipped,
}

/// Stability grade derived from the coefficient of variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Exceptional,
    Excellent,
    VeryGood,
    Good,
    Fair,
    Poor,
}

impl Stability {
    /// Grade a CV given in percent.
    pub fn from_cv(cv: f64) -> Self {
        let cv = cv.abs();
        if cv < 0.5 {
            Stability::Exceptional
        } else if cv < 1.0 {
            Stability::Excellent
        } else if cv < 2.0 {
            Stability::VeryGood
        } else if cv < 5.0 {
            Stability::Good
        } else if cv < 10.0 {
            Stability::Fair
        } else {
            Stability::Poor
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stability::Exceptional => "exceptional",
            Stability::Excellent => "excellent",
            Stability::VeryGood => "very good",
            Stability::Good => "good",
            Stability::Fair => "fair",
            Stability::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Summary statistics of a conditioned sample set.
///
/// All figures describe the samples that survived outlier rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStatistics {
    /// Valid samples before rejection.
    pub input_count: usize,
    /// Non-finite samples discarded.
    pub discarded: usize,
    /// Samples used for the statistics.
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (n - 1), when at least two samples remain.
    pub stdev: Option<f64>,
    pub variance: Option<f64>,
    /// Standard error of the mean.
    pub sem: Option<f64>,
    /// Coefficient of variation in percent. Absent when the mean is zero.
    pub cv: Option<f64>,
    /// 95% confidence interval of the mean.
    pub ci95: Option<(f64, f64)>,
    pub outliers_removed: usize,
    pub rejection: Rejection,
}

/// The value the collector actually stores, plus its quality indicators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionedValue {
    pub mean: f64,
    pub median: f64,
    pub stdev: Option<f64>,
    pub cv: Option<f64>,
    pub outliers_removed: usize,
}

impl MeasurementStatistics {
    /// Compute statistics over raw samples.
    ///
    /// Returns [`Error::InsufficientData`] when no finite sample is present.
    pub fn compute(samples: &[f64]) -> Result<Self> {
        let mut valid: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        let discarded = samples.len() - valid.len();
        if valid.is_empty() {
            return Err(Error::InsufficientData {
                required: 1,
                actual: 0,
            });
        }

        valid.sort_by(f64::total_cmp);
        let input_count = valid.len();

        let (kept, rejection): (&[f64], Rejection) = if input_count >= IQR_MIN_SAMPLES {
            iqr_filter(&valid)
        } else if input_count >= TRIM_MIN_SAMPLES {
            (&valid[1..input_count - 1], Rejection::TrimExtremes)
        } else {
            (&valid[..], Rejection::None)
        };

        Ok(Self::from_sorted(kept, input_count, discarded, rejection))
    }

    fn from_sorted(
        kept: &[f64],
        input_count: usize,
        discarded: usize,
        rejection: Rejection,
    ) -> Self {
        let n = kept.len();
        let min = kept[0];
        let max = kept[n - 1];
        let mean = kept.iter().sum::<f64>() / n as f64;
        let median = percentile(kept, 50.0);

        let (stdev, variance, sem, ci95) = if n >= 2 {
            let variance = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            let stdev = variance.sqrt();
            let sem = stdev / (n as f64).sqrt();
            (
                Some(stdev),
                Some(variance),
                Some(sem),
                Some((mean - Z_95 * sem, mean + Z_95 * sem)),
            )
        } else {
            (None, None, None, None)
        };

        let cv = match stdev {
            Some(sd) if mean != 0.0 => Some(sd / mean.abs() * 100.0),
            _ => None,
        };

        Self {
            input_count,
            discarded,
            count: n,
            min,
            max,
            range: max - min,
            mean,
            median,
            stdev,
            variance,
            sem,
            cv,
            ci95,
            outliers_removed: input_count - n,
            rejection,
        }
    }

    /// Reduce to the stored value and its quality indicators.
    pub fn conditioned(&self) -> ConditionedValue {
        ConditionedValue {
            mean: self.mean,
            median: self.median,
            stdev: self.stdev,
            cv: self.cv,
            outliers_removed: self.outliers_removed,
        }
    }

    /// Stability grade, if a CV is available.
    pub fn stability(&self) -> Option<Stability> {
        self.cv.map(Stability::from_cv)
    }
}

/// Condition raw samples into a single value.
pub fn condition(samples: &[f64]) -> Result<ConditionedValue> {
    MeasurementStatistics::compute(samples).map(|s| s.conditioned())
}

/// Percentile of sorted data using linear interpolation between order
/// statistics (`p` in 0..=100).
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn iqr_filter(sorted: &[f64]) -> (&[f64], Rejection) {
    let q1 = percentile(sorted, 25.0);
    let q3 = percentile(sorted, 75.0);
    let iqr = q3 - q1;
    let lower = q1 - IQR_FENCE * iqr;
    let upper = q3 + IQR_FENCE * iqr;

    // Sorted input, so the survivors are one contiguous window.
    let start = sorted.partition_point(|v| *v < lower);
    let end = sorted.partition_point(|v| *v <= upper);
    let kept = &sorted[start..end];

    if kept.len() as f64 >= IQR_MIN_RETAINED * sorted.len() as f64 {
        (kept, Rejection::Iqr)
    } else {
        (sorted, Rejection::IqrSkipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        let err = condition(&[]).unwrap_err();
        assert!(matches!(err, Error::InsufficientData { actual: 0, .. }));
    }

    #[test]
    fn test_only_non_finite_is_insufficient() {
        let err = condition(&[f64::NAN, f64::INFINITY, f64::NEG_INFINITY]).unwrap_err();
        assert!(matches!(err, Error::InsufficientData { .. }));
    }

    #[test]
    fn test_single_sample() {
        let stats = MeasurementStatistics::compute(&[42.0]).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.median, 42.0);
        assert!(stats.stdev.is_none());
        assert!(stats.cv.is_none());
        assert!(stats.ci95.is_none());
        assert_eq!(stats.rejection, Rejection::None);
    }

    #[test]
    fn test_two_samples_plain_mean() {
        let stats = MeasurementStatistics::compute(&[10.0, 1000.0]).unwrap();
        assert_eq!(stats.outliers_removed, 0);
        assert!(approx(stats.mean, 505.0));
        assert!(stats.stdev.is_some());
    }

    #[test]
    fn test_small_sample_trims_min_and_max() {
        let value = condition(&[10.0, 10.2, 9.9, 10.1, 50.0]).unwrap();
        // Middle three after sorting: 10.0, 10.1, 10.2
        assert!(approx(value.mean, 10.1));
        assert!(approx(value.median, 10.1));
        assert_eq!(value.outliers_removed, 2);
    }

    #[test]
    fn test_three_samples_keep_the_middle_one() {
        let stats = MeasurementStatistics::compute(&[5.0, 1.0, 9.0]).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.rejection, Rejection::TrimExtremes);
    }

    #[test]
    fn test_non_finite_samples_discarded_before_trimming() {
        let stats = MeasurementStatistics::compute(&[1.0, f64::NAN, 2.0, 3.0]).unwrap();
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.input_count, 3);
        assert_eq!(stats.mean, 2.0);
    }

    #[test]
    fn test_iqr_rejects_spikes() {
        let mut samples: Vec<f64> = (0..50).map(|i| 100.0 + (i % 5) as f64 * 0.1 - 0.2).collect();
        samples.extend([10_000.0, 10_000.0, 10_000.0]);

        let stats = MeasurementStatistics::compute(&samples).unwrap();
        assert_eq!(stats.rejection, Rejection::Iqr);
        assert_eq!(stats.outliers_removed, 3);
        assert_eq!(stats.count, 50);
        assert!((stats.mean - 100.0).abs() < 0.2);
        assert!(stats.max < 101.0);
    }

    #[test]
    fn test_iqr_skipped_when_too_much_would_be_removed() {
        // 70 identical values collapse the IQR to zero, so the fences would
        // drop 30% of the samples.
        let mut samples = vec![0.0; 15];
        samples.extend(vec![100.0; 70]);
        samples.extend(vec![200.0; 15]);

        let stats = MeasurementStatistics::compute(&samples).unwrap();
        assert_eq!(stats.rejection, Rejection::IqrSkipped);
        assert_eq!(stats.outliers_removed, 0);
        assert_eq!(stats.count, 100);
        assert!(approx(stats.mean, 100.0));
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert!(approx(percentile(&data, 25.0), 1.75));
        assert!(approx(percentile(&data, 50.0), 2.5));
        assert!(approx(percentile(&data, 75.0), 3.25));
        assert!(approx(percentile(&data, 0.0), 1.0));
        assert!(approx(percentile(&data, 100.0), 4.0));
    }

    #[test]
    fn test_dispersion_figures() {
        // 5 samples trimmed to [2, 3, 4]
        let stats = MeasurementStatistics::compute(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert!(approx(stats.mean, 3.0));
        assert!(approx(stats.variance.unwrap(), 1.0));
        assert!(approx(stats.stdev.unwrap(), 1.0));
        let sem = 1.0 / 3f64.sqrt();
        assert!(approx(stats.sem.unwrap(), sem));
        let (lo, hi) = stats.ci95.unwrap();
        assert!(approx(lo, 3.0 - 1.96 * sem));
        assert!(approx(hi, 3.0 + 1.96 * sem));
        assert!(approx(stats.cv.unwrap(), 100.0 / 3.0));
        assert!(approx(stats.range, 2.0));
    }

    #[test]
    fn test_cv_absent_for_zero_mean() {
        let stats = MeasurementStatistics::compute(&[-1.0, 1.0]).unwrap();
        assert_eq!(stats.mean, 0.0);
        assert!(stats.cv.is_none());
        assert!(stats.stability().is_none());
    }

    #[test]
    fn test_cv_positive_for_negative_mean() {
        let stats = MeasurementStatistics::compute(&[-101.0, -99.0]).unwrap();
        assert!(stats.cv.unwrap() > 0.0);
    }

    #[test]
    fn test_stability_grades() {
        assert_eq!(Stability::from_cv(0.1), Stability::Exceptional);
        assert_eq!(Stability::from_cv(0.7), Stability::Excellent);
        assert_eq!(Stability::from_cv(1.5), Stability::VeryGood);
        assert_eq!(Stability::from_cv(4.9), Stability::Good);
        assert_eq!(Stability::from_cv(9.0), Stability::Fair);
        assert_eq!(Stability::from_cv(10.0), Stability::Poor);
        assert_eq!(Stability::VeryGood.to_string(), "very good");
    }

    proptest! {
        #[test]
        fn prop_mean_within_input_bounds(samples in prop::collection::vec(-1.0e6f64..1.0e6, 1..200)) {
            let stats = MeasurementStatistics::compute(&samples).unwrap();
            let lo = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(stats.mean >= lo - 1e-6 && stats.mean <= hi + 1e-6);
            prop_assert!(stats.min <= stats.median && stats.median <= stats.max);
        }

        #[test]
        fn prop_rejection_never_drops_more_than_a_quarter_when_large(
            samples in prop::collection::vec(-1.0e3f64..1.0e3, 50..300)
        ) {
            let stats = MeasurementStatistics::compute(&samples).unwrap();
            prop_assert!(stats.count as f64 >= IQR_MIN_RETAINED * samples.len() as f64);
            prop_assert_eq!(stats.count + stats.outliers_removed, samples.len());
        }
    }
}
