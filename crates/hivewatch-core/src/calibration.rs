//! Guided load-cell calibration.
//!
//! A [`Calibrator`] walks an operator through the steps of a calibration
//! procedure, samples the load cell at each step and derives a
//! [`CalibrationProfile`]:
//!
//! - **Three-point** (default): empty scale (diagnostic baseline), tare with
//!   the platform in place (`zero_offset`), then platform plus a known weight.
//! - **Two-point**: zero load (`zero_offset`), then the known weight.
//!
//! In both modes `reference_unit = (loaded_mean - zero_mean) / known_weight`.
//! Step means come from [`MeasurementStatistics`], so spikes are rejected
//! with the IQR method at the default 150 samples per step.
//!
//! A failed run never touches the existing profile: use
//! [`Calibrator::run_and_save`] to persist only on success.

use core::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use hivewatch_types::{
    CalibrationDiagnostics, CalibrationMode, CalibrationProfile, StepSummary, convert,
};

use crate::bounded::read_samples_with_timeout;
use crate::conditioning::{ConditionedValue, MeasurementStatistics};
use crate::error::{Error, Result};
use crate::profile::ProfileFile;
use crate::traits::WeightSensor;

/// Options for a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOptions {
    pub mode: CalibrationMode,
    /// Raw samples collected per step.
    pub samples_per_step: usize,
    /// Minimum valid samples a step must yield.
    pub min_samples: usize,
    /// Raw samples per self-test reading.
    pub test_samples: usize,
    /// Deadline for collecting one step's samples.
    pub step_timeout: Duration,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::ThreePoint,
            samples_per_step: 150,
            min_samples: 10,
            test_samples: 15,
            step_timeout: Duration::from_secs(60),
        }
    }
}

/// A step the operator must prepare before sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// Nothing on the load cell.
    EmptyScale,
    /// Nothing on the load cell; sets the zero point in two-point mode.
    ZeroLoad,
    /// Platform (board, hive floor) in place, nothing on it.
    Tare,
    /// Known weight on the scale (on the platform in three-point mode).
    KnownWeight { weight: f64 },
    /// Self-test: platform only.
    VerifyTare,
    /// Self-test: platform plus the known weight.
    VerifyWeight { weight: f64 },
}

impl fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationStep::EmptyScale => write!(f, "Remove everything from the scale"),
            CalibrationStep::ZeroLoad => {
                write!(f, "Remove everything from the scale to set the zero point")
            }
            CalibrationStep::Tare => write!(f, "Place the empty platform on the scale"),
            CalibrationStep::KnownWeight { weight } => {
                write!(f, "Place the known weight ({weight}) on the scale")
            }
            CalibrationStep::VerifyTare => {
                write!(f, "Self-test: leave only the platform on the scale")
            }
            CalibrationStep::VerifyWeight { weight } => {
                write!(f, "Self-test: put the known weight ({weight}) back on the platform")
            }
        }
    }
}

/// Interaction with the person performing the calibration.
#[async_trait]
pub trait CalibrationOperator: Send + Sync {
    /// Wait until the scale is prepared for `step`.
    ///
    /// Returning an error (typically [`Error::Cancelled`]) aborts the run.
    async fn prepare(&self, step: CalibrationStep) -> Result<()>;

    /// Called with the statistics of each completed step.
    async fn step_completed(&self, _step: CalibrationStep, _stats: &MeasurementStatistics) {}
}

/// Accuracy grade of a self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationGrade {
    Excellent,
    VeryGood,
    Good,
    Acceptable,
    Poor,
}

impl CalibrationGrade {
    /// Grade a percent error.
    pub fn from_percent_error(error: f64) -> Self {
        let error = error.abs();
        if error < 0.5 {
            CalibrationGrade::Excellent
        } else if error < 1.0 {
            CalibrationGrade::VeryGood
        } else if error < 3.0 {
            CalibrationGrade::Good
        } else if error < 5.0 {
            CalibrationGrade::Acceptable
        } else {
            CalibrationGrade::Poor
        }
    }
}

impl fmt::Display for CalibrationGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalibrationGrade::Excellent => "excellent",
            CalibrationGrade::VeryGood => "very good",
            CalibrationGrade::Good => "good",
            CalibrationGrade::Acceptable => "acceptable",
            CalibrationGrade::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Result of verifying a fresh profile against the known weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfTestReport {
    /// Reading with only the platform on the scale (expected near zero).
    pub tare_reading: f64,
    /// Reading with the known weight on the platform.
    pub weight_reading: f64,
    pub expected: f64,
    pub absolute_error: f64,
    pub percent_error: f64,
    pub grade: CalibrationGrade,
}

/// A calibrated weight measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    /// Weight in calibration units.
    pub value: f64,
    /// Conditioned raw counts the weight was derived from.
    pub raw: ConditionedValue,
}

/// Runs calibration procedures against a load cell.
pub struct Calibrator<'a, W: WeightSensor + ?Sized> {
    sensor: &'a W,
    options: CalibrationOptions,
}

impl<'a, W: WeightSensor + ?Sized> Calibrator<'a, W> {
    pub fn new(sensor: &'a W, options: CalibrationOptions) -> Self {
        Self { sensor, options }
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    /// Run the configured procedure and return the derived profile.
    pub async fn run(
        &self,
        known_weight: f64,
        operator: &dyn CalibrationOperator,
    ) -> Result<CalibrationProfile> {
        validate_known_weight(known_weight)?;
        let per_step = self.options.samples_per_step;
        info!(
            "Starting {} calibration ({} steps) with known weight {} ({} samples per step)",
            self.options.mode,
            self.options.mode.steps(),
            known_weight,
            per_step
        );

        let (empty, zero_step) = match self.options.mode {
            CalibrationMode::ThreePoint => (
                Some(self.step(CalibrationStep::EmptyScale, per_step, operator).await?),
                CalibrationStep::Tare,
            ),
            CalibrationMode::TwoPoint => (None, CalibrationStep::ZeroLoad),
        };
        let zero = self.step(zero_step, per_step, operator).await?;
        let loaded = self
            .step(
                CalibrationStep::KnownWeight {
                    weight: known_weight,
                },
                per_step,
                operator,
            )
            .await?;

        let profile = derive_profile(
            self.options.mode,
            known_weight,
            per_step,
            empty.as_ref(),
            &zero,
            &loaded,
        )?;
        info!(
            "Calibration derived reference_unit={:.6} zero_offset={:.2}",
            profile.reference_unit, profile.zero_offset
        );
        Ok(profile)
    }

    /// Run the procedure and persist the profile, only if the run succeeds.
    pub async fn run_and_save(
        &self,
        known_weight: f64,
        operator: &dyn CalibrationOperator,
        file: &ProfileFile,
    ) -> Result<CalibrationProfile> {
        let profile = self.run(known_weight, operator).await?;
        file.save(&profile)?;
        Ok(profile)
    }

    /// Check a profile by weighing the platform alone and then the known
    /// weight. Diagnostic only.
    pub async fn self_test(
        &self,
        profile: &CalibrationProfile,
        known_weight: f64,
        operator: &dyn CalibrationOperator,
    ) -> Result<SelfTestReport> {
        validate_known_weight(known_weight)?;
        let n = self.options.test_samples;

        let tare = self.step(CalibrationStep::VerifyTare, n, operator).await?;
        let loaded = self
            .step(
                CalibrationStep::VerifyWeight {
                    weight: known_weight,
                },
                n,
                operator,
            )
            .await?;

        let tare_reading = profile.to_units(tare.mean)?;
        let weight_reading = profile.to_units(loaded.mean)?;
        let absolute_error = (weight_reading - known_weight).abs();
        let percent_error = absolute_error / known_weight * 100.0;
        let grade = CalibrationGrade::from_percent_error(percent_error);

        info!(
            "Self-test: tare {:.2}, weight {:.2} (expected {}), error {:.2}% ({})",
            tare_reading, weight_reading, known_weight, percent_error, grade
        );

        Ok(SelfTestReport {
            tare_reading,
            weight_reading,
            expected: known_weight,
            absolute_error,
            percent_error,
            grade,
        })
    }

    /// Sample the load cell and compute statistics over the raw counts.
    ///
    /// Fails with [`Error::CalibrationFailed`] if fewer than `min_samples`
    /// valid samples were collected.
    pub async fn measure(&self, samples: usize) -> Result<MeasurementStatistics> {
        let raw =
            read_samples_with_timeout(self.sensor, samples, self.options.step_timeout).await?;
        let stats = MeasurementStatistics::compute(&raw).map_err(|_| {
            Error::calibration_failed(format!(
                "no valid samples (need at least {})",
                self.options.min_samples
            ))
        })?;
        if stats.input_count < self.options.min_samples {
            return Err(Error::calibration_failed(format!(
                "only {} valid samples collected, need at least {}",
                stats.input_count, self.options.min_samples
            )));
        }
        Ok(stats)
    }

    async fn step(
        &self,
        step: CalibrationStep,
        samples: usize,
        operator: &dyn CalibrationOperator,
    ) -> Result<MeasurementStatistics> {
        operator.prepare(step).await?;
        debug!("Sampling {} readings for step: {}", samples, step);

        let stats = self.measure(samples).await.map_err(|e| match e {
            Error::CalibrationFailed(reason) => {
                Error::calibration_failed(format!("{step}: {reason}"))
            }
            other => other,
        })?;

        if let Some(cv) = stats.cv
            && cv > 5.0
        {
            warn!("Step '{}' is noisy: CV {:.2}%", step, cv);
        }
        operator.step_completed(step, &stats).await;
        Ok(stats)
    }
}

/// Derive a profile from per-step statistics.
pub fn derive_profile(
    mode: CalibrationMode,
    known_weight: f64,
    samples_per_step: usize,
    empty: Option<&MeasurementStatistics>,
    zero: &MeasurementStatistics,
    loaded: &MeasurementStatistics,
) -> Result<CalibrationProfile> {
    validate_known_weight(known_weight)?;

    let reference_unit = (loaded.mean - zero.mean) / known_weight;
    if reference_unit == 0.0 || !reference_unit.is_finite() {
        return Err(Error::calibration_failed(
            "load cell did not respond to the known weight",
        ));
    }

    let precision_cv = [Some(zero), Some(loaded), empty]
        .into_iter()
        .flatten()
        .filter_map(|s| s.cv)
        .reduce(f64::max);

    let diagnostics = CalibrationDiagnostics {
        samples_per_step,
        empty: empty.map(summary),
        zero: summary(zero),
        loaded: summary(loaded),
        tare_raw_difference: empty.map(|e| zero.mean - e.mean),
        precision_cv,
    };

    Ok(CalibrationProfile {
        reference_unit,
        zero_offset: zero.mean,
        calibration_date: OffsetDateTime::now_utc(),
        known_weight_used: known_weight,
        mode,
        diagnostics: Some(diagnostics),
    })
}

/// Weigh the load cell: read `samples` raw counts within `timeout`,
/// condition them and convert through `profile`.
///
/// Fails with [`Error::Conversion`] when uncalibrated, so the caller can
/// record the channel as missing instead of storing a raw or zero value.
pub async fn weigh<W: WeightSensor + ?Sized>(
    sensor: &W,
    profile: Option<&CalibrationProfile>,
    samples: usize,
    timeout: Duration,
) -> Result<WeightReading> {
    let raw = read_samples_with_timeout(sensor, samples, timeout).await?;
    let conditioned = MeasurementStatistics::compute(&raw)?.conditioned();
    let value = convert(profile, conditioned.mean)?;
    Ok(WeightReading {
        value,
        raw: conditioned,
    })
}

fn validate_known_weight(known_weight: f64) -> Result<()> {
    if known_weight > 0.0 && known_weight.is_finite() {
        Ok(())
    } else {
        Err(Error::calibration_failed(format!(
            "known weight must be a positive number, got {known_weight}"
        )))
    }
}

fn summary(stats: &MeasurementStatistics) -> StepSummary {
    StepSummary {
        raw_mean: stats.mean,
        raw_median: stats.median,
        cv: stats.cv,
        samples: stats.input_count,
        outliers_removed: stats.outliers_removed,
    }
}
