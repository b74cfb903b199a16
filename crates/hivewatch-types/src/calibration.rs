//! Load-cell calibration profile.
//!
//! A [`CalibrationProfile`] is the linear transform
//! `units = (raw - zero_offset) / reference_unit` produced by a guided
//! calibration run. An absent profile means "uncalibrated", which is a
//! distinct state from a zero reading.

use core::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ConversionError, ParseError};

/// How a profile was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CalibrationMode {
    /// Zero load, then known weight.
    TwoPoint,
    /// Empty scale, tare (platform only), then platform plus known weight.
    #[default]
    ThreePoint,
}

impl CalibrationMode {
    /// Number of measured steps in the procedure.
    #[must_use]
    pub fn steps(&self) -> usize {
        match self {
            CalibrationMode::TwoPoint => 2,
            CalibrationMode::ThreePoint => 3,
        }
    }
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationMode::TwoPoint => write!(f, "two-point"),
            CalibrationMode::ThreePoint => write!(f, "three-point"),
        }
    }
}

impl FromStr for CalibrationMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "two-point" | "two_point" | "2" => Ok(CalibrationMode::TwoPoint),
            "three-point" | "three_point" | "tare" | "3" => Ok(CalibrationMode::ThreePoint),
            _ => Err(ParseError::UnknownCalibrationMode(s.to_string())),
        }
    }
}

/// Statistics of the raw samples collected during one calibration step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepSummary {
    /// Robust mean of the raw counts.
    pub raw_mean: f64,
    /// Median of the raw counts.
    pub raw_median: f64,
    /// Coefficient of variation in percent, if it could be computed.
    pub cv: Option<f64>,
    /// Number of valid samples collected.
    pub samples: usize,
    /// Samples rejected as outliers.
    pub outliers_removed: usize,
}

/// Diagnostic data kept alongside a profile.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationDiagnostics {
    /// Samples requested per step.
    pub samples_per_step: usize,
    /// Empty-scale baseline (three-point mode only).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub empty: Option<StepSummary>,
    /// Zero-load (two-point) or tare (three-point) step.
    pub zero: StepSummary,
    /// Known-weight step.
    pub loaded: StepSummary,
    /// Raw difference between the tare and empty baselines (platform mass in counts).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub tare_raw_difference: Option<f64>,
    /// Largest step CV, a rough indicator of achievable precision.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub precision_cv: Option<f64>,
}

/// A persisted linear calibration for the load cell.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationProfile {
    /// Raw counts per engineering unit. Never zero in a saved profile.
    pub reference_unit: f64,
    /// Raw count at zero load.
    pub zero_offset: f64,
    /// When the calibration was performed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub calibration_date: OffsetDateTime,
    /// Known reference weight placed on the scale.
    pub known_weight_used: f64,
    /// Procedure used to derive the profile.
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: CalibrationMode,
    /// Optional per-step diagnostics.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub diagnostics: Option<CalibrationDiagnostics>,
}

impl CalibrationProfile {
    /// Create a profile without diagnostics, dated now.
    pub fn new(reference_unit: f64, zero_offset: f64, known_weight_used: f64) -> Self {
        Self {
            reference_unit,
            zero_offset,
            calibration_date: OffsetDateTime::now_utc(),
            known_weight_used,
            mode: CalibrationMode::default(),
            diagnostics: None,
        }
    }

    /// True if the profile can convert raw counts.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.reference_unit != 0.0
            && self.reference_unit.is_finite()
            && self.zero_offset.is_finite()
    }

    /// Convert a raw count to engineering units.
    ///
    /// ```
    /// use hivewatch_types::CalibrationProfile;
    ///
    /// let profile = CalibrationProfile::new(2.0, 1000.0, 500.0);
    /// assert_eq!(profile.to_units(3000.0).unwrap(), 1000.0);
    /// ```
    pub fn to_units(&self, raw: f64) -> Result<f64, ConversionError> {
        if !self.is_usable() {
            return Err(ConversionError::Uncalibrated);
        }
        if !raw.is_finite() {
            return Err(ConversionError::NonFinite(raw));
        }
        Ok((raw - self.zero_offset) / self.reference_unit)
    }
}

/// Convert a raw count through an optional profile.
///
/// A missing profile is reported as [`ConversionError::Uncalibrated`].
pub fn convert(profile: Option<&CalibrationProfile>, raw: f64) -> Result<f64, ConversionError> {
    profile
        .ok_or(ConversionError::Uncalibrated)
        .and_then(|p| p.to_units(raw))
}
