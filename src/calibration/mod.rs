//! # Calibration Module
//!
//! The measurement protocol and the curve derived from it.
//!
//! This module handles:
//! - Test parameters and their validation
//! - Deadzone discovery and magnitude-sweep sampling ([`session`])
//! - Thread-safe protocol driver with device/export side effects ([`machine`])
//! - Isotonic curve fitting and the percentage-swapped inverse ([`fitter`])
//! - Writing raw samples, statistics and the compensation table ([`export`])

pub mod export;
pub mod fitter;
pub mod machine;
pub mod session;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operator::OperatorAction;

pub use export::{CsvExporter, ExportSink};
pub use fitter::{CalibrationReport, CurveFitResult, CurveFitter};
pub use machine::CalibrationStateMachine;
pub use session::{build_measurement_magnitudes, MeasurementSample, TestSession, Transition};

/// Smallest accepted number of measurement points.
pub const SAMPLE_COUNT_MIN: u32 = 2;
/// Largest accepted number of measurement points.
pub const SAMPLE_COUNT_MAX: u32 = 100;
/// Smallest accepted number of repeats per point.
pub const REPEATS_MIN: u32 = 1;
/// Largest accepted number of repeats per point.
pub const REPEATS_MAX: u32 = 50;

/// Protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Mode {
    #[default]
    Idle,
    DeadzoneSearch,
    CurveSampling,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => f.write_str("idle"),
            Mode::DeadzoneSearch => f.write_str("deadzone"),
            Mode::CurveSampling => f.write_str("curve"),
        }
    }
}

/// Rejections from the calibration protocol. A rejected event never
/// changes the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    /// User-supplied parameters are out of range
    #[error("invalid test parameters: {0}")]
    Param(String),

    /// No virtual gamepad is enabled
    #[error("virtual gamepad is not enabled")]
    NotReady,

    /// The event has no meaning in the current phase
    #[error("'{action}' ignored in {mode} mode")]
    WrongState { action: OperatorAction, mode: Mode },

    /// Retry requested before anything was recorded
    #[error("nothing recorded yet, nothing to retry")]
    NoPriorSample,
}

/// Which way the right stick is pushed during the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestDirection {
    Right,
    Left,
    Up,
    Down,
}

impl TestDirection {
    /// Stick position (x, y) for a deflection magnitude. Positive Y is up.
    #[must_use]
    pub fn stick(self, magnitude: f64) -> (f32, f32) {
        let m = magnitude as f32;
        match self {
            TestDirection::Right => (m, 0.0),
            TestDirection::Left => (-m, 0.0),
            TestDirection::Up => (0.0, m),
            TestDirection::Down => (0.0, -m),
        }
    }
}

/// Parameters of one test run, validated when the run starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestParams {
    /// Number of measurement points.
    pub sample_count: u32,
    /// Timed rotations per point.
    pub repeats_per_point: u32,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
    /// Deadzone search increment.
    pub deadzone_step: f64,
    /// Deadzone search decrement.
    pub deadzone_back_step: f64,
    pub display_x_max: f64,
    pub display_y_max: f64,
    pub direction: TestDirection,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            sample_count: 8,
            repeats_per_point: 5,
            min_magnitude: 0.10,
            max_magnitude: 1.0,
            deadzone_step: 0.02,
            deadzone_back_step: 0.005,
            display_x_max: 100.0,
            display_y_max: 100.0,
            direction: TestDirection::Right,
        }
    }
}

impl TestParams {
    /// Check every parameter range.
    ///
    /// # Errors
    ///
    /// Returns `CalibrationError::Param` naming the first invalid value.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(SAMPLE_COUNT_MIN..=SAMPLE_COUNT_MAX).contains(&self.sample_count) {
            return Err(CalibrationError::Param(format!(
                "sample_count must be between {} and {}",
                SAMPLE_COUNT_MIN, SAMPLE_COUNT_MAX
            )));
        }

        if !(REPEATS_MIN..=REPEATS_MAX).contains(&self.repeats_per_point) {
            return Err(CalibrationError::Param(format!(
                "repeats_per_point must be between {} and {}",
                REPEATS_MIN, REPEATS_MAX
            )));
        }

        let (mn, mx) = (self.min_magnitude, self.max_magnitude);
        if !(mn.is_finite() && mx.is_finite() && 0.0 <= mn && mn < mx && mx <= 1.0) {
            return Err(CalibrationError::Param(
                "magnitude range must satisfy 0 <= min < max <= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("deadzone_step", self.deadzone_step),
            ("deadzone_back_step", self.deadzone_back_step),
            ("display_x_max", self.display_x_max),
            ("display_y_max", self.display_y_max),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CalibrationError::Param(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }
}
