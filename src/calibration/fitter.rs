//! # Curve Fitter
//!
//! Turns raw rotation timings into the game's effective response curve and
//! its inverse.
//!
//! ## Pipeline
//!
//! 1. Group samples by magnitude and average the rotation period.
//! 2. Convert each mean period to angular rate: `rate = 2π / mean_seconds`.
//! 3. Force the rates to be non-decreasing with isotonic regression
//!    (pool-adjacent-violators).
//! 4. Anchor the curve at `(deadzone, 0)`.
//! 5. Scale both axes into display units.
//!
//! The inverse curve swaps each point's percentages across the two display
//! ranges, so inverse point `i` always mirrors forward point `i`.

use std::f64::consts::TAU;

use serde::Serialize;
use thiserror::Error;

use super::session::MeasurementSample;
use super::TestParams;

/// Rates at or below this count as zero.
const RATE_EPSILON: f64 = 1e-12;

/// Fitting failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitError {
    /// No sample carried a usable elapsed time
    #[error("no valid timing samples to fit")]
    NoValidSamples,
}

/// Statistics of every sample taken at one magnitude.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagnitudeStats {
    pub magnitude: f64,
    pub count: usize,
    /// Mean rotation period in seconds.
    pub mean: f64,
    /// Sample standard deviation; `None` with a single sample.
    pub std: Option<f64>,
    /// `2π / mean`, radians per second.
    pub angular_rate: f64,
}

/// A point in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

/// One row of the compensation table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompensationRecord {
    /// 1-based.
    pub point_index: usize,
    pub forward_x: f64,
    pub forward_y: f64,
    pub inv_x: f64,
    pub inv_y: f64,
}

/// Forward curve, inverse curve and the table pairing them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveFitResult {
    pub forward_points: Vec<CurvePoint>,
    pub inverse_points: Vec<CurvePoint>,
    pub compensation_table: Vec<CompensationRecord>,
}

/// Everything produced by a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub deadzone: f64,
    pub params: TestParams,
    pub samples: Vec<MeasurementSample>,
    pub stats: Vec<MagnitudeStats>,
    pub fit: CurveFitResult,
}

/// Pool-adjacent-violators isotonic regression.
///
/// Returns the non-decreasing sequence closest to `y` in squared error.
/// Each pooled block takes the mean of the input values it covers.
///
/// # Examples
///
/// ```
/// use stickcal::calibration::fitter::pav_isotonic_fit;
///
/// assert_eq!(pav_isotonic_fit(&[1.0, 3.0, 2.0, 4.0]), vec![1.0, 2.5, 2.5, 4.0]);
/// ```
#[must_use]
pub fn pav_isotonic_fit(y: &[f64]) -> Vec<f64> {
    // (sum, weight) per block; blocks cover consecutive inputs in order.
    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(y.len());

    for &value in y {
        blocks.push((value, 1));
        while blocks.len() >= 2 {
            let (s2, w2) = blocks[blocks.len() - 1];
            let (s1, w1) = blocks[blocks.len() - 2];
            if s1 / w1 as f64 <= s2 / w2 as f64 {
                break;
            }
            blocks.pop();
            if let Some(prev) = blocks.last_mut() {
                *prev = (s1 + s2, w1 + w2);
            }
        }
    }

    blocks
        .into_iter()
        .flat_map(|(sum, weight)| std::iter::repeat(sum / weight as f64).take(weight))
        .collect()
}

/// Swap a point's x and y percentages across the display ranges.
///
/// The result is clamped into `[0, x_max] x [0, y_max]`.
#[must_use]
pub fn percentage_swap(point: CurvePoint, x_max: f64, y_max: f64) -> CurvePoint {
    let px = if y_max <= RATE_EPSILON { 0.0 } else { point.y / y_max };
    let py = if x_max <= RATE_EPSILON { 0.0 } else { point.x / x_max };
    CurvePoint {
        x: (px * x_max).clamp(0.0, x_max.max(0.0)),
        y: (py * y_max).clamp(0.0, y_max.max(0.0)),
    }
}

/// Group valid samples by magnitude in ascending order.
///
/// Samples with a non-finite or non-positive elapsed time are skipped.
#[must_use]
pub fn summarize(samples: &[MeasurementSample]) -> Vec<MagnitudeStats> {
    let mut valid: Vec<&MeasurementSample> = samples
        .iter()
        .filter(|s| s.elapsed_seconds.is_finite() && s.elapsed_seconds > 0.0)
        .collect();
    valid.sort_by(|a, b| a.magnitude.total_cmp(&b.magnitude));

    let mut stats = Vec::new();
    let mut start = 0;
    while start < valid.len() {
        let magnitude = valid[start].magnitude;
        let end = valid[start..]
            .iter()
            .position(|s| s.magnitude != magnitude)
            .map_or(valid.len(), |n| start + n);
        let group = &valid[start..end];

        let count = group.len();
        let mean = group.iter().map(|s| s.elapsed_seconds).sum::<f64>() / count as f64;
        let std = (count > 1).then(|| {
            let var = group
                .iter()
                .map(|s| (s.elapsed_seconds - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            var.sqrt()
        });
        stats.push(MagnitudeStats {
            magnitude,
            count,
            mean,
            std,
            angular_rate: TAU / mean,
        });
        start = end;
    }
    stats
}

/// Fits the response curve for one set of display settings.
#[derive(Debug, Clone, Copy)]
pub struct CurveFitter {
    max_magnitude: f64,
    display_x_max: f64,
    display_y_max: f64,
}

impl CurveFitter {
    /// Create a fitter. Non-positive ranges fall back to 1.0 (magnitude)
    /// and 100.0 (display).
    #[must_use]
    pub fn new(max_magnitude: f64, display_x_max: f64, display_y_max: f64) -> Self {
        let positive_or = |v: f64, fallback: f64| if v > 0.0 { v } else { fallback };
        Self {
            max_magnitude: positive_or(max_magnitude, 1.0),
            display_x_max: positive_or(display_x_max, 100.0),
            display_y_max: positive_or(display_y_max, 100.0),
        }
    }

    /// Create a fitter from test parameters.
    #[must_use]
    pub fn from_params(params: &TestParams) -> Self {
        Self::new(
            params.max_magnitude,
            params.display_x_max,
            params.display_y_max,
        )
    }

    /// Fit the forward curve from per-magnitude statistics and derive the
    /// inverse and the compensation table.
    ///
    /// # Errors
    ///
    /// Returns `FitError::NoValidSamples` if `stats` is empty.
    pub fn fit(&self, stats: &[MagnitudeStats], deadzone: f64) -> Result<CurveFitResult, FitError> {
        if stats.is_empty() {
            return Err(FitError::NoValidSamples);
        }

        let rates: Vec<f64> = stats.iter().map(|s| s.angular_rate).collect();
        let fitted = pav_isotonic_fit(&rates);

        let mut y_end = fitted.last().copied().unwrap_or(0.0);
        if y_end <= RATE_EPSILON {
            let peak = fitted.iter().copied().fold(0.0, f64::max);
            y_end = if peak > RATE_EPSILON { peak } else { 1.0 };
        }

        let x_scale = self.display_x_max / self.max_magnitude;
        let y_scale = self.display_y_max / y_end;
        let dz = deadzone.max(0.0);

        let anchor = CurvePoint { x: dz, y: 0.0 };
        let measured = stats.iter().zip(&fitted).map(|(s, &rate)| CurvePoint {
            x: s.magnitude,
            y: if dz > 0.0 && s.magnitude <= dz { 0.0 } else { rate },
        });

        let forward_points: Vec<CurvePoint> = std::iter::once(anchor)
            .chain(measured)
            .map(|p| CurvePoint {
                x: p.x * x_scale,
                y: p.y * y_scale,
            })
            .collect();

        let inverse_points: Vec<CurvePoint> = forward_points
            .iter()
            .map(|p| percentage_swap(*p, self.display_x_max, self.display_y_max))
            .collect();

        let compensation_table = forward_points
            .iter()
            .zip(&inverse_points)
            .enumerate()
            .map(|(i, (f, inv))| CompensationRecord {
                point_index: i + 1,
                forward_x: f.x,
                forward_y: f.y,
                inv_x: inv.x,
                inv_y: inv.y,
            })
            .collect();

        Ok(CurveFitResult {
            forward_points,
            inverse_points,
            compensation_table,
        })
    }

    /// Summarize samples, fit them and bundle the report.
    ///
    /// # Errors
    ///
    /// Returns `FitError::NoValidSamples` if no sample has a usable timing.
    pub fn report(
        &self,
        params: &TestParams,
        samples: Vec<MeasurementSample>,
        deadzone: f64,
    ) -> Result<CalibrationReport, FitError> {
        let stats = summarize(&samples);
        let fit = self.fit(&stats, deadzone)?;
        Ok(CalibrationReport {
            deadzone,
            params: params.clone(),
            samples,
            stats,
            fit,
        })
    }
}
