//! # Test Session
//!
//! The calibration protocol as plain state plus one method per operator
//! event. Nothing here touches the device or the clock; callers pass the
//! current [`Instant`] in and apply the returned [`Transition`].
//!
//! ## Phases
//!
//! 1. **Deadzone search**: the stick is pushed to a candidate magnitude that
//!    the operator nudges up or down until the view just starts to turn.
//! 2. **Curve sampling**: for every measurement magnitude the operator times
//!    `repeats_per_point` full rotations with two presses of `record` each.
//!
//! Before the first trial starts, the candidate can still be nudged from the
//! sampling phase to re-check the threshold. The stick follows it, but the
//! frozen deadzone and the sweep stay as `end_deadzone` left them.

use std::time::Instant;

use serde::Serialize;

use super::{CalibrationError, Mode, TestParams};
use crate::operator::OperatorAction;

/// Decimal places kept on every measurement magnitude.
const MAGNITUDE_SCALE: f64 = 10_000.0;

/// One timed rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementSample {
    pub magnitude: f64,
    pub repeat_index: u32,
    pub elapsed_seconds: f64,
}

/// What the right stick should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StickIntent {
    /// Push in the test direction by this magnitude.
    Deflect(f64),
    /// Return to exact center.
    Center,
}

/// Outcome of an accepted event.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Session created in deadzone search.
    Started { candidate: f64 },
    /// Deadzone candidate moved.
    DeadzoneAdjusted { candidate: f64, mode: Mode },
    /// Deadzone frozen and sweep built; sampling begins.
    DeadzoneFixed { deadzone: f64, magnitudes: Vec<f64> },
    /// First `record` press of a trial.
    TrialStarted {
        point_index: usize,
        repeat_index: u32,
        magnitude: f64,
    },
    /// Second `record` press; indices are the next trial's.
    SampleRecorded {
        sample: MeasurementSample,
        point_index: usize,
        repeat_index: u32,
        complete: bool,
    },
    /// Last sample recorded; the curve was fitted and exported.
    Completed {
        sample: MeasurementSample,
        report: Option<super::CalibrationReport>,
        export_dir: Option<std::path::PathBuf>,
    },
    /// Rewound to a point after deleting its samples.
    Retried {
        point_index: usize,
        magnitude: f64,
        removed: usize,
        aborted_trial: bool,
    },
    /// Session dropped.
    Stopped,
}

impl Transition {
    /// Stick intent implied by this transition.
    #[must_use]
    pub fn intent(&self) -> StickIntent {
        match self {
            Transition::Started { candidate } => StickIntent::Deflect(*candidate),
            Transition::DeadzoneAdjusted { candidate, .. } if *candidate > 0.0 => {
                StickIntent::Deflect(*candidate)
            }
            Transition::TrialStarted { magnitude, .. } => StickIntent::Deflect(*magnitude),
            _ => StickIntent::Center,
        }
    }
}

/// Round to the magnitude resolution.
#[must_use]
pub fn round_magnitude(v: f64) -> f64 {
    (v * MAGNITUDE_SCALE).round() / MAGNITUDE_SCALE
}

/// Build the sweep of measurement magnitudes.
///
/// The sweep starts at `max(min, deadzone)` when a deadzone was found (never
/// beyond `max`), runs linearly to `max`, and always ends exactly on `max`.
///
/// # Examples
///
/// ```
/// use stickcal::calibration::build_measurement_magnitudes;
///
/// assert_eq!(build_measurement_magnitudes(3, 0.1, 1.0, 0.2), vec![0.2, 0.6, 1.0]);
/// assert_eq!(build_measurement_magnitudes(1, 0.1, 0.8, 0.0), vec![0.8]);
/// ```
#[must_use]
pub fn build_measurement_magnitudes(count: usize, min: f64, max: f64, deadzone: f64) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![round_magnitude(max)];
    }

    let start = if deadzone > 0.0 { min.max(deadzone) } else { min }.min(max);
    let step = (max - start) / (count - 1) as f64;

    let mut mags: Vec<f64> = (0..count)
        .map(|i| round_magnitude(start + i as f64 * step))
        .collect();
    if let Some(last) = mags.last_mut() {
        *last = round_magnitude(max);
    }
    mags
}

/// State of one calibration run.
#[derive(Debug, Clone)]
pub struct TestSession {
    params: TestParams,
    mode: Mode,
    candidate: f64,
    deadzone_estimate: f64,
    magnitudes: Vec<f64>,
    point_index: usize,
    repeat_index: u32,
    samples: Vec<MeasurementSample>,
    in_trial: bool,
    trial_start: Option<Instant>,
    adjustment_window_open: bool,
    /// Point chosen by the last retry, until a new sample is recorded.
    retry_target: Option<usize>,
}

impl TestSession {
    /// Open a session in deadzone search. `params` must already be valid.
    #[must_use]
    pub fn new(params: TestParams) -> Self {
        let candidate = params.deadzone_step.clamp(0.0, 1.0);
        Self {
            params,
            mode: Mode::DeadzoneSearch,
            candidate,
            deadzone_estimate: 0.0,
            magnitudes: Vec::new(),
            point_index: 0,
            repeat_index: 0,
            samples: Vec::new(),
            in_trial: false,
            trial_start: None,
            adjustment_window_open: true,
            retry_target: None,
        }
    }

    /// Transition reported when the session is created.
    #[must_use]
    pub fn started(&self) -> Transition {
        Transition::Started {
            candidate: self.candidate,
        }
    }

    #[must_use]
    pub fn params(&self) -> &TestParams {
        &self.params
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current deadzone candidate.
    #[must_use]
    pub fn candidate(&self) -> f64 {
        self.candidate
    }

    /// Frozen deadzone (0 until `end_deadzone`).
    #[must_use]
    pub fn deadzone_estimate(&self) -> f64 {
        self.deadzone_estimate
    }

    #[must_use]
    pub fn measurement_magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    #[must_use]
    pub fn point_index(&self) -> usize {
        self.point_index
    }

    #[must_use]
    pub fn repeat_index(&self) -> u32 {
        self.repeat_index
    }

    #[must_use]
    pub fn samples(&self) -> &[MeasurementSample] {
        &self.samples
    }

    #[must_use]
    pub fn in_trial(&self) -> bool {
        self.in_trial
    }

    #[must_use]
    pub fn trial_start(&self) -> Option<Instant> {
        self.trial_start
    }

    #[must_use]
    pub fn adjustment_window_open(&self) -> bool {
        self.adjustment_window_open
    }

    /// Whether every point has its full set of repeats.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.mode == Mode::CurveSampling && self.point_index >= self.magnitudes.len()
    }

    /// Consume the session, keeping its samples.
    #[must_use]
    pub fn into_samples(self) -> Vec<MeasurementSample> {
        self.samples
    }

    fn wrong_state(&self, action: OperatorAction) -> CalibrationError {
        CalibrationError::WrongState {
            action,
            mode: self.mode,
        }
    }

    fn can_adjust_deadzone(&self) -> bool {
        match self.mode {
            Mode::DeadzoneSearch => true,
            Mode::CurveSampling => {
                self.adjustment_window_open
                    && !self.in_trial
                    && self.point_index == 0
                    && self.repeat_index == 0
            }
            Mode::Idle => false,
        }
    }

    fn adjusted(&self) -> Transition {
        Transition::DeadzoneAdjusted {
            candidate: self.candidate,
            mode: self.mode,
        }
    }

    fn freeze_deadzone(&mut self) {
        self.deadzone_estimate = self.candidate;
        self.magnitudes = build_measurement_magnitudes(
            self.params.sample_count as usize,
            self.params.min_magnitude,
            self.params.max_magnitude,
            self.deadzone_estimate,
        );
    }

    /// Raise the deadzone candidate by one step (capped at 1).
    pub fn deadzone_increase(&mut self) -> Result<Transition, CalibrationError> {
        if !self.can_adjust_deadzone() {
            return Err(self.wrong_state(OperatorAction::DeadzoneIncrease));
        }
        self.candidate = (self.candidate + self.params.deadzone_step).min(1.0);
        Ok(self.adjusted())
    }

    /// Lower the deadzone candidate by one back-step (floored at 0).
    pub fn deadzone_decrease(&mut self) -> Result<Transition, CalibrationError> {
        if !self.can_adjust_deadzone() {
            return Err(self.wrong_state(OperatorAction::DeadzoneDecrease));
        }
        self.candidate = (self.candidate - self.params.deadzone_back_step).max(0.0);
        Ok(self.adjusted())
    }

    /// Freeze the deadzone and enter curve sampling.
    pub fn end_deadzone(&mut self) -> Result<Transition, CalibrationError> {
        if self.mode != Mode::DeadzoneSearch {
            return Err(self.wrong_state(OperatorAction::EndDeadzone));
        }

        self.mode = Mode::CurveSampling;
        self.freeze_deadzone();
        self.point_index = 0;
        self.repeat_index = 0;
        self.in_trial = false;
        self.trial_start = None;

        Ok(Transition::DeadzoneFixed {
            deadzone: self.deadzone_estimate,
            magnitudes: self.magnitudes.clone(),
        })
    }

    /// Start or finish a timed trial.
    pub fn record(&mut self, now: Instant) -> Result<Transition, CalibrationError> {
        if self.mode != Mode::CurveSampling || self.is_complete() {
            return Err(self.wrong_state(OperatorAction::Record));
        }

        let magnitude = self.magnitudes[self.point_index];

        if !self.in_trial {
            self.in_trial = true;
            self.trial_start = Some(now);
            if self.point_index == 0 {
                self.adjustment_window_open = false;
            }
            return Ok(Transition::TrialStarted {
                point_index: self.point_index,
                repeat_index: self.repeat_index,
                magnitude,
            });
        }

        let started = self.trial_start.take().unwrap_or(now);
        let sample = MeasurementSample {
            magnitude,
            repeat_index: self.repeat_index,
            elapsed_seconds: now.saturating_duration_since(started).as_secs_f64(),
        };
        self.samples.push(sample);
        self.in_trial = false;
        self.retry_target = None;

        self.repeat_index += 1;
        if self.repeat_index >= self.params.repeats_per_point {
            self.repeat_index = 0;
            self.point_index += 1;
        }

        Ok(Transition::SampleRecorded {
            sample,
            point_index: self.point_index,
            repeat_index: self.repeat_index,
            complete: self.is_complete(),
        })
    }

    /// Discard the point being measured (or the one just finished) and
    /// measure it again.
    ///
    /// The target is the current point while its repeats are under way, or
    /// the previous point right after it completed. Samples at the target
    /// magnitude and beyond are deleted. Calling again before a new sample
    /// is recorded keeps the same target.
    pub fn retry_last(&mut self) -> Result<Transition, CalibrationError> {
        if self.mode != Mode::CurveSampling {
            return Err(self.wrong_state(OperatorAction::RetryLast));
        }
        if self.samples.is_empty() {
            return Err(CalibrationError::NoPriorSample);
        }

        let aborted_trial = self.in_trial;
        self.in_trial = false;
        self.trial_start = None;

        let target = self.retry_target.unwrap_or(if self.repeat_index > 0 {
            self.point_index
        } else {
            self.point_index.saturating_sub(1)
        });
        let target = target.min(self.magnitudes.len().saturating_sub(1));

        let discarded = &self.magnitudes[target..];
        let before = self.samples.len();
        self.samples.retain(|s| !discarded.contains(&s.magnitude));
        let removed = before - self.samples.len();

        self.point_index = target;
        self.repeat_index = 0;
        self.retry_target = Some(target);

        Ok(Transition::Retried {
            point_index: target,
            magnitude: self.magnitudes[target],
            removed,
            aborted_trial,
        })
    }
}
