//! # Calibration State Machine
//!
//! Thread-safe owner of the live [`TestSession`]. Operator events arrive
//! through the `&self` methods below; each accepted event updates the
//! commanded right stick in [`SharedControls`] and republishes the session
//! flags the output scheduler reads.
//!
//! ```text
//!   Idle ──start──▶ DeadzoneSearch ──end_deadzone──▶ CurveSampling
//!    ▲                                                   │
//!    └────────── last sample (fit + export) / stop ──────┘
//! ```
//!
//! `start` is guarded twice: a lock-free check of the `running` flag turns
//! away repeated presses cheaply, and the same check is repeated under
//! `start_guard` before anything is committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info};

use super::export::ExportSink;
use super::fitter::CurveFitter;
use super::session::{StickIntent, TestSession, Transition};
use super::{CalibrationError, Mode, TestParams};
use crate::clock::Clock;
use crate::controls::{SessionStatus, SharedControls};
use crate::gamepad::{lock_gamepad, SharedGamepad};
use crate::operator::OperatorAction;

struct MachineInner {
    params: TestParams,
    session: Option<TestSession>,
    gamepad: Option<SharedGamepad>,
    sink: Box<dyn ExportSink>,
}

/// Drives the calibration protocol and its side effects.
pub struct CalibrationStateMachine {
    inner: Mutex<MachineInner>,
    running: AtomicBool,
    start_guard: Mutex<()>,
    controls: Arc<SharedControls>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CalibrationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationStateMachine")
            .field("mode", &self.mode())
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl CalibrationStateMachine {
    pub fn new(
        params: TestParams,
        sink: Box<dyn ExportSink>,
        controls: Arc<SharedControls>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(MachineInner {
                params,
                session: None,
                gamepad: None,
                sink,
            }),
            running: AtomicBool::new(false),
            start_guard: Mutex::new(()),
            controls,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the virtual pad. Returns `false` if one is already attached.
    pub fn attach_gamepad(&self, gamepad: SharedGamepad) -> bool {
        let mut inner = self.lock();
        if inner.gamepad.is_some() {
            debug!("Gamepad already attached");
            return false;
        }
        inner.gamepad = Some(gamepad);
        true
    }

    /// Detach the virtual pad, dropping any live session.
    pub fn detach_gamepad(&self) -> Option<SharedGamepad> {
        let mut inner = self.lock();
        let gamepad = inner.gamepad.take();
        if inner.session.take().is_some() {
            info!("Gamepad detached, session dropped");
            self.running.store(false, Ordering::Release);
        }
        self.apply(&inner, &Transition::Stopped);
        gamepad
    }

    /// Parameters used by the next `start`.
    pub fn set_params(&self, params: TestParams) {
        self.lock().params = params;
    }

    #[must_use]
    pub fn params(&self) -> TestParams {
        self.lock().params.clone()
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.lock().session.as_ref().map_or(Mode::Idle, TestSession::mode)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        status_of(self.lock().session.as_ref())
    }

    /// Run `f` against the live session, if any.
    pub fn with_session<R>(&self, f: impl FnOnce(Option<&TestSession>) -> R) -> R {
        f(self.lock().session.as_ref())
    }

    /// Route an operator action to its handler.
    pub fn dispatch(&self, action: OperatorAction) -> Result<Transition, CalibrationError> {
        match action {
            OperatorAction::Start => self.start(),
            OperatorAction::Record => self.record(),
            OperatorAction::DeadzoneIncrease => self.deadzone_increase(),
            OperatorAction::DeadzoneDecrease => self.deadzone_decrease(),
            OperatorAction::EndDeadzone => self.end_deadzone(),
            OperatorAction::RetryLast => self.retry_last(),
            OperatorAction::Stop => Ok(self.stop()),
        }
    }

    /// Open a session in deadzone search.
    ///
    /// # Errors
    ///
    /// - `WrongState` if a session is already running
    /// - `NotReady` if no gamepad is attached
    /// - `Param` if the current parameters are invalid
    pub fn start(&self) -> Result<Transition, CalibrationError> {
        if self.running.load(Ordering::Acquire) {
            return Err(self.already_running());
        }

        let _guard = self
            .start_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.running.load(Ordering::Acquire) {
            return Err(self.already_running());
        }
        self.running.store(true, Ordering::Release);

        let result = self.start_locked();
        if result.is_err() {
            self.running.store(false, Ordering::Release);
        }
        result
    }

    fn already_running(&self) -> CalibrationError {
        CalibrationError::WrongState {
            action: OperatorAction::Start,
            mode: self.mode(),
        }
    }

    fn start_locked(&self) -> Result<Transition, CalibrationError> {
        let mut inner = self.lock();
        if let Some(session) = &inner.session {
            return Err(CalibrationError::WrongState {
                action: OperatorAction::Start,
                mode: session.mode(),
            });
        }
        if inner.gamepad.is_none() {
            return Err(CalibrationError::NotReady);
        }
        inner.params.validate()?;

        let session = TestSession::new(inner.params.clone());
        let transition = session.started();
        info!(
            "Calibration started: {} points x {} repeats, direction {:?}",
            inner.params.sample_count, inner.params.repeats_per_point, inner.params.direction
        );
        inner.session = Some(session);
        self.apply(&inner, &transition);
        Ok(transition)
    }

    /// Start or finish a timed trial. The last sample finalizes the run.
    pub fn record(&self) -> Result<Transition, CalibrationError> {
        self.advance(OperatorAction::Record, |s, now| s.record(now))
    }

    pub fn deadzone_increase(&self) -> Result<Transition, CalibrationError> {
        self.advance(OperatorAction::DeadzoneIncrease, |s, _| s.deadzone_increase())
    }

    pub fn deadzone_decrease(&self) -> Result<Transition, CalibrationError> {
        self.advance(OperatorAction::DeadzoneDecrease, |s, _| s.deadzone_decrease())
    }

    pub fn end_deadzone(&self) -> Result<Transition, CalibrationError> {
        self.advance(OperatorAction::EndDeadzone, |s, _| s.end_deadzone())
    }

    pub fn retry_last(&self) -> Result<Transition, CalibrationError> {
        self.advance(OperatorAction::RetryLast, |s, _| s.retry_last())
    }

    /// Drop the session, center the test stick and release any hold.
    /// Valid in every state.
    pub fn stop(&self) -> Transition {
        let mut inner = self.lock();
        if inner.session.take().is_some() {
            info!("Calibration stopped");
        }
        if let Some(gamepad) = &inner.gamepad {
            lock_gamepad(gamepad).release_hold();
        }
        self.running.store(false, Ordering::Release);
        self.apply(&inner, &Transition::Stopped);
        Transition::Stopped
    }

    fn advance<F>(&self, action: OperatorAction, f: F) -> Result<Transition, CalibrationError>
    where
        F: FnOnce(&mut TestSession, Instant) -> Result<Transition, CalibrationError>,
    {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Some(session) = inner.session.as_mut() else {
            return Err(CalibrationError::WrongState {
                action,
                mode: Mode::Idle,
            });
        };

        let mut transition = f(session, now)?;
        if let Transition::SampleRecorded {
            sample,
            complete: true,
            ..
        } = transition
        {
            transition = self.finalize(&mut inner, sample);
        }

        log_transition(&transition);
        self.apply(&inner, &transition);
        Ok(transition)
    }

    /// Fit and export the finished session, then return to idle.
    fn finalize(
        &self,
        inner: &mut MachineInner,
        sample: super::MeasurementSample,
    ) -> Transition {
        let Some(session) = inner.session.take() else {
            return Transition::Stopped;
        };
        let params = session.params().clone();
        let deadzone = session.deadzone_estimate();
        let samples = session.into_samples();

        let fitter = CurveFitter::from_params(&params);
        let (report, export_dir) = match fitter.report(&params, samples, deadzone) {
            Ok(report) => {
                let dir = match inner.sink.export(&report) {
                    Ok(dir) => Some(dir),
                    Err(e) => {
                        error!("Failed to export calibration: {}", e);
                        None
                    }
                };
                (Some(report), dir)
            }
            Err(e) => {
                error!("Curve fit failed: {}", e);
                (None, None)
            }
        };

        if let Some(gamepad) = &inner.gamepad {
            lock_gamepad(gamepad).release_hold();
        }
        self.running.store(false, Ordering::Release);

        Transition::Completed {
            sample,
            report,
            export_dir,
        }
    }

    /// Push the transition's stick intent and the session flags.
    fn apply(&self, inner: &MachineInner, transition: &Transition) {
        match transition.intent() {
            StickIntent::Deflect(magnitude) => {
                let direction = inner
                    .session
                    .as_ref()
                    .map_or(inner.params.direction, |s| s.params().direction);
                let (x, y) = direction.stick(magnitude);
                self.controls.set_right(x, y);
            }
            StickIntent::Center => self.controls.center_right(),
        }
        self.controls.publish(status_of(inner.session.as_ref()));
    }
}

fn status_of(session: Option<&TestSession>) -> SessionStatus {
    session.map_or_else(SessionStatus::default, |s| SessionStatus {
        mode: s.mode(),
        armed: true,
        in_trial: s.in_trial(),
    })
}

fn log_transition(transition: &Transition) {
    match transition {
        Transition::DeadzoneAdjusted { candidate, mode } => {
            info!("Deadzone candidate {:.4} ({})", candidate, mode)
        }
        Transition::DeadzoneFixed {
            deadzone,
            magnitudes,
        } => info!(
            "Deadzone fixed at {:.4}; sampling {} magnitudes",
            deadzone,
            magnitudes.len()
        ),
        Transition::TrialStarted {
            point_index,
            repeat_index,
            magnitude,
        } => info!(
            "Trial started: point {} repeat {} at magnitude {:.4}",
            point_index + 1,
            repeat_index + 1,
            magnitude
        ),
        Transition::SampleRecorded { sample, .. } => info!(
            "Recorded {:.3}s at magnitude {:.4}",
            sample.elapsed_seconds, sample.magnitude
        ),
        Transition::Completed { export_dir, .. } => match export_dir {
            Some(dir) => info!("Calibration complete, results in {}", dir.display()),
            None => info!("Calibration complete, nothing exported"),
        },
        Transition::Retried {
            point_index,
            magnitude,
            removed,
            ..
        } => info!(
            "Retrying point {} (magnitude {:.4}), {} samples discarded",
            point_index + 1,
            magnitude,
            removed
        ),
        Transition::Started { .. } | Transition::Stopped => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::fitter::CalibrationReport;
    use crate::clock::ManualClock;
    use crate::error::StickcalError;
    use crate::gamepad::backend::mocks::MockBackend;
    use crate::gamepad::{Personality, VirtualGamepadOutput};
    use std::path::PathBuf;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingSink {
        reports: Arc<Mutex<Vec<CalibrationReport>>>,
        fail: bool,
    }

    impl ExportSink for RecordingSink {
        fn export(&mut self, report: &CalibrationReport) -> crate::error::Result<PathBuf> {
            if self.fail {
                return Err(StickcalError::Export("disk full".to_string()));
            }
            self.reports.lock().unwrap().push(report.clone());
            Ok(PathBuf::from("/tmp/stickcal-test-run"))
        }
    }

    struct Harness {
        machine: Arc<CalibrationStateMachine>,
        controls: Arc<SharedControls>,
        clock: Arc<ManualClock>,
        backend: MockBackend,
        gamepad: SharedGamepad,
        sink: RecordingSink,
    }

    fn params(sample_count: u32, repeats: u32) -> TestParams {
        TestParams {
            sample_count,
            repeats_per_point: repeats,
            ..TestParams::default()
        }
    }

    fn harness_with(params: TestParams, sink: RecordingSink, attach: bool) -> Harness {
        let controls = Arc::new(SharedControls::new());
        let clock = Arc::new(ManualClock::new());
        let machine = Arc::new(CalibrationStateMachine::new(
            params,
            Box::new(sink.clone()),
            controls.clone(),
            clock.clone(),
        ));
        let backend = MockBackend::new();
        let gamepad = Arc::new(Mutex::new(VirtualGamepadOutput::new(
            Box::new(backend.clone()),
            Personality::Xbox360,
        )));
        if attach {
            assert!(machine.attach_gamepad(gamepad.clone()));
        }
        Harness {
            machine,
            controls,
            clock,
            backend,
            gamepad,
            sink,
        }
    }

    fn harness(sample_count: u32, repeats: u32) -> Harness {
        harness_with(params(sample_count, repeats), RecordingSink::default(), true)
    }

    fn timed_rotation(h: &Harness, secs: u64) -> Transition {
        h.machine.record().unwrap();
        h.clock.advance(Duration::from_secs(secs));
        h.machine.record().unwrap()
    }

    /// Comparable view of the live session.
    fn snapshot(machine: &CalibrationStateMachine) -> Option<(Mode, String, usize, u32, usize, bool)> {
        machine.with_session(|s| {
            s.map(|s| {
                (
                    s.mode(),
                    format!("{:.6}", s.candidate()),
                    s.point_index(),
                    s.repeat_index(),
                    s.samples().len(),
                    s.in_trial(),
                )
            })
        })
    }

    #[test]
    fn test_start_without_gamepad_is_not_ready() {
        let h = harness_with(params(3, 1), RecordingSink::default(), false);
        assert_eq!(h.machine.start(), Err(CalibrationError::NotReady));
        assert!(!h.machine.is_running());
        assert_eq!(h.machine.mode(), Mode::Idle);
    }

    #[test]
    fn test_start_with_invalid_params() {
        let h = harness(1, 1);
        assert!(matches!(h.machine.start(), Err(CalibrationError::Param(_))));
        assert!(!h.machine.is_running());

        h.machine.set_params(params(3, 1));
        assert!(h.machine.start().is_ok());
    }

    #[test]
    fn test_attach_is_idempotent() {
        let h = harness(3, 1);
        assert!(!h.machine.attach_gamepad(h.gamepad.clone()));
    }

    #[test]
    fn test_start_deflects_and_publishes() {
        let h = harness(3, 1);
        let t = h.machine.start().unwrap();
        assert_eq!(t, Transition::Started { candidate: 0.02 });

        let sticks = h.controls.sticks();
        assert!((sticks.rx - 0.02).abs() < 1e-6);
        assert_eq!(sticks.ry, 0.0);

        let status = h.controls.status();
        assert_eq!(status.mode, Mode::DeadzoneSearch);
        assert!(status.armed);
        assert!(!status.in_trial);
    }

    #[test]
    fn test_second_start_is_wrong_state() {
        let h = harness(3, 1);
        h.machine.start().unwrap();
        assert_eq!(
            h.machine.start(),
            Err(CalibrationError::WrongState {
                action: OperatorAction::Start,
                mode: Mode::DeadzoneSearch
            })
        );
        // The rejected start did not clear the flag of the live session.
        assert!(h.machine.is_running());
    }

    #[test]
    fn test_concurrent_starts_admit_exactly_one() {
        let h = harness(3, 1);
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let machine = h.machine.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    machine.start()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, CalibrationError::WrongState { .. })));
        assert_eq!(h.machine.mode(), Mode::DeadzoneSearch);
    }

    #[test]
    fn test_stop_is_valid_everywhere() {
        let h = harness(3, 1);
        assert_eq!(h.machine.stop(), Transition::Stopped);

        h.machine.start().unwrap();
        h.machine.end_deadzone().unwrap();
        h.machine.record().unwrap();
        assert_eq!(h.machine.stop(), Transition::Stopped);

        assert_eq!(h.machine.mode(), Mode::Idle);
        assert!(!h.machine.is_running());
        assert_eq!(h.controls.sticks().rx, 0.0);
        assert!(!h.controls.status().armed);
        assert!(h.machine.start().is_ok());
    }

    #[test]
    fn test_stop_releases_hold() {
        let h = harness(3, 1);
        h.machine.start().unwrap();
        lock_gamepad(&h.gamepad).hold_button("lb", true);
        assert!(!h.backend.view().pressed.is_empty());

        h.machine.stop();
        assert!(h.backend.view().pressed.is_empty());
        assert_eq!(lock_gamepad(&h.gamepad).state().held_button, None);
    }

    #[test]
    fn test_every_action_in_every_state_is_handled() {
        let actions = [
            OperatorAction::Record,
            OperatorAction::DeadzoneIncrease,
            OperatorAction::DeadzoneDecrease,
            OperatorAction::EndDeadzone,
            OperatorAction::RetryLast,
            OperatorAction::Start,
        ];

        // Each setup leaves the machine in a distinct state.
        let setups: [fn(&Harness); 5] = [
            |_| {},
            |h| {
                h.machine.start().unwrap();
            },
            |h| {
                h.machine.start().unwrap();
                h.machine.end_deadzone().unwrap();
            },
            |h| {
                h.machine.start().unwrap();
                h.machine.end_deadzone().unwrap();
                h.machine.record().unwrap();
            },
            |h| {
                h.machine.start().unwrap();
                h.machine.end_deadzone().unwrap();
                timed_rotation(h, 2);
            },
        ];

        for setup in setups {
            for action in actions {
                let h = harness(3, 2);
                setup(&h);
                let before = snapshot(&h.machine);
                match h.machine.dispatch(action) {
                    Ok(_) => {}
                    Err(_) => assert_eq!(snapshot(&h.machine), before, "{} mutated", action),
                }
            }
        }
    }

    #[test]
    fn test_record_in_idle_is_wrong_state() {
        let h = harness(3, 1);
        assert_eq!(
            h.machine.record(),
            Err(CalibrationError::WrongState {
                action: OperatorAction::Record,
                mode: Mode::Idle
            })
        );
    }

    #[test]
    fn test_trial_moves_stick_and_flags() {
        let h = harness(3, 1);
        h.machine.start().unwrap();
        for _ in 0..9 {
            h.machine.deadzone_increase().unwrap();
        }
        h.machine.end_deadzone().unwrap();
        assert_eq!(h.controls.sticks().rx, 0.0);

        h.machine.record().unwrap();
        assert!((h.controls.sticks().rx - 0.2).abs() < 1e-6);
        assert!(h.controls.status().in_trial);

        h.clock.advance(Duration::from_secs(2));
        let t = h.machine.record().unwrap();
        assert!(matches!(t, Transition::SampleRecorded { sample, .. } if sample.elapsed_seconds == 2.0));
        assert_eq!(h.controls.sticks().rx, 0.0);
        assert!(!h.controls.status().in_trial);
    }

    #[test]
    fn test_full_run_finalizes_and_exports() {
        let h = harness(2, 2);
        h.machine.start().unwrap();
        h.machine.end_deadzone().unwrap();
        lock_gamepad(&h.gamepad).hold_triggers(1.0, 0.0);

        timed_rotation(&h, 4);
        timed_rotation(&h, 4);
        timed_rotation(&h, 2);
        let last = timed_rotation(&h, 2);

        match last {
            Transition::Completed {
                sample,
                report: Some(report),
                export_dir: Some(dir),
            } => {
                assert_eq!(sample.elapsed_seconds, 2.0);
                assert_eq!(report.samples.len(), 4);
                assert_eq!(report.stats.len(), 2);
                assert_eq!(report.fit.forward_points.len(), 3);
                assert_eq!(dir, PathBuf::from("/tmp/stickcal-test-run"));
            }
            other => panic!("expected completion, got {:?}", other),
        }

        assert_eq!(h.sink.reports.lock().unwrap().len(), 1);
        assert_eq!(h.machine.mode(), Mode::Idle);
        assert!(!h.machine.is_running());
        assert_eq!(h.backend.view().triggers, (0, 0));
        assert!(!h.controls.status().armed);
    }

    #[test]
    fn test_failed_export_still_completes() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let h = harness_with(params(2, 1), sink, true);
        h.machine.start().unwrap();
        h.machine.end_deadzone().unwrap();
        timed_rotation(&h, 3);
        let last = timed_rotation(&h, 1);

        assert!(matches!(
            last,
            Transition::Completed {
                report: Some(_),
                export_dir: None,
                ..
            }
        ));
        assert_eq!(h.machine.mode(), Mode::Idle);
    }

    #[test]
    fn test_retry_through_machine_recenters() {
        let h = harness(3, 2);
        h.machine.start().unwrap();
        h.machine.end_deadzone().unwrap();
        timed_rotation(&h, 3);
        h.machine.record().unwrap();

        let t = h.machine.retry_last().unwrap();
        assert!(matches!(t, Transition::Retried { point_index: 0, aborted_trial: true, .. }));
        assert_eq!(h.controls.sticks().rx, 0.0);
        assert!(!h.controls.status().in_trial);
    }

    #[test]
    fn test_detach_drops_session() {
        let h = harness(3, 1);
        h.machine.start().unwrap();
        assert!(h.machine.detach_gamepad().is_some());
        assert_eq!(h.machine.mode(), Mode::Idle);
        assert_eq!(h.machine.start(), Err(CalibrationError::NotReady));
    }
}
