//! # Virtual Gamepad Output
//!
//! Turns stick, trigger and button intents into backend writes.
//!
//! ## Safety Rules
//!
//! - A new output writes a neutral report before anything else.
//! - A failed stick write is followed by a full [`VirtualGamepadOutput::neutral`],
//!   so the pad can never stay stuck at full deflection.
//! - Any other failed write is logged and swallowed; the tracked state is
//!   left as it was so the next call retries.
//!
//! ## Usage
//!
//! ```no_run
//! use stickcal::gamepad::{Personality, VirtualGamepadOutput};
//!
//! let mut pad = VirtualGamepadOutput::open(Personality::Ds4)?;
//! pad.set_sticks(0.0, 0.0, 0.5, 0.0);
//! pad.hold_button("l1", true);
//! pad.neutral();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::axis::{decode_trigger, encode_sticks, to_trigger_byte, RawSticks};
use super::backend::{GamepadBackend, UinputBackend};
use super::{ButtonId, GamepadError, Personality};

/// Shortest keepalive tap.
pub const TAP_MIN_MS: u64 = 10;

/// Longest keepalive tap.
pub const TAP_MAX_MS: u64 = 200;

/// Snapshot of what the output believes the device shows.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub personality: Personality,
    /// True iff the personality is DS4.
    pub invert_y: bool,
    /// Code of the button currently held down, if any.
    pub held_button: Option<String>,
    pub held_trigger_l: f32,
    pub held_trigger_r: f32,
    /// Last stick report written successfully.
    pub sticks: RawSticks,
}

#[derive(Debug, Clone, Copy)]
struct PendingTap {
    button: ButtonId,
    release_at: Instant,
}

/// One virtual pad and the intents applied to it.
pub struct VirtualGamepadOutput {
    backend: Box<dyn GamepadBackend>,
    personality: Personality,
    /// Last code passed to `hold_button`, recognized or not.
    held_code: Option<String>,
    held_pressed: bool,
    held_l: u8,
    held_r: u8,
    sticks: RawSticks,
    pending_tap: Option<PendingTap>,
}

impl std::fmt::Debug for VirtualGamepadOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualGamepadOutput")
            .field("personality", &self.personality)
            .field("held_code", &self.held_code)
            .field("held_pressed", &self.held_pressed)
            .finish_non_exhaustive()
    }
}

impl VirtualGamepadOutput {
    /// Wrap a backend and immediately write a neutral report.
    pub fn new(backend: Box<dyn GamepadBackend>, personality: Personality) -> Self {
        let mut output = Self {
            backend,
            personality,
            held_code: None,
            held_pressed: false,
            held_l: 0,
            held_r: 0,
            sticks: RawSticks::neutral(personality),
            pending_tap: None,
        };
        output.neutral();
        output
    }

    /// Create a uinput pad for the personality.
    ///
    /// # Errors
    ///
    /// Returns `GamepadError::Open` if the virtual device cannot be created.
    pub fn open(personality: Personality) -> Result<Self, GamepadError> {
        let backend = UinputBackend::create(personality)?;
        Ok(Self::new(Box::new(backend), personality))
    }

    /// The personality chosen at construction.
    #[must_use]
    pub fn personality(&self) -> Personality {
        self.personality
    }

    /// Snapshot of the tracked device state.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        DeviceState {
            personality: self.personality,
            invert_y: self.personality.inverts_y(),
            held_button: if self.held_pressed {
                self.held_code.clone()
            } else {
                None
            },
            held_trigger_l: decode_trigger(self.held_l),
            held_trigger_r: decode_trigger(self.held_r),
            sticks: self.sticks,
        }
    }

    /// Write both sticks. Inputs are clamped to `-1.0..=1.0` and positive Y
    /// means "up".
    ///
    /// A failed write triggers [`neutral`](Self::neutral).
    pub fn set_sticks(&mut self, lx: f32, ly: f32, rx: f32, ry: f32) {
        let raw = encode_sticks(self.personality, lx, ly, rx, ry);
        match self.backend.write_sticks(raw) {
            Ok(()) => self.sticks = raw,
            Err(e) => {
                warn!("{}; forcing neutral", write_error("set_sticks", e));
                self.neutral();
            }
        }
    }

    /// Release every hold and center both sticks and triggers.
    ///
    /// Never fails: this is the recovery path for every other intent.
    pub fn neutral(&mut self) {
        self.release_hold();

        if let Some(tap) = self.pending_tap.take() {
            if let Err(e) = self.backend.write_button(tap.button, false) {
                warn!("{}", write_error("neutral (tap release)", e));
            }
        }

        let raw = RawSticks::neutral(self.personality);
        match self.backend.write_sticks(raw) {
            Ok(()) => self.sticks = raw,
            Err(e) => warn!("{}", write_error("neutral (sticks)", e)),
        }
        match self.backend.write_triggers(0, 0) {
            Ok(()) => {
                self.held_l = 0;
                self.held_r = 0;
            }
            Err(e) => warn!("{}", write_error("neutral (triggers)", e)),
        }
    }

    /// Press a button now and release it `duration_ms` later (clamped to
    /// 10..=200 ms). The release happens in [`poll_tap`](Self::poll_tap).
    ///
    /// Unknown codes fall back to the personality's default keepalive
    /// button. Sticks are never touched.
    pub fn tap_button(&mut self, code: &str, duration_ms: u64, now: Instant) {
        let button = ButtonId::from_code(self.personality, code)
            .unwrap_or_else(ButtonId::default_keepalive);

        // Finish a tap still in flight before starting the next one.
        if let Some(tap) = self.pending_tap {
            self.release_tap(tap);
            if self.pending_tap.is_some() {
                return;
            }
        }

        if self.held_button_id() == Some(button) {
            debug!("keepalive tap skipped: {} is held", code);
            return;
        }

        match self.backend.write_button(button, true) {
            Ok(()) => {
                let ms = duration_ms.clamp(TAP_MIN_MS, TAP_MAX_MS);
                self.pending_tap = Some(PendingTap {
                    button,
                    release_at: now + Duration::from_millis(ms),
                });
            }
            Err(e) => warn!("{}", write_error("tap_button", e)),
        }
    }

    /// Release a tapped button once its duration has elapsed.
    pub fn poll_tap(&mut self, now: Instant) {
        if let Some(tap) = self.pending_tap {
            if now >= tap.release_at {
                self.release_tap(tap);
            }
        }
    }

    /// Whether a keepalive tap is currently pressed.
    #[must_use]
    pub fn tap_pending(&self) -> bool {
        self.pending_tap.is_some()
    }

    fn release_tap(&mut self, tap: PendingTap) {
        match self.backend.write_button(tap.button, false) {
            Ok(()) => self.pending_tap = None,
            Err(e) => warn!("{}", write_error("tap release", e)),
        }
    }

    /// Persistently press or release a button.
    ///
    /// Repeating the current `(code, pressed)` pair does nothing. Switching
    /// to another code releases the previous one first. Codes outside the
    /// personality's vocabulary are remembered but never sent.
    pub fn hold_button(&mut self, code: &str, pressed: bool) {
        let code = code.trim().to_ascii_lowercase();

        if self.held_code.as_deref() == Some(code.as_str()) && self.held_pressed == pressed {
            return;
        }

        if self.held_pressed {
            if let Some(previous) = self.held_code.clone() {
                if previous != code {
                    self.hold_button(&previous, false);
                }
            }
        }

        if let Some(button) = ButtonId::from_code(self.personality, &code) {
            if let Err(e) = self.backend.write_button(button, pressed) {
                warn!("{}", write_error("hold_button", e));
                return;
            }
        }

        self.held_code = Some(code);
        self.held_pressed = pressed;
    }

    /// Persistently press both analog triggers (`0.0..=1.0` each).
    ///
    /// Debounced on the encoded bytes.
    pub fn hold_triggers(&mut self, left: f32, right: f32) {
        let l = to_trigger_byte(left);
        let r = to_trigger_byte(right);

        if l == self.held_l && r == self.held_r {
            return;
        }

        match self.backend.write_triggers(l, r) {
            Ok(()) => {
                self.held_l = l;
                self.held_r = r;
            }
            Err(e) => warn!("{}", write_error("hold_triggers", e)),
        }
    }

    /// Release the held button (if any) and both triggers.
    pub fn release_hold(&mut self) {
        if self.held_pressed {
            if let Some(code) = self.held_code.clone() {
                self.hold_button(&code, false);
            }
        }
        if !self.held_pressed {
            self.held_code = None;
        }

        self.hold_triggers(0.0, 0.0);
    }

    fn held_button_id(&self) -> Option<ButtonId> {
        if !self.held_pressed {
            return None;
        }
        self.held_code
            .as_deref()
            .and_then(|c| ButtonId::from_code(self.personality, c))
    }
}

fn write_error(op: &'static str, source: io::Error) -> GamepadError {
    GamepadError::Write { op, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::axis::decode_stick;
    use crate::gamepad::backend::mocks::MockBackend;
    use crate::gamepad::backend::MockGamepadBackend;

    fn ds4_with_mock() -> (VirtualGamepadOutput, MockBackend) {
        let mock = MockBackend::new();
        let pad = VirtualGamepadOutput::new(Box::new(mock.clone()), Personality::Ds4);
        (pad, mock)
    }

    #[test]
    fn test_new_writes_neutral_first() {
        let (_pad, mock) = ds4_with_mock();
        let view = mock.view();
        assert_eq!(view.sticks, Some(RawSticks::neutral(Personality::Ds4)));
        assert_eq!(view.triggers, (0, 0));
    }

    #[test]
    fn test_ds4_set_sticks_inverts_y() {
        let (mut pad, mock) = ds4_with_mock();
        pad.set_sticks(0.0, 1.0, 0.0, 0.0);
        let sticks = mock.view().sticks.unwrap();
        assert_eq!(sticks.ly, 0);
        assert_eq!(sticks.lx, 128);
    }

    #[test]
    fn test_xbox_set_sticks_keeps_y() {
        let mock = MockBackend::new();
        let mut pad = VirtualGamepadOutput::new(Box::new(mock.clone()), Personality::Xbox360);
        pad.set_sticks(0.0, 1.0, -2.0, 0.0);
        let sticks = mock.view().sticks.unwrap();
        assert_eq!(sticks.ly, 32767);
        assert_eq!(sticks.rx, -32767, "input should be clamped to -1");
        assert!(!pad.state().invert_y);
    }

    #[test]
    fn test_stick_write_failure_forces_neutral() {
        let (mut pad, mock) = ds4_with_mock();
        pad.hold_button("l1", true);
        pad.hold_triggers(1.0, 0.5);

        mock.fail_next_stick_write();
        pad.set_sticks(1.0, 1.0, 1.0, 1.0);

        let view = mock.view();
        let sticks = view.sticks.unwrap();
        for raw in [sticks.lx, sticks.ly, sticks.rx, sticks.ry] {
            assert!(decode_stick(Personality::Ds4, raw).abs() < 1e-6);
        }
        assert!(view.pressed.is_empty());
        assert_eq!(view.triggers, (0, 0));

        let state = pad.state();
        assert_eq!(state.held_button, None);
        assert_eq!(state.held_trigger_l, 0.0);
        assert_eq!(state.held_trigger_r, 0.0);
    }

    #[test]
    fn test_neutral_is_idempotent() {
        let (mut pad, mock) = ds4_with_mock();
        pad.set_sticks(0.3, 0.3, 0.3, 0.3);
        pad.hold_button("cross", true);

        pad.neutral();
        let once = (pad.state(), mock.view().sticks, mock.view().triggers);
        pad.neutral();
        let twice = (pad.state(), mock.view().sticks, mock.view().triggers);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_neutral_swallows_total_failure() {
        let (mut pad, mock) = ds4_with_mock();
        mock.set_fail_all(true);
        pad.neutral();
        pad.set_sticks(1.0, 0.0, 0.0, 0.0);
    }

    #[test]
    fn test_hold_button_repeat_writes_once() {
        let mut backend = MockGamepadBackend::new();
        backend.expect_write_sticks().returning(|_| Ok(()));
        backend.expect_write_triggers().returning(|_, _| Ok(()));
        backend
            .expect_write_button()
            .withf(|b, pressed| *b == ButtonId::LeftShoulder && *pressed)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut pad = VirtualGamepadOutput::new(Box::new(backend), Personality::Ds4);
        pad.hold_button("l1", true);
        pad.hold_button("l1", true);
    }

    #[test]
    fn test_hold_button_switch_releases_previous() {
        let (mut pad, mock) = ds4_with_mock();
        pad.hold_button("l1", true);
        pad.hold_button("r1", true);

        let view = mock.view();
        assert_eq!(
            view.button_log,
            vec![
                (ButtonId::LeftShoulder, true),
                (ButtonId::LeftShoulder, false),
                (ButtonId::RightShoulder, true),
            ]
        );
        assert_eq!(pad.state().held_button.as_deref(), Some("r1"));
    }

    #[test]
    fn test_unknown_code_is_recorded_not_sent() {
        let (mut pad, mock) = ds4_with_mock();
        let writes = mock.view().writes;
        pad.hold_button("lb", true); // Xbox vocabulary on a DS4 pad
        assert_eq!(mock.view().writes, writes);
        assert_eq!(pad.state().held_button.as_deref(), Some("lb"));
    }

    #[test]
    fn test_hold_button_failure_keeps_state() {
        let (mut pad, mock) = ds4_with_mock();
        mock.set_fail_all(true);
        pad.hold_button("l1", true);
        assert_eq!(pad.state().held_button, None);

        mock.set_fail_all(false);
        pad.hold_button("l1", true);
        assert!(mock.view().pressed.contains(&ButtonId::LeftShoulder));
    }

    #[test]
    fn test_hold_triggers_debounced_on_bytes() {
        let (mut pad, mock) = ds4_with_mock();
        pad.hold_triggers(1.0, 0.0);
        let writes = mock.view().writes;
        pad.hold_triggers(0.9999, 0.0001);
        assert_eq!(mock.view().writes, writes);
        assert_eq!(mock.view().triggers, (255, 0));
    }

    #[test]
    fn test_release_hold_is_idempotent() {
        let (mut pad, mock) = ds4_with_mock();
        pad.hold_button("square", true);
        pad.hold_triggers(0.0, 1.0);

        pad.release_hold();
        let writes = mock.view().writes;
        pad.release_hold();

        assert_eq!(mock.view().writes, writes);
        assert!(mock.view().pressed.is_empty());
        assert_eq!(mock.view().triggers, (0, 0));
    }

    #[test]
    fn test_tap_presses_then_releases_after_duration() {
        let (mut pad, mock) = ds4_with_mock();
        let t0 = Instant::now();
        let sticks_before = mock.view().sticks;

        pad.tap_button("triangle", 30, t0);
        assert!(mock.view().pressed.contains(&ButtonId::FaceNorth));

        pad.poll_tap(t0 + Duration::from_millis(20));
        assert!(pad.tap_pending());

        pad.poll_tap(t0 + Duration::from_millis(30));
        assert!(!pad.tap_pending());
        assert!(mock.view().pressed.is_empty());
        assert_eq!(mock.view().sticks, sticks_before);
    }

    #[test]
    fn test_tap_duration_is_clamped() {
        let (mut pad, _mock) = ds4_with_mock();
        let t0 = Instant::now();
        pad.tap_button("cross", 5_000, t0);
        pad.poll_tap(t0 + Duration::from_millis(TAP_MAX_MS));
        assert!(!pad.tap_pending());

        pad.tap_button("cross", 0, t0);
        pad.poll_tap(t0 + Duration::from_millis(TAP_MIN_MS - 1));
        assert!(pad.tap_pending());
    }

    #[test]
    fn test_tap_unknown_code_uses_default_button() {
        let mock = MockBackend::new();
        let mut pad = VirtualGamepadOutput::new(Box::new(mock.clone()), Personality::Xbox360);
        pad.tap_button("nonsense", 30, Instant::now());
        assert!(mock.view().pressed.contains(&ButtonId::FaceWest));
    }

    #[test]
    fn test_neutral_releases_pending_tap() {
        let (mut pad, mock) = ds4_with_mock();
        pad.tap_button("circle", 100, Instant::now());
        pad.neutral();
        assert!(!pad.tap_pending());
        assert!(mock.view().pressed.is_empty());
    }
}
