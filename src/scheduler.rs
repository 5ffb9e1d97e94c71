//! # Output Scheduler
//!
//! Fixed-rate loop that keeps the virtual pad in step with the commanded
//! controls. Every tick, in order:
//!
//! 1. Release a keepalive tap whose duration has elapsed.
//! 2. Tap the keepalive button when the interval has passed and the view is
//!    expected to be turning (deadzone search, or a trial in progress).
//! 3. Re-apply the hold target while a session is armed, or release it once
//!    the session ends.
//! 4. Write the commanded sticks.
//!
//! The loop ends when the shutdown channel flips to `true`, leaving the pad
//! neutral.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::calibration::Mode;
use crate::clock::Clock;
use crate::controls::SharedControls;
use crate::gamepad::{lock_gamepad, ButtonId, HoldTarget, SharedGamepad};

/// Output update rate in Hz
pub const OUTPUT_RATE_HZ: u64 = 100;

/// Shortest keepalive interval.
pub const KEEPALIVE_MIN_MS: u64 = 40;

/// Longest keepalive interval.
pub const KEEPALIVE_MAX_MS: u64 = 500;

/// Scheduler behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub keepalive_enabled: bool,
    pub keepalive_interval: Duration,
    pub keepalive_button: ButtonId,
    pub tap_ms: u64,
    pub hold_enabled: bool,
    pub hold_target: Option<HoldTarget>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            keepalive_enabled: true,
            keepalive_interval: Duration::from_millis(120),
            keepalive_button: ButtonId::default_keepalive(),
            tap_ms: 30,
            hold_enabled: false,
            hold_target: None,
        }
    }
}

impl SchedulerConfig {
    /// Keepalive interval clamped into the supported range.
    #[must_use]
    pub fn effective_interval(&self) -> Duration {
        self.keepalive_interval.clamp(
            Duration::from_millis(KEEPALIVE_MIN_MS),
            Duration::from_millis(KEEPALIVE_MAX_MS),
        )
    }
}

/// Pushes commanded controls to the virtual pad at [`OUTPUT_RATE_HZ`].
pub struct OutputScheduler {
    gamepad: SharedGamepad,
    controls: Arc<SharedControls>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    last_keepalive: Option<Instant>,
    hold_applied: bool,
}

impl OutputScheduler {
    pub fn new(
        gamepad: SharedGamepad,
        controls: Arc<SharedControls>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gamepad,
            controls,
            config,
            clock,
            last_keepalive: None,
            hold_applied: false,
        }
    }

    /// Run one output cycle.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let status = self.controls.status();
        let sticks = self.controls.sticks();

        let mut pad = lock_gamepad(&self.gamepad);
        pad.poll_tap(now);

        let turning = status.mode == Mode::DeadzoneSearch || status.in_trial;
        if self.config.keepalive_enabled && turning {
            let due = self.last_keepalive.map_or(true, |last| {
                now.saturating_duration_since(last) >= self.config.effective_interval()
            });
            if due && !pad.tap_pending() {
                let code = self.config.keepalive_button.code(pad.personality());
                pad.tap_button(code, self.config.tap_ms, now);
                self.last_keepalive = Some(now);
            }
        }

        match self.config.hold_target.filter(|_| self.config.hold_enabled && status.armed) {
            Some(HoldTarget::LeftTrigger) => {
                pad.hold_triggers(1.0, 0.0);
                self.hold_applied = true;
            }
            Some(HoldTarget::RightTrigger) => {
                pad.hold_triggers(0.0, 1.0);
                self.hold_applied = true;
            }
            Some(HoldTarget::Button(button)) => {
                let code = button.code(pad.personality());
                pad.hold_button(code, true);
                self.hold_applied = true;
            }
            None if self.hold_applied => {
                debug!("Session ended, releasing hold");
                pad.release_hold();
                self.hold_applied = false;
            }
            None => {}
        }

        pad.set_sticks(sticks.lx, sticks.ly, sticks.rx, sticks.ry);
    }

    /// Tick until `shutdown` becomes `true` (or its sender is dropped), then
    /// leave the pad neutral.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(1000 / OUTPUT_RATE_HZ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Output loop running at {}Hz", OUTPUT_RATE_HZ);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        lock_gamepad(&self.gamepad).neutral();
        info!("Output loop stopped, pad left neutral");
    }
}
