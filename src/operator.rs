//! # Operator Events
//!
//! Named operator actions, per-action debouncing and the policy for
//! surfacing rejected events.
//!
//! How keys or buttons map to actions is decided outside this crate; the
//! binary reads action names from stdin.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::calibration::{CalibrationError, CalibrationStateMachine, Transition};

/// Default minimum re-trigger interval per action.
pub const DEFAULT_COOLDOWN_MS: u64 = 250;

/// Discrete operator actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorAction {
    Start,
    Record,
    DeadzoneIncrease,
    DeadzoneDecrease,
    EndDeadzone,
    RetryLast,
    Stop,
}

impl OperatorAction {
    pub const ALL: [OperatorAction; 7] = [
        OperatorAction::Start,
        OperatorAction::Record,
        OperatorAction::DeadzoneIncrease,
        OperatorAction::DeadzoneDecrease,
        OperatorAction::EndDeadzone,
        OperatorAction::RetryLast,
        OperatorAction::Stop,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            OperatorAction::Start => "start",
            OperatorAction::Record => "record",
            OperatorAction::DeadzoneIncrease => "deadzone_increase",
            OperatorAction::DeadzoneDecrease => "deadzone_decrease",
            OperatorAction::EndDeadzone => "end_deadzone",
            OperatorAction::RetryLast => "retry_last",
            OperatorAction::Stop => "stop",
        }
    }
}

impl fmt::Display for OperatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatorAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name == "reset" {
            return Ok(OperatorAction::Stop);
        }
        OperatorAction::ALL
            .into_iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| format!("unknown action '{}'", s.trim()))
    }
}

/// Whether `action` may fire at `now`, given when each action last fired.
///
/// An action fires if it never fired before or at least `interval` has
/// passed since it last did.
#[must_use]
pub fn debounce_check(
    last_fired: &HashMap<OperatorAction, Instant>,
    action: OperatorAction,
    now: Instant,
    interval: Duration,
) -> bool {
    match last_fired.get(&action) {
        Some(&last) => now.saturating_duration_since(last) >= interval,
        None => true,
    }
}

/// Per-action debounce state.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_fired: HashMap<OperatorAction, Instant>,
}

impl Debouncer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: HashMap::new(),
        }
    }

    /// Check and, if it passes, remember the firing.
    pub fn try_fire(&mut self, action: OperatorAction, now: Instant) -> bool {
        if !debounce_check(&self.last_fired, action, now, self.interval) {
            return false;
        }
        self.last_fired.insert(action, now);
        true
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_COOLDOWN_MS))
    }
}

/// What became of one operator event.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Dropped by the debouncer.
    Debounced,
    /// Accepted by the state machine.
    Applied(Transition),
    /// Rejected without effect.
    Ignored(CalibrationError),
}

/// Debounces operator events and forwards them to the state machine.
#[derive(Debug)]
pub struct OperatorDispatcher {
    debouncer: Debouncer,
}

impl OperatorDispatcher {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(cooldown),
        }
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Parameter and readiness errors are returned so the caller can show
    /// them. Events that simply do not apply in the current phase come back
    /// as [`Dispatch::Ignored`].
    pub fn handle(
        &mut self,
        machine: &CalibrationStateMachine,
        action: OperatorAction,
        now: Instant,
    ) -> Result<Dispatch, CalibrationError> {
        if !self.debouncer.try_fire(action, now) {
            debug!("Debounced '{}'", action);
            return Ok(Dispatch::Debounced);
        }

        match machine.dispatch(action) {
            Ok(transition) => Ok(Dispatch::Applied(transition)),
            Err(e @ (CalibrationError::Param(_) | CalibrationError::NotReady)) => {
                warn!("'{}' rejected: {}", action, e);
                Err(e)
            }
            Err(e @ CalibrationError::WrongState { .. }) => {
                debug!("{}", e);
                Ok(Dispatch::Ignored(e))
            }
            Err(e @ CalibrationError::NoPriorSample) => {
                info!("{}", e);
                Ok(Dispatch::Ignored(e))
            }
        }
    }
}

impl Default for OperatorDispatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_COOLDOWN_MS))
    }
}
