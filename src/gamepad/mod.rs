//! # Gamepad Module
//!
//! Virtual gamepad output.
//!
//! This module handles:
//! - Encoding normalized stick/trigger values per device personality
//! - The DS4 / Xbox 360 button vocabulary
//! - Creating the virtual device through uinput
//! - Stick, trigger and button intents with neutral-on-error recovery

pub mod axis;
pub mod backend;
pub mod buttons;
pub mod output;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use thiserror::Error;

pub use axis::RawSticks;
pub use backend::{GamepadBackend, UinputBackend};
pub use buttons::{ButtonId, HoldTarget};
pub use output::{DeviceState, VirtualGamepadOutput};

/// Emulated device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    /// DualShock 4 style pad. Y axes are inverted at the device layer.
    Ds4,
    /// Xbox 360 style pad.
    Xbox360,
}

impl Personality {
    /// Whether protocol Y values are sign-inverted before being written.
    #[must_use]
    pub fn inverts_y(self) -> bool {
        matches!(self, Personality::Ds4)
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Personality::Ds4 => f.write_str("ds4"),
            Personality::Xbox360 => f.write_str("xbox360"),
        }
    }
}

impl FromStr for Personality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ds4" => Ok(Personality::Ds4),
            "xbox360" | "x360" => Ok(Personality::Xbox360),
            other => Err(format!("unknown personality '{}' (expected ds4 or xbox360)", other)),
        }
    }
}

/// Virtual gamepad errors
#[derive(Debug, Error)]
pub enum GamepadError {
    /// The virtual device could not be created
    #[error("failed to create virtual device: {0}")]
    Open(#[source] std::io::Error),

    /// A device write failed
    #[error("device write failed during {op}: {source}")]
    Write {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Device handle shared by the state machine and the output scheduler.
pub type SharedGamepad = Arc<Mutex<VirtualGamepadOutput>>;

/// Lock a shared gamepad, recovering the guard if a holder panicked.
///
/// The output is only ever left in a state its own methods produced, so
/// continuing after a poisoned lock is sound.
pub fn lock_gamepad(gamepad: &SharedGamepad) -> MutexGuard<'_, VirtualGamepadOutput> {
    gamepad.lock().unwrap_or_else(PoisonError::into_inner)
}
