//! # Button Vocabulary
//!
//! The fixed set of buttons the calibration protocol uses, with their code
//! names per personality.
//!
//! | Button | DS4 code | Xbox 360 code | evdev key |
//! |--------|----------|---------------|-----------|
//! | West face | `square` | `x` | BTN_WEST |
//! | South face | `cross` | `a` | BTN_SOUTH |
//! | East face | `circle` | `b` | BTN_EAST |
//! | North face | `triangle` | `y` | BTN_NORTH |
//! | Left shoulder | `l1` | `lb` | BTN_TL |
//! | Right shoulder | `r1` | `rb` | BTN_TR |
//! | Select | `share` | `back` | BTN_SELECT |
//! | Start | `options` | `start` | BTN_START |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use super::Personality;

/// A button of the emulated pad, independent of personality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonId {
    FaceWest,
    FaceSouth,
    FaceEast,
    FaceNorth,
    LeftShoulder,
    RightShoulder,
    Select,
    Start,
}

impl ButtonId {
    /// Every button in vocabulary order.
    pub const ALL: [ButtonId; 8] = [
        ButtonId::FaceWest,
        ButtonId::FaceSouth,
        ButtonId::FaceEast,
        ButtonId::FaceNorth,
        ButtonId::LeftShoulder,
        ButtonId::RightShoulder,
        ButtonId::Select,
        ButtonId::Start,
    ];

    /// Code name of this button for a personality.
    #[must_use]
    pub fn code(self, personality: Personality) -> &'static str {
        match personality {
            Personality::Ds4 => match self {
                ButtonId::FaceWest => "square",
                ButtonId::FaceSouth => "cross",
                ButtonId::FaceEast => "circle",
                ButtonId::FaceNorth => "triangle",
                ButtonId::LeftShoulder => "l1",
                ButtonId::RightShoulder => "r1",
                ButtonId::Select => "share",
                ButtonId::Start => "options",
            },
            Personality::Xbox360 => match self {
                ButtonId::FaceWest => "x",
                ButtonId::FaceSouth => "a",
                ButtonId::FaceEast => "b",
                ButtonId::FaceNorth => "y",
                ButtonId::LeftShoulder => "lb",
                ButtonId::RightShoulder => "rb",
                ButtonId::Select => "back",
                ButtonId::Start => "start",
            },
        }
    }

    /// Looks up a code in one personality's vocabulary.
    ///
    /// Codes are matched case-insensitively after trimming. Codes from the
    /// other personality's vocabulary are not recognized.
    ///
    /// # Examples
    ///
    /// ```
    /// use stickcal::gamepad::{ButtonId, Personality};
    ///
    /// assert_eq!(ButtonId::from_code(Personality::Ds4, "L1"), Some(ButtonId::LeftShoulder));
    /// assert_eq!(ButtonId::from_code(Personality::Ds4, "lb"), None);
    /// ```
    #[must_use]
    pub fn from_code(personality: Personality, code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|b| b.code(personality) == code)
    }

    /// Default keepalive button (square on DS4, X on Xbox 360).
    #[must_use]
    pub fn default_keepalive() -> Self {
        ButtonId::FaceWest
    }
}

impl FromStr for ButtonId {
    type Err = String;

    /// Accepts a code from either personality's vocabulary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ButtonId::from_code(Personality::Ds4, s)
            .or_else(|| ButtonId::from_code(Personality::Xbox360, s))
            .ok_or_else(|| format!("unknown button code '{}'", s.trim()))
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.code(Personality::Ds4),
            self.code(Personality::Xbox360)
        )
    }
}

impl<'de> Deserialize<'de> for ButtonId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What to keep pressed while a test session is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldTarget {
    /// A digital button.
    Button(ButtonId),
    /// Full left trigger (L2 / LT).
    LeftTrigger,
    /// Full right trigger (R2 / RT).
    RightTrigger,
}

impl FromStr for HoldTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left_trigger" | "l2" | "lt" => Ok(HoldTarget::LeftTrigger),
            "right_trigger" | "r2" | "rt" => Ok(HoldTarget::RightTrigger),
            other => other.parse().map(HoldTarget::Button),
        }
    }
}

impl<'de> Deserialize<'de> for HoldTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
