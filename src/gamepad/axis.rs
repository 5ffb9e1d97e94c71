//! # Axis Mapper
//!
//! Pure conversions between normalized stick/trigger values and the native
//! encodings of each device personality.
//!
//! | Personality | Stick encoding | Center | Trigger encoding |
//! |-------------|----------------|--------|------------------|
//! | DS4 | 0..=255 | 128 | 0..=255 |
//! | Xbox 360 | -32767..=32767 | 0 | 0..=255 |
//!
//! The protocol layer always treats positive Y as "up". The DS4 device layer
//! treats positive Y as "down", so [`orient_y`] flips the sign for DS4.
//!
//! ## Usage
//!
//! ```
//! use stickcal::gamepad::axis::{encode_stick, to_stick_byte, to_stick_short};
//! use stickcal::gamepad::Personality;
//!
//! assert_eq!(to_stick_byte(0.0), 128);
//! assert_eq!(to_stick_short(1.0), 32767);
//! assert_eq!(encode_stick(Personality::Ds4, -1.0), 0);
//! ```

use super::Personality;

/// Center value of a DS4 stick axis byte.
pub const DS4_STICK_CENTER: i32 = 128;

/// Full-scale magnitude of an Xbox 360 stick axis.
pub const XBOX_STICK_MAX: i32 = 32767;

/// Full-scale trigger byte for both personalities.
pub const TRIGGER_MAX: u8 = 255;

/// Encoded values of both sticks, ready to be written to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSticks {
    /// Left stick X.
    pub lx: i32,
    /// Left stick Y.
    pub ly: i32,
    /// Right stick X.
    pub rx: i32,
    /// Right stick Y.
    pub ry: i32,
}

impl RawSticks {
    /// Both sticks at rest for the given personality.
    #[must_use]
    pub fn neutral(personality: Personality) -> Self {
        let c = stick_center(personality);
        Self {
            lx: c,
            ly: c,
            rx: c,
            ry: c,
        }
    }
}

/// Clamps a value into `-1.0..=1.0`. NaN maps to 0.0.
#[must_use]
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(-1.0, 1.0)
}

/// Clamps a value into `0.0..=1.0`. NaN maps to 0.0.
#[must_use]
pub fn clamp01(v: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}

/// Converts `-1.0..=1.0` to the Xbox 360 signed range.
///
/// # Examples
///
/// ```
/// use stickcal::gamepad::axis::to_stick_short;
///
/// assert_eq!(to_stick_short(0.0), 0);
/// assert_eq!(to_stick_short(-1.0), -32767);
/// assert_eq!(to_stick_short(2.0), 32767);
/// ```
#[must_use]
pub fn to_stick_short(x: f32) -> i32 {
    (clamp_unit(x) * XBOX_STICK_MAX as f32).round() as i32
}

/// Converts `-1.0..=1.0` to a DS4 stick byte where 128 is center.
///
/// # Examples
///
/// ```
/// use stickcal::gamepad::axis::to_stick_byte;
///
/// assert_eq!(to_stick_byte(-1.0), 0);
/// assert_eq!(to_stick_byte(0.0), 128);
/// assert_eq!(to_stick_byte(1.0), 255);
/// ```
#[must_use]
pub fn to_stick_byte(x: f32) -> i32 {
    ((clamp_unit(x) + 1.0) * 0.5 * 255.0).round() as i32
}

/// Converts trigger pressure `0.0..=1.0` to `0..=255`.
#[must_use]
pub fn to_trigger_byte(x: f32) -> u8 {
    (clamp01(x) * f32::from(TRIGGER_MAX)).round() as u8
}

/// Encodes a single normalized stick component for a personality.
#[must_use]
pub fn encode_stick(personality: Personality, x: f32) -> i32 {
    match personality {
        Personality::Ds4 => to_stick_byte(x),
        Personality::Xbox360 => to_stick_short(x),
    }
}

/// Encoded value of a stick component at rest.
#[must_use]
pub fn stick_center(personality: Personality) -> i32 {
    match personality {
        Personality::Ds4 => DS4_STICK_CENTER,
        Personality::Xbox360 => 0,
    }
}

/// Applies the personality's Y-axis sign convention to a protocol Y value.
#[must_use]
pub fn orient_y(personality: Personality, y: f32) -> f32 {
    if personality.inverts_y() {
        -y
    } else {
        y
    }
}

/// Encodes both sticks, clamping and orienting Y for the personality.
#[must_use]
pub fn encode_sticks(personality: Personality, lx: f32, ly: f32, rx: f32, ry: f32) -> RawSticks {
    RawSticks {
        lx: encode_stick(personality, lx),
        ly: encode_stick(personality, orient_y(personality, clamp_unit(ly))),
        rx: encode_stick(personality, rx),
        ry: encode_stick(personality, orient_y(personality, clamp_unit(ry))),
    }
}

/// Decodes a native stick value back to `-1.0..=1.0` (device orientation).
///
/// DS4 bytes decode around 128, so 0 and 255 land on about -1.0 and 1.0.
#[must_use]
pub fn decode_stick(personality: Personality, raw: i32) -> f32 {
    match personality {
        Personality::Ds4 => ((raw as f32) - DS4_STICK_CENTER as f32) / 127.0,
        Personality::Xbox360 => raw as f32 / XBOX_STICK_MAX as f32,
    }
}

/// Decodes a trigger byte back to `0.0..=1.0`.
#[must_use]
pub fn decode_trigger(raw: u8) -> f32 {
    f32::from(raw) / f32::from(TRIGGER_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit_handles_nan_and_range() {
        assert_eq!(clamp_unit(f32::NAN), 0.0);
        assert_eq!(clamp_unit(3.0), 1.0);
        assert_eq!(clamp_unit(-3.0), -1.0);
        assert_eq!(clamp_unit(0.25), 0.25);
    }

    #[test]
    fn test_clamp01() {
        assert_eq!(clamp01(-0.5), 0.0);
        assert_eq!(clamp01(1.5), 1.0);
        assert_eq!(clamp01(f32::NAN), 0.0);
    }

    #[test]
    fn test_stick_byte_endpoints() {
        assert_eq!(to_stick_byte(-1.0), 0);
        assert_eq!(to_stick_byte(0.0), 128);
        assert_eq!(to_stick_byte(1.0), 255);
    }

    #[test]
    fn test_stick_short_endpoints() {
        assert_eq!(to_stick_short(-1.0), -32767);
        assert_eq!(to_stick_short(0.0), 0);
        assert_eq!(to_stick_short(0.5), 16384);
        assert_eq!(to_stick_short(1.0), 32767);
    }

    #[test]
    fn test_trigger_byte() {
        assert_eq!(to_trigger_byte(0.0), 0);
        assert_eq!(to_trigger_byte(1.0), 255);
        assert_eq!(to_trigger_byte(0.5), 128);
        assert_eq!(to_trigger_byte(7.0), 255);
    }

    #[test]
    fn test_ds4_inverts_y_only() {
        let raw = encode_sticks(Personality::Ds4, 0.5, 1.0, -0.5, -1.0);
        assert_eq!(raw.lx, to_stick_byte(0.5));
        assert_eq!(raw.ly, 0, "DS4 up is encoded as the low end");
        assert_eq!(raw.rx, to_stick_byte(-0.5));
        assert_eq!(raw.ry, 255);
    }

    #[test]
    fn test_xbox_passes_y_through() {
        let raw = encode_sticks(Personality::Xbox360, 0.0, 1.0, 0.0, -1.0);
        assert_eq!(raw.ly, 32767);
        assert_eq!(raw.ry, -32767);
    }

    #[test]
    fn test_neutral_encoding_per_personality() {
        assert_eq!(RawSticks::neutral(Personality::Ds4).rx, 128);
        assert_eq!(RawSticks::neutral(Personality::Xbox360).rx, 0);
    }

    #[test]
    fn test_decode_center_is_zero() {
        assert!(decode_stick(Personality::Ds4, 128).abs() < 1e-6);
        assert!(decode_stick(Personality::Xbox360, 0).abs() < 1e-6);
        assert!((decode_stick(Personality::Ds4, 255) - 1.0).abs() < 0.01);
        assert!((decode_trigger(255) - 1.0).abs() < 1e-6);
    }
}
