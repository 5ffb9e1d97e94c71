//! # Gamepad Backend
//!
//! Trait abstraction for device-level writes, so the output layer can be
//! tested without a uinput node.
//!
//! The Linux implementation creates a virtual pad through `/dev/uinput`
//! with the identity and axis layout of the selected personality:
//!
//! | Control | evdev code | DS4 range | Xbox 360 range |
//! |---------|------------|-----------|----------------|
//! | Left stick | ABS_X / ABS_Y | 0..=255 | -32768..=32767 |
//! | Right stick | ABS_RX / ABS_RY | 0..=255 | -32768..=32767 |
//! | Left trigger | ABS_Z | 0..=255 | 0..=255 |
//! | Right trigger | ABS_RZ | 0..=255 | 0..=255 |

use std::io;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, BusType, EventType, InputEvent, InputId, Key,
    UinputAbsSetup,
};
use tracing::info;

use super::axis::{stick_center, RawSticks};
use super::{ButtonId, GamepadError, Personality};

/// Sony vendor ID
const SONY_VENDOR_ID: u16 = 0x054c;

/// DualShock 4 (first revision) product ID
const DS4_PRODUCT_ID: u16 = 0x05c4;

/// Microsoft vendor ID
const MICROSOFT_VENDOR_ID: u16 = 0x045e;

/// Xbox 360 wired controller product ID
const XBOX360_PRODUCT_ID: u16 = 0x028e;

/// Device-level writes of already-encoded values.
#[cfg_attr(test, mockall::automock)]
pub trait GamepadBackend: Send {
    /// Write both sticks in one report.
    fn write_sticks(&mut self, sticks: RawSticks) -> io::Result<()>;

    /// Write both analog triggers in one report.
    fn write_triggers(&mut self, left: u8, right: u8) -> io::Result<()>;

    /// Press or release one button.
    fn write_button(&mut self, button: ButtonId, pressed: bool) -> io::Result<()>;
}

/// Virtual pad backed by a uinput device.
pub struct UinputBackend {
    device: VirtualDevice,
    personality: Personality,
}

impl std::fmt::Debug for UinputBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UinputBackend")
            .field("personality", &self.personality)
            .finish_non_exhaustive()
    }
}

impl UinputBackend {
    /// Create the virtual device for a personality.
    ///
    /// # Errors
    ///
    /// Returns `GamepadError::Open` if `/dev/uinput` is missing or not
    /// writable by the current user.
    pub fn create(personality: Personality) -> Result<Self, GamepadError> {
        let (vendor, product, name) = match personality {
            Personality::Ds4 => (SONY_VENDOR_ID, DS4_PRODUCT_ID, "stickcal DS4 pad"),
            Personality::Xbox360 => (MICROSOFT_VENDOR_ID, XBOX360_PRODUCT_ID, "stickcal Xbox 360 pad"),
        };

        let mut keys = AttributeSet::<Key>::new();
        for button in ButtonId::ALL {
            keys.insert(key_for(button));
        }

        let (stick_min, stick_max) = match personality {
            Personality::Ds4 => (0, 255),
            Personality::Xbox360 => (-32768, 32767),
        };
        let center = stick_center(personality);
        let stick = |axis| {
            UinputAbsSetup::new(axis, AbsInfo::new(center, stick_min, stick_max, 0, 0, 0))
        };
        let trigger = |axis| UinputAbsSetup::new(axis, AbsInfo::new(0, 0, 255, 0, 0, 0));

        let device = VirtualDeviceBuilder::new()
            .map_err(GamepadError::Open)?
            .name(name)
            .input_id(InputId::new(BusType::BUS_USB, vendor, product, 0x0100))
            .with_keys(&keys)
            .and_then(|b| b.with_absolute_axis(&stick(AbsoluteAxisType::ABS_X)))
            .and_then(|b| b.with_absolute_axis(&stick(AbsoluteAxisType::ABS_Y)))
            .and_then(|b| b.with_absolute_axis(&stick(AbsoluteAxisType::ABS_RX)))
            .and_then(|b| b.with_absolute_axis(&stick(AbsoluteAxisType::ABS_RY)))
            .and_then(|b| b.with_absolute_axis(&trigger(AbsoluteAxisType::ABS_Z)))
            .and_then(|b| b.with_absolute_axis(&trigger(AbsoluteAxisType::ABS_RZ)))
            .and_then(|b| b.build())
            .map_err(GamepadError::Open)?;

        info!(
            "Created virtual {} pad (vendor: 0x{:04x}, product: 0x{:04x})",
            personality, vendor, product
        );

        Ok(Self {
            device,
            personality,
        })
    }
}

impl GamepadBackend for UinputBackend {
    fn write_sticks(&mut self, sticks: RawSticks) -> io::Result<()> {
        self.device.emit(&[
            abs_event(AbsoluteAxisType::ABS_X, sticks.lx),
            abs_event(AbsoluteAxisType::ABS_Y, sticks.ly),
            abs_event(AbsoluteAxisType::ABS_RX, sticks.rx),
            abs_event(AbsoluteAxisType::ABS_RY, sticks.ry),
        ])
    }

    fn write_triggers(&mut self, left: u8, right: u8) -> io::Result<()> {
        self.device.emit(&[
            abs_event(AbsoluteAxisType::ABS_Z, i32::from(left)),
            abs_event(AbsoluteAxisType::ABS_RZ, i32::from(right)),
        ])
    }

    fn write_button(&mut self, button: ButtonId, pressed: bool) -> io::Result<()> {
        let event = InputEvent::new(EventType::KEY, key_for(button).code(), i32::from(pressed));
        self.device.emit(&[event])
    }
}

fn abs_event(axis: AbsoluteAxisType, value: i32) -> InputEvent {
    InputEvent::new(EventType::ABSOLUTE, axis.0, value)
}

/// evdev key emitted for a button.
fn key_for(button: ButtonId) -> Key {
    match button {
        ButtonId::FaceWest => Key::BTN_WEST,
        ButtonId::FaceSouth => Key::BTN_SOUTH,
        ButtonId::FaceEast => Key::BTN_EAST,
        ButtonId::FaceNorth => Key::BTN_NORTH,
        ButtonId::LeftShoulder => Key::BTN_TL,
        ButtonId::RightShoulder => Key::BTN_TR,
        ButtonId::Select => Key::BTN_SELECT,
        ButtonId::Start => Key::BTN_START,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_ids() {
        assert_eq!(SONY_VENDOR_ID, 0x054c, "Sony vendor ID should be 0x054c");
        assert_eq!(MICROSOFT_VENDOR_ID, 0x045e, "Microsoft vendor ID should be 0x045e");
    }

    #[test]
    fn test_every_button_has_a_distinct_key() {
        let keys: std::collections::HashSet<u16> =
            ButtonId::ALL.iter().map(|b| key_for(*b).code()).collect();
        assert_eq!(keys.len(), ButtonId::ALL.len());
    }

    // Integration test - only runs where /dev/uinput is writable
    #[test]
    #[ignore]
    fn test_create_uinput_device() {
        let mut backend = UinputBackend::create(Personality::Ds4).expect("uinput not available");
        backend
            .write_sticks(RawSticks::neutral(Personality::Ds4))
            .expect("neutral write failed");
    }
}
