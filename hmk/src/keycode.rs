use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};

/// 8-bit, range-overloaded keycode.
///
/// The lower part of the range carries standard HID usage ids, the upper
/// part is overloaded with firmware-internal operations:
///
/// | Range         | Meaning                        |
/// |---------------|--------------------------------|
/// | `0x00`        | No-op                          |
/// | `0x01`        | Transparent (defer to a lower active layer) |
/// | `0x04..=0xE7` | HID keycodes (`0xE0..=0xE7` are modifiers) |
/// | `0xE8..=0xEF` | `MO(n)`: momentary layer n     |
/// | `0xF0..=0xF7` | `PF(n)`: select profile n      |
/// | `0xF8..=0xFC` | Special operations             |
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(transparent)]
pub struct Keycode(pub u8);

const HID_START: u8 = 0x04;
const HID_END: u8 = 0xE7;
const MODIFIER_START: u8 = 0xE0;
const MODIFIER_END: u8 = 0xE7;
const MOMENTARY_LAYER_START: u8 = 0xE8;
const MOMENTARY_LAYER_END: u8 = 0xEF;
const PROFILE_START: u8 = 0xF0;
const PROFILE_END: u8 = 0xF7;

impl Keycode {
    /// No-op keycode
    pub const NO: Keycode = Keycode(0x00);
    /// Defer to the next lower active layer
    pub const TRANSPARENT: Keycode = Keycode(0x01);
    /// Toggle the per-key disable bit (layer 0 only)
    pub const KEY_LOCK: Keycode = Keycode(0xF8);
    /// Lock the current layer as the default layer
    pub const LAYER_LOCK: Keycode = Keycode(0xF9);
    /// Swap between profile 0 and the last non-default profile
    pub const PROFILE_SWAP: Keycode = Keycode(0xFA);
    /// Cycle to the next profile
    pub const PROFILE_NEXT: Keycode = Keycode(0xFB);
    /// Reboot to the bootloader
    pub const BOOT: Keycode = Keycode(0xFC);

    /// Momentary layer keycode `MO(layer)`
    pub const fn mo(layer: u8) -> Self {
        Keycode(MOMENTARY_LAYER_START + (layer & 0x07))
    }

    /// Profile select keycode `PF(profile)`
    pub const fn pf(profile: u8) -> Self {
        Keycode(PROFILE_START + (profile & 0x07))
    }

    /// Whether the keycode is in the HID usage range
    pub const fn is_hid(self) -> bool {
        HID_START <= self.0 && self.0 <= HID_END
    }

    /// Whether the keycode is a HID modifier
    pub const fn is_modifier(self) -> bool {
        MODIFIER_START <= self.0 && self.0 <= MODIFIER_END
    }

    /// The modifier bit of the keycode in a HID report, LCtrl is bit 0
    pub const fn as_modifier_bit(self) -> u8 {
        1 << (self.0 - MODIFIER_START)
    }

    /// The layer of a momentary layer keycode
    pub const fn momentary_layer(self) -> Option<u8> {
        if MOMENTARY_LAYER_START <= self.0 && self.0 <= MOMENTARY_LAYER_END {
            Some(self.0 - MOMENTARY_LAYER_START)
        } else {
            None
        }
    }

    /// The profile of a profile select keycode
    pub const fn profile(self) -> Option<u8> {
        if PROFILE_START <= self.0 && self.0 <= PROFILE_END {
            Some(self.0 - PROFILE_START)
        } else {
            None
        }
    }
}
