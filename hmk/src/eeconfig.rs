//! The persisted keyboard configuration and its RAM representation.
//!
//! The input core works on a RAM copy of this configuration; the runtime
//! mutations (profile selection, bottom-out thresholds) are mirrored to the
//! persistent side through [`crate::storage::ConfigStore`].

use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};

use crate::advanced_key::{AdvancedKeyDef, Macro};
use crate::keycode::Keycode;
use crate::NUM_MACROS;

/// Actuation configuration for a key. A non-zero `rt_down` enables Rapid
/// Trigger; `rt_up` of 0 mirrors `rt_down`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Actuation {
    /// Actuation point (0-255)
    pub actuation_point: u8,
    /// Rapid Trigger press sensitivity (0-255), 0 disables Rapid Trigger
    pub rt_down: u8,
    /// Rapid Trigger release sensitivity (0-255), 0 mirrors `rt_down`
    pub rt_up: u8,
    /// Whether Continuous Rapid Trigger is enabled (reset point 0)
    pub continuous: bool,
}

impl Default for Actuation {
    fn default() -> Self {
        Self { actuation_point: 128, rt_down: 0, rt_up: 0, continuous: false }
    }
}

/// Factory calibration of the analog front end.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationOptions {
    /// ADC value expected with the key at rest
    pub initial_rest_value: u16,
    /// Minimum ADC delta between rest and bottom-out
    pub initial_bottom_out_threshold: u16,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self { initial_rest_value: 0, initial_bottom_out_threshold: 1 }
    }
}

/// Global keyboard options, packed into one byte.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(transparent)]
pub struct EeconfigOptions(u8);

impl EeconfigOptions {
    const SAVE_BOTTOM_OUT_THRESHOLD: u8 = 1 << 0;
    const XINPUT_ENABLED: u8 = 1 << 1;

    pub const fn save_bottom_out_threshold(self) -> bool {
        self.0 & Self::SAVE_BOTTOM_OUT_THRESHOLD != 0
    }

    pub const fn with_save_bottom_out_threshold(self, enabled: bool) -> Self {
        Self(if enabled {
            self.0 | Self::SAVE_BOTTOM_OUT_THRESHOLD
        } else {
            self.0 & !Self::SAVE_BOTTOM_OUT_THRESHOLD
        })
    }

    pub const fn xinput_enabled(self) -> bool {
        self.0 & Self::XINPUT_ENABLED != 0
    }

    pub const fn with_xinput_enabled(self, enabled: bool) -> Self {
        Self(if enabled { self.0 | Self::XINPUT_ENABLED } else { self.0 & !Self::XINPUT_ENABLED })
    }
}

/// Per-profile gamepad options, packed into one byte.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(transparent)]
pub struct GamepadOptions(u8);

impl GamepadOptions {
    const KEYBOARD_ENABLED: u8 = 1 << 0;
    const GAMEPAD_OVERRIDE: u8 = 1 << 1;

    /// Whether key events are processed by the layout at all
    pub const fn keyboard_enabled(self) -> bool {
        self.0 & Self::KEYBOARD_ENABLED != 0
    }

    pub const fn with_keyboard_enabled(self, enabled: bool) -> Self {
        Self(if enabled { self.0 | Self::KEYBOARD_ENABLED } else { self.0 & !Self::KEYBOARD_ENABLED })
    }

    /// Whether keys mapped to a gamepad button are hidden from the layout
    pub const fn gamepad_override(self) -> bool {
        self.0 & Self::GAMEPAD_OVERRIDE != 0
    }

    pub const fn with_gamepad_override(self, enabled: bool) -> Self {
        Self(if enabled { self.0 | Self::GAMEPAD_OVERRIDE } else { self.0 & !Self::GAMEPAD_OVERRIDE })
    }
}

impl Default for GamepadOptions {
    fn default() -> Self {
        GamepadOptions(0).with_keyboard_enabled(true)
    }
}

/// A keyboard profile: keymap, actuation settings, advanced keys and the
/// gamepad mapping.
pub struct Profile<const NUM_LAYERS: usize, const NUM_KEYS: usize, const NUM_ADVANCED_KEYS: usize> {
    pub keymap: [[Keycode; NUM_KEYS]; NUM_LAYERS],
    pub actuation_map: [Actuation; NUM_KEYS],
    pub advanced_keys: heapless::Vec<AdvancedKeyDef, NUM_ADVANCED_KEYS>,
    pub macros: [Macro; NUM_MACROS],
    /// Gamepad button id per key, 0 = not mapped
    pub gamepad_buttons: [u8; NUM_KEYS],
    pub gamepad_options: GamepadOptions,
}

impl<const NUM_LAYERS: usize, const NUM_KEYS: usize, const NUM_ADVANCED_KEYS: usize> Default
    for Profile<NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>
{
    fn default() -> Self {
        Self {
            keymap: [[Keycode::NO; NUM_KEYS]; NUM_LAYERS],
            actuation_map: [Actuation::default(); NUM_KEYS],
            advanced_keys: heapless::Vec::new(),
            macros: [Macro::default(); NUM_MACROS],
            gamepad_buttons: [0; NUM_KEYS],
            gamepad_options: GamepadOptions::default(),
        }
    }
}

/// The full persisted configuration.
pub struct Eeconfig<
    const NUM_PROFILES: usize,
    const NUM_LAYERS: usize,
    const NUM_KEYS: usize,
    const NUM_ADVANCED_KEYS: usize,
> {
    pub profiles: [Profile<NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>; NUM_PROFILES],
    pub calibration: CalibrationOptions,
    /// Per-key learned bottom-out threshold relative to the rest value
    pub bottom_out_threshold: [u16; NUM_KEYS],
    pub options: EeconfigOptions,
    pub current_profile: u8,
    pub last_non_default_profile: u8,
}

impl<
    const NUM_PROFILES: usize,
    const NUM_LAYERS: usize,
    const NUM_KEYS: usize,
    const NUM_ADVANCED_KEYS: usize,
> Default for Eeconfig<NUM_PROFILES, NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>
{
    fn default() -> Self {
        Self {
            profiles: core::array::from_fn(|_| Profile::default()),
            calibration: CalibrationOptions::default(),
            bottom_out_threshold: [0; NUM_KEYS],
            options: EeconfigOptions::default(),
            current_profile: 0,
            last_non_default_profile: 0,
        }
    }
}

impl<
    const NUM_PROFILES: usize,
    const NUM_LAYERS: usize,
    const NUM_KEYS: usize,
    const NUM_ADVANCED_KEYS: usize,
> Eeconfig<NUM_PROFILES, NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>
{
    /// The profile currently in effect.
    pub fn current_profile(&self) -> &Profile<NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS> {
        &self.profiles[(self.current_profile as usize).min(NUM_PROFILES - 1)]
    }
}
