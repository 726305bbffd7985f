#![doc = include_str!("../../README.md")]
// Enable std in test
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod advanced_key;
pub mod board;
pub mod combo;
pub mod deferred;
pub mod eeconfig;
pub mod event;
pub mod hid;
pub mod keyboard;
pub mod keycode;
pub mod keymap;
pub mod matrix;
pub mod storage;

/// Number of macro sequences per profile
pub const NUM_MACROS: usize = 16;
/// Maximum number of events in a macro sequence
pub const MACRO_MAX_EVENTS: usize = 16;
/// Maximum number of trigger keys in a combo
pub const COMBO_MAX_KEYS: usize = 4;
/// Size of the combo event queue
pub const COMBO_QUEUE_SIZE: usize = 16;
/// Size of the buffer for events arriving while a tap-hold key is undecided
pub const PENDING_EVENTS_SIZE: usize = 8;
/// Size of the deferred action queue
pub const DEFERRED_QUEUE_SIZE: usize = 16;
/// Synthetic key index used to register combo output keycodes
pub const COMBO_OUTPUT_KEY: u8 = 255;
/// Marker for an unused combo key slot
pub const COMBO_KEY_NONE: u8 = 255;

pub use keyboard::Keyboard;
