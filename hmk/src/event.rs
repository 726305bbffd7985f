use embassy_time::Instant;

use crate::keycode::Keycode;

/// A press or release edge produced by the matrix scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyEvent {
    pub key: u8,
    pub pressed: bool,
    pub time: Instant,
}

/// Key event type seen by the advanced key engine.
///
/// The discriminants are ordered so that `kind as u8 - Press as u8` indexes
/// the four phases of a Dynamic Keystroke action bitmap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum KeyEventKind {
    Hold = 0,
    Press = 1,
    BottomOut = 2,
    ReleaseFromBottomOut = 3,
    Release = 4,
}

impl KeyEventKind {
    /// Index into a Dynamic Keystroke action bitmap
    pub(crate) const fn dks_phase(self) -> u8 {
        self as u8 - KeyEventKind::Press as u8
    }
}

/// An event routed to a specific advanced key instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvancedKeyEvent {
    pub kind: KeyEventKind,
    /// Key index the event originated from
    pub key: u8,
    /// Keycode resolved at press time. Only used by Null Bind keys.
    pub keycode: Keycode,
    /// Index of the advanced key in the profile's advanced key table
    pub index: u8,
}
