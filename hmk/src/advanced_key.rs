//! Configuration and runtime state for the six advanced key behaviors.
//!
//! Advanced keys replace the plain register/unregister behavior of a key
//! with a small state machine. The configuration types below are the
//! persisted, host-configurable definitions; each gets a matching runtime
//! state record tagged by the same variant.

use embassy_time::{Duration, Instant};
use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};

use crate::event::KeyEventKind;
use crate::keycode::Keycode;
use crate::{COMBO_KEY_NONE, COMBO_MAX_KEYS, MACRO_MAX_EVENTS};

/// Default combo term when a combo's own term is 0
pub const DEFAULT_COMBO_TERM: Duration = Duration::from_millis(50);

//--------------------------------------------------------------------
// Configuration
//--------------------------------------------------------------------

/// Null Bind resolution behavior when both keys are pressed at once.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NullBindBehavior {
    /// Prioritize the last pressed key
    #[default]
    Last = 0,
    /// Prioritize the primary key
    Primary,
    /// Prioritize the secondary key
    Secondary,
    /// Release both keys
    Neutral,
    /// Prioritize the key that is pressed further
    Distance,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NullBind {
    pub secondary_key: u8,
    pub behavior: NullBindBehavior,
    /// If non-zero, both keys register when both are pressed past this
    /// point, regardless of the behavior
    pub bottom_out_point: u8,
}

/// Dynamic Keystroke action for one phase of the keystroke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DksAction {
    Hold = 0,
    Press,
    Release,
    Tap,
}

impl DksAction {
    const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => DksAction::Hold,
            1 => DksAction::Press,
            2 => DksAction::Release,
            _ => DksAction::Tap,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DynamicKeystroke {
    /// Up to 4 bound keycodes
    pub keycodes: [Keycode; 4],
    /// For each keycode, a 2-bit action per keystroke phase:
    /// bits 0-1 press, 2-3 bottom-out, 4-5 release from bottom-out,
    /// 6-7 release
    pub bitmap: [u8; 4],
    /// Bottom-out point (0-255)
    pub bottom_out_point: u8,
}

impl DynamicKeystroke {
    /// The action bound to a keycode slot for the given event type
    pub fn action(&self, slot: usize, kind: KeyEventKind) -> DksAction {
        DksAction::from_bits(self.bitmap[slot] >> (kind.dks_phase() * 2))
    }
}

/// Tap-Hold interrupt flavors.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TapHoldFlavor {
    /// Hold if the tapping term expired OR another key is pressed
    #[default]
    HoldPreferred = 0,
    /// Hold if the tapping term expired OR another key is pressed AND
    /// released
    Balanced,
    /// Hold only if the tapping term expired
    TapPreferred,
    /// Hold only if another key is pressed BEFORE the tapping term expires
    TapUnlessInterrupted,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TapHold {
    pub tap_keycode: Keycode,
    pub hold_keycode: Keycode,
    /// Tapping term in milliseconds
    pub tapping_term_ms: u16,
    pub flavor: TapHoldFlavor,
    /// Produce the tap action when the key is held past the tapping term
    /// and released without interruption
    pub retro_tapping: bool,
    /// Promote to hold on an interrupting press while still undecided
    /// (HoldPreferred and Balanced flavors only)
    pub hold_while_undecided: bool,
    /// Re-press within this time of the last tap always produces the tap
    /// (0 = disabled)
    pub quick_tap_ms: u16,
    /// Press within this time of another non-modifier key press always
    /// produces the tap (0 = disabled). Useful for home-row mods.
    pub require_prior_idle_ms: u16,
    /// Keycode sent on double tap (`Keycode::NO` = disabled; uses the
    /// quick tap window if set, otherwise the tapping term)
    pub double_tap_keycode: Keycode,
}

impl TapHold {
    pub(crate) fn tapping_term(&self) -> Duration {
        Duration::from_millis(self.tapping_term_ms as u64)
    }

    /// Detection window for quick taps and double taps
    pub(crate) fn repeat_window(&self) -> Duration {
        if self.quick_tap_ms > 0 {
            Duration::from_millis(self.quick_tap_ms as u64)
        } else {
            self.tapping_term()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Toggle {
    pub keycode: Keycode,
    /// Holding past this term cancels the toggle
    pub tapping_term_ms: u16,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Combo {
    /// Trigger key indices, `COMBO_KEY_NONE` marks unused slots
    pub keys: [u8; COMBO_MAX_KEYS],
    pub output_keycode: Keycode,
    /// Combo term in milliseconds (0 = default)
    pub term_ms: u16,
}

impl Combo {
    pub(crate) fn term(&self) -> Duration {
        if self.term_ms > 0 { Duration::from_millis(self.term_ms as u64) } else { DEFAULT_COMBO_TERM }
    }

    pub(crate) fn contains(&self, key: u8) -> bool {
        key != COMBO_KEY_NONE && self.keys.contains(&key)
    }

    pub(crate) fn key_count<const NUM_KEYS: usize>(&self) -> usize {
        self.keys.iter().filter(|&&k| (k as usize) < NUM_KEYS).count()
    }
}

/// Macro key configuration, referencing a macro sequence by index.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacroKey {
    pub macro_index: u8,
}

/// Macro event actions.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MacroAction {
    /// End of sequence
    #[default]
    End = 0,
    /// Press + release
    Tap,
    /// Press only
    Press,
    /// Release only
    Release,
    /// Delay; the keycode field is the delay in 10 ms units
    Delay,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacroEvent {
    pub keycode: Keycode,
    pub action: MacroAction,
}

/// A macro sequence. Unused tail slots hold `MacroAction::End`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Macro {
    pub events: [MacroEvent; MACRO_MAX_EVENTS],
}

/// The behavior bound to an advanced key slot.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvancedKey {
    NullBind(NullBind),
    DynamicKeystroke(DynamicKeystroke),
    TapHold(TapHold),
    Toggle(Toggle),
    Combo(Combo),
    Macro(MacroKey),
}

/// One entry of a profile's advanced key table.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvancedKeyDef {
    pub layer: u8,
    pub key: u8,
    pub action: AdvancedKey,
}

//--------------------------------------------------------------------
// Runtime state
//--------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NullBindState {
    /// Whether the primary and secondary keys are registered
    pub is_pressed: [bool; 2],
    /// Active keycodes of the primary and secondary keys
    pub keycodes: [Keycode; 2],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DynamicKeystrokeState {
    /// Whether each keycode slot is registered
    pub is_pressed: [bool; 4],
    pub is_bottomed_out: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TapHoldStage {
    #[default]
    None,
    /// Pressed, not yet decided
    Tap,
    /// Decided as hold, hold keycode registered
    Hold,
    /// Decided as tap early (quick tap, prior idle, tap-unless-interrupted
    /// timeout); the tap keycode is registered until release
    TapResolved,
    /// Double tap; the double tap keycode is registered until release
    DoubleTap,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TapHoldState {
    /// Time of the press
    pub since: Instant,
    pub stage: TapHoldStage,
    /// Whether another key was pressed during the hold
    pub interrupted: bool,
    /// Whether another key was pressed and then released during the hold
    pub other_key_released: bool,
    /// Time of the last completed tap, for the quick/double tap windows
    pub last_tap: Option<Instant>,
}

impl Default for TapHoldState {
    fn default() -> Self {
        Self {
            since: Instant::from_ticks(0),
            stage: TapHoldStage::None,
            interrupted: false,
            other_key_released: false,
            last_tap: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToggleStage {
    #[default]
    None,
    Toggle,
    Normal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ToggleState {
    /// Time of the press
    pub since: Instant,
    pub stage: ToggleStage,
    pub is_toggled: bool,
}

impl Default for ToggleState {
    fn default() -> Self {
        Self { since: Instant::from_ticks(0), stage: ToggleStage::None, is_toggled: false }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacroState {
    /// Cursor into the macro sequence
    pub event_index: u8,
    /// Playback resumes once this time is reached
    pub delay_until: Option<Instant>,
    pub is_playing: bool,
    /// Keycodes held by `MacroAction::Press` events, released on clear
    pub held: heapless::Vec<Keycode, MACRO_MAX_EVENTS>,
}

/// Runtime state of an advanced key slot, tagged by the behavior type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvancedKeyState {
    #[default]
    None,
    NullBind(NullBindState),
    DynamicKeystroke(DynamicKeystrokeState),
    TapHold(TapHoldState),
    Toggle(ToggleState),
    Macro(MacroState),
}

impl AdvancedKeyState {
    /// The initial state for an advanced key definition.
    pub(crate) fn initial(def: &AdvancedKey) -> Self {
        match def {
            AdvancedKey::NullBind(_) => AdvancedKeyState::NullBind(NullBindState::default()),
            AdvancedKey::DynamicKeystroke(_) => {
                AdvancedKeyState::DynamicKeystroke(DynamicKeystrokeState::default())
            }
            AdvancedKey::TapHold(_) => AdvancedKeyState::TapHold(TapHoldState::default()),
            AdvancedKey::Toggle(_) => AdvancedKeyState::Toggle(ToggleState::default()),
            // Combos are matched by the combo detector, not per-instance state
            AdvancedKey::Combo(_) => AdvancedKeyState::None,
            AdvancedKey::Macro(_) => AdvancedKeyState::Macro(MacroState::default()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dks_bitmap_indexing() {
        // press = Press, bottom-out = Hold, release from bottom-out = Tap,
        // release = Release
        let bitmap = 0b10_11_00_01;
        let dks = DynamicKeystroke {
            keycodes: [Keycode(0x04), Keycode::NO, Keycode::NO, Keycode::NO],
            bitmap: [bitmap, 0, 0, 0],
            bottom_out_point: 200,
        };
        assert_eq!(dks.action(0, KeyEventKind::Press), DksAction::Press);
        assert_eq!(dks.action(0, KeyEventKind::BottomOut), DksAction::Hold);
        assert_eq!(dks.action(0, KeyEventKind::ReleaseFromBottomOut), DksAction::Tap);
        assert_eq!(dks.action(0, KeyEventKind::Release), DksAction::Release);
    }

    #[test]
    fn test_combo_term_defaults() {
        let mut combo = Combo {
            keys: [1, 2, COMBO_KEY_NONE, COMBO_KEY_NONE],
            output_keycode: Keycode(0x05),
            term_ms: 0,
        };
        assert_eq!(combo.term(), DEFAULT_COMBO_TERM);
        combo.term_ms = 80;
        assert_eq!(combo.term(), Duration::from_millis(80));
        assert_eq!(combo.key_count::<64>(), 2);
        assert!(combo.contains(2));
        assert!(!combo.contains(COMBO_KEY_NONE));
    }
}
