//! Toggle: a tap latches the keycode, a long hold behaves like a normal
//! key, cancelling the latch.

use embassy_time::{Duration, Instant};

use crate::advanced_key::{AdvancedKeyState, Toggle, ToggleStage};
use crate::board::Board;
use crate::event::{AdvancedKeyEvent, KeyEventKind};
use crate::hid::HidReporter;
use crate::keyboard::Keyboard;
use crate::storage::ConfigStore;

impl<
    B: Board,
    H: HidReporter,
    S: ConfigStore,
    const NUM_PROFILES: usize,
    const NUM_LAYERS: usize,
    const NUM_KEYS: usize,
    const NUM_ADVANCED_KEYS: usize,
> Keyboard<B, H, S, NUM_PROFILES, NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>
{
    pub(crate) fn process_toggle(&mut self, event: &AdvancedKeyEvent, toggle: &Toggle) {
        let index = event.index as usize;
        let AdvancedKeyState::Toggle(mut state) = self.ak_states[index].clone() else {
            return;
        };

        match event.kind {
            KeyEventKind::Press => {
                self.register(event.key as usize, toggle.keycode);
                state.is_toggled = !state.is_toggled;
                if state.is_toggled {
                    state.since = Instant::now();
                    state.stage = ToggleStage::Toggle;
                } else {
                    // Toggled off: from here the key behaves normally
                    state.stage = ToggleStage::Normal;
                }
            }

            KeyEventKind::Release => {
                if !state.is_toggled {
                    self.unregister(event.key as usize, toggle.keycode);
                }
                state.stage = ToggleStage::None;
            }

            _ => {}
        }

        self.ak_states[index] = AdvancedKeyState::Toggle(state);
    }

    pub(crate) fn tick_toggle(&mut self, index: usize, toggle: &Toggle) {
        let AdvancedKeyState::Toggle(mut state) = self.ak_states[index].clone() else {
            return;
        };

        if state.stage == ToggleStage::Toggle
            && state.since.elapsed() >= Duration::from_millis(toggle.tapping_term_ms as u64)
        {
            // Held past the term: cancel the toggle, the release will
            // unregister like a normal key
            state.stage = ToggleStage::Normal;
            state.is_toggled = false;
            self.ak_states[index] = AdvancedKeyState::Toggle(state);
        }
    }
}
