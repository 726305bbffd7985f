//! Null Bind: SOCD-style resolution of two keys that must not be active at
//! the same time (e.g. opposing movement directions).

use crate::advanced_key::{AdvancedKeyState, NullBind, NullBindBehavior};
use crate::board::Board;
use crate::event::{AdvancedKeyEvent, KeyEventKind};
use crate::hid::HidReporter;
use crate::keyboard::Keyboard;
use crate::keycode::Keycode;
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
    pub(crate) fn process_null_bind(
        &mut self,
        event: &AdvancedKeyEvent,
        primary_key: u8,
        null_bind: &NullBind,
    ) {
        let index = event.index as usize;
        let AdvancedKeyState::NullBind(mut state) = self.ak_states[index].clone() else {
            return;
        };

        let keys = [primary_key, null_bind.secondary_key];
        let side = if event.key == keys[0] { 0 } else { 1 };
        let distances = [self.distance_of(keys[0]), self.distance_of(keys[1])];

        // Update the active keycodes
        match event.kind {
            KeyEventKind::Press => state.keycodes[side] = event.keycode,
            KeyEventKind::Release => {
                if state.is_pressed[side] {
                    // Also release the key if it is registered
                    self.unregister(keys[side] as usize, state.keycodes[side]);
                    state.is_pressed[side] = false;
                }
                state.keycodes[side] = Keycode::NO;
            }
            _ => {}
        }

        let mut is_pressed =
            [state.keycodes[0] != Keycode::NO, state.keycodes[1] != Keycode::NO];
        if is_pressed[0] && is_pressed[1] {
            // Both keys are logically held, resolve
            if null_bind.bottom_out_point > 0
                && distances[0] >= null_bind.bottom_out_point
                && distances[1] >= null_bind.bottom_out_point
            {
                // Both keys are bottomed out, both stay registered
            } else if null_bind.behavior == NullBindBehavior::Distance {
                // Compared on every event; a travel distance tie goes to
                // the last pressed key
                is_pressed[side] = distances[side] >= distances[side ^ 1];
                is_pressed[side ^ 1] = !is_pressed[side];
            } else if event.kind == KeyEventKind::Press {
                // The remaining behaviors only resolve on press edges
                let wins = match null_bind.behavior {
                    NullBindBehavior::Last => true,
                    NullBindBehavior::Primary => side == 0,
                    NullBindBehavior::Secondary => side == 1,
                    NullBindBehavior::Neutral | NullBindBehavior::Distance => false,
                };
                is_pressed[side] = wins;
                // Only one key stays registered, except for Neutral which
                // releases both
                is_pressed[side ^ 1] = null_bind.behavior != NullBindBehavior::Neutral && !wins;
            } else {
                // Carry the previous resolution forward
                is_pressed = state.is_pressed;
            }
        }

        // Emit only the deltas of the resolution
        for i in 0..2 {
            if is_pressed[i] && !state.is_pressed[i] {
                self.register(keys[i] as usize, state.keycodes[i]);
                state.is_pressed[i] = true;
            } else if !is_pressed[i] && state.is_pressed[i] {
                self.unregister(keys[i] as usize, state.keycodes[i]);
                state.is_pressed[i] = false;
            }
        }

        self.ak_states[index] = AdvancedKeyState::NullBind(state);
    }

    fn distance_of(&self, key: u8) -> u8 {
        if (key as usize) < NUM_KEYS { self.matrix.key(key as usize).distance } else { 0 }
    }
}
