//! Dynamic Keystroke: maps the four travel phases of a keystroke (press,
//! bottom-out, release from bottom-out, release) to independent actions on
//! up to four bound keycodes.

use crate::advanced_key::{AdvancedKeyState, DksAction, DynamicKeystroke};
use crate::board::Board;
use crate::deferred::{DeferredAction, DeferredActionKind};
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
    pub(crate) fn process_dynamic_keystroke(
        &mut self,
        event: &AdvancedKeyEvent,
        dks: &DynamicKeystroke,
    ) {
        let index = event.index as usize;
        let AdvancedKeyState::DynamicKeystroke(mut state) = self.ak_states[index].clone() else {
            return;
        };
        let key = event.key as usize;

        let distance = if key < NUM_KEYS { self.matrix.key(key).distance } else { 0 };
        let is_bottomed_out = distance >= dks.bottom_out_point;

        // Interpose the bottom-out edges between the press and release
        // events coming from the matrix
        let mut kind = event.kind;
        if is_bottomed_out && !state.is_bottomed_out {
            kind = KeyEventKind::BottomOut;
        } else if kind != KeyEventKind::Release && !is_bottomed_out && state.is_bottomed_out {
            // A full release wins over a release from bottom-out
            kind = KeyEventKind::ReleaseFromBottomOut;
        }
        state.is_bottomed_out = is_bottomed_out;

        if kind == KeyEventKind::Hold {
            // Nothing to do between phase changes
            self.ak_states[index] = AdvancedKeyState::DynamicKeystroke(state);
            return;
        }

        // Rapid Trigger would fight the phase tracking while the key is
        // engaged
        self.matrix.set_rapid_trigger_disabled(key, kind != KeyEventKind::Release);

        for i in 0..4 {
            let keycode = dks.keycodes[i];
            let action = dks.action(i, kind);

            if keycode == Keycode::NO || action == DksAction::Hold {
                continue;
            }

            if state.is_pressed[i] {
                // Everything except a hold starts by releasing the
                // previously registered keycode
                self.unregister(key, keycode);
                state.is_pressed[i] = false;
            }

            if action == DksAction::Press || action == DksAction::Tap {
                // The report may already have been touched above, so the
                // actual action is deferred to the next scan
                let queued = self.deferred.push(DeferredAction {
                    kind: if action == DksAction::Press {
                        DeferredActionKind::Press
                    } else {
                        DeferredActionKind::Tap
                    },
                    key: event.key,
                    keycode,
                });
                state.is_pressed[i] = queued && action == DksAction::Press;
            }
        }

        self.ak_states[index] = AdvancedKeyState::DynamicKeystroke(state);
    }
}
