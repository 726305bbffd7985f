//! Macro playback, one event per tick through the deferred action queue.

use embassy_time::{Duration, Instant};

use crate::advanced_key::{AdvancedKeyState, MacroAction, MacroKey};
use crate::board::Board;
use crate::deferred::{DeferredAction, DeferredActionKind};
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
    pub(crate) fn process_macro_key(&mut self, event: &AdvancedKeyEvent, _macro_key: &MacroKey) {
        let index = event.index as usize;
        let AdvancedKeyState::Macro(mut state) = self.ak_states[index].clone() else {
            return;
        };

        // Playback runs on its own; releasing the physical key does not
        // interrupt it
        if event.kind == KeyEventKind::Press {
            // Restart from the top, releasing whatever a previous run holds
            let held = core::mem::take(&mut state.held);
            for keycode in held {
                self.unregister(event.key as usize, keycode);
            }
            state.event_index = 0;
            state.delay_until = None;
            state.is_playing = true;
        }

        self.ak_states[index] = AdvancedKeyState::Macro(state);
    }

    pub(crate) fn tick_macro(&mut self, index: usize, key: u8, macro_key: &MacroKey) {
        let AdvancedKeyState::Macro(mut state) = self.ak_states[index].clone() else {
            return;
        };
        if !state.is_playing {
            return;
        }

        let Some(sequence) = self.profile().macros.get(macro_key.macro_index as usize).copied()
        else {
            warn!("Macro key references missing macro {}", macro_key.macro_index);
            state.is_playing = false;
            self.ak_states[index] = AdvancedKeyState::Macro(state);
            return;
        };

        if let Some(until) = state.delay_until {
            if Instant::now() < until {
                return;
            }
            state.delay_until = None;
        }

        // One event per tick: back-to-back taps of the same keycode get
        // distinct report cycles
        match sequence.events.get(state.event_index as usize) {
            None => state.is_playing = false,
            Some(event) => {
                state.event_index += 1;
                match event.action {
                    MacroAction::End => state.is_playing = false,
                    MacroAction::Tap => {
                        self.deferred.push(DeferredAction {
                            kind: DeferredActionKind::Tap,
                            key,
                            keycode: event.keycode,
                        });
                    }
                    MacroAction::Press => {
                        let queued = self.deferred.push(DeferredAction {
                            kind: DeferredActionKind::Press,
                            key,
                            keycode: event.keycode,
                        });
                        if queued {
                            let _ = state.held.push(event.keycode);
                        }
                    }
                    MacroAction::Release => {
                        let queued = self.deferred.push(DeferredAction {
                            kind: DeferredActionKind::Release,
                            key,
                            keycode: event.keycode,
                        });
                        if queued {
                            if let Some(pos) = state.held.iter().position(|&k| k == event.keycode) {
                                state.held.swap_remove(pos);
                            }
                        }
                    }
                    MacroAction::Delay => {
                        // The keycode field carries the delay in 10 ms units
                        state.delay_until =
                            Some(Instant::now() + Duration::from_millis(event.keycode.0 as u64 * 10));
                    }
                }
            }
        }

        self.ak_states[index] = AdvancedKeyState::Macro(state);
    }
}
