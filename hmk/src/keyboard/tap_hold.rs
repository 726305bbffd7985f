//! Tap-Hold: one keycode on a short tap, another on a long hold, with
//! flavor-controlled disambiguation against overlapping presses.

use embassy_time::{Duration, Instant};

use crate::advanced_key::{AdvancedKeyState, TapHold, TapHoldFlavor, TapHoldStage};
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
    pub(crate) fn process_tap_hold(&mut self, event: &AdvancedKeyEvent, tap_hold: &TapHold) {
        let index = event.index as usize;
        let AdvancedKeyState::TapHold(mut state) = self.ak_states[index].clone() else {
            return;
        };
        let key = event.key as usize;

        match event.kind {
            KeyEventKind::Press => {
                let now = Instant::now();
                let in_repeat_window = state
                    .last_tap
                    .map(|last| now - last <= tap_hold.repeat_window())
                    .unwrap_or(false);
                let after_recent_key = tap_hold.require_prior_idle_ms > 0
                    && self
                        .last_key_press
                        .map(|last| {
                            now - last <= Duration::from_millis(tap_hold.require_prior_idle_ms as u64)
                        })
                        .unwrap_or(false);

                state.since = now;
                state.interrupted = false;
                state.other_key_released = false;

                if tap_hold.double_tap_keycode != Keycode::NO && in_repeat_window {
                    // Second tap in the window sends the alternate keycode
                    self.register(key, tap_hold.double_tap_keycode);
                    state.stage = TapHoldStage::DoubleTap;
                } else if tap_hold.quick_tap_ms > 0 && in_repeat_window {
                    // Re-press shortly after a tap repeats the tap keycode
                    self.register(key, tap_hold.tap_keycode);
                    state.stage = TapHoldStage::TapResolved;
                } else if after_recent_key {
                    // Rolling over from another key favors the tap
                    self.register(key, tap_hold.tap_keycode);
                    state.stage = TapHoldStage::TapResolved;
                } else {
                    state.stage = TapHoldStage::Tap;
                }
            }

            KeyEventKind::Release => {
                match state.stage {
                    TapHoldStage::Tap => {
                        let tap = if state.since.elapsed() < tap_hold.tapping_term() {
                            true
                        } else {
                            // Promotion raced the release; only Retro
                            // Tapping still produces the tap
                            tap_hold.retro_tapping && !state.interrupted
                        };
                        if tap {
                            self.emit_tap(event.key, tap_hold.tap_keycode);
                            state.last_tap = Some(Instant::now());
                        }
                    }
                    TapHoldStage::Hold => {
                        self.unregister(key, tap_hold.hold_keycode);
                        if tap_hold.retro_tapping && !state.interrupted {
                            // Held past the term without interruption:
                            // send the tap anyway
                            self.emit_tap(event.key, tap_hold.tap_keycode);
                            state.last_tap = Some(Instant::now());
                        }
                    }
                    TapHoldStage::TapResolved => {
                        self.unregister(key, tap_hold.tap_keycode);
                        state.last_tap = Some(Instant::now());
                    }
                    TapHoldStage::DoubleTap => {
                        self.unregister(key, tap_hold.double_tap_keycode);
                        state.last_tap = Some(Instant::now());
                    }
                    TapHoldStage::None => {}
                }
                state.stage = TapHoldStage::None;
            }

            _ => {}
        }

        self.ak_states[index] = AdvancedKeyState::TapHold(state);
    }

    /// Register the tap keycode now and release it through the deferred
    /// queue, so the tap spans exactly one report cycle.
    fn emit_tap(&mut self, key: u8, keycode: Keycode) {
        let queued = self.deferred.push(DeferredAction {
            kind: DeferredActionKind::Release,
            key,
            keycode,
        });
        if queued {
            // Only tap if the release is guaranteed to follow
            self.register(key as usize, keycode);
        }
    }

    pub(crate) fn tick_tap_hold(
        &mut self,
        index: usize,
        key: u8,
        tap_hold: &TapHold,
        has_non_tap_hold_press: bool,
        has_non_tap_hold_release: bool,
    ) {
        let AdvancedKeyState::TapHold(mut state) = self.ak_states[index].clone() else {
            return;
        };

        if has_non_tap_hold_press {
            state.interrupted = true;
        }

        if state.stage == TapHoldStage::Tap {
            if has_non_tap_hold_release && state.interrupted {
                state.other_key_released = true;
            }

            let timeout = state.since.elapsed() >= tap_hold.tapping_term();
            let hold = match tap_hold.flavor {
                TapHoldFlavor::HoldPreferred => timeout || has_non_tap_hold_press,
                TapHoldFlavor::Balanced => timeout || state.other_key_released,
                TapHoldFlavor::TapPreferred => timeout,
                TapHoldFlavor::TapUnlessInterrupted => has_non_tap_hold_press && !timeout,
            } || (tap_hold.hold_while_undecided
                && has_non_tap_hold_press
                && matches!(tap_hold.flavor, TapHoldFlavor::HoldPreferred | TapHoldFlavor::Balanced));

            if hold {
                self.register(key as usize, tap_hold.hold_keycode);
                state.stage = TapHoldStage::Hold;
            } else if timeout && tap_hold.flavor == TapHoldFlavor::TapUnlessInterrupted {
                // Timed out without interruption: the key is a tap, held
                // down like a normal key until release
                self.register(key as usize, tap_hold.tap_keycode);
                state.stage = TapHoldStage::TapResolved;
            }
        }

        self.ak_states[index] = AdvancedKeyState::TapHold(state);
    }
}
