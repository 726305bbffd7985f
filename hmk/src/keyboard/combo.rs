//! The combo detector: a time-windowed multi-key matcher sitting in front
//! of the layout resolver.
//!
//! Press events of combo member keys are queued; on every insertion and on
//! every tick the queue is evaluated against the combos of the current
//! layer. The longest full match wins, but execution is deferred while a
//! longer candidate could still complete. Unconsumed events replay through
//! the regular key processing.

use embassy_time::Instant;

use crate::advanced_key::{AdvancedKey, Combo, DEFAULT_COMBO_TERM};
use crate::board::Board;
use crate::deferred::{DeferredAction, DeferredActionKind};
use crate::hid::HidReporter;
use crate::keyboard::Keyboard;
use crate::storage::ConfigStore;
use crate::COMBO_OUTPUT_KEY;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ComboMatch {
    /// Interrupted, mistimed or simply not present
    None,
    /// Some member keys are queued and the term has not expired yet
    Candidate,
    /// All member keys pressed within the term
    Full,
}

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
    /// Route a key event through the combo detector.
    ///
    /// Returns whether the event was consumed here, either queued for
    /// matching or processed directly.
    pub fn combo_process(&mut self, key: u8, pressed: bool, time: Instant) -> bool {
        let current_layer = self.keymap.current_layer();
        self.rebuild_combo_cache(current_layer);

        let key_in_combo = self.combo_cache.contains(key);

        // Fast path: nothing queued and the key is in no combo
        if self.combo_queue.is_empty() && !key_in_combo {
            return false;
        }

        if !key_in_combo {
            // A foreign press interrupts every candidate: flush, then let
            // the caller process the key normally. Foreign releases just
            // pass through, their press was already handled.
            if pressed && !self.combo_queue.is_empty() {
                let queued = self.combo_queue.len();
                self.combo_flush(queued);
            }
            return false;
        }

        if !pressed {
            // Releases are never queued, so key-up reports are not delayed.
            // If this key's own press is still waiting in the queue, the
            // chord is breaking up: settle the queue first, otherwise the
            // replayed press would be left registered with no release.
            if self.combo_queue.iter().any(|e| !e.consumed && e.pressed && e.key == key) {
                self.finalize_combos(time);
            }
            if self.process_key(key as usize, false) {
                self.combo_pending_activity = true;
            }
            if !self.combo_queue.is_empty() {
                // The release may have killed all candidates
                self.process_combo_logic(time);
            }
            return true;
        }

        if self.combo_queue.is_full() {
            // Make room by replaying the oldest event instead of dropping
            // input
            self.combo_flush(1);
        }
        self.combo_queue.push(key, pressed, time);
        self.process_combo_logic(time);
        true
    }

    /// Periodic combo pass, driving the time-based decisions.
    ///
    /// Returns whether any queued press got replayed or a combo fired.
    pub(crate) fn combo_task(&mut self) -> bool {
        self.combo_pending_activity = false;
        if !self.combo_queue.is_empty() {
            self.process_combo_logic(Instant::now());
        }
        self.combo_pending_activity
    }

    /// Force a rebuild of the combo membership bitmap.
    ///
    /// Called by the advanced-key reload gateway whenever the keymap or
    /// profile changes; layer changes are picked up lazily.
    pub fn invalidate_combo_cache(&mut self) {
        self.combo_cache.invalidate();
    }

    fn rebuild_combo_cache(&mut self, layer: u8) {
        let profile_index = (self.eeconfig.current_profile as usize).min(NUM_PROFILES - 1);
        self.combo_cache.rebuild(layer, &self.eeconfig.profiles[profile_index]);
    }

    fn process_combo_logic(&mut self, now: Instant) {
        self.process_combo_logic_inner(now, false);
    }

    /// Settle the queue immediately: fire the best full match even if a
    /// longer candidate is still live, or replay everything when there is
    /// no match.
    fn finalize_combos(&mut self, now: Instant) {
        self.process_combo_logic_inner(now, true);
    }

    fn process_combo_logic_inner(&mut self, now: Instant, finalize: bool) {
        let current_layer = self.keymap.current_layer();
        self.rebuild_combo_cache(current_layer);

        // Combos defined for the current layer
        let mut combos: heapless::Vec<Combo, NUM_ADVANCED_KEYS> = heapless::Vec::new();
        for def in self.profile().advanced_keys.iter() {
            if def.layer == current_layer {
                if let AdvancedKey::Combo(combo) = &def.action {
                    let _ = combos.push(*combo);
                }
            }
        }

        let mut best: Option<(Combo, usize)> = None;
        let mut pending_candidates = false;
        let mut max_pending_term = DEFAULT_COMBO_TERM;

        for combo in combos.iter() {
            match self.check_combo_match(combo, now) {
                ComboMatch::Full => {
                    let len = combo.key_count::<NUM_KEYS>();
                    // Longest match wins; ties go to the lowest index,
                    // which the ascending iteration gives us for free
                    if best.map(|(_, best_len)| len > best_len).unwrap_or(true) {
                        best = Some((*combo, len));
                    }
                }
                ComboMatch::Candidate => {
                    pending_candidates = true;
                    max_pending_term = max_pending_term.max(combo.term());
                }
                ComboMatch::None => {}
            }
        }

        if let Some((combo, _)) = best {
            if pending_candidates && !finalize {
                if let Some(head) = self.combo_queue.front() {
                    if now - head.time <= max_pending_term {
                        // A longer combo may still complete, hold off
                        return;
                    }
                }
            }
            self.execute_combo(&combo);
        } else if pending_candidates && !finalize {
            if let Some(head) = self.combo_queue.front() {
                if now - head.time > max_pending_term {
                    // Stale candidate: replay one event from the head
                    self.combo_flush(1);
                }
            }
        } else {
            // No match left, or the queue is being settled
            let queued = self.combo_queue.len();
            self.combo_flush(queued);
        }
    }

    /// Evaluate one combo against the unconsumed presses in the queue.
    fn check_combo_match(&self, combo: &Combo, now: Instant) -> ComboMatch {
        let keys_required = combo.key_count::<NUM_KEYS>();
        if keys_required == 0 {
            return ComboMatch::None;
        }

        // First press time per member slot
        let mut found: [Option<Instant>; crate::COMBO_MAX_KEYS] = [None; crate::COMBO_MAX_KEYS];
        for event in self.combo_queue.iter() {
            if event.consumed || !event.pressed {
                continue;
            }
            let Some(slot) = combo.keys.iter().position(|&k| k == event.key) else {
                // A queued foreign press interrupts this combo
                return ComboMatch::None;
            };
            if found[slot].is_none() {
                found[slot] = Some(event.time);
            }
        }

        let mut keys_found = 0;
        let mut first_press: Option<Instant> = None;
        let mut last_press: Option<Instant> = None;
        for (slot, time) in found.iter().enumerate() {
            if combo.keys[slot] as usize >= NUM_KEYS {
                continue;
            }
            if let Some(time) = *time {
                keys_found += 1;
                first_press = Some(first_press.map_or(time, |t: Instant| t.min(time)));
                last_press = Some(last_press.map_or(time, |t: Instant| t.max(time)));
            }
        }

        let (Some(first_press), Some(last_press)) = (first_press, last_press) else {
            return ComboMatch::None;
        };
        let term = combo.term();

        if keys_found == keys_required {
            if last_press - first_press <= term { ComboMatch::Full } else { ComboMatch::None }
        } else if now - first_press <= term {
            ComboMatch::Candidate
        } else {
            ComboMatch::None
        }
    }

    /// Fire a matched combo: consume its member events, pulse the output
    /// keycode on the synthetic key index and replay the rest of the queue.
    fn execute_combo(&mut self, combo: &Combo) {
        debug!("Combo matched, output keycode {}", combo.output_keycode.0);
        self.combo_queue.consume_keys(combo);

        self.register(COMBO_OUTPUT_KEY as usize, combo.output_keycode);
        self.deferred.push(DeferredAction {
            kind: DeferredActionKind::Release,
            key: COMBO_OUTPUT_KEY,
            keycode: combo.output_keycode,
        });
        self.combo_pending_activity = true;

        let queued = self.combo_queue.len();
        self.combo_flush(queued);
    }

    /// Replay up to `count` events from the head of the queue through the
    /// regular key processing.
    ///
    /// Re-entrant calls are skipped; the skipped events stay queued and
    /// are picked up on the next tick, so nothing is lost, only delayed by
    /// one scan.
    pub(crate) fn combo_flush(&mut self, count: usize) {
        if self.combo_flush_in_progress {
            return;
        }
        self.combo_flush_in_progress = true;

        for _ in 0..count {
            let Some(event) = self.combo_queue.pop() else {
                break;
            };
            if !event.consumed && self.process_key(event.key as usize, event.pressed) {
                self.combo_pending_activity = true;
            }
        }

        self.combo_flush_in_progress = false;
    }
}
