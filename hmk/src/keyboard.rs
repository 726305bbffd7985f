//! The keyboard core: drives the matrix, resolves keycodes through the
//! layer stack, routes events through the combo detector and the advanced
//! key engine, and mutates the HID keycode set.
//!
//! Everything runs synchronously from a cooperative main loop:
//! `scan()` then `task()` once per cycle, then the HID transport flushes.

mod combo;
mod dynamic_keystroke;
mod macros;
mod null_bind;
mod tap_hold;
mod toggle;

use embassy_time::{Duration, Instant};

use crate::advanced_key::{AdvancedKey, AdvancedKeyState, TapHoldStage, ToggleStage};
use crate::board::Board;
use crate::combo::{ComboCache, ComboQueue};
use crate::deferred::{DeferredAction, DeferredActionKind, DeferredActionQueue};
use crate::eeconfig::{Eeconfig, Profile};
use crate::event::{AdvancedKeyEvent, KeyEvent, KeyEventKind};
use crate::hid::HidReporter;
use crate::keycode::Keycode;
use crate::keymap::Keymap;
use crate::matrix::{KeyMatrix, MatrixConfig, BOTTOM_OUT_SAVE_INACTIVITY};
use crate::storage::ConfigStore;
use crate::PENDING_EVENTS_SIZE;

/// A key event buffered while a tap-hold key is undecided.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct PendingEvent {
    key: u8,
    pressed: bool,
}

/// The input-processing core.
///
/// Owns the key matrix, the RAM copy of the persisted configuration, the
/// layer stack and all advanced key state; talks to the outside world
/// through the [`Board`], [`HidReporter`] and [`ConfigStore`] seams.
pub struct Keyboard<
    B: Board,
    H: HidReporter,
    S: ConfigStore,
    const NUM_PROFILES: usize,
    const NUM_LAYERS: usize,
    const NUM_KEYS: usize,
    const NUM_ADVANCED_KEYS: usize,
> {
    pub(crate) board: B,
    pub(crate) hid: H,
    pub(crate) store: S,
    pub(crate) eeconfig: Eeconfig<NUM_PROFILES, NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>,
    pub(crate) matrix: KeyMatrix<NUM_KEYS>,
    pub(crate) keymap: Keymap<NUM_LAYERS, NUM_KEYS>,

    /// Runtime state of each advanced key slot
    pub(crate) ak_states: [AdvancedKeyState; NUM_ADVANCED_KEYS],
    /// Time of the last non-modifier plain key press, for the tap-hold
    /// prior-idle gate
    pub(crate) last_key_press: Option<Instant>,

    // Combo detector
    pub(crate) combo_queue: ComboQueue,
    pub(crate) combo_cache: ComboCache<NUM_KEYS>,
    pub(crate) combo_flush_in_progress: bool,
    pub(crate) combo_pending_activity: bool,

    /// Pressed state seen by the last task pass, for edge detection
    key_press_states: [bool; NUM_KEYS],
    /// Keys disabled by `KEY_LOCK` (layer 0 only)
    key_disabled: [bool; NUM_KEYS],
    /// Keycode registered per key. Layer or profile may change between
    /// press and release, so the release target is remembered.
    active_keycodes: [Keycode; NUM_KEYS],
    /// Advanced key bound per key at press time, index + 1 (0 = none)
    active_advanced_keys: [u8; NUM_KEYS],
    /// Advanced key index + 1 per (layer, key) position (0 = none)
    advanced_key_indices: [[u8; NUM_KEYS]; NUM_LAYERS],
    /// Events held back while a tap-hold key is undecided
    pending_events: heapless::Vec<PendingEvent, PENDING_EVENTS_SIZE>,
    /// Whether any HID mutation happened in this task pass
    should_send_reports: bool,

    pub(crate) deferred: DeferredActionQueue,
    /// Last advanced key tick
    last_tick: Instant,
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
    pub fn new(
        board: B,
        hid: H,
        store: S,
        eeconfig: Eeconfig<NUM_PROFILES, NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>,
        matrix_config: MatrixConfig,
    ) -> Self {
        // The advanced key index arrays store index + 1 in a u8, and the
        // layer mask is a u8: dimensions outside these bounds would wrap
        const {
            assert!(1 <= NUM_PROFILES && NUM_PROFILES <= 8, "NUM_PROFILES must be between 1 and 8");
            assert!(1 <= NUM_LAYERS && NUM_LAYERS <= 8, "NUM_LAYERS must be between 1 and 8");
            assert!(1 <= NUM_KEYS && NUM_KEYS <= 256, "NUM_KEYS must be between 1 and 256");
            assert!(
                1 <= NUM_ADVANCED_KEYS && NUM_ADVANCED_KEYS <= 64,
                "NUM_ADVANCED_KEYS must be between 1 and 64"
            );
        }

        Self {
            board,
            hid,
            store,
            eeconfig,
            matrix: KeyMatrix::new(matrix_config),
            keymap: Keymap::new(),
            ak_states: core::array::from_fn(|_| AdvancedKeyState::None),
            last_key_press: None,
            combo_queue: ComboQueue::new(),
            combo_cache: ComboCache::new(),
            combo_flush_in_progress: false,
            combo_pending_activity: false,
            key_press_states: [false; NUM_KEYS],
            key_disabled: [false; NUM_KEYS],
            active_keycodes: [Keycode::NO; NUM_KEYS],
            active_advanced_keys: [0; NUM_KEYS],
            advanced_key_indices: [[0; NUM_KEYS]; NUM_LAYERS],
            pending_events: heapless::Vec::new(),
            should_send_reports: false,
            deferred: DeferredActionQueue::new(),
            last_tick: Instant::now(),
        }
    }

    /// Load the advanced key table and calibrate the matrix.
    pub fn init(&mut self) {
        self.load_advanced_keys();
        self.recalibrate(false);
    }

    pub fn matrix(&self) -> &KeyMatrix<NUM_KEYS> {
        &self.matrix
    }

    pub fn keymap(&self) -> &Keymap<NUM_LAYERS, NUM_KEYS> {
        &self.keymap
    }

    pub fn eeconfig(&self) -> &Eeconfig<NUM_PROFILES, NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS> {
        &self.eeconfig
    }

    /// Mutable access to the configuration. Changes to the advanced key
    /// table only take effect after [`Self::load_advanced_keys`].
    pub fn eeconfig_mut(
        &mut self,
    ) -> &mut Eeconfig<NUM_PROFILES, NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS> {
        &mut self.eeconfig
    }

    pub(crate) fn profile(&self) -> &Profile<NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS> {
        self.eeconfig.current_profile()
    }

    /// Runtime state of every advanced key slot.
    pub fn advanced_key_states(&self) -> &[AdvancedKeyState] {
        &self.ak_states
    }

    /// Reset all key states and re-learn the rest values.
    pub fn recalibrate(&mut self, reset_bottom_out: bool) {
        if reset_bottom_out {
            self.eeconfig.bottom_out_threshold = [0; NUM_KEYS];
            if self.store.write_bottom_out_thresholds(&[0u16; NUM_KEYS]).is_err() {
                error!("Failed to persist bottom-out threshold reset");
            }
        }
        self.matrix.recalibrate(
            &mut self.board,
            &self.eeconfig.calibration,
            &self.eeconfig.bottom_out_threshold,
        );
    }

    /// Run one matrix scan pass and persist the learned bottom-out
    /// thresholds once they have been stable for the inactivity window.
    pub fn scan(&mut self) {
        let profile_index = (self.eeconfig.current_profile as usize).min(NUM_PROFILES - 1);
        self.matrix
            .scan(&mut self.board, &self.eeconfig.profiles[profile_index].actuation_map);

        if self.eeconfig.options.save_bottom_out_threshold()
            && self.matrix.bottom_out_idle() >= BOTTOM_OUT_SAVE_INACTIVITY
        {
            let thresholds = self.matrix.bottom_out_thresholds();
            self.eeconfig.bottom_out_threshold = thresholds;
            if self.store.write_bottom_out_thresholds(&thresholds).is_err() {
                error!("Failed to persist bottom-out thresholds");
            }
            self.matrix.mark_thresholds_saved();
        }
    }

    /// Process the key state produced by the last scan pass: detect edges,
    /// order them by time, route them through the combo detector and the
    /// advanced key engine, and flush the resulting HID mutations.
    pub fn task(&mut self) {
        let current_layer = self.keymap.current_layer();
        let mut has_non_tap_hold_press = false;
        let mut has_non_tap_hold_release = false;

        // First pass: collect press/release edges, process hold events
        // immediately (their order does not matter)
        let mut events: heapless::Vec<KeyEvent, NUM_KEYS> = heapless::Vec::new();
        for key in 0..NUM_KEYS {
            let state = *self.matrix.key(key);
            let last_pressed = self.key_press_states[key];

            if current_layer == 0 && self.eeconfig.options.xinput_enabled() {
                // Gamepad keys only apply to layer 0. The joystick
                // conditioning itself lives outside the core; the layout
                // only decides whether the key still acts as a keyboard key.
                let profile = self.profile();
                if profile.gamepad_buttons[key] != 0 && profile.gamepad_options.gamepad_override() {
                    self.key_press_states[key] = state.is_pressed;
                    continue;
                }
                if !profile.gamepad_options.keyboard_enabled() {
                    self.key_press_states[key] = state.is_pressed;
                    continue;
                }
            }

            if current_layer == 0 && self.key_disabled[key] {
                // Only keys in layer 0 can be disabled
                self.key_press_states[key] = state.is_pressed;
                continue;
            }

            if state.is_pressed != last_pressed {
                let _ = events.push(KeyEvent {
                    key: key as u8,
                    pressed: state.is_pressed,
                    time: state.event_time,
                });
            } else if state.is_pressed {
                let ak_index = self.active_advanced_keys[key];
                if ak_index != 0 {
                    self.process_advanced(AdvancedKeyEvent {
                        kind: KeyEventKind::Hold,
                        key: key as u8,
                        keycode: self.active_keycodes[key],
                        index: ak_index - 1,
                    });
                }
            }
        }

        // Process edges in chronological order; ties resolve by key index
        events.sort_unstable_by_key(|e| (e.time, e.key));

        for event in events {
            let key = event.key as usize;
            'processed: {
                if self.combo_process(event.key, event.pressed, event.time) {
                    break 'processed;
                }

                if event.pressed {
                    // While any tap-hold is undecided, buffer non-tap-hold
                    // presses so they cannot land before the hold decision.
                    // The interrupt still counts for the tick below.
                    let layer = self.keymap.current_layer() as usize;
                    let ak_index = self.advanced_key_indices[layer][key];
                    let is_tap_hold = ak_index != 0 && self.is_tap_hold_index(ak_index - 1);

                    if !is_tap_hold
                        && self.has_undecided()
                        && self
                            .pending_events
                            .push(PendingEvent { key: event.key, pressed: true })
                            .is_ok()
                    {
                        // On buffer overflow the push fails and the event is
                        // processed immediately instead of being dropped
                        has_non_tap_hold_press = true;
                        break 'processed;
                    }

                    if self.process_key(key, true) {
                        has_non_tap_hold_press = true;
                    }
                } else {
                    // A release whose press is still buffered must stay
                    // behind it, or the replayed press would never be
                    // released
                    if self.pending_events.iter().any(|e| e.key == event.key)
                        && self
                            .pending_events
                            .push(PendingEvent { key: event.key, pressed: false })
                            .is_ok()
                    {
                        has_non_tap_hold_release = true;
                        break 'processed;
                    }

                    if self.process_key(key, false) {
                        has_non_tap_hold_release = true;
                    }
                }
            }
            self.key_press_states[key] = self.matrix.key(key).is_pressed;
        }

        if self.combo_task() {
            has_non_tap_hold_press = true;
        }

        if has_non_tap_hold_press || self.last_tick.elapsed() >= Duration::from_millis(1) {
            // The advanced keys only need a tick every millisecond, or
            // immediately on a non-tap-hold press to minimize the
            // hold-decision latency
            self.advanced_tick(has_non_tap_hold_press, has_non_tap_hold_release);
            self.last_tick = Instant::now();
        }

        // Once no tap-hold is undecided, replay the buffered events in
        // arrival order. A release whose press replayed in this same pass
        // waits one more cycle, so the press reaches a report first.
        if !self.pending_events.is_empty() && !self.has_undecided() {
            let mut replayed = [false; NUM_KEYS];
            while let Some(event) = self.pending_events.first().copied() {
                if !event.pressed && replayed[event.key as usize] {
                    break;
                }
                self.pending_events.remove(0);
                self.process_key(event.key as usize, event.pressed);
                if event.pressed {
                    replayed[event.key as usize] = true;
                }
            }
        }

        if self.should_send_reports {
            self.hid.send_reports();
            self.should_send_reports = false;
        }

        // Deferred actions land at the start of the next scan cycle
        self.process_deferred();
    }

    /// Resolve and process a single key event.
    ///
    /// Returns whether the event was a non-tap-hold key event; the caller
    /// uses it to drive immediate hold resolution.
    pub fn process_key(&mut self, key: usize, pressed: bool) -> bool {
        if key >= NUM_KEYS {
            return false;
        }

        if pressed {
            let keycode = self.keymap.resolve(&self.profile().keymap, key);
            let layer = self.keymap.current_layer() as usize;
            let ak_index = self.advanced_key_indices[layer][key];

            if ak_index != 0 {
                self.active_advanced_keys[key] = ak_index;
                self.process_advanced(AdvancedKeyEvent {
                    kind: KeyEventKind::Press,
                    key: key as u8,
                    keycode,
                    index: ak_index - 1,
                });
                !self.is_tap_hold_index(ak_index - 1)
            } else {
                self.active_keycodes[key] = keycode;
                self.register(key, keycode);
                if keycode != Keycode::NO && !keycode.is_modifier() {
                    // Feeds the tap-hold prior-idle gate
                    self.last_key_press = Some(Instant::now());
                }
                keycode != Keycode::NO
            }
        } else {
            let keycode = self.active_keycodes[key];
            let ak_index = self.active_advanced_keys[key];

            if ak_index != 0 {
                self.active_advanced_keys[key] = 0;
                self.process_advanced(AdvancedKeyEvent {
                    kind: KeyEventKind::Release,
                    key: key as u8,
                    keycode,
                    index: ak_index - 1,
                });
                !self.is_tap_hold_index(ak_index - 1)
            } else {
                self.active_keycodes[key] = Keycode::NO;
                self.unregister(key, keycode);
                keycode != Keycode::NO
            }
        }
    }

    /// Apply a keycode press, dispatching by keycode range.
    pub fn register(&mut self, key: usize, keycode: Keycode) {
        if keycode == Keycode::NO {
            return;
        }

        if keycode.is_hid() {
            self.hid.keycode_add(keycode);
            self.should_send_reports = true;
        } else if let Some(layer) = keycode.momentary_layer() {
            self.keymap.layer_on(layer);
        } else if let Some(profile) = keycode.profile() {
            self.set_profile(profile);
        } else {
            match keycode {
                Keycode::KEY_LOCK => {
                    if key < NUM_KEYS {
                        self.key_disabled[key] = !self.key_disabled[key];
                    }
                }
                Keycode::LAYER_LOCK => self.keymap.layer_lock(),
                Keycode::PROFILE_SWAP => {
                    let target = if self.eeconfig.current_profile != 0 {
                        0
                    } else {
                        self.eeconfig.last_non_default_profile
                    };
                    self.set_profile(target);
                }
                Keycode::PROFILE_NEXT => {
                    self.set_profile(self.eeconfig.current_profile.wrapping_add(1) % NUM_PROFILES as u8);
                }
                Keycode::BOOT => self.board.enter_bootloader(),
                _ => {}
            }
        }
    }

    /// Apply a keycode release. Only HID and momentary layer keycodes have
    /// release semantics; the special operations act on press only.
    pub fn unregister(&mut self, _key: usize, keycode: Keycode) {
        if keycode == Keycode::NO {
            return;
        }

        if keycode.is_hid() {
            self.hid.keycode_remove(keycode);
            self.should_send_reports = true;
        } else if let Some(layer) = keycode.momentary_layer() {
            self.keymap.layer_off(layer);
        }
    }

    /// Switch to a profile: releases everything the advanced keys hold,
    /// persists the selection and reloads the advanced key table.
    fn set_profile(&mut self, profile: u8) -> bool {
        if profile as usize >= NUM_PROFILES {
            return false;
        }

        self.clear_advanced_keys();
        self.eeconfig.current_profile = profile;
        let mut status = self.store.write_current_profile(profile).is_ok();
        if profile != 0 {
            self.eeconfig.last_non_default_profile = profile;
            status &= self.store.write_last_non_default_profile(profile).is_ok();
        }
        if !status {
            error!("Failed to persist profile selection {}", profile);
        }
        self.load_advanced_keys();

        status
    }

    /// Reload the advanced key table from the current profile.
    ///
    /// This is the sole gateway for configuration changes: every path that
    /// modifies the profile's advanced keys (profile switch, host config
    /// update, reset) must end up here, because this is where the combo
    /// membership cache is invalidated. A config mutation that bypasses
    /// this function leaves the cache stale.
    pub fn load_advanced_keys(&mut self) {
        self.advanced_key_indices = [[0; NUM_KEYS]; NUM_LAYERS];

        let profile = &self.eeconfig.profiles[(self.eeconfig.current_profile as usize).min(NUM_PROFILES - 1)];
        for (i, def) in profile.advanced_keys.iter().enumerate() {
            self.ak_states[i] = AdvancedKeyState::initial(&def.action);

            if matches!(def.action, AdvancedKey::Combo(_)) {
                // Combos are matched by key index, not by position
                continue;
            }
            if def.layer as usize >= NUM_LAYERS || def.key as usize >= NUM_KEYS {
                warn!("Skipping advanced key {} with an invalid position", i);
                continue;
            }

            self.advanced_key_indices[def.layer as usize][def.key as usize] = i as u8 + 1;
            if let AdvancedKey::NullBind(null_bind) = &def.action {
                // Null Bind also claims its secondary key slot
                if (null_bind.secondary_key as usize) < NUM_KEYS {
                    self.advanced_key_indices[def.layer as usize][null_bind.secondary_key as usize] =
                        i as u8 + 1;
                }
            }
        }
        for i in profile.advanced_keys.len()..NUM_ADVANCED_KEYS {
            self.ak_states[i] = AdvancedKeyState::None;
        }

        self.combo_cache.invalidate();
    }

    /// Release everything the advanced keys currently hold and reset their
    /// states. Called before the profile changes or the advanced keys are
    /// updated.
    pub fn clear_advanced_keys(&mut self) {
        for i in 0..NUM_ADVANCED_KEYS {
            let Some(def) = self.profile().advanced_keys.get(i).copied() else {
                break;
            };
            let state = self.ak_states[i].clone();

            match (&def.action, &state) {
                (AdvancedKey::TapHold(tap_hold), AdvancedKeyState::TapHold(st)) => match st.stage {
                    TapHoldStage::Hold => self.unregister(def.key as usize, tap_hold.hold_keycode),
                    TapHoldStage::TapResolved => {
                        self.unregister(def.key as usize, tap_hold.tap_keycode)
                    }
                    TapHoldStage::DoubleTap => {
                        self.unregister(def.key as usize, tap_hold.double_tap_keycode)
                    }
                    _ => {}
                },
                (AdvancedKey::Toggle(toggle), AdvancedKeyState::Toggle(st)) => {
                    if st.stage != ToggleStage::None || st.is_toggled {
                        self.unregister(def.key as usize, toggle.keycode);
                    }
                }
                (AdvancedKey::NullBind(null_bind), AdvancedKeyState::NullBind(st)) => {
                    let keys = [def.key, null_bind.secondary_key];
                    for j in 0..2 {
                        if st.is_pressed[j] {
                            self.unregister(keys[j] as usize, st.keycodes[j]);
                        }
                    }
                }
                (AdvancedKey::DynamicKeystroke(dks), AdvancedKeyState::DynamicKeystroke(st)) => {
                    for j in 0..4 {
                        if st.is_pressed[j] {
                            self.unregister(def.key as usize, dks.keycodes[j]);
                        }
                    }
                    self.matrix.set_rapid_trigger_disabled(def.key as usize, false);
                }
                (AdvancedKey::Macro(_), AdvancedKeyState::Macro(st)) => {
                    // Stop playback and release whatever the macro held
                    for keycode in st.held.iter() {
                        self.unregister(def.key as usize, *keycode);
                    }
                }
                _ => {}
            }

            self.ak_states[i] = AdvancedKeyState::initial(&def.action);
        }
    }

    /// Whether any tap-hold key is still undecided.
    pub fn has_undecided(&self) -> bool {
        self.ak_states
            .iter()
            .any(|s| matches!(s, AdvancedKeyState::TapHold(st) if st.stage == TapHoldStage::Tap))
    }

    fn is_tap_hold_index(&self, index: u8) -> bool {
        matches!(
            self.profile().advanced_keys.get(index as usize).map(|d| &d.action),
            Some(AdvancedKey::TapHold(_))
        )
    }

    /// Dispatch an event to the advanced key instance it belongs to.
    pub(crate) fn process_advanced(&mut self, event: AdvancedKeyEvent) {
        let Some(def) = self.profile().advanced_keys.get(event.index as usize).copied() else {
            return;
        };

        match def.action {
            AdvancedKey::NullBind(null_bind) => self.process_null_bind(&event, def.key, &null_bind),
            AdvancedKey::DynamicKeystroke(dks) => self.process_dynamic_keystroke(&event, &dks),
            AdvancedKey::TapHold(tap_hold) => self.process_tap_hold(&event, &tap_hold),
            AdvancedKey::Toggle(toggle) => self.process_toggle(&event, &toggle),
            AdvancedKey::Macro(macro_key) => self.process_macro_key(&event, &macro_key),
            // Combo events never reach the per-instance dispatch
            AdvancedKey::Combo(_) => {}
        }
    }

    /// Advance the time-based advanced key state machines.
    fn advanced_tick(&mut self, has_non_tap_hold_press: bool, has_non_tap_hold_release: bool) {
        for i in 0..NUM_ADVANCED_KEYS {
            let Some(def) = self.profile().advanced_keys.get(i).copied() else {
                break;
            };

            match def.action {
                AdvancedKey::TapHold(tap_hold) => self.tick_tap_hold(
                    i,
                    def.key,
                    &tap_hold,
                    has_non_tap_hold_press,
                    has_non_tap_hold_release,
                ),
                AdvancedKey::Toggle(toggle) => self.tick_toggle(i, &toggle),
                AdvancedKey::Macro(macro_key) => self.tick_macro(i, def.key, &macro_key),
                _ => {}
            }
        }
    }

    /// Run the deferred actions queued during the previous scan cycle.
    fn process_deferred(&mut self) {
        let queued = self.deferred.len();
        for _ in 0..queued {
            let Some(action) = self.deferred.pop() else {
                break;
            };
            match action.kind {
                DeferredActionKind::Press => self.register(action.key as usize, action.keycode),
                DeferredActionKind::Release => self.unregister(action.key as usize, action.keycode),
                DeferredActionKind::Tap => {
                    self.register(action.key as usize, action.keycode);
                    // The release half lands in the next scan cycle
                    self.deferred.push(DeferredAction {
                        kind: DeferredActionKind::Release,
                        key: action.key,
                        keycode: action.keycode,
                    });
                }
            }
        }
    }
}
