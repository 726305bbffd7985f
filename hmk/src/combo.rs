//! Event queue and layer cache backing the combo detector.
//!
//! The matching logic lives in [`crate::keyboard`]; this module owns the
//! data structures: a bounded FIFO of press events waiting for a combo
//! decision, and the lazily rebuilt per-layer bitmap of combo member keys.

use embassy_time::Instant;
use heapless::Deque;

use crate::advanced_key::AdvancedKey;
use crate::eeconfig::Profile;
use crate::COMBO_QUEUE_SIZE;

/// A key event held back while combos are being matched.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ComboEvent {
    pub key: u8,
    pub pressed: bool,
    pub time: Instant,
    /// Whether the event has been consumed by a combo match
    pub consumed: bool,
}

/// Bounded FIFO of combo candidate events.
#[derive(Default)]
pub struct ComboQueue {
    events: Deque<ComboEvent, COMBO_QUEUE_SIZE>,
}

impl ComboQueue {
    pub fn new() -> Self {
        Self { events: Deque::new() }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.is_full()
    }

    pub(crate) fn push(&mut self, key: u8, pressed: bool, time: Instant) {
        let event = ComboEvent { key, pressed, time, consumed: false };
        if self.events.push_back(event).is_err() {
            // The caller flushes before pushing when full; losing an event
            // here would drop user input
            error!("Combo queue overflow, dropping event for key {}", key);
        }
    }

    pub(crate) fn pop(&mut self) -> Option<ComboEvent> {
        self.events.pop_front()
    }

    pub(crate) fn front(&self) -> Option<&ComboEvent> {
        self.events.front()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ComboEvent> {
        self.events.iter()
    }

    /// Mark every unconsumed event of a member key as consumed.
    pub(crate) fn consume_keys(&mut self, combo: &crate::advanced_key::Combo) {
        for event in self.events.iter_mut() {
            if !event.consumed && combo.contains(event.key) {
                event.consumed = true;
            }
        }
    }
}

/// Per-layer bitmap of keys that participate in any combo.
///
/// Rebuilt lazily when the layer changes; configuration changes invalidate
/// it explicitly through the keyboard's advanced-key reload gateway.
pub struct ComboCache<const NUM_KEYS: usize> {
    member: [bool; NUM_KEYS],
    /// Layer the bitmap was built for; `None` forces a rebuild
    layer: Option<u8>,
}

impl<const NUM_KEYS: usize> Default for ComboCache<NUM_KEYS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const NUM_KEYS: usize> ComboCache<NUM_KEYS> {
    pub fn new() -> Self {
        Self { member: [false; NUM_KEYS], layer: None }
    }

    pub(crate) fn invalidate(&mut self) {
        self.layer = None;
    }

    pub(crate) fn rebuild<const NUM_LAYERS: usize, const NUM_ADVANCED_KEYS: usize>(
        &mut self,
        layer: u8,
        profile: &Profile<NUM_LAYERS, NUM_KEYS, NUM_ADVANCED_KEYS>,
    ) {
        if self.layer == Some(layer) {
            return;
        }

        self.member = [false; NUM_KEYS];
        for def in profile.advanced_keys.iter() {
            let AdvancedKey::Combo(combo) = &def.action else {
                continue;
            };
            if def.layer != layer {
                continue;
            }
            for &key in combo.keys.iter() {
                if (key as usize) < NUM_KEYS {
                    self.member[key as usize] = true;
                }
            }
        }
        self.layer = Some(layer);
    }

    pub(crate) fn contains(&self, key: u8) -> bool {
        (key as usize) < NUM_KEYS && self.member[key as usize]
    }
}
