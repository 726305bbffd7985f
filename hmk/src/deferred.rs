//! One-scan deferral of HID mutations.
//!
//! Actions pushed here execute at the start of the next scan cycle, so a
//! register/unregister never lands in the middle of an in-flight report.
//! A tap expands to press-then-release across two successive scans.

use heapless::Deque;

use crate::keycode::Keycode;
use crate::DEFERRED_QUEUE_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeferredActionKind {
    Press,
    Release,
    /// Press on the next scan, release on the one after
    Tap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeferredAction {
    pub kind: DeferredActionKind,
    pub key: u8,
    pub keycode: Keycode,
}

/// FIFO of actions to run on the next scan.
#[derive(Default)]
pub struct DeferredActionQueue {
    queue: Deque<DeferredAction, DEFERRED_QUEUE_SIZE>,
}

impl DeferredActionQueue {
    pub fn new() -> Self {
        Self { queue: Deque::new() }
    }

    /// Queue an action for the next scan. Returns false when the queue is
    /// full and the action was not queued.
    pub(crate) fn push(&mut self, action: DeferredAction) -> bool {
        match self.queue.push_back(action) {
            Ok(()) => true,
            Err(_) => {
                warn!("Deferred action queue is full");
                false
            }
        }
    }

    pub(crate) fn pop(&mut self) -> Option<DeferredAction> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
