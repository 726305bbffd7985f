//! HID output seam and 6-KRO report building.

use usbd_hid::descriptor::KeyboardReport;

use crate::keycode::Keycode;

/// HID output collaborator. The transport (USB, BLE, ...) lives outside the
/// input core; it receives keycode set mutations and a flush signal once
/// per scan in which anything changed.
pub trait HidReporter {
    /// Add a keycode to the active set.
    fn keycode_add(&mut self, keycode: Keycode);

    /// Remove a keycode from the active set.
    fn keycode_remove(&mut self, keycode: Keycode);

    /// Send the pending reports to the host.
    fn send_reports(&mut self);
}

/// A 6-KRO keyboard report tracker.
///
/// Building block for `HidReporter` implementations: maintains the modifier
/// byte and the six keycode slots of a boot-protocol keyboard report.
#[derive(Clone, Copy, Debug)]
pub struct KeyboardReportState {
    report: KeyboardReport,
}

impl Default for KeyboardReportState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardReportState {
    pub fn new() -> Self {
        Self {
            report: KeyboardReport { modifier: 0, reserved: 0, leds: 0, keycodes: [0; 6] },
        }
    }

    /// Add a keycode to the report.
    pub fn register(&mut self, keycode: Keycode) {
        if keycode.is_modifier() {
            self.report.modifier |= keycode.as_modifier_bit();
        } else if keycode.is_hid() {
            if self.report.keycodes.contains(&keycode.0) {
                return;
            }
            if let Some(index) = self.report.keycodes.iter().position(|&k| k == 0) {
                self.report.keycodes[index] = keycode.0;
            }
        }
    }

    /// Remove a keycode from the report.
    pub fn unregister(&mut self, keycode: Keycode) {
        if keycode.is_modifier() {
            self.report.modifier &= !keycode.as_modifier_bit();
        } else if keycode.is_hid() {
            if let Some(index) = self.report.keycodes.iter().position(|&k| k == keycode.0) {
                self.report.keycodes[index] = 0;
            }
        }
    }

    pub fn report(&self) -> &KeyboardReport {
        &self.report
    }

    /// Whether no keycode and no modifier is active.
    pub fn is_empty(&self) -> bool {
        self.report.modifier == 0 && self.report.keycodes.iter().all(|&k| k == 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_6kro_slots() {
        let mut state = KeyboardReportState::new();
        for kc in 0x04..0x0B {
            state.register(Keycode(kc));
        }
        // The seventh key does not fit
        assert_eq!(state.report().keycodes, [0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);

        state.unregister(Keycode(0x05));
        assert_eq!(state.report().keycodes, [0x04, 0, 0x06, 0x07, 0x08, 0x09]);

        state.register(Keycode(0x0B));
        assert_eq!(state.report().keycodes, [0x04, 0x0B, 0x06, 0x07, 0x08, 0x09]);
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let mut state = KeyboardReportState::new();
        state.register(Keycode(0x04));
        state.register(Keycode(0x04));
        state.unregister(Keycode(0x04));
        assert!(state.is_empty());
    }

    #[test]
    fn test_modifiers_use_the_modifier_byte() {
        let mut state = KeyboardReportState::new();
        state.register(Keycode(0xE1)); // LShift
        state.register(Keycode(0xE4)); // RCtrl
        assert_eq!(state.report().modifier, 0b0001_0010);
        assert_eq!(state.report().keycodes, [0; 6]);
        state.unregister(Keycode(0xE1));
        assert_eq!(state.report().modifier, 0b0001_0000);
    }
}
