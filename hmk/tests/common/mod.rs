#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use embassy_time::{Duration, MockDriver};
use hmk::advanced_key::AdvancedKeyDef;
use hmk::board::Board;
use hmk::eeconfig::{Actuation, CalibrationOptions, Eeconfig};
use hmk::hid::{HidReporter, KeyboardReportState};
use hmk::keyboard::Keyboard;
use hmk::keycode::Keycode;
use hmk::matrix::MatrixConfig;
use hmk::storage::{ConfigStore, StorageError};

// Init logger for tests
#[ctor::ctor]
pub fn init_log() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub const PROFILES: usize = 2;
pub const LAYERS: usize = 4;
pub const KEYS: usize = 16;
pub const ADV: usize = 16;

pub type TestEeconfig = Eeconfig<PROFILES, LAYERS, KEYS, ADV>;
pub type TestKeyboard = Keyboard<TestBoard, TestHid, SpyStore, PROFILES, LAYERS, KEYS, ADV>;

/// Travel distance driven for a "fully pressed" key in tests
pub const PRESS_DISTANCE: u16 = 200;

/// Shared handle to the scripted per-key analog values.
#[derive(Clone, Default)]
pub struct AnalogHandle(Rc<RefCell<[u16; KEYS]>>);

impl AnalogHandle {
    pub fn set(&self, key: usize, value: u16) {
        self.0.borrow_mut()[key] = value;
    }

    pub fn press(&self, key: usize) {
        self.set(key, PRESS_DISTANCE);
    }

    pub fn release(&self, key: usize) {
        self.set(key, 0);
    }

    pub fn release_all(&self) {
        *self.0.borrow_mut() = [0; KEYS];
    }
}

pub struct TestBoard {
    values: AnalogHandle,
    bootloader_entered: Rc<RefCell<bool>>,
}

impl Board for TestBoard {
    const ADC_MAX: u16 = 255;

    fn analog_read(&mut self, key: usize) -> u16 {
        self.values.0.borrow()[key]
    }

    fn enter_bootloader(&mut self) {
        *self.bootloader_entered.borrow_mut() = true;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HidOp {
    Add(u8),
    Remove(u8),
    /// A report flush, with the 6-KRO report contents at that point
    Report { modifier: u8, keycodes: [u8; 6] },
}

/// Shared log of everything the core sent to the HID seam, timestamped in
/// mock milliseconds.
#[derive(Clone, Default)]
pub struct HidLog(Rc<RefCell<Vec<(u64, HidOp)>>>);

impl HidLog {
    pub fn ops(&self) -> Vec<(u64, HidOp)> {
        self.0.borrow().clone()
    }

    /// Timestamps at which a keycode was added
    pub fn added(&self, keycode: u8) -> Vec<u64> {
        self.0
            .borrow()
            .iter()
            .filter(|(_, op)| *op == HidOp::Add(keycode))
            .map(|(t, _)| *t)
            .collect()
    }

    /// Timestamps at which a keycode was removed
    pub fn removed(&self, keycode: u8) -> Vec<u64> {
        self.0
            .borrow()
            .iter()
            .filter(|(_, op)| *op == HidOp::Remove(keycode))
            .map(|(t, _)| *t)
            .collect()
    }

    /// Add/Remove events only, in order
    pub fn keycode_ops(&self) -> Vec<(u64, HidOp)> {
        self.0
            .borrow()
            .iter()
            .filter(|(_, op)| !matches!(op, HidOp::Report { .. }))
            .cloned()
            .collect()
    }

    pub fn reports(&self) -> Vec<(u64, [u8; 6], u8)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|(t, op)| match op {
                HidOp::Report { modifier, keycodes } => Some((*t, *keycodes, *modifier)),
                _ => None,
            })
            .collect()
    }

    /// Keycodes left in the HID set after replaying every add/remove
    pub fn net_active(&self) -> Vec<u8> {
        let mut active = [false; 256];
        for (_, op) in self.0.borrow().iter() {
            match op {
                HidOp::Add(kc) => active[*kc as usize] = true,
                HidOp::Remove(kc) => active[*kc as usize] = false,
                HidOp::Report { .. } => {}
            }
        }
        (0..256).filter(|&kc| active[kc]).map(|kc| kc as u8).collect()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

pub struct TestHid {
    log: HidLog,
    report: KeyboardReportState,
}

impl HidReporter for TestHid {
    fn keycode_add(&mut self, keycode: Keycode) {
        self.report.register(keycode);
        self.log.0.borrow_mut().push((now_ms(), HidOp::Add(keycode.0)));
    }

    fn keycode_remove(&mut self, keycode: Keycode) {
        self.report.unregister(keycode);
        self.log.0.borrow_mut().push((now_ms(), HidOp::Remove(keycode.0)));
    }

    fn send_reports(&mut self) {
        let report = *self.report.report();
        self.log.0.borrow_mut().push((
            now_ms(),
            HidOp::Report { modifier: report.modifier, keycodes: report.keycodes },
        ));
    }
}

/// Shared record of everything the core asked the config store to persist.
#[derive(Clone, Default)]
pub struct StoreLog {
    current_profiles: Rc<RefCell<Vec<u8>>>,
    last_non_default_profiles: Rc<RefCell<Vec<u8>>>,
    thresholds: Rc<RefCell<Vec<Vec<u16>>>>,
}

impl StoreLog {
    pub fn current_profiles(&self) -> Vec<u8> {
        self.current_profiles.borrow().clone()
    }

    pub fn last_non_default_profiles(&self) -> Vec<u8> {
        self.last_non_default_profiles.borrow().clone()
    }

    pub fn thresholds(&self) -> Vec<Vec<u16>> {
        self.thresholds.borrow().clone()
    }
}

/// A config store that records every write.
pub struct SpyStore {
    log: StoreLog,
}

impl ConfigStore for SpyStore {
    fn write_current_profile(&mut self, profile: u8) -> Result<(), StorageError> {
        self.log.current_profiles.borrow_mut().push(profile);
        Ok(())
    }

    fn write_last_non_default_profile(&mut self, profile: u8) -> Result<(), StorageError> {
        self.log.last_non_default_profiles.borrow_mut().push(profile);
        Ok(())
    }

    fn write_bottom_out_thresholds(&mut self, thresholds: &[u16]) -> Result<(), StorageError> {
        self.log.thresholds.borrow_mut().push(thresholds.to_vec());
        Ok(())
    }
}

pub fn now_ms() -> u64 {
    embassy_time::Instant::now().as_millis()
}

pub fn advance_ms(ms: u64) {
    MockDriver::get().advance(Duration::from_millis(ms));
}

pub fn test_matrix_config() -> MatrixConfig {
    MatrixConfig {
        // The scripted analog values pass through unfiltered, so a value
        // maps 1:1 onto a travel distance
        ema_exponent: 0,
        calibration_epsilon: 0,
        calibration_duration: Duration::from_ticks(0),
    }
}

/// Keycode bound to a key on layer 0 of the base test keymap.
pub fn base_keycode(key: usize) -> u8 {
    0x04 + key as u8
}

/// A config with plain threshold actuation at 30 for every key and layer 0
/// mapping key `i` to keycode `0x04 + i`, on every profile.
pub fn base_eeconfig() -> TestEeconfig {
    let mut eeconfig = TestEeconfig::default();
    eeconfig.calibration =
        CalibrationOptions { initial_rest_value: 0, initial_bottom_out_threshold: 255 };
    for profile in eeconfig.profiles.iter_mut() {
        profile.actuation_map =
            [Actuation { actuation_point: 30, rt_down: 0, rt_up: 0, continuous: false }; KEYS];
    }
    for (i, keycode) in eeconfig.profiles[0].keymap[0].iter_mut().enumerate() {
        *keycode = Keycode(base_keycode(i));
    }
    eeconfig
}

pub struct TestRig {
    pub keyboard: TestKeyboard,
    pub analog: AnalogHandle,
    pub hid: HidLog,
    pub store: StoreLog,
    pub bootloader: Rc<RefCell<bool>>,
}

impl TestRig {
    pub fn new(eeconfig: TestEeconfig) -> Self {
        let analog = AnalogHandle::default();
        let hid = HidLog::default();
        let store = StoreLog::default();
        let bootloader = Rc::new(RefCell::new(false));
        let board = TestBoard { values: analog.clone(), bootloader_entered: bootloader.clone() };
        let mut keyboard = Keyboard::new(
            board,
            TestHid { log: hid.clone(), report: KeyboardReportState::new() },
            SpyStore { log: store.clone() },
            eeconfig,
            test_matrix_config(),
        );
        keyboard.init();
        TestRig { keyboard, analog, hid, store, bootloader }
    }

    /// One scan cycle at the current mock time.
    pub fn cycle(&mut self) {
        self.keyboard.scan();
        self.keyboard.task();
    }

    /// Run a 1 kHz scan loop for `ms` milliseconds.
    pub fn run_ms(&mut self, ms: u64) {
        for _ in 0..ms {
            advance_ms(1);
            self.cycle();
        }
    }

    pub fn press(&mut self, key: usize) {
        self.analog.press(key);
        self.cycle();
    }

    pub fn release(&mut self, key: usize) {
        self.analog.release(key);
        self.cycle();
    }
}

/// Shorthand for defining an advanced key on the first free slot of a
/// profile.
pub fn add_advanced_key(eeconfig: &mut TestEeconfig, profile: usize, def: AdvancedKeyDef) {
    eeconfig.profiles[profile]
        .advanced_keys
        .push(def)
        .expect("advanced key table is full");
}
