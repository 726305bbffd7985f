use embassy_time::{Duration, Instant};

use crate::board::Board;
use crate::eeconfig::{Actuation, CalibrationOptions};

/// Travel direction of a key while Rapid Trigger is tracking it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyDirection {
    #[default]
    Inactive,
    Down,
    Up,
}

/// Per-key analog state, updated on every scan.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyState {
    /// Exponential moving average of the raw ADC samples
    pub adc_filtered: u16,
    /// Auto-calibrated ADC value at rest
    pub adc_rest_value: u16,
    /// Auto-calibrated ADC value at full travel
    pub adc_bottom_out_value: u16,
    /// Normalized travel distance past rest, 0..=255
    pub distance: u8,
    /// Deepest (moving down) or shallowest (moving up) distance since the
    /// last direction change
    pub extremum: u8,
    pub direction: KeyDirection,
    pub is_pressed: bool,
    /// Timestamp of the most recent press/release edge
    pub event_time: Instant,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            adc_filtered: 0,
            adc_rest_value: 0,
            adc_bottom_out_value: 0,
            distance: 0,
            extremum: 0,
            direction: KeyDirection::Inactive,
            is_pressed: false,
            event_time: Instant::from_ticks(0),
        }
    }
}

/// Matrix tuning that is fixed at construction time.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MatrixConfig {
    /// EMA filter strength: alpha = 2^-k
    pub ema_exponent: u8,
    /// Minimum ADC delta before the rest/bottom-out endpoints move
    pub calibration_epsilon: u16,
    /// How long `recalibrate` samples the rest values
    pub calibration_duration: Duration,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            ema_exponent: 3,
            calibration_epsilon: 8,
            calibration_duration: Duration::from_millis(200),
        }
    }
}

/// How long the observed bottom-out values must stay unchanged before they
/// are eligible for persistence.
pub(crate) const BOTTOM_OUT_SAVE_INACTIVITY: Duration = Duration::from_secs(60);

/// Exponential moving average with alpha = 2^-k
fn ema(raw: u16, prev: u16, exponent: u8) -> u16 {
    ((raw as u32 + prev as u32 * ((1u32 << exponent) - 1)) >> exponent) as u16
}

fn bottom_out_value(rest: u16, initial_threshold: u16, key_threshold: u16, adc_max: u16) -> u16 {
    rest.saturating_add(initial_threshold.max(key_threshold)).min(adc_max)
}

/// The analog key matrix: filters ADC samples into travel distances and
/// runs the Rapid Trigger state machine for every key.
pub struct KeyMatrix<const NUM_KEYS: usize> {
    keys: [KeyState; NUM_KEYS],
    /// Keys whose Rapid Trigger is suppressed (Dynamic Keystroke binding)
    rapid_trigger_disabled: [bool; NUM_KEYS],
    /// Last time any bottom-out value moved
    last_bottom_out_change: Instant,
    config: MatrixConfig,
}

impl<const NUM_KEYS: usize> KeyMatrix<NUM_KEYS> {
    pub fn new(config: MatrixConfig) -> Self {
        Self {
            keys: [KeyState::default(); NUM_KEYS],
            rapid_trigger_disabled: [false; NUM_KEYS],
            last_bottom_out_change: Instant::now(),
            config,
        }
    }

    pub fn key(&self, key: usize) -> &KeyState {
        &self.keys[key]
    }

    pub(crate) fn set_rapid_trigger_disabled(&mut self, key: usize, disabled: bool) {
        if key < NUM_KEYS {
            self.rapid_trigger_disabled[key] = disabled;
        }
    }

    /// Reset all key states and re-learn the rest values.
    ///
    /// Busy-loops for the configured calibration duration, polling the
    /// board's analog task. Only the rest value is calibrated here; the
    /// bottom-out value keeps adjusting during normal scanning.
    pub fn recalibrate<B: Board>(
        &mut self,
        board: &mut B,
        calibration: &CalibrationOptions,
        thresholds: &[u16; NUM_KEYS],
    ) {
        for (i, key) in self.keys.iter_mut().enumerate() {
            *key = KeyState {
                adc_filtered: calibration.initial_rest_value,
                adc_rest_value: calibration.initial_rest_value,
                adc_bottom_out_value: bottom_out_value(
                    calibration.initial_rest_value,
                    calibration.initial_bottom_out_threshold,
                    thresholds[i],
                    B::ADC_MAX,
                ),
                ..KeyState::default()
            };
        }

        let calibration_start = Instant::now();
        while calibration_start.elapsed() < self.config.calibration_duration {
            board.analog_task();

            for i in 0..NUM_KEYS {
                let new_adc_filtered =
                    ema(board.analog_read(i), self.keys[i].adc_filtered, self.config.ema_exponent);
                let key = &mut self.keys[i];

                key.adc_filtered = new_adc_filtered;

                if new_adc_filtered + self.config.calibration_epsilon <= key.adc_rest_value {
                    // Only lower the rest value when the difference is at
                    // least the calibration epsilon
                    key.adc_rest_value = new_adc_filtered;
                }

                key.adc_bottom_out_value = bottom_out_value(
                    key.adc_rest_value,
                    calibration.initial_bottom_out_threshold,
                    thresholds[i],
                    B::ADC_MAX,
                );
            }
        }

        self.last_bottom_out_change = Instant::now();
    }

    /// Run one scan pass: filter samples, update travel distances, advance
    /// the per-key actuation state machines and order simultaneous presses.
    pub fn scan<B: Board>(&mut self, board: &mut B, actuation_map: &[Actuation; NUM_KEYS]) {
        let now = Instant::now();

        // Keys that produced a new press edge in this scan
        let mut pressed_keys: heapless::Vec<(u8, u16), NUM_KEYS> = heapless::Vec::new();

        for i in 0..NUM_KEYS {
            let new_adc_filtered =
                ema(board.analog_read(i), self.keys[i].adc_filtered, self.config.ema_exponent);
            let actuation = &actuation_map[i];
            let key = &mut self.keys[i];

            key.adc_filtered = new_adc_filtered;

            if new_adc_filtered >= key.adc_bottom_out_value + self.config.calibration_epsilon {
                // Only raise the bottom-out value when the difference is at
                // least the calibration epsilon
                key.adc_bottom_out_value = new_adc_filtered;
                self.last_bottom_out_change = now;
            }

            key.distance =
                board.adc_to_distance(new_adc_filtered, key.adc_rest_value, key.adc_bottom_out_value);

            let was_pressed = key.is_pressed;

            if self.rapid_trigger_disabled[i] || actuation.rt_down == 0 {
                // Plain threshold actuation
                key.direction = KeyDirection::Inactive;
                key.is_pressed = key.distance >= actuation.actuation_point;
            } else {
                let reset_point = if actuation.continuous { 0 } else { actuation.actuation_point };
                let rt_up = if actuation.rt_up == 0 { actuation.rt_down } else { actuation.rt_up };

                match key.direction {
                    KeyDirection::Inactive => {
                        if key.distance > actuation.actuation_point {
                            // Pressed down past the actuation point
                            key.extremum = key.distance;
                            key.direction = KeyDirection::Down;
                            key.is_pressed = true;
                        }
                    }
                    KeyDirection::Down => {
                        if key.distance <= reset_point {
                            // Released past the reset point
                            key.extremum = key.distance;
                            key.direction = KeyDirection::Inactive;
                            key.is_pressed = false;
                        } else if key.distance.saturating_add(rt_up) < key.extremum {
                            // Released by Rapid Trigger
                            key.extremum = key.distance;
                            key.direction = KeyDirection::Up;
                            key.is_pressed = false;
                        } else if key.distance > key.extremum {
                            // Pressed down further
                            key.extremum = key.distance;
                        }
                    }
                    KeyDirection::Up => {
                        if key.distance <= reset_point {
                            // Released past the reset point
                            key.extremum = key.distance;
                            key.direction = KeyDirection::Inactive;
                            key.is_pressed = false;
                        } else if key.extremum.saturating_add(actuation.rt_down) < key.distance {
                            // Pressed by Rapid Trigger
                            key.extremum = key.distance;
                            key.direction = KeyDirection::Down;
                            key.is_pressed = true;
                        } else if key.distance < key.extremum {
                            // Released further
                            key.extremum = key.distance;
                        }
                    }
                }
            }

            if was_pressed != key.is_pressed {
                key.event_time = now;
            }

            if !was_pressed && key.is_pressed {
                let delta = (key.distance as u16).saturating_sub(actuation.actuation_point as u16);
                let _ = pressed_keys.push((i as u8, delta));
            }
        }

        // Deliver at most one new press edge per scan, deepest past its
        // actuation point first: a deeper press must have actuated earlier.
        // The shallower presses are reverted and re-trigger next scan, one
        // scan tick of latency in exchange for a deterministic order.
        if pressed_keys.len() > 1 {
            pressed_keys.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for &(key, _) in pressed_keys.iter().skip(1) {
                let key = &mut self.keys[key as usize];
                key.is_pressed = false;
                key.direction = KeyDirection::Inactive;
            }
        }
    }

    /// Current bottom-out thresholds relative to the rest values, for
    /// persistence.
    pub(crate) fn bottom_out_thresholds(&self) -> [u16; NUM_KEYS] {
        let mut thresholds = [0u16; NUM_KEYS];
        for (threshold, key) in thresholds.iter_mut().zip(self.keys.iter()) {
            *threshold = key.adc_bottom_out_value.saturating_sub(key.adc_rest_value);
        }
        thresholds
    }

    pub(crate) fn bottom_out_idle(&self) -> Duration {
        self.last_bottom_out_change.elapsed()
    }

    /// Delay the next threshold save.
    pub(crate) fn mark_thresholds_saved(&mut self) {
        self.last_bottom_out_change = Instant::now();
    }
}
