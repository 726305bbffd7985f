//! Persistence seam for the runtime-mutated configuration fields.
//!
//! Only a handful of fields change at runtime (profile selection and the
//! learned bottom-out thresholds); everything else in [`crate::eeconfig`]
//! is written by the host configurator, which is out of scope here. The
//! [`ConfigStore`] trait is the seam; [`FlashConfigStore`] is a provided
//! implementation that appends key-tagged postcard records to a NorFlash
//! region and consolidates it when full.

use core::ops::Range;

use embedded_storage::nor_flash::NorFlash;
use serde::Serialize;

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Serialized record does not fit the scratch buffer
    BufferTooSmall,
    SerializationError,
    /// The backing flash reported an error
    FlashError,
    /// The storage region cannot hold the record even after consolidation
    StorageFull,
}

/// Write access to the persisted configuration fields that the input core
/// mutates at runtime.
///
/// RAM state is always updated before these are called; a failed write
/// leaves the keyboard functional until the next reset.
pub trait ConfigStore {
    fn write_current_profile(&mut self, profile: u8) -> Result<(), StorageError>;
    fn write_last_non_default_profile(&mut self, profile: u8) -> Result<(), StorageError>;
    fn write_bottom_out_thresholds(&mut self, thresholds: &[u16]) -> Result<(), StorageError>;
}

/// A store that keeps nothing. For RAM-only operation and tests.
#[derive(Default)]
pub struct DummyConfigStore;

impl ConfigStore for DummyConfigStore {
    fn write_current_profile(&mut self, _profile: u8) -> Result<(), StorageError> {
        Ok(())
    }

    fn write_last_non_default_profile(&mut self, _profile: u8) -> Result<(), StorageError> {
        Ok(())
    }

    fn write_bottom_out_thresholds(&mut self, _thresholds: &[u16]) -> Result<(), StorageError> {
        Ok(())
    }
}

const RECORD_MAGIC: u8 = 0xE6;
const RECORD_HEADER_SIZE: usize = 4;
// Large enough for the threshold array of a fully populated matrix, plus
// padding up to a 32-byte flash write granularity
const SCRATCH_SIZE: usize = 1056;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum RecordKey {
    CurrentProfile = 0,
    LastNonDefaultProfile = 1,
    BottomOutThresholds = 2,
}

impl RecordKey {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordKey::CurrentProfile),
            1 => Some(RecordKey::LastNonDefaultProfile),
            2 => Some(RecordKey::BottomOutThresholds),
            _ => None,
        }
    }
}

/// Append-only record log on a NorFlash region.
///
/// Each record is `[magic, key, len_lo, len_hi]` followed by a postcard
/// payload, padded to the flash write granularity. The latest record per
/// key wins. When the region fills up, it is erased and rewritten with the
/// latest value of every key.
///
/// The region must be aligned to the flash erase granularity.
pub struct FlashConfigStore<F: NorFlash, const NUM_KEYS: usize> {
    flash: F,
    range: Range<u32>,
    /// Next write position
    pos: u32,
    // Latest values, replayed from flash at startup
    current_profile: Option<u8>,
    last_non_default_profile: Option<u8>,
    bottom_out_thresholds: Option<heapless::Vec<u16, NUM_KEYS>>,
}

impl<F: NorFlash, const NUM_KEYS: usize> FlashConfigStore<F, NUM_KEYS> {
    pub fn new(flash: F, range: Range<u32>) -> Self {
        let mut store = Self {
            flash,
            range,
            pos: 0,
            current_profile: None,
            last_non_default_profile: None,
            bottom_out_thresholds: None,
        };
        store.replay();
        store
    }

    /// Latest persisted profile selection, if any.
    pub fn current_profile(&self) -> Option<u8> {
        self.current_profile
    }

    pub fn last_non_default_profile(&self) -> Option<u8> {
        self.last_non_default_profile
    }

    pub fn bottom_out_thresholds(&self) -> Option<&[u16]> {
        self.bottom_out_thresholds.as_deref()
    }

    /// Scan the region and restore the latest value of every record key.
    fn replay(&mut self) {
        let mut pos = self.range.start;
        let mut scratch = [0u8; SCRATCH_SIZE];

        loop {
            if pos + RECORD_HEADER_SIZE as u32 > self.range.end {
                break;
            }
            let mut header = [0u8; RECORD_HEADER_SIZE];
            if self.flash.read(pos, &mut header).is_err() {
                break;
            }
            if header[0] != RECORD_MAGIC {
                // Erased flash or the end of the log
                break;
            }
            let len = u16::from_le_bytes([header[2], header[3]]) as usize;
            if len > SCRATCH_SIZE - RECORD_HEADER_SIZE {
                warn!("Corrupt config record at {}, stopping replay", pos);
                break;
            }
            let padded = record_size::<F>(len);
            if pos + padded as u32 > self.range.end {
                break;
            }

            let payload = &mut scratch[..len];
            if self.flash.read(pos + RECORD_HEADER_SIZE as u32, payload).is_err() {
                break;
            }
            match RecordKey::from_byte(header[1]) {
                Some(RecordKey::CurrentProfile) => {
                    self.current_profile = postcard::from_bytes(payload).ok();
                }
                Some(RecordKey::LastNonDefaultProfile) => {
                    self.last_non_default_profile = postcard::from_bytes(payload).ok();
                }
                Some(RecordKey::BottomOutThresholds) => {
                    self.bottom_out_thresholds = postcard::from_bytes(payload).ok();
                }
                None => {
                    // Skip records written by a newer firmware
                    debug!("Unknown config record key {}", header[1]);
                }
            }
            pos += padded as u32;
        }

        self.pos = pos;
    }

    fn append<T: Serialize + ?Sized>(&mut self, key: RecordKey, value: &T) -> Result<(), StorageError> {
        let mut scratch = [0xFFu8; SCRATCH_SIZE];
        let len = postcard::to_slice(value, &mut scratch[RECORD_HEADER_SIZE..])
            .map_err(|_| StorageError::BufferTooSmall)?
            .len();
        scratch[0] = RECORD_MAGIC;
        scratch[1] = key as u8;
        scratch[2..4].copy_from_slice(&(len as u16).to_le_bytes());

        let padded = record_size::<F>(len);
        if self.pos + padded as u32 > self.range.end {
            self.consolidate()?;
            if self.pos + padded as u32 > self.range.end {
                return Err(StorageError::StorageFull);
            }
        }

        self.flash.write(self.pos, &scratch[..padded]).map_err(|_| StorageError::FlashError)?;
        self.pos += padded as u32;
        Ok(())
    }

    /// Erase the region and rewrite the latest value of every key.
    fn consolidate(&mut self) -> Result<(), StorageError> {
        info!("Consolidating config storage");
        self.flash
            .erase(self.range.start, self.range.end)
            .map_err(|_| StorageError::FlashError)?;
        self.pos = self.range.start;

        if let Some(profile) = self.current_profile {
            self.append(RecordKey::CurrentProfile, &profile)?;
        }
        if let Some(profile) = self.last_non_default_profile {
            self.append(RecordKey::LastNonDefaultProfile, &profile)?;
        }
        if let Some(thresholds) = self.bottom_out_thresholds.clone() {
            self.append(RecordKey::BottomOutThresholds, &thresholds[..])?;
        }
        Ok(())
    }
}

/// Record size on flash: header + payload, padded to the write granularity.
fn record_size<F: NorFlash>(payload_len: usize) -> usize {
    (RECORD_HEADER_SIZE + payload_len).next_multiple_of(F::WRITE_SIZE)
}

impl<F: NorFlash, const NUM_KEYS: usize> ConfigStore for FlashConfigStore<F, NUM_KEYS> {
    fn write_current_profile(&mut self, profile: u8) -> Result<(), StorageError> {
        self.current_profile = Some(profile);
        self.append(RecordKey::CurrentProfile, &profile)
    }

    fn write_last_non_default_profile(&mut self, profile: u8) -> Result<(), StorageError> {
        self.last_non_default_profile = Some(profile);
        self.append(RecordKey::LastNonDefaultProfile, &profile)
    }

    fn write_bottom_out_thresholds(&mut self, thresholds: &[u16]) -> Result<(), StorageError> {
        self.bottom_out_thresholds =
            Some(heapless::Vec::from_slice(thresholds).map_err(|_| StorageError::BufferTooSmall)?);
        self.append(RecordKey::BottomOutThresholds, thresholds)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_storage::nor_flash::{ErrorType, NorFlashError, NorFlashErrorKind, ReadNorFlash};

    const FLASH_SIZE: usize = 2048;

    struct MemFlash {
        data: [u8; FLASH_SIZE],
    }

    impl MemFlash {
        fn new() -> Self {
            Self { data: [0xFF; FLASH_SIZE] }
        }
    }

    #[derive(Debug)]
    struct MemFlashError;

    impl NorFlashError for MemFlashError {
        fn kind(&self) -> NorFlashErrorKind {
            NorFlashErrorKind::Other
        }
    }

    impl ErrorType for MemFlash {
        type Error = MemFlashError;
    }

    impl ReadNorFlash for MemFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let offset = offset as usize;
            bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            FLASH_SIZE
        }
    }

    impl NorFlash for MemFlash {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = 1024;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            self.data[from as usize..to as usize].fill(0xFF);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let offset = offset as usize;
            self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn test_round_trip_through_replay() {
        let mut store: FlashConfigStore<MemFlash, 4> =
            FlashConfigStore::new(MemFlash::new(), 0..2048);
        store.write_current_profile(3).unwrap();
        store.write_last_non_default_profile(3).unwrap();
        store.write_bottom_out_thresholds(&[10, 20, 30, 40]).unwrap();
        store.write_current_profile(0).unwrap();

        // Rebuild from the raw flash contents
        let flash = MemFlash { data: store.flash.data };
        let store: FlashConfigStore<MemFlash, 4> = FlashConfigStore::new(flash, 0..2048);
        assert_eq!(store.current_profile(), Some(0));
        assert_eq!(store.last_non_default_profile(), Some(3));
        assert_eq!(store.bottom_out_thresholds(), Some(&[10, 20, 30, 40][..]));
    }

    #[test]
    fn test_consolidation_keeps_latest_values() {
        let mut store: FlashConfigStore<MemFlash, 4> =
            FlashConfigStore::new(MemFlash::new(), 0..2048);
        // Fill the region well past its capacity
        for i in 0..200 {
            store.write_current_profile((i % 8) as u8).unwrap();
            store.write_bottom_out_thresholds(&[i, i, i, i]).unwrap();
        }
        assert_eq!(store.current_profile(), Some((199 % 8) as u8));
        assert_eq!(store.bottom_out_thresholds(), Some(&[199, 199, 199, 199][..]));

        let flash = MemFlash { data: store.flash.data };
        let store: FlashConfigStore<MemFlash, 4> = FlashConfigStore::new(flash, 0..2048);
        assert_eq!(store.current_profile(), Some((199 % 8) as u8));
        assert_eq!(store.bottom_out_thresholds(), Some(&[199, 199, 199, 199][..]));
    }

    #[test]
    fn test_empty_flash_has_no_values() {
        let store: FlashConfigStore<MemFlash, 4> = FlashConfigStore::new(MemFlash::new(), 0..2048);
        assert_eq!(store.current_profile(), None);
        assert_eq!(store.bottom_out_thresholds(), None);
    }

    #[test]
    fn test_dummy_store_accepts_all_writes() {
        let mut store = DummyConfigStore;
        assert!(store.write_current_profile(1).is_ok());
        assert!(store.write_last_non_default_profile(1).is_ok());
        assert!(store.write_bottom_out_thresholds(&[1, 2, 3]).is_ok());
    }
}
