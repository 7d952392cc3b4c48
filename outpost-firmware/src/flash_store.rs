//! Persistent recovery and configuration stores in internal flash.
//!
//! The top two erase sectors of the Pico W's 2 MiB flash each hold one
//! framed record: a magic word, a hash of the record's type name, the
//! payload length, the postcard payload, and a CRC32 over all of it.
//! A frame that fails any of those checks reads as absent, so both stores
//! fall back to defaults instead of refusing to boot (`memory.x` keeps the
//! program image out of the reserved sectors).
//!
//! ⚠️ **Warning**: The RP2040 stores firmware, vector tables, and user
//! data in the same flash device. Writes go exclusively through the two
//! reserved sectors here; nothing else in the kit touches flash.

use core::cell::RefCell;

use crc32fast::Hasher;
use defmt::{error, info, warn};
use embassy_rp::Peri;
use embassy_rp::flash::{Blocking, ERASE_SIZE, Flash as EmbassyFlash};
use embassy_rp::peripherals::FLASH;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::{Deserialize, Serialize};
use static_cell::StaticCell;

use outpost_core::store::{self, CachedNetworkParams, ConfigKey, ConfigStore, RecoveryStore};

use crate::{Error, Result};

// Internal flash size for the Raspberry Pi Pico W (2 MB).
const INTERNAL_FLASH_SIZE: usize = 2 * 1024 * 1024;

const MAGIC: u32 = 0x4F50_5354; // 'OPST'
const HEADER_SIZE: usize = 4 + 4 + 2; // Magic + TypeHash + PayloadLen
const CRC_SIZE: usize = 4;
const MAX_PAYLOAD_SIZE: usize = ERASE_SIZE - HEADER_SIZE - CRC_SIZE;

// Sector assignment, counted backwards from the end of flash.
const RECOVERY_SECTOR: u32 = 0;
const CONFIG_SECTOR: u32 = 1;

/// Boot-failure streak and the address parameters from the last
/// successful connection. Rewritten on every boot.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecoveryRecord {
    boot_failures: u32,
    cached_params: Option<CachedNetworkParams>,
}

/// Device configuration. Rewritten only when setup saves it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ConfigRecord {
    essid: heapless::String<64>,
    password: heapless::String<64>,
    configured: heapless::String<64>,
    ap_secret: heapless::String<64>,
    device_number: heapless::String<64>,
}

impl ConfigRecord {
    fn slot(&self, key: ConfigKey) -> &heapless::String<64> {
        match key {
            ConfigKey::WifiEssid => &self.essid,
            ConfigKey::WifiPassword => &self.password,
            ConfigKey::WifiConfigured => &self.configured,
            ConfigKey::ApSecret => &self.ap_secret,
            ConfigKey::DeviceNumber => &self.device_number,
        }
    }

    fn slot_mut(&mut self, key: ConfigKey) -> &mut heapless::String<64> {
        match key {
            ConfigKey::WifiEssid => &mut self.essid,
            ConfigKey::WifiPassword => &mut self.password,
            ConfigKey::WifiConfigured => &mut self.configured,
            ConfigKey::ApSecret => &mut self.ap_secret,
            ConfigKey::DeviceNumber => &mut self.device_number,
        }
    }
}

/// Shared flash manager that owns the hardware driver.
struct FlashManager {
    flash: Mutex<
        CriticalSectionRawMutex,
        RefCell<EmbassyFlash<'static, FLASH, Blocking, INTERNAL_FLASH_SIZE>>,
    >,
}

impl FlashManager {
    fn new(peripheral: Peri<'static, FLASH>) -> Self {
        Self {
            flash: Mutex::new(RefCell::new(EmbassyFlash::new_blocking(peripheral))),
        }
    }

    fn with_flash<R>(
        &self,
        f: impl FnOnce(&mut EmbassyFlash<'static, FLASH, Blocking, INTERNAL_FLASH_SIZE>) -> Result<R>,
    ) -> Result<R> {
        self.flash.lock(|flash| {
            let mut flash_ref = flash.borrow_mut();
            f(&mut *flash_ref)
        })
    }

    #[expect(
        clippy::arithmetic_side_effects,
        clippy::cast_possible_truncation,
        clippy::indexing_slicing,
        reason = "the serializer caps the payload below the sector size"
    )]
    fn save_frame<T>(&self, sector: u32, value: &T) -> Result<()>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        let mut payload_buffer = [0u8; MAX_PAYLOAD_SIZE];
        let payload_len = postcard::to_slice(value, &mut payload_buffer)
            .map_err(|_| {
                error!(
                    "Flash: Serialization failed or data too large (max {} bytes)",
                    MAX_PAYLOAD_SIZE
                );
                Error::FormatError
            })?
            .len();

        let mut buffer = [0xFFu8; ERASE_SIZE];
        buffer[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buffer[4..8].copy_from_slice(&type_hash::<T>().to_le_bytes());
        buffer[8..10].copy_from_slice(&(payload_len as u16).to_le_bytes());
        buffer[HEADER_SIZE..HEADER_SIZE + payload_len]
            .copy_from_slice(&payload_buffer[..payload_len]);

        let crc_offset = HEADER_SIZE + payload_len;
        let crc = compute_crc(&buffer[0..crc_offset]);
        buffer[crc_offset..crc_offset + CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        let offset = sector_offset(sector);
        self.with_flash(|flash| {
            flash
                .blocking_erase(offset, offset + ERASE_SIZE as u32)
                .map_err(Error::Flash)?;
            flash.blocking_write(offset, &buffer).map_err(Error::Flash)?;
            Ok(())
        })?;

        info!("Flash: Saved {} bytes to sector {}", payload_len, sector);
        Ok(())
    }

    #[expect(
        clippy::arithmetic_side_effects,
        clippy::indexing_slicing,
        reason = "the length check keeps every offset inside the sector buffer"
    )]
    fn load_frame<T>(&self, sector: u32) -> Result<Option<T>>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        let offset = sector_offset(sector);
        let mut buffer = [0u8; ERASE_SIZE];

        self.with_flash(|flash| {
            flash
                .blocking_read(offset, &mut buffer)
                .map_err(Error::Flash)?;
            Ok(())
        })?;

        if read_u32(&buffer[0..4]) != MAGIC {
            info!("Flash: No data at sector {}", sector);
            return Ok(None);
        }

        let stored_type_hash = read_u32(&buffer[4..8]);
        let expected_type_hash = type_hash::<T>();
        if stored_type_hash != expected_type_hash {
            info!(
                "Flash: Type mismatch at sector {} (expected hash {}, found {})",
                sector, expected_type_hash, stored_type_hash
            );
            return Ok(None);
        }

        let payload_len = usize::from(read_u16(&buffer[8..10]));
        if payload_len > MAX_PAYLOAD_SIZE {
            error!(
                "Flash: Invalid payload length {} at sector {}",
                payload_len, sector
            );
            return Err(outpost_core::Error::ConfigCorrupt.into());
        }

        let crc_offset = HEADER_SIZE + payload_len;
        let stored_crc = read_u32(&buffer[crc_offset..crc_offset + CRC_SIZE]);
        let computed_crc = compute_crc(&buffer[0..crc_offset]);
        if stored_crc != computed_crc {
            error!(
                "Flash: CRC mismatch at sector {} (expected {}, found {})",
                sector, computed_crc, stored_crc
            );
            return Err(outpost_core::Error::ConfigCorrupt.into());
        }

        let payload = &buffer[HEADER_SIZE..HEADER_SIZE + payload_len];
        let value: T = postcard::from_bytes(payload).map_err(|_| {
            error!("Flash: Deserialization failed at sector {}", sector);
            Error::from(outpost_core::Error::ConfigCorrupt)
        })?;

        info!("Flash: Loaded data from sector {}", sector);
        Ok(Some(value))
    }

    #[expect(
        clippy::arithmetic_side_effects,
        clippy::cast_possible_truncation,
        reason = "sector offsets sit inside the 2 MiB device"
    )]
    fn erase_sector(&self, sector: u32) -> Result<()> {
        let offset = sector_offset(sector);
        self.with_flash(|flash| {
            flash
                .blocking_erase(offset, offset + ERASE_SIZE as u32)
                .map_err(Error::Flash)?;
            Ok(())
        })?;
        info!("Flash: Cleared sector {}", sector);
        Ok(())
    }
}

/// Static type for constructing the flash-backed stores.
pub struct FlashStoresStatic {
    manager_cell: StaticCell<FlashManager>,
}

/// The pair of flash-backed stores behind one shared driver.
///
/// # Examples
///
/// ```no_run
/// # #![no_std]
/// # #![no_main]
/// # use panic_probe as _;
/// use outpost_core::store::ConfigStore;
/// use outpost_firmware::flash_store::{FlashStores, FlashStoresStatic};
/// use outpost_firmware::reset;
///
/// fn example(p: embassy_rp::Peripherals) -> outpost_firmware::Result<()> {
///     static FLASH_STATIC: FlashStoresStatic = FlashStores::new_static();
///     let (mut recovery, mut config) = FlashStores::new(&FLASH_STATIC, p.FLASH)?;
///     config.load()?;
///     let action =
///         outpost_core::boot_guard::evaluate(reset::reset_cause(), &mut recovery, &mut config)?;
///     reset::apply_recovery(action);
///     Ok(())
/// }
/// ```
pub struct FlashStores;

impl FlashStores {
    /// Get static resources for constructing the stores.
    #[must_use]
    pub const fn new_static() -> FlashStoresStatic {
        FlashStoresStatic {
            manager_cell: StaticCell::new(),
        }
    }

    /// Open both stores. The recovery record is read immediately; the
    /// configuration store starts from defaults until [`ConfigStore::load`]
    /// is called. The `FLASH` peripheral is a singleton, so this can only
    /// run once.
    pub fn new(
        flash_static: &'static FlashStoresStatic,
        peripheral: Peri<'static, FLASH>,
    ) -> Result<(RecoveryFlashStore, ConfigFlashStore)> {
        let manager_mut = flash_static.manager_cell.init(FlashManager::new(peripheral));
        let manager: &'static FlashManager = manager_mut;
        let recovery = RecoveryFlashStore::open(manager)?;
        let config = ConfigFlashStore {
            manager,
            record: ConfigRecord::default(),
        };
        Ok((recovery, config))
    }
}

/// Flash-backed implementation of [`RecoveryStore`].
///
/// Mutations only touch the in-memory record; `commit` rewrites the
/// sector. Callers restart the device only after a successful commit.
pub struct RecoveryFlashStore {
    manager: &'static FlashManager,
    record: RecoveryRecord,
}

impl RecoveryFlashStore {
    fn open(manager: &'static FlashManager) -> Result<Self> {
        let record = match manager.load_frame::<RecoveryRecord>(RECOVERY_SECTOR) {
            Ok(Some(record)) => record,
            Ok(None) => RecoveryRecord::default(),
            Err(Error::Core(_)) => {
                warn!("recovery storage is corrupt, starting from a clean record");
                RecoveryRecord::default()
            }
            Err(err) => return Err(err),
        };
        Ok(Self { manager, record })
    }
}

impl RecoveryStore for RecoveryFlashStore {
    fn boot_failures(&self) -> u32 {
        self.record.boot_failures
    }

    fn set_boot_failures(&mut self, count: u32) -> outpost_core::Result<()> {
        self.record.boot_failures = count;
        Ok(())
    }

    fn cached_params(&self) -> Option<CachedNetworkParams> {
        self.record.cached_params.clone()
    }

    fn set_cached_params(&mut self, params: &CachedNetworkParams) -> outpost_core::Result<()> {
        self.record.cached_params = Some(params.clone());
        Ok(())
    }

    fn clear(&mut self) -> outpost_core::Result<()> {
        self.record = RecoveryRecord::default();
        self.manager
            .erase_sector(RECOVERY_SECTOR)
            .map_err(|_| outpost_core::Error::Storage)
    }

    fn commit(&mut self) -> outpost_core::Result<()> {
        self.manager
            .save_frame(RECOVERY_SECTOR, &self.record)
            .map_err(|_| outpost_core::Error::Storage)
    }
}

/// Flash-backed implementation of [`ConfigStore`].
pub struct ConfigFlashStore {
    manager: &'static FlashManager,
    record: ConfigRecord,
}

impl ConfigStore for ConfigFlashStore {
    fn load(&mut self) -> outpost_core::Result<bool> {
        match self.manager.load_frame::<ConfigRecord>(CONFIG_SECTOR) {
            Ok(Some(record)) => {
                self.record = record;
                Ok(true)
            }
            Ok(None) => {
                self.record = ConfigRecord::default();
                Ok(false)
            }
            Err(_) => {
                // Fail closed: a device with unreadable configuration runs
                // setup again instead of refusing to boot.
                warn!("configuration storage is corrupt, using defaults");
                self.record = ConfigRecord::default();
                Ok(false)
            }
        }
    }

    fn save(&mut self) -> outpost_core::Result<()> {
        self.manager
            .save_frame(CONFIG_SECTOR, &self.record)
            .map_err(|_| outpost_core::Error::Storage)
    }

    fn format(&mut self) -> outpost_core::Result<()> {
        self.record = ConfigRecord::default();
        self.manager
            .erase_sector(CONFIG_SECTOR)
            .map_err(|_| outpost_core::Error::StorageFormatFailure)
    }

    fn get(&self, key: ConfigKey) -> &str {
        self.record.slot(key)
    }

    fn set(&mut self, key: ConfigKey, value: &str) -> outpost_core::Result<()> {
        store::check_value_len(key, value)?;
        let slot = self.record.slot_mut(key);
        slot.clear();
        slot.push_str(value)
            .map_err(|()| outpost_core::Error::CapacityExceeded)?;
        Ok(())
    }
}

/// Sectors are allocated from the end of flash backwards.
#[expect(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    reason = "two reserved sectors at the top of a 2 MiB device"
)]
fn sector_offset(sector: u32) -> u32 {
    let capacity = INTERNAL_FLASH_SIZE as u32;
    capacity - (sector + 1) * ERASE_SIZE as u32
}

#[expect(clippy::indexing_slicing, reason = "callers pass at least the word width")]
fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

#[expect(clippy::indexing_slicing, reason = "callers pass at least the word width")]
fn read_u16(bytes: &[u8]) -> u16 {
    let mut half = [0u8; 2];
    half.copy_from_slice(&bytes[..2]);
    u16::from_le_bytes(half)
}

/// Compute FNV-1a hash of the type name for type safety.
fn type_hash<T>() -> u32 {
    const FNV_PRIME: u32 = 16_777_619;
    const FNV_OFFSET: u32 = 2_166_136_261;

    let type_name = core::any::type_name::<T>();
    let mut hash = FNV_OFFSET;

    for byte in type_name.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    hash
}

/// Compute CRC32 checksum.
fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
