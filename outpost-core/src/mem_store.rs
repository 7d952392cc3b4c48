//! RAM-backed store implementations.
//!
//! These back the host test suite and are handy during bring-up on hardware
//! whose flash layout is not provisioned yet. Nothing survives a power
//! cycle; durability calls are counted so tests can check ordering, and the
//! config store can be told to misbehave (corrupt load, failing erase) to
//! exercise the recovery paths.

use crate::store::{check_value_len, CachedNetworkParams, ConfigKey, ConfigStore, RecoveryStore};
use crate::{Error, Result};

/// In-memory [`RecoveryStore`].
#[derive(Debug, Default)]
pub struct MemRecoveryStore {
    boot_failures: u32,
    cached: Option<CachedNetworkParams>,
    commits: usize,
}

impl MemRecoveryStore {
    /// Empty store: counter 0, no cached parameters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            boot_failures: 0,
            cached: None,
            commits: 0,
        }
    }

    /// Store with a preexisting counter value, as if left by earlier boots.
    #[must_use]
    pub const fn with_boot_failures(count: u32) -> Self {
        Self {
            boot_failures: count,
            cached: None,
            commits: 0,
        }
    }

    /// Number of [`RecoveryStore::commit`] calls so far.
    #[must_use]
    pub const fn commits(&self) -> usize {
        self.commits
    }
}

impl RecoveryStore for MemRecoveryStore {
    fn boot_failures(&self) -> u32 {
        self.boot_failures
    }

    fn set_boot_failures(&mut self, count: u32) -> Result<()> {
        self.boot_failures = count;
        Ok(())
    }

    fn cached_params(&self) -> Option<CachedNetworkParams> {
        self.cached.clone()
    }

    fn set_cached_params(&mut self, params: &CachedNetworkParams) -> Result<()> {
        self.cached = Some(params.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.boot_failures = 0;
        self.cached = None;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.commits = self.commits.saturating_add(1);
        Ok(())
    }
}

/// In-memory [`ConfigStore`] with fault injection.
#[derive(Debug, Default)]
pub struct MemConfigStore {
    essid: heapless::String<64>,
    password: heapless::String<64>,
    configured: heapless::String<64>,
    ap_secret: heapless::String<64>,
    device_number: heapless::String<64>,
    corrupt_next_load: bool,
    fail_format: bool,
    saves: usize,
    formats: usize,
}

impl MemConfigStore {
    /// Empty (factory-fresh) configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`ConfigStore::load`] behave as if the stored contents
    /// were corrupt: contents reset to defaults, `load` returns `Ok(false)`.
    pub fn corrupt_next_load(&mut self) {
        self.corrupt_next_load = true;
    }

    /// Make [`ConfigStore::format`] fail with
    /// [`Error::StorageFormatFailure`].
    pub fn fail_format(&mut self) {
        self.fail_format = true;
    }

    /// Number of [`ConfigStore::save`] calls so far.
    #[must_use]
    pub const fn saves(&self) -> usize {
        self.saves
    }

    /// Number of successful [`ConfigStore::format`] calls so far.
    #[must_use]
    pub const fn formats(&self) -> usize {
        self.formats
    }

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

    fn reset_to_defaults(&mut self) {
        self.essid.clear();
        self.password.clear();
        self.configured.clear();
        self.ap_secret.clear();
        self.device_number.clear();
    }
}

impl ConfigStore for MemConfigStore {
    fn load(&mut self) -> Result<bool> {
        if self.corrupt_next_load {
            self.corrupt_next_load = false;
            self.reset_to_defaults();
            return Ok(false);
        }
        Ok(true)
    }

    fn save(&mut self) -> Result<()> {
        self.saves = self.saves.saturating_add(1);
        Ok(())
    }

    fn format(&mut self) -> Result<()> {
        if self.fail_format {
            return Err(Error::StorageFormatFailure);
        }
        self.reset_to_defaults();
        self.formats = self.formats.saturating_add(1);
        Ok(())
    }

    fn get(&self, key: ConfigKey) -> &str {
        self.slot(key)
    }

    fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        check_value_len(key, value)?;
        let slot = self.slot_mut(key);
        slot.clear();
        slot.push_str(value).map_err(|()| Error::CapacityExceeded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_defaults_to_empty() {
        let store = MemConfigStore::new();
        assert_eq!(store.get(ConfigKey::WifiEssid), "");
        assert!(!store.is_set(ConfigKey::WifiEssid));
        assert!(!store.configured());
    }

    #[test]
    fn set_then_get() {
        let mut store = MemConfigStore::new();
        store.set(ConfigKey::WifiEssid, "shed").expect("set");
        assert_eq!(store.get(ConfigKey::WifiEssid), "shed");
        assert!(store.is_set(ConfigKey::WifiEssid));
    }

    #[test]
    fn configured_flag_round_trips_as_string() {
        let mut store = MemConfigStore::new();
        store.set_configured(true).expect("set configured");
        assert_eq!(store.get(ConfigKey::WifiConfigured), "True");
        assert!(store.configured());
        store.set_configured(false).expect("set configured");
        assert_eq!(store.get(ConfigKey::WifiConfigured), "False");
        assert!(!store.configured());
    }

    #[test]
    fn corrupt_load_restores_defaults() {
        let mut store = MemConfigStore::new();
        store.set(ConfigKey::WifiEssid, "shed").expect("set");
        store.set_configured(true).expect("set configured");
        store.corrupt_next_load();
        assert!(!store.load().expect("load"));
        assert_eq!(store.get(ConfigKey::WifiEssid), "");
        assert!(!store.configured());
        // subsequent loads succeed again
        assert!(store.load().expect("load"));
    }

    #[test]
    fn oversized_value_rejected() {
        let mut store = MemConfigStore::new();
        let long = "a-network-name-well-past-the-32-byte-essid-limit";
        assert!(matches!(
            store.set(ConfigKey::WifiEssid, long),
            Err(Error::CapacityExceeded)
        ));
    }
}
