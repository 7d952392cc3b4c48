//! Traits and data types for the two persistence collaborators.
//!
//! Two separate stores survive a reboot:
//!
//! - a **recovery store** holding the unsuccessful-boot counter and the last
//!   acquired address parameters (see [`crate::boot_guard`]); and
//! - a **configuration store** holding device-level settings keyed by
//!   [`ConfigKey`] (network credentials, the configured flag, the access
//!   point secret, the device number).
//!
//! The traits only describe the surface the policy code needs; the backing
//! medium (flash sectors, RAM for tests) is up to the implementation. One
//! lock of a store is one read-modify-write bracket: callers that share a
//! store across execution contexts must serialize access around whole
//! operations, and [`RecoveryStore::commit`] must make prior writes durable
//! before any restart is issued.

use core::fmt::Write as _;
use core::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Keys of the persisted device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigKey {
    /// Name of the network to join in client mode.
    WifiEssid,
    /// Password for the network to join in client mode.
    WifiPassword,
    /// `"True"` once the user has completed network setup, `"False"` or
    /// absent otherwise.
    WifiConfigured,
    /// Secret protecting the setup access point. Survives a network
    /// configuration reset so the device stays reachable the same way.
    ApSecret,
    /// User-assigned device number; feeds the hostname.
    DeviceNumber,
}

impl ConfigKey {
    /// Longest value accepted for this key, in bytes.
    #[must_use]
    pub const fn max_len(self) -> usize {
        match self {
            Self::WifiEssid => 32,
            Self::WifiPassword | Self::ApSecret => 64,
            Self::WifiConfigured => 5,
            Self::DeviceNumber => 8,
        }
    }
}

/// Validate a value against the key's capacity before storing it.
pub fn check_value_len(key: ConfigKey, value: &str) -> Result<()> {
    if value.len() > key.max_len() {
        return Err(Error::CapacityExceeded);
    }
    Ok(())
}

/// Address parameters remembered from the last successful client-mode
/// connection, exactly as stored.
///
/// The triple is persisted as strings and revalidated on every boot; it is
/// only usable for a static network configuration when all three fields
/// parse together (see [`Self::static_addressing`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CachedNetworkParams {
    /// Device address, dotted-quad.
    pub ip: heapless::String<16>,
    /// Gateway address, dotted-quad.
    pub gateway: heapless::String<16>,
    /// Subnet mask, dotted-quad.
    pub subnet_mask: heapless::String<16>,
}

/// A validated static addressing request for the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddressing {
    /// Device address.
    pub address: Ipv4Addr,
    /// Network prefix length derived from the stored subnet mask.
    pub prefix_len: u8,
    /// Gateway address.
    pub gateway: Ipv4Addr,
}

#[cfg(feature = "defmt")]
impl defmt::Format for StaticAddressing {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        let ip = self.address.octets();
        let gw = self.gateway.octets();
        defmt::write!(
            fmt,
            "{=u8}.{=u8}.{=u8}.{=u8}/{=u8} via {=u8}.{=u8}.{=u8}.{=u8}",
            ip[0],
            ip[1],
            ip[2],
            ip[3],
            self.prefix_len,
            gw[0],
            gw[1],
            gw[2],
            gw[3]
        );
    }
}

impl CachedNetworkParams {
    /// Capture freshly acquired addressing for persistence.
    pub fn from_addresses(ip: Ipv4Addr, gateway: Ipv4Addr, subnet_mask: Ipv4Addr) -> Result<Self> {
        let mut params = Self {
            ip: heapless::String::new(),
            gateway: heapless::String::new(),
            subnet_mask: heapless::String::new(),
        };
        write!(params.ip, "{ip}").map_err(|_| Error::CapacityExceeded)?;
        write!(params.gateway, "{gateway}").map_err(|_| Error::CapacityExceeded)?;
        write!(params.subnet_mask, "{subnet_mask}").map_err(|_| Error::CapacityExceeded)?;
        Ok(params)
    }

    /// Validate the stored triple into a static addressing request.
    ///
    /// All three fields must parse and the mask must be contiguous;
    /// otherwise the triple is unusable as a whole and the caller falls
    /// back to dynamic address acquisition.
    pub fn static_addressing(&self) -> Result<StaticAddressing> {
        let address: Ipv4Addr = self.ip.parse().map_err(|_| Error::StaticAddressInvalid)?;
        let gateway: Ipv4Addr = self
            .gateway
            .parse()
            .map_err(|_| Error::StaticAddressInvalid)?;
        let mask: Ipv4Addr = self
            .subnet_mask
            .parse()
            .map_err(|_| Error::StaticAddressInvalid)?;
        let prefix_len = mask_to_prefix_len(mask)?;
        Ok(StaticAddressing {
            address,
            prefix_len,
            gateway,
        })
    }
}

/// Convert a dotted-quad subnet mask to a prefix length.
///
/// Masks with non-contiguous set bits are rejected as
/// [`Error::StaticAddressInvalid`].
#[expect(
    clippy::cast_possible_truncation,
    reason = "leading_ones of a u32 is at most 32"
)]
pub fn mask_to_prefix_len(mask: Ipv4Addr) -> Result<u8> {
    let bits = u32::from(mask);
    if bits.count_ones() != bits.leading_ones() {
        return Err(Error::StaticAddressInvalid);
    }
    Ok(bits.leading_ones() as u8)
}

/// Convert a prefix length (0..=32) back to a subnet mask.
#[must_use]
#[expect(
    clippy::arithmetic_side_effects,
    reason = "the match arms keep the shift inside 1..=31"
)]
pub fn prefix_len_to_mask(prefix_len: u8) -> Ipv4Addr {
    let bits = match prefix_len {
        0 => 0,
        n if n >= 32 => u32::MAX,
        n => u32::MAX << (32 - n),
    };
    Ipv4Addr::from(bits)
}

/// Persistent storage for boot-recovery state and cached addressing.
///
/// Reads are answered from the implementation's loaded state and default to
/// "absent" (counter 0, no cached parameters). Writes become durable no
/// later than the next [`commit`](Self::commit); every code path that ends
/// in a restart commits first.
pub trait RecoveryStore {
    /// Number of consecutive boots that never reached a successful address
    /// acquisition. 0 when never written or cleared.
    fn boot_failures(&self) -> u32;

    /// Record the unsuccessful-boot counter.
    fn set_boot_failures(&mut self, count: u32) -> Result<()>;

    /// Address parameters from the last successful connection, if any.
    fn cached_params(&self) -> Option<CachedNetworkParams>;

    /// Remember freshly acquired address parameters.
    fn set_cached_params(&mut self, params: &CachedNetworkParams) -> Result<()>;

    /// Drop every value in the store.
    fn clear(&mut self) -> Result<()>;

    /// Make all prior writes durable. Must complete before any reboot the
    /// caller performs.
    fn commit(&mut self) -> Result<()>;
}

/// Persistent device configuration keyed by [`ConfigKey`].
pub trait ConfigStore {
    /// Load the configuration from the backing medium.
    ///
    /// Returns `Ok(false)` when the stored contents failed their integrity
    /// check and defaults were restored instead (the caller should persist
    /// the defaults); `Ok(true)` when the stored contents were used.
    fn load(&mut self) -> Result<bool>;

    /// Persist the current contents.
    fn save(&mut self) -> Result<()>;

    /// Erase the backing storage entirely (factory reset). The in-memory
    /// contents revert to defaults.
    fn format(&mut self) -> Result<()>;

    /// Value for `key`, or the empty string when absent.
    fn get(&self, key: ConfigKey) -> &str;

    /// Set `key` to `value`. Fails with [`Error::CapacityExceeded`] when
    /// the value does not fit the key's capacity.
    fn set(&mut self, key: ConfigKey, value: &str) -> Result<()>;

    /// Whether `key` has a (non-empty) value.
    fn is_set(&self, key: ConfigKey) -> bool {
        !self.get(key).is_empty()
    }

    /// The network-configured flag, decoded from its stored string form.
    fn configured(&self) -> bool {
        self.get(ConfigKey::WifiConfigured) == "True"
    }

    /// Store the network-configured flag in its string form.
    fn set_configured(&mut self, configured: bool) -> Result<()> {
        self.set(
            ConfigKey::WifiConfigured,
            if configured { "True" } else { "False" },
        )
    }
}
