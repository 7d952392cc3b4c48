//! Network bootstrap policy: mode selection, access point identity, and
//! what to persist once an address is acquired.
//!
//! Everything in this module is pure decision-making over the stores. The
//! firmware crate turns the resulting [`BootstrapPlan`] into radio and
//! network-stack calls and reports progress back as [`NetEvent`]s.

#[cfg(feature = "defmt")]
use defmt::{info, warn};

// Stub macros when defmt is not available
#[cfg(not(feature = "defmt"))]
macro_rules! info {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "defmt"))]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}

use core::fmt::Write as _;
use core::net::Ipv4Addr;

use rand_core::RngCore;

use crate::secret;
use crate::store::{
    CachedNetworkParams, ConfigKey, ConfigStore, RecoveryStore, StaticAddressing,
};
use crate::{Error, Result};

/// Prefix for hostnames derived from a configured device number.
pub const HOSTNAME_PREFIX: &str = "outpost-";

/// Hostname used while no device number is configured.
pub const UNCONFIGURED_HOSTNAME: &str = "outpost-unconfigured";

/// Prefix of the setup access point SSID; the MAC address completes it.
pub const AP_SSID_PREFIX: &str = "Outpost-";

/// How the device participates in the network, decided once per boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationMode {
    /// No decision has been made yet.
    #[default]
    Unconfigured,
    /// Serving the setup access point.
    AccessPoint,
    /// Joined (or joining) the configured network.
    Client,
}

impl OperationMode {
    /// The single authoritative mode branch: a configured device is a
    /// client, anything else serves the setup access point.
    #[must_use]
    pub const fn from_configured(configured: bool) -> Self {
        if configured {
            Self::Client
        } else {
            Self::AccessPoint
        }
    }
}

/// Point-in-time snapshot of the network-related configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkConfig {
    /// Network name to join in client mode.
    pub essid: heapless::String<32>,
    /// Passphrase for the client-mode network.
    pub password: heapless::String<64>,
    /// Whether the device has been through setup.
    pub configured: bool,
    /// Hostname announced to the network.
    pub hostname: heapless::String<32>,
}

impl NetworkConfig {
    /// Snapshot the current configuration values.
    pub fn from_store<C: ConfigStore>(config: &C) -> Result<Self> {
        let mut essid = heapless::String::new();
        essid
            .push_str(config.get(ConfigKey::WifiEssid))
            .map_err(|()| Error::CapacityExceeded)?;
        let mut password = heapless::String::new();
        password
            .push_str(config.get(ConfigKey::WifiPassword))
            .map_err(|()| Error::CapacityExceeded)?;
        Ok(Self {
            essid,
            password,
            configured: config.configured(),
            hostname: hostname_for(config.get(ConfigKey::DeviceNumber))?,
        })
    }

    /// The mode this configuration selects.
    #[must_use]
    pub const fn mode(&self) -> OperationMode {
        OperationMode::from_configured(self.configured)
    }
}

/// Derive the announced hostname from the configured device number.
pub fn hostname_for(device_number: &str) -> Result<heapless::String<32>> {
    let mut hostname = heapless::String::new();
    if device_number.is_empty() {
        hostname
            .push_str(UNCONFIGURED_HOSTNAME)
            .map_err(|()| Error::CapacityExceeded)?;
    } else {
        write!(hostname, "{HOSTNAME_PREFIX}{device_number}")
            .map_err(|_| Error::CapacityExceeded)?;
    }
    Ok(hostname)
}

/// A hardware MAC address as read from the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Lowercase hex rendering with `delimiter` between bytes.
    ///
    /// An empty delimiter yields the compact form used in the access point
    /// SSID; `":"` yields the conventional diagnostic form.
    pub fn format(self, delimiter: &str) -> Result<heapless::String<17>> {
        let mut out = heapless::String::new();
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                out.push_str(delimiter).map_err(|()| Error::CapacityExceeded)?;
            }
            write!(out, "{byte:02x}").map_err(|_| Error::CapacityExceeded)?;
        }
        Ok(out)
    }
}

impl core::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let Self([a, b, c, d, e, g]) = *self;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Identity advertised by the setup access point.
///
/// The SSID is a pure function of the MAC address, so the same device
/// always reappears under the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ApIdentity {
    /// SSID of the setup network.
    pub ssid: heapless::String<32>,
}

impl ApIdentity {
    /// Derive the SSID from the hardware MAC address.
    pub fn from_mac(mac: MacAddress) -> Result<Self> {
        let mut ssid = heapless::String::new();
        ssid.push_str(AP_SSID_PREFIX)
            .map_err(|()| Error::CapacityExceeded)?;
        ssid.push_str(&mac.format("")?)
            .map_err(|()| Error::CapacityExceeded)?;
        Ok(Self { ssid })
    }
}

/// Whether the setup access point requires a passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApSecretPolicy {
    /// Open setup network.
    #[default]
    Open,
    /// WPA2 setup network using the persisted access point secret.
    Secured,
}

impl ApSecretPolicy {
    /// A usable fixed secret implies the caller wants it enforced.
    #[must_use]
    pub fn with_override(self, fixed: Option<&str>) -> Self {
        match fixed {
            Some(candidate) if secret::accept_supplied(candidate).is_ok() => Self::Secured,
            _ => self,
        }
    }

    /// Resolve the policy against the persisted secret.
    pub fn resolve(self, ap_secret: &str) -> Result<ApAccess> {
        match self {
            Self::Open => Ok(ApAccess::Open),
            Self::Secured => {
                let mut passphrase = heapless::String::new();
                passphrase
                    .push_str(ap_secret)
                    .map_err(|()| Error::CapacityExceeded)?;
                Ok(ApAccess::Secured(passphrase))
            }
        }
    }
}

/// Resolved access control for the setup access point.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApAccess {
    /// No passphrase.
    Open,
    /// WPA2 with this passphrase.
    Secured(heapless::String<64>),
}

/// When the setup services (captive DNS and DHCP) should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigUiPolicy {
    /// Serve in every mode.
    #[default]
    Always,
    /// Serve only while in setup access point mode.
    SetupOnly,
    /// Never serve.
    Never,
}

impl ConfigUiPolicy {
    /// Whether the setup services run in the given mode.
    #[must_use]
    pub const fn enabled_for(self, mode: OperationMode) -> bool {
        match self {
            Self::Always => true,
            Self::SetupOnly => matches!(mode, OperationMode::AccessPoint),
            Self::Never => false,
        }
    }
}

/// Make sure a usable access point secret is stored, and return it.
///
/// A sufficiently long `fixed` secret is adopted and persisted. Otherwise
/// an already stored secret is reused as-is. Only when neither exists is a
/// fresh secret generated and persisted. This runs regardless of the
/// secret policy, so the stored secret is always available for display and
/// survives a later switch to [`ApSecretPolicy::Secured`].
pub fn ensure_ap_secret<C, R>(
    config: &mut C,
    rng: &mut R,
    fixed: Option<&str>,
) -> Result<heapless::String<64>>
where
    C: ConfigStore,
    R: RngCore,
{
    let supplied = match fixed {
        Some(candidate) if !candidate.is_empty() => match secret::accept_supplied(candidate) {
            Ok(valid) => Some(valid),
            Err(_) => {
                warn!("supplied access point secret is too short, refusing it");
                None
            }
        },
        _ => None,
    };

    if supplied.is_none() && config.is_set(ConfigKey::ApSecret) {
        let mut stored = heapless::String::new();
        stored
            .push_str(config.get(ConfigKey::ApSecret))
            .map_err(|()| Error::CapacityExceeded)?;
        return Ok(stored);
    }

    let chosen = match supplied {
        Some(valid) => {
            let mut adopted = heapless::String::new();
            adopted.push_str(valid).map_err(|()| Error::CapacityExceeded)?;
            adopted
        }
        None => secret::generate(rng, secret::DEFAULT_AP_SECRET_LEN),
    };
    config.set(ConfigKey::ApSecret, &chosen)?;
    config.save()?;
    Ok(chosen)
}

/// How a client should obtain its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientAddressing {
    /// Acquire an address dynamically.
    Dhcp,
    /// Reuse the validated parameters from the last connection.
    Static(StaticAddressing),
}

/// Which stack signal tells a joined client that the connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LossWatch {
    /// Wait for the DHCP lease to be torn down.
    ConfigDown,
    /// Wait for the link itself to drop.
    LinkDown,
}

impl ClientAddressing {
    /// The loss signal that matches this addressing mode.
    ///
    /// A DHCP config is deconfigured when the link drops, so its teardown
    /// doubles as a disconnect signal. A static config never changes after
    /// it is applied, so a client using one must watch the link instead.
    #[must_use]
    pub const fn loss_watch(self) -> LossWatch {
        match self {
            Self::Dhcp => LossWatch::ConfigDown,
            Self::Static(_) => LossWatch::LinkDown,
        }
    }
}

/// Choose static addressing only when a complete, well-formed parameter
/// triple is cached; anything else falls back to DHCP.
#[must_use]
pub fn plan_client_addressing(cached: Option<&CachedNetworkParams>) -> ClientAddressing {
    match cached {
        None => ClientAddressing::Dhcp,
        Some(params) => match params.static_addressing() {
            Ok(addressing) => ClientAddressing::Static(addressing),
            Err(_) => {
                warn!("cached static address parameters are invalid, using DHCP");
                ClientAddressing::Dhcp
            }
        },
    }
}

/// Everything the firmware needs to bring the network up.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootstrapPlan {
    /// Join the configured network.
    Client {
        /// Address acquisition strategy.
        addressing: ClientAddressing,
    },
    /// Serve the setup access point.
    AccessPoint {
        /// Open or WPA2.
        access: ApAccess,
        /// Whether to run the captive DNS and DHCP services.
        serve_portal: bool,
    },
}

/// Turn the configuration snapshot into a bootstrap plan.
#[must_use]
pub fn plan(
    network: &NetworkConfig,
    cached: Option<&CachedNetworkParams>,
    access: ApAccess,
    ui_policy: ConfigUiPolicy,
) -> BootstrapPlan {
    match network.mode() {
        OperationMode::Client => BootstrapPlan::Client {
            addressing: plan_client_addressing(cached),
        },
        _ => BootstrapPlan::AccessPoint {
            serve_portal: ui_policy.enabled_for(OperationMode::AccessPoint),
            access,
        },
    }
}

/// Progress reported by the firmware's network task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    /// The setup access point is up and serving.
    ApReady,
    /// The client joined and holds a usable address.
    AddressAcquired(Ipv4Addr),
    /// The client link dropped; rejoining is already underway.
    Disconnected,
}

#[cfg(feature = "defmt")]
impl defmt::Format for NetEvent {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        match self {
            Self::ApReady => defmt::write!(fmt, "ApReady"),
            Self::AddressAcquired(address) => {
                let ip = address.octets();
                defmt::write!(
                    fmt,
                    "AddressAcquired({=u8}.{=u8}.{=u8}.{=u8})",
                    ip[0],
                    ip[1],
                    ip[2],
                    ip[3]
                );
            }
            Self::Disconnected => defmt::write!(fmt, "Disconnected"),
        }
    }
}

/// Record a successful address acquisition.
///
/// Persists the acquired triple for future static configuration and
/// zeroes the boot failure counter, then commits. This is the only place
/// the counter returns to zero outside of an escalation, so reaching it
/// is what ends an unsuccessful-boot streak.
pub fn on_address_acquired<P: RecoveryStore>(
    recovery: &mut P,
    ip: Ipv4Addr,
    gateway: Ipv4Addr,
    subnet_mask: Ipv4Addr,
) -> Result<()> {
    let params = CachedNetworkParams::from_addresses(ip, gateway, subnet_mask)?;
    recovery.set_cached_params(&params)?;
    recovery.set_boot_failures(0)?;
    recovery.commit()?;
    info!("network address acquired, boot failure counter cleared");
    Ok(())
}
