//! Boot resilience and network bootstrap policy for devices that get
//! power-cycled instead of shut down.
//!
//! Everything here is board-agnostic and host-testable; the
//! `outpost-firmware` crate binds it to the Pico W's flash and radio.
#![no_std]

pub mod boot_guard;
pub mod bootstrap;
mod error;
pub mod mem_store;
pub mod secret;
pub mod store;
#[cfg(test)]
mod testutil;

// Re-export commonly used items
pub use boot_guard::{RecoveryAction, ResetCause};
pub use bootstrap::{
    ApAccess, ApIdentity, ApSecretPolicy, BootstrapPlan, ClientAddressing, ConfigUiPolicy,
    LossWatch, MacAddress, NetEvent, NetworkConfig, OperationMode,
};
pub use error::{Error, Result};
pub use store::{CachedNetworkParams, ConfigKey, ConfigStore, RecoveryStore, StaticAddressing};
