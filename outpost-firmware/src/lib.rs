//! Pico W firmware layer for the Outpost boot and network controller.
#![no_std]
#![no_main]

pub mod dhcp_server;
pub mod dns_server;
mod error;
pub mod flash_store;
pub mod reset;
pub mod wifi;

// Re-export commonly used items
pub use error::{Error, Result};
pub use flash_store::{ConfigFlashStore, FlashStores, FlashStoresStatic, RecoveryFlashStore};
pub use wifi::{NetBootstrap, NetBootstrapStatic, NetEvents};
