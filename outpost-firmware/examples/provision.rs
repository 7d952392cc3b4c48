//! Boot-guarded network bring-up for the Pico W.
//!
//! This example demonstrates the full power-on sequence:
//! - Classify the reset cause and evaluate the boot-failure record
//! - Carry out any recovery action before the radio is touched
//! - Bring the network up in whichever mode the stored configuration selects
//! - React to network events and keep the client joined indefinitely
//!
//! An unconfigured device (or one that has been power-cycled past the
//! escalation threshold) comes up as the `Outpost-<mac>` setup access
//! point with the captive DNS and DHCP responders running.

#![no_std]
#![no_main]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use panic_probe as _;

use outpost_core::boot_guard;
use outpost_core::bootstrap::{ApSecretPolicy, ConfigUiPolicy, NetEvent};
use outpost_core::store::ConfigStore;
use outpost_firmware::flash_store::{FlashStores, FlashStoresStatic};
use outpost_firmware::wifi::{NetBootstrap, NetBootstrapStatic};
use outpost_firmware::{Result, reset};

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    panic!("Example failed: {:?}", err);
}

async fn inner_main(spawner: Spawner) -> Result<()> {
    info!("Outpost boot");

    let cause = reset::reset_cause();
    let p = embassy_rp::init(Default::default());

    // Judge this boot before the network comes up. A recovery decided
    // here reboots without ever touching the radio.
    static FLASH_STATIC: FlashStoresStatic = FlashStores::new_static();
    let (mut recovery, mut config) = FlashStores::new(&FLASH_STATIC, p.FLASH)?;
    config.load()?;
    let action = boot_guard::evaluate(cause, &mut recovery, &mut config)?;
    reset::apply_recovery(action);

    static NET_STATIC: NetBootstrapStatic = NetBootstrap::new_static();
    let net = NetBootstrap::begin(
        &NET_STATIC,
        p.PIN_23,  // CYW43 power
        p.PIN_25,  // CYW43 chip select
        p.PIO0,    // CYW43 PIO interface
        p.PIN_24,  // CYW43 clock
        p.PIN_29,  // CYW43 data pin
        p.DMA_CH0, // CYW43 DMA channel
        recovery,
        &mut config,
        None, // no fixed access point secret
        ApSecretPolicy::Secured,
        ConfigUiPolicy::default(),
        spawner,
    )?;

    loop {
        let event = net.wait().await;
        info!("Network event: {}", event);
        match event {
            NetEvent::ApReady | NetEvent::AddressAcquired(_) => net.log_system_info(),
            NetEvent::Disconnected => {}
        }
    }
}
