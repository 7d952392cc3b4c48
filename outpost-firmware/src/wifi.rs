//! Network bootstrap for the Pico W's CYW43 radio.
//!
//! [`NetBootstrap::begin`] snapshots the persisted configuration, decides
//! the operation mode, and hands the radio to a background task. A
//! configured device joins the stored network as a client, announces its
//! hostname over DHCP (or reapplies the cached static parameters), and
//! persists every acquired address for the next boot. An unconfigured
//! device serves the setup access point together with the captive DNS
//! and DHCP responders.
//!
//! # Examples
//!
//! ```ignore
//! # #![no_std]
//! # #![no_main]
//! # use panic_probe as _;
//! use outpost_core::bootstrap::{ApSecretPolicy, ConfigUiPolicy, NetEvent};
//! use outpost_core::store::ConfigStore;
//! use outpost_firmware::flash_store::{FlashStores, FlashStoresStatic};
//! use outpost_firmware::wifi::{NetBootstrap, NetBootstrapStatic};
//!
//! async fn example(spawner: embassy_executor::Spawner) -> outpost_firmware::Result<()> {
//!     let p = embassy_rp::init(Default::default());
//!
//!     static NET_STATIC: NetBootstrapStatic = NetBootstrap::new_static();
//!     static FLASH_STATIC: FlashStoresStatic = FlashStores::new_static();
//!     let (recovery, mut config) = FlashStores::new(&FLASH_STATIC, p.FLASH)?;
//!     config.load()?;
//!
//!     let net = NetBootstrap::begin(
//!         &NET_STATIC,
//!         p.PIN_23,
//!         p.PIN_25,
//!         p.PIO0,
//!         p.PIN_24,
//!         p.PIN_29,
//!         p.DMA_CH0,
//!         recovery,
//!         &mut config,
//!         None,
//!         ApSecretPolicy::Secured,
//!         ConfigUiPolicy::default(),
//!         spawner,
//!     )?;
//!
//!     match net.wait().await {
//!         NetEvent::ApReady => { /* serve the setup UI on 192.168.4.1 */ }
//!         NetEvent::AddressAcquired(_) => { /* start normal service */ }
//!         NetEvent::Disconnected => {}
//!     }
//!     let stack = net.stack().await;
//!     // ... open sockets on `stack` ...
//!     Ok(())
//! }
//! ```
#![allow(clippy::future_not_send, reason = "single-threaded")]
#![allow(
    unsafe_code,
    reason = "StackStorage hands a non-Send stack reference between tasks on the one executor"
)]

use core::cell::{RefCell, UnsafeCell};
use core::sync::atomic::{AtomicBool, Ordering};

use cyw43::JoinOptions;
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use defmt::{error, info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_net::{Config, DhcpConfig, Ipv4Address, Ipv4Cidr, Stack, StackResources, StaticConfigV4};
use embassy_rp::clocks::RoscRng;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::{Peri, bind_interrupts};
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use rand_core::RngCore;
use static_cell::StaticCell;

use outpost_core::bootstrap::{
    self, ApAccess, ApIdentity, ApSecretPolicy, BootstrapPlan, ClientAddressing, ConfigUiPolicy,
    LossWatch, MacAddress, NetEvent, NetworkConfig, OperationMode,
};
use outpost_core::store::{ConfigStore, RecoveryStore, prefix_len_to_mask};

use crate::Result;
use crate::dhcp_server::dhcp_lease_task;
use crate::dns_server::dns_catchall_task;
use crate::flash_store::RecoveryFlashStore;

/// Address the device claims while serving the setup access point.
pub const AP_ADDRESS: Ipv4Address = Ipv4Address::new(192, 168, 4, 1);
const AP_PREFIX_LEN: u8 = 24;
const AP_NETMASK: Ipv4Address = Ipv4Address::new(255, 255, 255, 0);
const AP_POOL_START: Ipv4Address = Ipv4Address::new(192, 168, 4, 10);
const AP_POOL_SIZE: u8 = 8;
const AP_CHANNEL: u8 = 1;

/// Signal type for network bootstrap events.
pub type NetEvents = Signal<CriticalSectionRawMutex, NetEvent>;

/// Single-threaded once-storage for the network stack reference.
///
/// `embassy_net::Stack` is not `Send`, so the usual sync primitives
/// cannot carry it out of the bootstrap task.
struct StackStorage {
    initialized: AtomicBool,
    ready: Signal<CriticalSectionRawMutex, ()>,
    value: UnsafeCell<Option<&'static Stack<'static>>>,
}

// SAFETY: single-core target, every access runs on the one executor
unsafe impl Sync for StackStorage {}

impl StackStorage {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            ready: Signal::new(),
            value: UnsafeCell::new(None),
        }
    }

    /// Publish the stack reference. The first call wins; rejoin
    /// iterations pass the same reference and leave the cell alone.
    fn init(&self, stack: &'static Stack<'static>) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        // SAFETY: one writer task, and the guard above keeps the cell
        // from being written after `initialized` flips
        unsafe {
            *self.value.get() = Some(stack);
        }
        self.initialized.store(true, Ordering::Release);
        self.ready.signal(());
    }

    /// Wait for the stack to be stored and return it.
    async fn get(&self) -> &'static Stack<'static> {
        if !self.initialized.load(Ordering::Acquire) {
            self.ready.wait().await;
        }
        // SAFETY: `initialized` is set only after the value is written
        unsafe { unwrap!(*self.value.get()) }
    }
}

/// Hardware identity captured once the radio is up.
#[derive(Clone)]
struct DeviceIdentity {
    mac: MacAddress,
    ap_ssid: heapless::String<32>,
}

type SharedRecovery = Mutex<CriticalSectionRawMutex, RefCell<Option<RecoveryFlashStore>>>;
type SharedIdentity = Mutex<CriticalSectionRawMutex, RefCell<Option<DeviceIdentity>>>;

/// Resources needed by the network bootstrap.
pub struct NetBootstrapStatic {
    events: NetEvents,
    stack: StackStorage,
    recovery: SharedRecovery,
    identity: SharedIdentity,
    bootstrap_cell: StaticCell<NetBootstrap>,
}

/// Handle to the running network bootstrap.
///
/// See the [module-level documentation](crate::wifi) for usage.
pub struct NetBootstrap {
    events: &'static NetEvents,
    stack: &'static StackStorage,
    identity: &'static SharedIdentity,
    mode: OperationMode,
    hostname: heapless::String<32>,
    ap_secret: heapless::String<64>,
}

impl NetBootstrap {
    /// Create the bootstrap resources (events + storage).
    ///
    /// Must be called once to create a static `NetBootstrapStatic` that is
    /// passed to [`NetBootstrap::begin`].
    #[must_use]
    pub const fn new_static() -> NetBootstrapStatic {
        NetBootstrapStatic {
            events: Signal::new(),
            stack: StackStorage::new(),
            recovery: Mutex::new(RefCell::new(None)),
            identity: Mutex::new(RefCell::new(None)),
            bootstrap_cell: StaticCell::new(),
        }
    }

    /// Decide the operation mode and start the network in the background.
    ///
    /// The mode follows the persisted `configured` flag. The access point
    /// secret is ensured (and persisted) before the radio starts, so it is
    /// available for display in every mode. The returned handle reports
    /// progress through [`NetBootstrap::wait`].
    ///
    /// # Arguments
    ///
    /// * `net_static` - Static resources created with [`NetBootstrap::new_static`]
    /// * `pin_23` - WiFi chip power pin (GPIO 23)
    /// * `pin_25` - WiFi chip chip select pin (GPIO 25)
    /// * `pio0` - PIO peripheral for WiFi communication
    /// * `pin_24` - WiFi chip clock pin (GPIO 24)
    /// * `pin_29` - WiFi chip data pin (GPIO 29)
    /// * `dma_ch0` - DMA channel for WiFi SPI communication
    /// * `recovery_store` - Recovery store that receives acquired addresses
    /// * `config` - Configuration store holding network credentials
    /// * `ap_secret_override` - Fixed access point secret, if the caller wants one
    /// * `secret_policy` - Whether the setup network requires a passphrase
    /// * `ui_policy` - When the captive DNS and DHCP responders run
    /// * `spawner` - Embassy task spawner
    #[expect(clippy::too_many_arguments, reason = "each radio pin arrives separately")]
    pub fn begin<C: ConfigStore>(
        net_static: &'static NetBootstrapStatic,
        pin_23: Peri<'static, PIN_23>,
        pin_25: Peri<'static, PIN_25>,
        pio0: Peri<'static, PIO0>,
        pin_24: Peri<'static, PIN_24>,
        pin_29: Peri<'static, PIN_29>,
        dma_ch0: Peri<'static, DMA_CH0>,
        recovery_store: RecoveryFlashStore,
        config: &mut C,
        ap_secret_override: Option<&str>,
        secret_policy: ApSecretPolicy,
        ui_policy: ConfigUiPolicy,
        spawner: Spawner,
    ) -> Result<&'static Self> {
        let network_config = NetworkConfig::from_store(config)?;
        let mode = network_config.mode();
        info!("Network bootstrap starting in {} mode", mode);

        let mut rng = RoscRng;
        let secret_policy = secret_policy.with_override(ap_secret_override);
        let ap_secret = bootstrap::ensure_ap_secret(config, &mut rng, ap_secret_override)?;
        let ap_access = secret_policy.resolve(&ap_secret)?;

        let cached = recovery_store.cached_params();
        let plan = bootstrap::plan(&network_config, cached.as_ref(), ap_access, ui_policy);

        let hostname = network_config.hostname.clone();
        net_static
            .recovery
            .lock(|cell| *cell.borrow_mut() = Some(recovery_store));

        let token = net_bootstrap_task(
            pin_23,
            pin_25,
            pio0,
            pin_24,
            pin_29,
            dma_ch0,
            network_config,
            plan,
            &net_static.events,
            &net_static.stack,
            &net_static.recovery,
            &net_static.identity,
            spawner,
        )?;
        spawner.spawn(token);

        Ok(net_static.bootstrap_cell.init(Self {
            events: &net_static.events,
            stack: &net_static.stack,
            identity: &net_static.identity,
            mode,
            hostname,
            ap_secret,
        }))
    }

    /// Wait for and return the next bootstrap event.
    pub async fn wait(&self) -> NetEvent {
        self.events.wait().await
    }

    /// Wait for the network stack to be ready and return a reference to it.
    ///
    /// In access point mode the stack holds the static setup address; in
    /// client mode it becomes ready once an address is acquired.
    pub async fn stack(&self) -> &'static Stack<'static> {
        self.stack.get().await
    }

    /// The operation mode decided at startup.
    #[must_use]
    pub const fn mode(&self) -> OperationMode {
        self.mode
    }

    /// Hostname announced to the network.
    #[must_use]
    pub fn hostname(&self) -> &str {
        self.hostname.as_str()
    }

    /// MAC address of the radio, once it has been read.
    #[must_use]
    pub fn mac_address(&self) -> Option<MacAddress> {
        self.identity
            .lock(|cell| cell.borrow().as_ref().map(|identity| identity.mac))
    }

    /// SSID the setup access point advertises, once the radio is up.
    #[must_use]
    pub fn ap_name(&self) -> Option<heapless::String<32>> {
        self.identity
            .lock(|cell| cell.borrow().as_ref().map(|identity| identity.ap_ssid.clone()))
    }

    /// Passphrase stored for the setup access point.
    ///
    /// Ensured before the radio starts, so it is non-empty in every mode;
    /// an open setup network keeps it on file for a later switch to
    /// protected mode.
    #[must_use]
    pub fn ap_secret(&self) -> &str {
        self.ap_secret.as_str()
    }

    /// Log the device identity and the stored setup passphrase.
    pub fn log_system_info(&self) {
        info!("Hostname: {}", self.hostname.as_str());
        info!("Mode: {}", self.mode);
        if let Some(mac) = self.mac_address() {
            if let Ok(formatted) = mac.format(":") {
                info!("MAC address: {}", formatted.as_str());
            }
        }
        if let Some(ssid) = self.ap_name() {
            info!("Setup network SSID: {}", ssid.as_str());
        }
        info!("****************************************");
        info!("* ACCESS POINT PASSWORD: {}", self.ap_secret.as_str());
        info!("****************************************");
    }
}

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

#[embassy_executor::task]
#[expect(clippy::too_many_arguments, reason = "each radio pin arrives separately")]
async fn net_bootstrap_task(
    pin_23: Peri<'static, PIN_23>,
    pin_25: Peri<'static, PIN_25>,
    pio0: Peri<'static, PIO0>,
    pin_24: Peri<'static, PIN_24>,
    pin_29: Peri<'static, PIN_29>,
    dma_ch0: Peri<'static, DMA_CH0>,
    config: NetworkConfig,
    plan: BootstrapPlan,
    events: &'static NetEvents,
    stack_storage: &'static StackStorage,
    recovery: &'static SharedRecovery,
    identity: &'static SharedIdentity,
    spawner: Spawner,
) -> ! {
    // Initialize WiFi hardware
    let fw = cyw43_firmware::CYW43_43439A0;
    let clm = cyw43_firmware::CYW43_43439A0_CLM;

    let pwr = Output::new(pin_23, Level::Low);
    let cs = Output::new(pin_25, Level::High);
    let mut pio = Pio::new(pio0, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        pin_24,
        pin_29,
        dma_ch0,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    let radio_token = unwrap!(radio_task(runner));
    spawner.spawn(radio_token);

    control.init(clm).await;

    let mac = MacAddress(control.address().await);
    let ap_identity = unwrap!(ApIdentity::from_mac(mac));
    identity.lock(|cell| {
        *cell.borrow_mut() = Some(DeviceIdentity {
            mac,
            ap_ssid: ap_identity.ssid.clone(),
        });
    });
    info!("MAC address: {}", unwrap!(mac.format(":")).as_str());

    control
        .set_power_management(cyw43::PowerManagementMode::PowerSave)
        .await;

    let net_config = match &plan {
        BootstrapPlan::Client {
            addressing: ClientAddressing::Dhcp,
        } => {
            let mut dhcp = DhcpConfig::default();
            dhcp.hostname = Some(config.hostname.clone());
            Config::dhcpv4(dhcp)
        }
        BootstrapPlan::Client {
            addressing: ClientAddressing::Static(params),
        } => {
            info!("Reusing cached network parameters: {}", params);
            Config::ipv4_static(StaticConfigV4 {
                address: Ipv4Cidr::new(params.address, params.prefix_len),
                gateway: Some(params.gateway),
                dns_servers: unwrap!(heapless::Vec::from_slice(&[params.gateway])),
            })
        }
        BootstrapPlan::AccessPoint { .. } => Config::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(AP_ADDRESS, AP_PREFIX_LEN),
            gateway: Some(AP_ADDRESS),
            dns_servers: unwrap!(heapless::Vec::from_slice(&[AP_ADDRESS])),
        }),
    };

    let mut rng = RoscRng;
    let seed = rng.next_u64();

    static RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
    static STACK: StaticCell<Stack<'static>> = StaticCell::new();
    let (stack_val, runner) = embassy_net::new(
        net_device,
        net_config,
        RESOURCES.init(StackResources::<5>::new()),
        seed,
    );
    let stack = STACK.init(stack_val);

    let net_token = unwrap!(net_task(runner));
    spawner.spawn(net_token);

    match plan {
        BootstrapPlan::Client { addressing } => {
            run_client(
                control,
                stack,
                config,
                addressing,
                events,
                stack_storage,
                recovery,
            )
            .await
        }
        BootstrapPlan::AccessPoint {
            access,
            serve_portal,
        } => {
            run_access_point(
                control,
                stack,
                ap_identity,
                access,
                serve_portal,
                events,
                stack_storage,
                spawner,
            )
            .await
        }
    }
}

/// Join the configured network and keep it joined.
///
/// Every acquired address is persisted together with a zeroed boot
/// failure counter, so the cached parameters track the latest lease and
/// a reachable network ends an unsuccessful-boot streak.
///
/// Connection loss is watched per addressing mode: a DHCP configuration
/// is torn down when the link drops, but a static one stays applied, so
/// a static client watches the link itself (see
/// [`ClientAddressing::loss_watch`]).
async fn run_client(
    mut control: cyw43::Control<'static>,
    stack: &'static Stack<'static>,
    config: NetworkConfig,
    addressing: ClientAddressing,
    events: &'static NetEvents,
    stack_storage: &'static StackStorage,
    recovery: &'static SharedRecovery,
) -> ! {
    info!("Connecting to network: {}", config.essid.as_str());
    loop {
        loop {
            let options = if config.password.is_empty() {
                JoinOptions::new_open()
            } else {
                JoinOptions::new(config.password.as_bytes())
            };
            match control.join(config.essid.as_str(), options).await {
                Ok(()) => break,
                Err(err) => {
                    warn!("Join failed with status {}", err.status);
                    Timer::after_secs(1).await;
                }
            }
        }

        info!("Joined, waiting for an address");
        stack.wait_config_up().await;
        let Some(v4) = stack.config_v4() else {
            continue;
        };
        let address = v4.address.address();
        let gateway = v4.gateway.unwrap_or(Ipv4Address::UNSPECIFIED);
        let subnet_mask = prefix_len_to_mask(v4.address.prefix_len());
        info!("IP Address: {}", v4.address);

        let persisted = recovery.lock(|cell| match cell.borrow_mut().as_mut() {
            Some(store) => bootstrap::on_address_acquired(store, address, gateway, subnet_mask),
            None => Ok(()),
        });
        if persisted.is_err() {
            error!("Failed to persist the acquired network parameters");
        }

        stack_storage.init(stack);
        events.signal(NetEvent::AddressAcquired(address));

        match addressing.loss_watch() {
            LossWatch::ConfigDown => stack.wait_config_down().await,
            LossWatch::LinkDown => stack.wait_link_down().await,
        }
        warn!("Connection lost, rejoining");
        events.signal(NetEvent::Disconnected);
        control.leave().await;
    }
}

/// Serve the setup access point, optionally with the captive responders.
#[expect(clippy::too_many_arguments, reason = "one-shot wiring of the portal services")]
async fn run_access_point(
    mut control: cyw43::Control<'static>,
    stack: &'static Stack<'static>,
    ap_identity: ApIdentity,
    access: ApAccess,
    serve_portal: bool,
    events: &'static NetEvents,
    stack_storage: &'static StackStorage,
    spawner: Spawner,
) -> ! {
    match &access {
        ApAccess::Open => {
            info!("Starting open setup network: {}", ap_identity.ssid.as_str());
            control
                .start_ap_open(ap_identity.ssid.as_str(), AP_CHANNEL)
                .await;
        }
        ApAccess::Secured(secret) => {
            info!("Starting protected setup network: {}", ap_identity.ssid.as_str());
            control
                .start_ap_wpa2(ap_identity.ssid.as_str(), secret.as_str(), AP_CHANNEL)
                .await;
        }
    }

    stack.wait_config_up().await;
    if let Some(v4) = stack.config_v4() {
        info!("Setup network IP Address: {}", v4.address);
    }

    if serve_portal {
        let dns_token = unwrap!(dns_catchall_task(stack, AP_ADDRESS));
        spawner.spawn(dns_token);
        let dhcp_token = unwrap!(dhcp_lease_task(
            stack, AP_ADDRESS, AP_NETMASK, AP_POOL_START, AP_POOL_SIZE,
        ));
        spawner.spawn(dhcp_token);
    }

    stack_storage.init(stack);
    events.signal(NetEvent::ApReady);

    // Keep task alive
    loop {
        Timer::after_secs(3600).await;
    }
}

#[embassy_executor::task]
async fn radio_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}
