//! Host-level tests for setup provisioning: secrets, mode selection, and
//! address planning.

use core::net::Ipv4Addr;

use proptest::prelude::*;
use rand_core::RngCore;

use outpost_core::boot_guard::{self, ResetCause};
use outpost_core::bootstrap::{
    self, ApAccess, ApIdentity, ApSecretPolicy, BootstrapPlan, ClientAddressing, ConfigUiPolicy,
    LossWatch, MacAddress, NetworkConfig,
};
use outpost_core::mem_store::{MemConfigStore, MemRecoveryStore};
use outpost_core::secret::{self, MAX_SECRET_LEN, MIN_SECRET_LEN, SECRET_ALPHABET};
use outpost_core::store::{ConfigKey, ConfigStore, RecoveryStore};

/// Deterministic xorshift stream, stands in for the hardware generator.
struct TestRng(u32);

impl RngCore for TestRng {
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "the xorshift constants stay inside the word width"
    )]
    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    #[expect(
        clippy::arithmetic_side_effects,
        reason = "a 32-bit shift always fits in a u64"
    )]
    fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    #[expect(
        clippy::indexing_slicing,
        reason = "chunks are never wider than the word"
    )]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

#[test]
fn short_requests_are_raised_to_the_minimum_length() {
    let mut rng = TestRng(11);
    assert_eq!(secret::generate(&mut rng, 4).len(), MIN_SECRET_LEN);
    assert_eq!(secret::generate(&mut rng, 12).len(), 12);
}

#[test]
fn generated_secrets_draw_only_from_the_alphabet() {
    let mut rng = TestRng(29);
    let generated = secret::generate(&mut rng, 64);
    assert!(generated
        .bytes()
        .all(|byte| SECRET_ALPHABET.contains(&byte)));
}

#[test]
fn consecutive_secrets_differ() {
    let mut rng = TestRng(3);
    let first = secret::generate(&mut rng, 12);
    let second = secret::generate(&mut rng, 12);
    assert_ne!(first, second);
}

#[test]
fn supplied_secrets_are_checked_against_the_minimum() {
    assert!(secret::accept_supplied("1234567").is_err());
    assert!(secret::accept_supplied("12345678").is_ok());
}

proptest! {
    #[test]
    fn generation_always_clamps_and_stays_in_the_alphabet(
        seed in 1..u32::MAX,
        requested in 0usize..600,
    ) {
        let mut rng = TestRng(seed);
        let generated = secret::generate(&mut rng, requested);
        let expected_len = requested.clamp(MIN_SECRET_LEN, MAX_SECRET_LEN);
        prop_assert_eq!(generated.len(), expected_len);
        prop_assert!(generated.bytes().all(|byte| SECRET_ALPHABET.contains(&byte)));
    }
}

#[test]
fn configured_flag_alone_selects_the_mode() {
    let mut config = MemConfigStore::new();
    // Credentials present but the flag unset still means setup mode.
    config.set(ConfigKey::WifiEssid, "backhaul").expect("set");
    config
        .set(ConfigKey::WifiPassword, "hunter2hunter2")
        .expect("set");
    let network = NetworkConfig::from_store(&config).expect("snapshot");
    assert!(matches!(
        bootstrap::plan(&network, None, ApAccess::Open, ConfigUiPolicy::SetupOnly),
        BootstrapPlan::AccessPoint { .. }
    ));

    config.set_configured(true).expect("set");
    let network = NetworkConfig::from_store(&config).expect("snapshot");
    assert!(matches!(
        bootstrap::plan(&network, None, ApAccess::Open, ConfigUiPolicy::SetupOnly),
        BootstrapPlan::Client { .. }
    ));
}

#[test]
fn malformed_cached_triple_falls_back_to_dhcp_through_the_store() {
    let mut recovery = MemRecoveryStore::new();
    recovery
        .set_cached_params(
            &outpost_core::store::CachedNetworkParams {
                ip: heapless::String::try_from("192.168.1.40").expect("fits"),
                gateway: heapless::String::try_from("192.168.1.1").expect("fits"),
                subnet_mask: heapless::String::try_from("255.0.255.0").expect("fits"),
            },
        )
        .expect("seed");
    let cached = recovery.cached_params();
    assert_eq!(
        bootstrap::plan_client_addressing(cached.as_ref()),
        ClientAddressing::Dhcp
    );
}

#[test]
fn ap_identity_is_reproducible_for_a_device() {
    let mac = MacAddress([0xd8, 0x3a, 0xdd, 0x01, 0x02, 0x03]);
    let ssid = ApIdentity::from_mac(mac).expect("identity").ssid;
    assert_eq!(ssid.as_str(), "Outpost-d83add010203");
    assert_eq!(ApIdentity::from_mac(mac).expect("identity").ssid, ssid);
}

#[test]
fn ap_secret_is_generated_once_and_reused_across_boots() {
    let mut config = MemConfigStore::new();
    let mut rng = TestRng(5);
    let first = bootstrap::ensure_ap_secret(&mut config, &mut rng, None).expect("ensure");
    assert_eq!(config.saves(), 1);

    // Next boot finds the stored secret and leaves it alone.
    let mut rng = TestRng(99);
    let second = bootstrap::ensure_ap_secret(&mut config, &mut rng, None).expect("ensure");
    assert_eq!(first, second);
    assert_eq!(config.saves(), 1);
}

#[test]
fn ap_secret_survives_a_network_configuration_reset() {
    let mut recovery = MemRecoveryStore::with_boot_failures(3);
    let mut config = MemConfigStore::new();
    config.set_configured(true).expect("set");
    let mut rng = TestRng(17);
    let ap_secret = bootstrap::ensure_ap_secret(&mut config, &mut rng, None).expect("ensure");

    let action = boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
        .expect("evaluate");
    assert!(action.requires_reboot());
    assert!(!config.configured());
    assert_eq!(config.get(ConfigKey::ApSecret), ap_secret.as_str());

    // The device comes back in setup mode advertising the same secret.
    let mut rng = TestRng(23);
    let reused = bootstrap::ensure_ap_secret(&mut config, &mut rng, None).expect("ensure");
    assert_eq!(reused, ap_secret);
}

#[test]
fn provisioning_round_trip_from_setup_to_static_client() {
    let mut recovery = MemRecoveryStore::new();
    let mut config = MemConfigStore::new();

    // Fresh device: setup access point with the portal services.
    let network = NetworkConfig::from_store(&config).expect("snapshot");
    assert_eq!(network.hostname.as_str(), "outpost-unconfigured");
    let plan = bootstrap::plan(
        &network,
        recovery.cached_params().as_ref(),
        ApAccess::Open,
        ConfigUiPolicy::SetupOnly,
    );
    assert_eq!(
        plan,
        BootstrapPlan::AccessPoint {
            access: ApAccess::Open,
            serve_portal: true,
        }
    );

    // Setup stores credentials and marks the device configured.
    config.set(ConfigKey::WifiEssid, "backhaul").expect("set");
    config
        .set(ConfigKey::WifiPassword, "hunter2hunter2")
        .expect("set");
    config.set(ConfigKey::DeviceNumber, "4").expect("set");
    config.set_configured(true).expect("set");
    config.save().expect("save");

    // First configured boot: client mode, no cached address yet.
    let network = NetworkConfig::from_store(&config).expect("snapshot");
    assert_eq!(network.hostname.as_str(), "outpost-4");
    let plan = bootstrap::plan(
        &network,
        recovery.cached_params().as_ref(),
        ApAccess::Open,
        ConfigUiPolicy::SetupOnly,
    );
    assert_eq!(
        plan,
        BootstrapPlan::Client {
            addressing: ClientAddressing::Dhcp
        }
    );

    // The join succeeds and the acquired triple is recorded.
    bootstrap::on_address_acquired(
        &mut recovery,
        Ipv4Addr::new(192, 168, 1, 40),
        Ipv4Addr::new(192, 168, 1, 1),
        Ipv4Addr::new(255, 255, 255, 0),
    )
    .expect("record");

    // The boot after that reuses the triple as a static configuration.
    let cached = recovery.cached_params();
    let plan = bootstrap::plan(
        &network,
        cached.as_ref(),
        ApAccess::Open,
        ConfigUiPolicy::SetupOnly,
    );
    let BootstrapPlan::Client { addressing } = plan else {
        panic!("expected a client plan");
    };
    // The static config never deconfigures on its own, so the client
    // watches the link itself for loss.
    assert_eq!(addressing.loss_watch(), LossWatch::LinkDown);
    let ClientAddressing::Static(static_plan) = addressing else {
        panic!("expected a static address plan");
    };
    assert_eq!(static_plan.address, Ipv4Addr::new(192, 168, 1, 40));
    assert_eq!(static_plan.prefix_len, 24);
}

#[test]
fn secured_policy_feeds_the_stored_secret_to_the_access_point() {
    let mut config = MemConfigStore::new();
    let mut rng = TestRng(41);
    let ap_secret = bootstrap::ensure_ap_secret(&mut config, &mut rng, None).expect("ensure");

    let policy = ApSecretPolicy::Open.with_override(Some("fixed-secret"));
    assert_eq!(policy, ApSecretPolicy::Secured);

    let access = policy.resolve(&ap_secret).expect("resolve");
    assert_eq!(access, ApAccess::Secured(ap_secret));
}
