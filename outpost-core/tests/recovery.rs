//! Host-level tests for the escalating boot-failure recovery.

use proptest::prelude::*;

use outpost_core::boot_guard::{self, RecoveryAction, ResetCause};
use outpost_core::bootstrap;
use outpost_core::mem_store::{MemConfigStore, MemRecoveryStore};
use outpost_core::store::{ConfigStore, RecoveryStore};

fn configured_store() -> MemConfigStore {
    let mut config = MemConfigStore::new();
    config.set_configured(true).expect("set configured");
    config
}

#[test]
fn first_three_qualifying_resets_only_count() {
    let mut recovery = MemRecoveryStore::new();
    let mut config = configured_store();
    for expected in 1..=3 {
        let action = boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
            .expect("evaluate");
        assert_eq!(action, RecoveryAction::ContinueNormalBoot);
        assert_eq!(recovery.boot_failures(), expected);
    }
    assert!(config.configured());
}

#[test]
fn fourth_qualifying_reset_resets_network_configuration_exactly_once() {
    let mut recovery = MemRecoveryStore::new();
    let mut config = configured_store();

    for _ in 0..3 {
        boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
            .expect("evaluate");
    }
    let action = boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
        .expect("evaluate");
    assert_eq!(action, RecoveryAction::ResetNetworkConfigAndReboot);
    assert!(!config.configured());
    assert_eq!(recovery.boot_failures(), 0);

    // The reset action reboots through software, which does not qualify,
    // so the streak genuinely starts over.
    let action = boot_guard::evaluate(ResetCause::Other, &mut recovery, &mut config)
        .expect("evaluate");
    assert_eq!(action, RecoveryAction::ContinueNormalBoot);
    assert_eq!(recovery.boot_failures(), 0);
    assert_eq!(config.saves(), 1);
}

#[test]
fn unconfigured_device_factory_resets_on_the_third_reset() {
    let mut recovery = MemRecoveryStore::new();
    let mut config = MemConfigStore::new();

    for _ in 0..2 {
        let action =
            boot_guard::evaluate(ResetCause::ButtonOrWatchdogReset, &mut recovery, &mut config)
                .expect("evaluate");
        assert_eq!(action, RecoveryAction::ContinueNormalBoot);
    }
    let action =
        boot_guard::evaluate(ResetCause::ButtonOrWatchdogReset, &mut recovery, &mut config)
            .expect("evaluate");
    assert_eq!(action, RecoveryAction::FactoryResetAndReboot);
    assert_eq!(config.formats(), 1);
    assert_eq!(recovery.boot_failures(), 0);
}

#[test]
fn configured_device_survives_the_lower_threshold() {
    let mut recovery = MemRecoveryStore::with_boot_failures(2);
    let mut config = configured_store();
    let action = boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
        .expect("evaluate");
    assert_eq!(action, RecoveryAction::ContinueNormalBoot);
    assert_eq!(recovery.boot_failures(), 3);
    assert_eq!(config.formats(), 0);
}

#[test]
fn a_network_reset_makes_the_next_streak_escalate_to_factory_reset() {
    let mut recovery = MemRecoveryStore::new();
    let mut config = configured_store();

    // First streak wipes the network configuration.
    for _ in 0..4 {
        boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
            .expect("evaluate");
    }
    assert!(!config.configured());

    // The now-unconfigured device escalates after three more.
    for _ in 0..2 {
        boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
            .expect("evaluate");
    }
    let action = boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
        .expect("evaluate");
    assert_eq!(action, RecoveryAction::FactoryResetAndReboot);
    assert_eq!(config.formats(), 1);
}

#[test]
fn software_restart_interrupts_a_streak() {
    let mut recovery = MemRecoveryStore::with_boot_failures(3);
    let mut config = configured_store();
    boot_guard::evaluate(ResetCause::Other, &mut recovery, &mut config).expect("evaluate");
    assert_eq!(recovery.boot_failures(), 0);

    // The next power cycle starts from one again.
    boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
    assert_eq!(recovery.boot_failures(), 1);
}

#[test]
fn address_acquisition_ends_a_streak() {
    let mut recovery = MemRecoveryStore::new();
    let mut config = configured_store();

    for _ in 0..3 {
        boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
            .expect("evaluate");
    }
    bootstrap::on_address_acquired(
        &mut recovery,
        core::net::Ipv4Addr::new(192, 168, 1, 40),
        core::net::Ipv4Addr::new(192, 168, 1, 1),
        core::net::Ipv4Addr::new(255, 255, 255, 0),
    )
    .expect("record");
    assert_eq!(recovery.boot_failures(), 0);

    // The fourth power cycle after a successful boot is a fresh streak.
    let action = boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config)
        .expect("evaluate");
    assert_eq!(action, RecoveryAction::ContinueNormalBoot);
    assert_eq!(recovery.boot_failures(), 1);
}

#[test]
fn counter_survives_a_boot_that_never_acquires_an_address() {
    // A boot that reaches the application but never gets an address leaves
    // the counter alone; only address acquisition clears it.
    let mut recovery = MemRecoveryStore::new();
    let mut config = configured_store();

    boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
    boot_guard::evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
    assert_eq!(recovery.boot_failures(), 2);
}

#[test]
fn every_evaluation_commits_the_recovery_store() {
    let mut recovery = MemRecoveryStore::new();
    let mut config = configured_store();
    let causes = [
        ResetCause::PowerCycle,
        ResetCause::Other,
        ResetCause::ButtonOrWatchdogReset,
        ResetCause::PowerCycle,
    ];
    for (boots, cause) in (1..).zip(causes) {
        boot_guard::evaluate(cause, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(recovery.commits(), boots);
    }
}

fn any_cause() -> impl Strategy<Value = ResetCause> {
    prop_oneof![
        Just(ResetCause::PowerCycle),
        Just(ResetCause::ButtonOrWatchdogReset),
        Just(ResetCause::Other),
    ]
}

proptest! {
    /// Stepwise contract over arbitrary reset histories: the action and the
    /// stored counter are a function of the pre-state and the cause alone.
    #[test]
    fn evaluation_matches_the_stepwise_contract(causes in prop::collection::vec(any_cause(), 0..48)) {
        let mut recovery = MemRecoveryStore::new();
        let mut config = MemConfigStore::new();

        for cause in causes {
            let before_count = recovery.boot_failures();
            let before_configured = config.configured();
            let action = boot_guard::evaluate(cause, &mut recovery, &mut config)
                .expect("evaluate");

            let expected = if !cause.qualifies_for_recovery() {
                RecoveryAction::ContinueNormalBoot
            } else if before_count >= 3 {
                RecoveryAction::ResetNetworkConfigAndReboot
            } else if before_count >= 2 && !before_configured {
                RecoveryAction::FactoryResetAndReboot
            } else {
                RecoveryAction::ContinueNormalBoot
            };
            prop_assert_eq!(action, expected);

            let expected_count = match action {
                RecoveryAction::ContinueNormalBoot if cause.qualifies_for_recovery() => {
                    before_count.saturating_add(1)
                }
                _ => 0,
            };
            prop_assert_eq!(recovery.boot_failures(), expected_count);
        }
    }
}
