//! Escalating recovery across repeated failed boots.
//!
//! A device that keeps power-cycling or watchdog-resetting without ever
//! completing a successful network join is assumed mis-configured. Each
//! qualifying reset bumps a persisted counter; crossing the first threshold
//! wipes just the network settings, and a second streak while unconfigured
//! escalates to a full factory erase. Two separate streaks are required to
//! reach full erasure, so a single burst of power cycles cannot destroy all
//! configuration.
//!
//! [`evaluate`] runs once per boot, before networking starts, and its
//! caller must restart the device whenever the returned action says so.
//! The counter is cleared again by a later successful address acquisition
//! (see [`crate::bootstrap::on_address_acquired`]).

#[cfg(feature = "defmt")]
use defmt::{error, info, warn};

// Stub macros when defmt is not available
#[cfg(not(feature = "defmt"))]
macro_rules! info {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "defmt"))]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "defmt"))]
macro_rules! error {
    ($($arg:tt)*) => {{}};
}

use crate::store::{ConfigStore, RecoveryStore};
use crate::Result;

/// Why the hardware last reset, classified once per boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetCause {
    /// Power was removed and restored (including brown-out).
    PowerCycle,
    /// The physical reset line was pulled or a watchdog fired.
    ButtonOrWatchdogReset,
    /// Anything else, notably software-requested restarts.
    Other,
}

impl ResetCause {
    /// Whether this cause counts toward the unsuccessful-boot streak.
    #[must_use]
    pub const fn qualifies_for_recovery(self) -> bool {
        matches!(self, Self::PowerCycle | Self::ButtonOrWatchdogReset)
    }
}

/// Outcome of the boot-time recovery evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecoveryAction {
    /// Proceed with the rest of startup.
    ContinueNormalBoot,
    /// Network settings were reset; the caller must restart the device.
    ResetNetworkConfigAndReboot,
    /// All configuration was erased; the caller must restart the device.
    FactoryResetAndReboot,
}

impl RecoveryAction {
    /// Whether the caller must restart immediately after this evaluation.
    #[must_use]
    pub const fn requires_reboot(self) -> bool {
        matches!(
            self,
            Self::ResetNetworkConfigAndReboot | Self::FactoryResetAndReboot
        )
    }
}

// Escalation thresholds: the counter must *exceed* these after increment.
const NETWORK_RESET_THRESHOLD: u32 = 3;
const FACTORY_RESET_THRESHOLD: u32 = 2;

/// Evaluate the boot-failure streak and apply any recovery side effects.
///
/// Runs exactly once per boot, before networking starts. All store
/// mutations, including a best-effort factory erase, happen here; the
/// recovery store is committed before returning, so a caller-issued
/// restart never loses the decision.
///
/// A non-qualifying reset clears the whole recovery record, cached join
/// parameters included; the next connection re-validates its addressing
/// from scratch.
///
/// A failing factory erase is logged and does not block the reboot;
/// erasure is best-effort, the escalation is not.
pub fn evaluate<P, C>(cause: ResetCause, recovery: &mut P, config: &mut C) -> Result<RecoveryAction>
where
    P: RecoveryStore,
    C: ConfigStore,
{
    let action = if cause.qualifies_for_recovery() {
        let count = recovery.boot_failures().saturating_add(1);
        if count > NETWORK_RESET_THRESHOLD {
            warn!(
                "{} consecutive unsuccessful boots: resetting network configuration and rebooting",
                count
            );
            config.set_configured(false)?;
            config.save()?;
            recovery.clear()?;
            RecoveryAction::ResetNetworkConfigAndReboot
        } else if count > FACTORY_RESET_THRESHOLD && !config.configured() {
            warn!(
                "{} consecutive unsuccessful boots while unconfigured: erasing all configuration and rebooting",
                count
            );
            if config.format().is_err() {
                error!("configuration storage erase failed, rebooting anyway");
            }
            recovery.clear()?;
            RecoveryAction::FactoryResetAndReboot
        } else {
            info!("unsuccessful boot count is now {}", count);
            recovery.set_boot_failures(count)?;
            RecoveryAction::ContinueNormalBoot
        }
    } else {
        info!("reset cause does not qualify for recovery, clearing the recovery record");
        recovery.clear()?;
        RecoveryAction::ContinueNormalBoot
    };

    recovery.commit()?;
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_store::{MemConfigStore, MemRecoveryStore};
    use crate::store::CachedNetworkParams;
    use crate::Error;

    fn configured_store() -> MemConfigStore {
        let mut config = MemConfigStore::new();
        config.set_configured(true).expect("set configured");
        config
    }

    #[test]
    fn qualifying_cause_increments_and_continues() {
        let mut recovery = MemRecoveryStore::new();
        let mut config = configured_store();
        let action =
            evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(action, RecoveryAction::ContinueNormalBoot);
        assert_eq!(recovery.boot_failures(), 1);
        assert_eq!(recovery.commits(), 1);
    }

    #[test]
    fn button_and_watchdog_also_qualify() {
        let mut recovery = MemRecoveryStore::with_boot_failures(1);
        let mut config = configured_store();
        let action = evaluate(
            ResetCause::ButtonOrWatchdogReset,
            &mut recovery,
            &mut config,
        )
        .expect("evaluate");
        assert_eq!(action, RecoveryAction::ContinueNormalBoot);
        assert_eq!(recovery.boot_failures(), 2);
    }

    #[test]
    fn fourth_qualifying_reset_triggers_network_reset() {
        let mut recovery = MemRecoveryStore::with_boot_failures(3);
        let mut config = configured_store();
        let action =
            evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(action, RecoveryAction::ResetNetworkConfigAndReboot);
        assert!(!config.configured());
        assert_eq!(config.saves(), 1);
        assert_eq!(recovery.boot_failures(), 0);
        assert_eq!(recovery.commits(), 1);
    }

    #[test]
    fn network_reset_drops_cached_params_too() {
        let mut recovery = MemRecoveryStore::with_boot_failures(3);
        recovery
            .set_cached_params(
                &CachedNetworkParams::from_addresses(
                    core::net::Ipv4Addr::new(10, 0, 0, 9),
                    core::net::Ipv4Addr::new(10, 0, 0, 1),
                    core::net::Ipv4Addr::new(255, 255, 255, 0),
                )
                .expect("params"),
            )
            .expect("seed params");
        let mut config = configured_store();
        evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
        assert!(recovery.cached_params().is_none());
    }

    #[test]
    fn third_reset_while_unconfigured_factory_resets() {
        let mut recovery = MemRecoveryStore::with_boot_failures(2);
        let mut config = MemConfigStore::new();
        config.set_configured(false).expect("set configured");
        let action =
            evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(action, RecoveryAction::FactoryResetAndReboot);
        assert_eq!(config.formats(), 1);
        assert_eq!(recovery.boot_failures(), 0);
        assert_eq!(recovery.commits(), 1);
    }

    #[test]
    fn configured_device_does_not_factory_reset_at_the_lower_threshold() {
        let mut recovery = MemRecoveryStore::with_boot_failures(2);
        let mut config = configured_store();
        let action =
            evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(action, RecoveryAction::ContinueNormalBoot);
        assert_eq!(recovery.boot_failures(), 3);
        assert_eq!(config.formats(), 0);
    }

    #[test]
    fn absent_configured_flag_counts_as_unconfigured() {
        let mut recovery = MemRecoveryStore::with_boot_failures(2);
        let mut config = MemConfigStore::new();
        let action =
            evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(action, RecoveryAction::FactoryResetAndReboot);
    }

    #[test]
    fn non_qualifying_cause_clears_counter() {
        let mut recovery = MemRecoveryStore::with_boot_failures(5);
        let mut config = configured_store();
        let action = evaluate(ResetCause::Other, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(action, RecoveryAction::ContinueNormalBoot);
        assert_eq!(recovery.boot_failures(), 0);
        assert_eq!(recovery.commits(), 1);
    }

    #[test]
    fn non_qualifying_cause_wipes_the_whole_record() {
        // A clean software restart ends the streak outright: the cached
        // join parameters go with the counter, so the next connection
        // validates fresh addresses instead of trusting stale ones.
        let mut recovery = MemRecoveryStore::with_boot_failures(2);
        let params = CachedNetworkParams::from_addresses(
            core::net::Ipv4Addr::new(10, 0, 0, 9),
            core::net::Ipv4Addr::new(10, 0, 0, 1),
            core::net::Ipv4Addr::new(255, 255, 255, 0),
        )
        .expect("params");
        recovery.set_cached_params(&params).expect("seed params");
        let mut config = configured_store();
        evaluate(ResetCause::Other, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(recovery.boot_failures(), 0);
        assert!(recovery.cached_params().is_none());
        assert_eq!(recovery.commits(), 1);
    }

    #[test]
    fn factory_erase_failure_still_escalates() {
        let mut recovery = MemRecoveryStore::with_boot_failures(2);
        let mut config = MemConfigStore::new();
        config.fail_format();
        let action =
            evaluate(ResetCause::PowerCycle, &mut recovery, &mut config).expect("evaluate");
        assert_eq!(action, RecoveryAction::FactoryResetAndReboot);
        assert_eq!(recovery.boot_failures(), 0);
        assert_eq!(recovery.commits(), 1);
    }

    #[test]
    fn reboot_requirements_per_action() {
        assert!(!RecoveryAction::ContinueNormalBoot.requires_reboot());
        assert!(RecoveryAction::ResetNetworkConfigAndReboot.requires_reboot());
        assert!(RecoveryAction::FactoryResetAndReboot.requires_reboot());
    }

    #[test]
    fn errors_from_the_config_store_propagate() {
        struct SaveFails(MemConfigStore);
        impl crate::store::ConfigStore for SaveFails {
            fn load(&mut self) -> Result<bool> {
                self.0.load()
            }
            fn save(&mut self) -> Result<()> {
                Err(Error::Storage)
            }
            fn format(&mut self) -> Result<()> {
                self.0.format()
            }
            fn get(&self, key: crate::store::ConfigKey) -> &str {
                self.0.get(key)
            }
            fn set(&mut self, key: crate::store::ConfigKey, value: &str) -> Result<()> {
                self.0.set(key, value)
            }
        }

        let mut recovery = MemRecoveryStore::with_boot_failures(3);
        let mut config = SaveFails(configured_store());
        assert!(matches!(
            evaluate(ResetCause::PowerCycle, &mut recovery, &mut config),
            Err(Error::Storage)
        ));
    }
}
