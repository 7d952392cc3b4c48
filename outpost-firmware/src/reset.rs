//! Reset cause classification and software restarts.
//!
//! The recovery escalation counts power cycles and external resets, so the
//! kit's own restarts must not look like either. [`restart`] leaves a
//! marker in a watchdog scratch register (those survive everything short
//! of losing power) and [`reset_cause`] consumes it, classifying the boot
//! as [`ResetCause::Other`] no matter what the reset controller latched.

use defmt::info;
use embassy_rp::pac;
use embassy_time::{Duration, Timer};
use outpost_core::boot_guard::{RecoveryAction, ResetCause};

// Written to WATCHDOG.SCRATCH0 right before a requested restart; the
// register powers up as zero, so a real power cycle never carries it.
const SOFT_RESTART_MARKER: u32 = 0x5AFE_B007;

/// Classify why the chip last reset. Call once, early in boot; the
/// software-restart marker is consumed by the first call.
pub fn reset_cause() -> ResetCause {
    if pac::WATCHDOG.scratch0().read() == SOFT_RESTART_MARKER {
        pac::WATCHDOG.scratch0().write_value(0);
        return ResetCause::Other;
    }

    let chip_reset = pac::VREG_AND_CHIP_RESET.chip_reset().read();
    if chip_reset.had_por() {
        return ResetCause::PowerCycle;
    }
    if chip_reset.had_run() {
        return ResetCause::ButtonOrWatchdogReset;
    }

    let watchdog_reason = pac::WATCHDOG.reason().read();
    if watchdog_reason.timer() || watchdog_reason.force() {
        ResetCause::ButtonOrWatchdogReset
    } else {
        ResetCause::Other
    }
}

/// Restart the device. Persistent stores must be committed first; nothing
/// after this line runs.
pub fn restart() -> ! {
    pac::WATCHDOG.scratch0().write_value(SOFT_RESTART_MARKER);
    cortex_m::peripheral::SCB::sys_reset();
}

/// Restart after a short grace period, giving in-flight responses (a
/// saved-configuration acknowledgement, a final log flush) time to leave
/// the device.
pub async fn restart_after_grace() -> ! {
    Timer::after(Duration::from_secs(2)).await;
    restart()
}

/// Carry out the boot-time recovery decision. Returns only for
/// [`RecoveryAction::ContinueNormalBoot`].
pub fn apply_recovery(action: RecoveryAction) {
    if action.requires_reboot() {
        info!("restarting to apply recovery action {}", action);
        restart();
    }
}
