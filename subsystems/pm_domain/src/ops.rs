//! # Callback Tables
//!
//! Capability traits through which the core reaches hardware and device
//! drivers, plus the device PM operation table installed on every device a
//! domain manages.
//!
//! ```text
//!   device model                 core                      platform
//!  ┌────────────┐   DevPmOps   ┌──────────────┐  DomainOps  ┌──────────┐
//!  │ runtime PM │ ───────────▶ │ PowerDomain  │ ──────────▶ │ regulator│
//!  │ sleep core │              │              │             │ / PMU    │
//!  └────────────┘              └──────┬───────┘             └──────────┘
//!                                     │ DomainDeviceOps / PmClockOps
//!                                     ▼
//!                              ┌──────────────┐
//!                              │ device driver│
//!                              └──────────────┘
//! ```

use bitflags::bitflags;

use crate::device::Device;
use crate::domain::PowerDomain;
use crate::error::DomainResult;
use crate::{runtime, sleep};

bitflags! {
    /// Domain behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DomainFlags: u32 {
        /// Use the clock-gating helper to stop and start devices
        const PM_CLK = 1 << 0;
    }
}

// =============================================================================
// DOMAIN HARDWARE
// =============================================================================

/// Hardware sequencing for one domain
///
/// Callbacks run with the domain lock held (runtime path) or with no lock at
/// all (system-sleep noirq path). They may block.
pub trait DomainOps: Send + Sync {
    /// Restore power to the domain
    fn power_on(&self, domain: &PowerDomain) -> DomainResult<()>;

    /// Remove power from the domain
    ///
    /// Returning [`ErrorKind::Busy`](crate::ErrorKind::Busy) means the
    /// hardware refused for now; the attempt is not timed.
    fn power_off(&self, domain: &PowerDomain) -> DomainResult<()>;

    /// Domain specific setup when a device joins
    fn attach_dev(&self, _domain: &PowerDomain, _dev: &Device) -> DomainResult<()> {
        Ok(())
    }

    /// Domain specific teardown when a device leaves
    fn detach_dev(&self, _domain: &PowerDomain, _dev: &Device) {}
}

// =============================================================================
// PER-DEVICE CALLBACKS
// =============================================================================

/// Per-device operations a domain applies to its members
///
/// The save/restore defaults forward to the driver's runtime callbacks.
pub trait DomainDeviceOps: Send + Sync {
    /// Resume the device's clocks/interface
    fn start(&self, _dev: &Device) -> DomainResult<()> {
        Ok(())
    }

    /// Quiesce the device's clocks/interface
    fn stop(&self, _dev: &Device) -> DomainResult<()> {
        Ok(())
    }

    /// Save device context before power may be lost
    fn save_state(&self, dev: &Device) -> DomainResult<()> {
        dev.model().runtime_suspend()
    }

    /// Restore device context after power came back
    fn restore_state(&self, dev: &Device) -> DomainResult<()> {
        dev.model().runtime_resume()
    }

    /// Whether the device must stay powered to signal wakeups
    fn active_wakeup(&self, _dev: &Device) -> bool {
        false
    }
}

/// Device callbacks installed when the domain does not provide its own
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDeviceOps;

impl DomainDeviceOps for DefaultDeviceOps {}

/// Clock-gating helper for [`DomainFlags::PM_CLK`] domains
pub trait PmClockOps: Send + Sync {
    /// Gate the device's clocks
    fn suspend(&self, dev: &Device) -> DomainResult<()>;

    /// Ungate the device's clocks
    fn resume(&self, dev: &Device) -> DomainResult<()>;
}

// =============================================================================
// DEVICE PM OPERATION TABLE
// =============================================================================

/// Device PM callback
pub type PmCallback = fn(&Device) -> DomainResult<()>;

/// Operation table the device model invokes for devices in a domain
#[derive(Debug, Clone, Copy)]
pub struct DevPmOps {
    pub runtime_suspend: PmCallback,
    pub runtime_resume: PmCallback,
    pub prepare: PmCallback,
    pub suspend: PmCallback,
    pub suspend_late: PmCallback,
    pub suspend_noirq: PmCallback,
    pub resume_noirq: PmCallback,
    pub resume_early: PmCallback,
    pub resume: PmCallback,
    pub freeze: PmCallback,
    pub freeze_late: PmCallback,
    pub freeze_noirq: PmCallback,
    pub thaw_noirq: PmCallback,
    pub thaw_early: PmCallback,
    pub thaw: PmCallback,
    pub poweroff: PmCallback,
    pub poweroff_late: PmCallback,
    pub poweroff_noirq: PmCallback,
    pub restore_noirq: PmCallback,
    pub restore_early: PmCallback,
    pub restore: PmCallback,
    pub complete: fn(&Device),
}

/// Operations shared by every generic power domain
pub static GENPD_PM_OPS: DevPmOps = DevPmOps {
    runtime_suspend: runtime::runtime_suspend,
    runtime_resume: runtime::runtime_resume,
    prepare: sleep::prepare,
    suspend: sleep::suspend,
    suspend_late: sleep::suspend_late,
    suspend_noirq: sleep::suspend_noirq,
    resume_noirq: sleep::resume_noirq,
    resume_early: sleep::resume_early,
    resume: sleep::resume,
    freeze: sleep::freeze,
    freeze_late: sleep::freeze_late,
    freeze_noirq: sleep::freeze_noirq,
    thaw_noirq: sleep::thaw_noirq,
    thaw_early: sleep::thaw_early,
    thaw: sleep::thaw,
    poweroff: sleep::suspend,
    poweroff_late: sleep::suspend_late,
    poweroff_noirq: sleep::suspend_noirq,
    restore_noirq: sleep::restore_noirq,
    restore_early: sleep::resume_early,
    restore: sleep::resume,
    complete: sleep::complete,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDevice;
    use alloc::sync::Arc;
    use core::sync::atomic::Ordering;

    #[test]
    fn test_default_save_restore_forward_to_driver() {
        let model = Arc::new(MockDevice::new());
        let dev = Device::new("uart0", model.clone());

        DefaultDeviceOps.save_state(&dev).unwrap();
        DefaultDeviceOps.restore_state(&dev).unwrap();
        DefaultDeviceOps.restore_state(&dev).unwrap();

        assert_eq!(model.driver_suspends.load(Ordering::SeqCst), 1);
        assert_eq!(model.driver_resumes.load(Ordering::SeqCst), 2);
        assert!(!DefaultDeviceOps.active_wakeup(&dev));
    }

    #[test]
    fn test_table_rejects_unattached_device() {
        let dev = Device::new("orphan", Arc::new(MockDevice::new()));

        for callback in [
            GENPD_PM_OPS.runtime_suspend,
            GENPD_PM_OPS.prepare,
            GENPD_PM_OPS.poweroff,
            GENPD_PM_OPS.restore_noirq,
        ] {
            let err = callback(&dev).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
        }
    }
}
