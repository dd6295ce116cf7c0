//! # System Sleep Callbacks
//!
//! System-wide suspend, hibernation and restore are driven through the
//! phase callbacks below. The device model runs the noirq phase strictly one
//! device at a time with runtime PM quiesced, so the noirq callbacks and the
//! synchronous power paths they use take no domain lock.
//!
//! ```text
//!   prepare ──▶ suspend ──▶ suspend_late ──▶ suspend_noirq
//!      │                                          │
//!      │   prepared_count += 1                    │ stop device
//!      │   first entrant records                  │ suspended_count += 1
//!      │   suspend_power_off                      │ sync_power_off()
//!      ▼                                          ▼
//!   complete ◀── resume ◀── resume_early ◀── resume_noirq
//!                                                 │ sync_power_on()
//!                                                 │ suspended_count -= 1
//!                                                 │ start device
//! ```
//!
//! A domain that was already off when the transition began stays off: every
//! phase callback short-circuits while `suspend_power_off` is set.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::device::Device;
use crate::domain::{PowerDomain, PowerStatus};
use crate::error::{DomainError, DomainResult, ErrorKind};
use crate::registry::DomainRegistry;

// =============================================================================
// SYNCHRONOUS POWER PATHS
// =============================================================================

impl PowerDomain {
    fn sleep_timed(&self, timed: bool) -> bool {
        timed && self.config.timed_sleep_transitions
    }

    /// Power off the domain and its masters without locking
    ///
    /// Only valid in the noirq phase of a system transition, or from
    /// syscore context, where callbacks never run concurrently.
    pub fn sync_power_off(&self, timed: bool) {
        if self.is_off()
            || self.suspended_count() != self.device_count()
            || self.sd_count() > 0
        {
            return;
        }

        if let Err(err) = self.hw_power_off(self.sleep_timed(timed)) {
            log::error!("{}: power off during sleep failed: {}", self.name(), err);
        }

        self.set_status(PowerStatus::PowerOff);
        log::debug!("{}: sync powered off", self.name());

        for master in self.masters() {
            master.sd_counter_dec();
            master.sync_power_off(timed);
        }
    }

    /// Power on the domain and its masters without locking
    pub fn sync_power_on(&self, timed: bool) {
        if self.is_active() {
            return;
        }

        for master in self.masters() {
            master.sync_power_on(timed);
            master.sd_counter_inc();
        }

        if let Err(err) = self.hw_power_on(self.sleep_timed(timed)) {
            log::error!("{}: power on during resume failed: {}", self.name(), err);
        }

        self.set_status(PowerStatus::Active);
        log::debug!("{}: sync powered on", self.name());
    }

    fn suspended_inc(&self) -> u32 {
        self.suspended_count.fetch_add(1, Ordering::AcqRel)
    }

    fn suspended_dec(&self) {
        let result = self
            .suspended_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });

        if result.is_err() {
            let err = DomainError::from_kind(ErrorKind::CounterUnderflow).with_domain(self.id());
            log::error!("{}: suspended counter: {}", self.name(), err);
        }
    }

    /// Device may stay powered to signal wakeups
    fn keeps_wakeup_power(&self, dev: &Device) -> bool {
        dev.model().wakeup_path() && self.dev_active_wakeup(dev)
    }
}

/// Device must be resumed before the system transition
///
/// A device whose wakeup setting disagrees with its domain's need to stay
/// on for wakeups has to be reconfigured, which requires it to be active.
pub fn resume_needed(dev: &Device, domain: &PowerDomain) -> bool {
    let model = dev.model();
    if !model.can_wakeup() {
        return false;
    }

    let active_wakeup = domain.dev_active_wakeup(dev);
    if model.may_wakeup() {
        active_wakeup
    } else {
        !active_wakeup
    }
}

// =============================================================================
// PREPARE / COMPLETE
// =============================================================================

/// Start of a system transition for one device
pub fn prepare(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: prepare", dev.name());

    let model = dev.model();

    // Keep runtime PM from suspending the device while we decide
    model.get_noresume();
    if model.barrier() && model.may_wakeup() {
        model.wakeup_event(0);
    }

    if model.wakeup_pending() {
        model.put();
        return Err(DomainError::new(ErrorKind::Busy, "Wakeup event pending")
            .with_domain(domain.id()));
    }

    if resume_needed(dev, &domain) {
        if let Err(err) = model.resume_sync() {
            log::warn!("{}: resume before prepare: {}", dev.name(), err);
        }
    }

    {
        let mut state = domain.lock();
        domain.prune_devices(&mut state);
        if state.prepared_count == 0 {
            domain.suspended_count.store(0, Ordering::Release);
            domain
                .suspend_power_off
                .store(domain.is_off(), Ordering::Release);
        }
        state.prepared_count += 1;
    }

    if domain.suspend_power_off() {
        model.put_noidle();
        return Ok(());
    }

    // Runtime PM is disabled for the rest of the transition, so the device
    // must be active to have a defined state from here on.
    if let Err(err) = model.resume_sync() {
        log::warn!("{}: resume in prepare: {}", dev.name(), err);
    }
    model.disable();

    let result = model.prepare();
    if result.is_err() {
        {
            let mut state = domain.lock();
            state.prepared_count = state.prepared_count.saturating_sub(1);
            if state.prepared_count == 0 {
                domain.suspend_power_off.store(false, Ordering::Release);
            }
        }
        model.enable();
    }

    model.put();
    result
}

/// End of a system transition for one device
pub fn complete(dev: &Device) {
    let Some(domain) = dev.pm_domain() else {
        log::warn!("{}: complete without a power domain", dev.name());
        return;
    };
    log::debug!("{}: complete", dev.name());

    let run_complete = {
        let mut state = domain.lock();
        let run_complete = !domain.suspend_power_off();

        match state.prepared_count.checked_sub(1) {
            Some(count) => state.prepared_count = count,
            None => {
                let err = DomainError::from_kind(ErrorKind::CounterUnderflow)
                    .with_domain(domain.id());
                log::error!("{}: prepared counter: {}", domain.name(), err);
            }
        }
        if state.prepared_count == 0 {
            domain.suspend_power_off.store(false, Ordering::Release);
        }

        run_complete
    };

    if !run_complete {
        return;
    }

    let model = dev.model();
    model.complete();
    if let Err(err) = model.set_active() {
        log::warn!("{}: set active after complete: {}", dev.name(), err);
    }
    model.enable();
    model.request_idle();
}

// =============================================================================
// GENERIC PHASES
// =============================================================================

/// Run a generic driver phase unless the domain stays off for this transition
fn generic_phase(
    dev: &Device,
    phase: &'static str,
    callback: impl FnOnce(&dyn crate::device::DeviceModel) -> DomainResult<()>,
) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: {}", dev.name(), phase);

    if domain.suspend_power_off() {
        return Ok(());
    }

    callback(dev.model())
}

/// Suspend phase (also used for poweroff)
pub fn suspend(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "suspend", |model| model.suspend())
}

/// Late suspend phase (also used for poweroff_late)
pub fn suspend_late(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "suspend_late", |model| model.suspend_late())
}

/// Early resume phase (also used for restore_early)
pub fn resume_early(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "resume_early", |model| model.resume_early())
}

/// Resume phase (also used for restore)
pub fn resume(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "resume", |model| model.resume())
}

/// Freeze phase of hibernation
pub fn freeze(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "freeze", |model| model.freeze())
}

/// Late freeze phase of hibernation
pub fn freeze_late(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "freeze_late", |model| model.freeze_late())
}

/// Early thaw phase of hibernation
pub fn thaw_early(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "thaw_early", |model| model.thaw_early())
}

/// Thaw phase of hibernation
pub fn thaw(dev: &Device) -> DomainResult<()> {
    generic_phase(dev, "thaw", |model| model.thaw())
}

// =============================================================================
// NOIRQ PHASES
// =============================================================================

/// Stop the device and power its domain down if it was the last one
pub fn suspend_noirq(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: suspend_noirq", dev.name());

    if domain.suspend_power_off() || domain.keeps_wakeup_power(dev) {
        return Ok(());
    }

    domain.stop_dev(dev)?;

    // Masters are not system-suspended through their own devices, so their
    // state is decided here as well.
    domain.suspended_inc();
    domain.sync_power_off(true);

    Ok(())
}

/// Restore power to the domain and start the device
pub fn resume_noirq(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: resume_noirq", dev.name());

    if domain.suspend_power_off() || domain.keeps_wakeup_power(dev) {
        return Ok(());
    }

    domain.sync_power_on(true);
    domain.suspended_dec();

    domain.start_dev(dev)
}

/// Stop the device for the hibernation image
pub fn freeze_noirq(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: freeze_noirq", dev.name());

    if domain.suspend_power_off() {
        return Ok(());
    }

    domain.stop_dev(dev)
}

/// Start the device after the hibernation image was created
pub fn thaw_noirq(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: thaw_noirq", dev.name());

    if domain.suspend_power_off() {
        return Ok(());
    }

    domain.start_dev(dev)
}

/// Bring the domain to a known state after loading a hibernation image
///
/// The boot kernel may have left the hardware in any state. The first device
/// of the domain to get here marks the domain off so that power is applied
/// again from scratch.
pub fn restore_noirq(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: restore_noirq", dev.name());

    if domain.suspended_inc() == 0 {
        domain.set_status(PowerStatus::PowerOff);

        if domain.suspend_power_off() {
            // Off before the transition, keep it off
            if let Err(err) = domain.hw_power_off(domain.sleep_timed(true)) {
                log::error!("{}: power off on restore failed: {}", domain.name(), err);
            }
            return Ok(());
        }
    }

    if domain.suspend_power_off() {
        return Ok(());
    }

    domain.sync_power_on(true);

    domain.start_dev(dev)
}

// =============================================================================
// SYSCORE
// =============================================================================

/// Domain of `dev` if it belongs to `registry`
fn syscore_domain(registry: &DomainRegistry, dev: &Device) -> Option<Arc<PowerDomain>> {
    let domain = dev.pm_domain()?;
    match registry.require_present(&domain) {
        Ok(()) => Some(domain),
        Err(err) => {
            log::debug!("{}: syscore switch skipped: {}", dev.name(), err);
            None
        }
    }
}

/// Power off the domain of a device in syscore context
///
/// Only for devices suspended after the noirq phase, with interrupts off.
pub fn syscore_power_off(registry: &DomainRegistry, dev: &Device) {
    let Some(domain) = syscore_domain(registry, dev) else {
        return;
    };

    domain.suspended_inc();
    domain.sync_power_off(false);
}

/// Power on the domain of a device in syscore context
pub fn syscore_power_on(registry: &DomainRegistry, dev: &Device) {
    let Some(domain) = syscore_domain(registry, dev) else {
        return;
    };

    domain.sync_power_on(false);
    domain.suspended_dec();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use crate::ops::DomainDeviceOps;
    use crate::testing::{attach_mock, registry_fixture, MockOps};
    use alloc::sync::Arc;

    struct WakeupOps;

    impl DomainDeviceOps for WakeupOps {
        fn active_wakeup(&self, _dev: &Device) -> bool {
            true
        }
    }

    fn run_suspend(dev: &Device) {
        prepare(dev).unwrap();
        suspend(dev).unwrap();
        suspend_late(dev).unwrap();
        suspend_noirq(dev).unwrap();
    }

    fn run_resume(dev: &Device) {
        resume_noirq(dev).unwrap();
        resume_early(dev).unwrap();
        resume(dev).unwrap();
        complete(dev);
    }

    #[test]
    fn test_prepare_complete_nesting() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (a, model_a) = attach_mock(&pd, "a");
        let (b, _model_b) = attach_mock(&pd, "b");

        prepare(&a).unwrap();
        prepare(&b).unwrap();
        assert_eq!(pd.prepared_count(), 2);
        assert!(!pd.suspend_power_off());
        assert!(!model_a.enabled.load(Ordering::SeqCst));

        complete(&a);
        assert_eq!(pd.prepared_count(), 1);
        complete(&b);
        assert_eq!(pd.prepared_count(), 0);
        assert!(model_a.enabled.load(Ordering::SeqCst));
        assert_eq!(model_a.calls(), ["prepare", "complete"]);
    }

    #[test]
    fn test_suspend_resume_cycle_through_masters() {
        let (registry, _clock) = registry_fixture();
        let master_ops = MockOps::new();
        let ops = MockOps::new();
        let master = registry
            .init_domain(DomainConfig::new("m").with_ops(master_ops.clone()))
            .unwrap();
        let pd = registry
            .init_domain(DomainConfig::new("d").with_ops(ops.clone()))
            .unwrap();
        registry.add_subdomain(&master, &pd).unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        run_suspend(&dev);
        assert!(pd.is_off());
        assert!(master.is_off());
        assert_eq!(master.sd_count(), 0);
        assert_eq!(pd.suspended_count(), 1);

        run_resume(&dev);
        assert!(pd.is_active());
        assert!(master.is_active());
        assert_eq!(master.sd_count(), 1);
        assert_eq!(pd.suspended_count(), 0);
        assert_eq!((ops.power_offs(), ops.power_ons()), (1, 1));
        assert_eq!((master_ops.power_offs(), master_ops.power_ons()), (1, 1));
        assert_eq!(
            model.calls(),
            ["prepare", "suspend", "suspend_late", "resume_early", "resume", "complete"]
        );
    }

    #[test]
    fn test_domain_waits_for_last_device() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (a, _model_a) = attach_mock(&pd, "a");
        let (b, _model_b) = attach_mock(&pd, "b");

        run_suspend(&a);
        assert!(pd.is_active());
        run_suspend(&b);
        assert!(pd.is_off());

        resume_noirq(&a).unwrap();
        assert!(pd.is_active());
        resume_noirq(&b).unwrap();
        assert_eq!(pd.suspended_count(), 0);
        complete(&a);
        complete(&b);
        assert_eq!(pd.prepared_count(), 0);
    }

    #[test]
    fn test_dropped_device_does_not_block_sleep() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (gone, _gone_model) = attach_mock(&pd, "gone");
        let (dev, _model) = attach_mock(&pd, "dev0");

        drop(gone);
        run_suspend(&dev);
        assert_eq!(pd.device_count(), 1);
        assert!(pd.is_off());

        resume_noirq(&dev).unwrap();
        complete(&dev);
        assert!(pd.is_active());
    }

    #[test]
    fn test_domain_off_before_transition_stays_off() {
        let (registry, _clock) = registry_fixture();
        let ops = MockOps::new();
        let pd = registry
            .init_domain(DomainConfig::new("d").initially_off(true).with_ops(ops.clone()))
            .unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        run_suspend(&dev);
        assert!(pd.suspend_power_off());
        assert_eq!(pd.suspended_count(), 0);

        run_resume(&dev);
        assert!(pd.is_off());
        assert!(!pd.suspend_power_off());
        assert_eq!((ops.power_offs(), ops.power_ons()), (0, 0));
        assert!(model.calls().is_empty());
    }

    #[test]
    fn test_pending_wakeup_aborts_prepare() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");
        model.wakeup_pending.store(true, Ordering::SeqCst);

        assert_eq!(prepare(&dev).unwrap_err().kind(), ErrorKind::Busy);
        assert_eq!(pd.prepared_count(), 0);
        assert!(model.enabled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_prepare_unwinds() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");
        model.fail_prepare.store(true, Ordering::SeqCst);

        assert!(prepare(&dev).is_err());
        assert_eq!(pd.prepared_count(), 0);
        assert!(!pd.suspend_power_off());
        assert!(model.enabled.load(Ordering::SeqCst));

        // Attach works again once nothing is prepared
        let (_other, _) = attach_mock(&pd, "dev1");
        assert_eq!(pd.device_count(), 2);
    }

    #[test]
    fn test_wakeup_device_keeps_domain_powered() {
        let (registry, _clock) = registry_fixture();
        let pd = registry
            .init_domain(DomainConfig::new("d").with_device_ops(Arc::new(WakeupOps)))
            .unwrap();
        let (dev, model) = attach_mock(&pd, "eth0");
        model.wakeup_path.store(true, Ordering::SeqCst);

        run_suspend(&dev);
        assert!(pd.is_active());
        assert_eq!(pd.suspended_count(), 0);
        run_resume(&dev);
        assert_eq!(pd.suspended_count(), 0);
    }

    #[test]
    fn test_resume_needed_follows_wakeup_setting() {
        let (registry, _clock) = registry_fixture();
        let plain = registry.init_domain(DomainConfig::new("plain")).unwrap();
        let wake = registry
            .init_domain(DomainConfig::new("wake").with_device_ops(Arc::new(WakeupOps)))
            .unwrap();
        let (dev, model) = attach_mock(&plain, "dev0");

        assert!(!resume_needed(&dev, &plain));

        model.can_wakeup.store(true, Ordering::SeqCst);
        assert!(resume_needed(&dev, &plain));
        assert!(!resume_needed(&dev, &wake));

        model.may_wakeup.store(true, Ordering::SeqCst);
        assert!(!resume_needed(&dev, &plain));
        assert!(resume_needed(&dev, &wake));
    }

    #[test]
    fn test_freeze_thaw_keep_power() {
        let (registry, _clock) = registry_fixture();
        let ops = MockOps::new();
        let pd = registry
            .init_domain(DomainConfig::new("d").with_ops(ops.clone()))
            .unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        prepare(&dev).unwrap();
        freeze(&dev).unwrap();
        freeze_late(&dev).unwrap();
        freeze_noirq(&dev).unwrap();
        thaw_noirq(&dev).unwrap();
        thaw_early(&dev).unwrap();
        thaw(&dev).unwrap();
        complete(&dev);

        assert!(pd.is_active());
        assert_eq!(ops.power_offs(), 0);
        assert_eq!(
            model.calls(),
            ["prepare", "freeze", "freeze_late", "thaw_early", "thaw", "complete"]
        );
    }

    #[test]
    fn test_restore_reapplies_power() {
        let (registry, _clock) = registry_fixture();
        let ops = MockOps::new();
        let pd = registry
            .init_domain(DomainConfig::new("d").with_ops(ops.clone()))
            .unwrap();
        let (a, _) = attach_mock(&pd, "a");
        let (b, _) = attach_mock(&pd, "b");

        prepare(&a).unwrap();
        prepare(&b).unwrap();
        restore_noirq(&a).unwrap();
        restore_noirq(&b).unwrap();

        assert!(pd.is_active());
        assert_eq!(pd.suspended_count(), 2);
        assert_eq!(ops.power_ons(), 1);
    }

    #[test]
    fn test_restore_keeps_off_domain_off() {
        let (registry, _clock) = registry_fixture();
        let ops = MockOps::new();
        let pd = registry
            .init_domain(DomainConfig::new("d").initially_off(true).with_ops(ops.clone()))
            .unwrap();
        let (dev, _) = attach_mock(&pd, "dev0");

        prepare(&dev).unwrap();
        restore_noirq(&dev).unwrap();

        assert!(pd.is_off());
        assert_eq!(ops.power_offs(), 1);
        assert_eq!(ops.power_ons(), 0);
    }

    #[test]
    fn test_syscore_round_trip() {
        let (registry, _clock) = registry_fixture();
        let master = registry.init_domain(DomainConfig::new("m")).unwrap();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        registry.add_subdomain(&master, &pd).unwrap();
        let (dev, _) = attach_mock(&pd, "timer0");

        syscore_power_off(&registry, &dev);
        assert!(pd.is_off() && master.is_off());

        syscore_power_on(&registry, &dev);
        assert!(pd.is_active() && master.is_active());
        assert_eq!(master.sd_count(), 1);
        assert_eq!(pd.suspended_count(), 0);
    }

    #[test]
    fn test_suspended_counter_underflow_is_refused() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (dev, _) = attach_mock(&pd, "dev0");

        syscore_power_on(&registry, &dev);
        assert_eq!(pd.suspended_count(), 0);
    }

    #[test]
    fn test_syscore_ignores_foreign_domain() {
        let (registry, _clock) = registry_fixture();
        let (other, _other_clock) = registry_fixture();
        let ops = MockOps::new();
        let pd = other
            .init_domain(DomainConfig::new("d").with_ops(ops.clone()))
            .unwrap();
        let (dev, _) = attach_mock(&pd, "timer0");

        syscore_power_off(&registry, &dev);
        assert!(pd.is_active());
        assert_eq!(pd.suspended_count(), 0);
        assert_eq!(ops.power_offs(), 0);

        syscore_power_off(&other, &dev);
        assert!(pd.is_off());
    }
}
