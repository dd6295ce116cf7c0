//! # Runtime PM Callbacks
//!
//! Runtime suspend saves and stops the device, then tries to power the
//! domain down synchronously on the device's behalf. Runtime resume powers
//! the domain (and its masters) up before starting and restoring the device.
//!
//! Devices marked irq-safe never trigger domain power transitions: their
//! callbacks may run in atomic context where the domain lock cannot be taken.

use crate::device::Device;
use crate::domain::PowerDomain;
use crate::error::{DomainError, DomainResult, ErrorKind};
use crate::ops::DomainFlags;
use crate::time::elapsed_since;

impl PowerDomain {
    pub(crate) fn stop_dev(&self, dev: &Device) -> DomainResult<()> {
        match self.clock_gating() {
            Some(clk) => clk.suspend(dev),
            None => self.dev_ops.stop(dev),
        }
    }

    pub(crate) fn start_dev(&self, dev: &Device) -> DomainResult<()> {
        match self.clock_gating() {
            Some(clk) => clk.resume(dev),
            None => self.dev_ops.start(dev),
        }
    }

    pub(crate) fn save_dev(&self, dev: &Device) -> DomainResult<()> {
        self.dev_ops.save_state(dev)
    }

    pub(crate) fn restore_dev(&self, dev: &Device) -> DomainResult<()> {
        self.dev_ops.restore_state(dev)
    }

    pub(crate) fn dev_active_wakeup(&self, dev: &Device) -> bool {
        self.dev_ops.active_wakeup(dev)
    }

    fn clock_gating(&self) -> Option<&dyn crate::ops::PmClockOps> {
        if self.flags.contains(DomainFlags::PM_CLK) {
            self.clock_ops.as_deref()
        } else {
            None
        }
    }

    fn record_suspend_latency(&self, dev: &Device, elapsed: u64) {
        let Some(data) = dev.domain_data() else {
            return;
        };

        let exceeded = data.update_timing(|td| {
            if elapsed <= td.suspend_latency_ns {
                return false;
            }
            td.suspend_latency_ns = elapsed;
            td.constraint_changed = true;
            true
        });

        if exceeded {
            log::debug!("{}: suspend latency exceeded, {} ns", dev.name(), elapsed);
            self.mark_max_off_time_changed();
        }
    }

    fn record_resume_latency(&self, dev: &Device, elapsed: u64) {
        let Some(data) = dev.domain_data() else {
            return;
        };

        let exceeded = data.update_timing(|td| {
            if elapsed <= td.resume_latency_ns {
                return false;
            }
            td.resume_latency_ns = elapsed;
            td.constraint_changed = true;
            true
        });

        if exceeded {
            log::debug!("{}: resume latency exceeded, {} ns", dev.name(), elapsed);
            self.mark_max_off_time_changed();
        }
    }

    /// Give the domain back after a resume that did not complete
    fn abort_resume(&self, irq_safe: bool) {
        if irq_safe {
            return;
        }

        let mut state = self.lock();
        if let Err(err) = self.power_off_locked(&mut state, false) {
            log::debug!("{}: power off after failed resume: {}", self.name(), err);
        }
    }
}

/// Runtime suspend of a device in a domain
pub fn runtime_suspend(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: runtime suspend", dev.name());

    let model = dev.model();
    let runtime_pm = model.runtime_enabled();

    if runtime_pm {
        if let Some(governor) = domain.governor() {
            if !governor.stop_ok(dev) {
                return Err(DomainError::new(ErrorKind::Busy, "Governor refused device stop")
                    .with_domain(domain.id()));
            }
        }
    }

    let start = domain.clock.now_ns();

    domain.save_dev(dev)?;
    if let Err(err) = domain.stop_dev(dev) {
        if let Err(restore_err) = domain.restore_dev(dev) {
            log::warn!("{}: restore after failed stop: {}", dev.name(), restore_err);
        }
        return Err(err);
    }

    if runtime_pm {
        domain.record_suspend_latency(dev, elapsed_since(&*domain.clock, start));
    }

    // The domain is never powered off for irq-safe devices
    if model.irq_safe() {
        return Ok(());
    }

    let mut state = domain.lock();
    if let Err(err) = domain.power_off_locked(&mut state, false) {
        log::debug!("{}: domain stays on: {}", domain.name(), err);
    }

    Ok(())
}

/// Runtime resume of a device in a domain
pub fn runtime_resume(dev: &Device) -> DomainResult<()> {
    let domain = dev.require_domain()?;
    log::debug!("{}: runtime resume", dev.name());

    let model = dev.model();
    let irq_safe = model.irq_safe();
    let timed = !irq_safe && model.runtime_enabled();

    if !irq_safe {
        let mut state = domain.lock();
        domain.power_on_locked(&mut state)?;
    }

    let start = domain.clock.now_ns();

    if let Err(err) = domain.start_dev(dev) {
        domain.abort_resume(irq_safe);
        return Err(err);
    }

    if let Err(err) = domain.restore_dev(dev) {
        if let Err(stop_err) = domain.stop_dev(dev) {
            log::warn!("{}: stop after failed restore: {}", dev.name(), stop_err);
        }
        domain.abort_resume(irq_safe);
        return Err(err);
    }

    if timed {
        domain.record_resume_latency(dev, elapsed_since(&*domain.clock, start));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use crate::device::RuntimeStatus;
    use crate::ops::{DomainDeviceOps, PmClockOps};
    use crate::testing::{attach_mock, registry_fixture, rpm_resume, rpm_suspend, MockOps};
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingClk {
        gated: AtomicU32,
        ungated: AtomicU32,
    }

    impl PmClockOps for CountingClk {
        fn suspend(&self, _dev: &Device) -> DomainResult<()> {
            self.gated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn resume(&self, _dev: &Device) -> DomainResult<()> {
            self.ungated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingStop;

    impl DomainDeviceOps for FailingStop {
        fn stop(&self, _dev: &Device) -> DomainResult<()> {
            Err(DomainError::from_kind(ErrorKind::HardwareError))
        }
    }

    #[test]
    fn test_irq_safe_device_keeps_domain_on() {
        let (registry, _clock) = registry_fixture();
        let ops = MockOps::new();
        let pd = registry
            .init_domain(DomainConfig::new("d").with_ops(ops.clone()))
            .unwrap();
        let (dev, model) = attach_mock(&pd, "timer0");
        model.irq_safe.store(true, Ordering::SeqCst);

        rpm_suspend(&dev, &model).unwrap();
        assert!(pd.is_active());
        assert_eq!(model.driver_suspends.load(Ordering::SeqCst), 1);

        rpm_resume(&dev, &model).unwrap();
        assert_eq!(ops.power_ons(), 0);
        assert_eq!(model.driver_resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_failure_restores_device() {
        let (registry, _clock) = registry_fixture();
        let pd = registry
            .init_domain(DomainConfig::new("d").with_device_ops(Arc::new(FailingStop)))
            .unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        let err = rpm_suspend(&dev, &model).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareError);
        assert_eq!(model.driver_suspends.load(Ordering::SeqCst), 1);
        assert_eq!(model.driver_resumes.load(Ordering::SeqCst), 1);
        assert_eq!(model.status(), RuntimeStatus::Active);
        assert!(pd.is_active());
    }

    #[test]
    fn test_pm_clk_routes_start_stop() {
        let (registry, _clock) = registry_fixture();
        let clk = Arc::new(CountingClk::default());
        let pd = registry
            .init_domain(
                DomainConfig::new("d")
                    .with_flags(DomainFlags::PM_CLK)
                    .with_clock_ops(clk.clone()),
            )
            .unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        rpm_suspend(&dev, &model).unwrap();
        rpm_resume(&dev, &model).unwrap();
        assert_eq!(clk.gated.load(Ordering::SeqCst), 1);
        assert_eq!(clk.ungated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resume_failure_propagates_and_unwinds() {
        let (registry, _clock) = registry_fixture();
        let master = registry.init_domain(DomainConfig::new("m")).unwrap();
        let ops = MockOps::new();
        let pd = registry
            .init_domain(DomainConfig::new("d").with_ops(ops.clone()))
            .unwrap();
        registry.add_subdomain(&master, &pd).unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        rpm_suspend(&dev, &model).unwrap();
        assert!(pd.is_off());
        assert_eq!(master.sd_count(), 0);

        ops.fail_power_on.store(true, Ordering::SeqCst);
        let err = rpm_resume(&dev, &model).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareError);
        assert!(pd.is_off());
        assert_eq!(master.sd_count(), 0);
        assert_eq!(model.status(), RuntimeStatus::Suspended);
    }

    #[test]
    fn test_restore_failure_gives_domain_back() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        rpm_suspend(&dev, &model).unwrap();
        model.fail_driver_resume.store(true, Ordering::SeqCst);

        assert!(rpm_resume(&dev, &model).is_err());
        assert!(pd.is_off());
    }

    #[test]
    fn test_device_latencies_recorded() {
        let (registry, clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");
        model.set_clock(clock.clone(), 700);

        rpm_suspend(&dev, &model).unwrap();
        rpm_resume(&dev, &model).unwrap();

        let timing = dev.timing().unwrap();
        assert_eq!(timing.suspend_latency_ns, 700);
        assert_eq!(timing.resume_latency_ns, 700);
        assert!(timing.constraint_changed);
    }
}
