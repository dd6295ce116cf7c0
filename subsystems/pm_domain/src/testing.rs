//! Shared test doubles: a manual clock, a scriptable device model and
//! scriptable domain hardware.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::config::GenpdConfig;
use crate::device::{Device, DeviceModel, QosFlags, RuntimePm, RuntimeStatus};
use crate::domain::PowerDomain;
use crate::error::{DomainError, DomainResult, ErrorKind};
use crate::ops::DomainOps;
use crate::registry::DomainRegistry;
use crate::runtime;
use crate::time::{Clock, NSEC_PER_MSEC};

// =============================================================================
// CLOCK
// =============================================================================

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_ms(&self, ms: u64) {
        self.advance(ms * NSEC_PER_MSEC);
    }
}

// =============================================================================
// DEVICE MODEL
// =============================================================================

/// Device model with observable callbacks
#[derive(Debug)]
pub struct MockDevice {
    status: Mutex<RuntimeStatus>,
    calls: Mutex<Vec<&'static str>>,
    latency: Mutex<Option<(Arc<ManualClock>, u64)>>,

    pub enabled: AtomicBool,
    pub runtime_error: AtomicBool,
    pub irq_safe: AtomicBool,
    pub ignore_children: AtomicBool,
    pub can_wakeup: AtomicBool,
    pub may_wakeup: AtomicBool,
    pub wakeup_path: AtomicBool,
    pub wakeup_pending: AtomicBool,
    pub fail_prepare: AtomicBool,
    pub fail_driver_resume: AtomicBool,

    pub qos_flags: Mutex<QosFlags>,
    pub resume_latency_ns: Mutex<Option<u64>>,

    pub driver_suspends: AtomicU32,
    pub driver_resumes: AtomicU32,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(RuntimeStatus::Active),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            enabled: AtomicBool::new(true),
            runtime_error: AtomicBool::new(false),
            irq_safe: AtomicBool::new(false),
            ignore_children: AtomicBool::new(false),
            can_wakeup: AtomicBool::new(false),
            may_wakeup: AtomicBool::new(false),
            wakeup_path: AtomicBool::new(false),
            wakeup_pending: AtomicBool::new(false),
            fail_prepare: AtomicBool::new(false),
            fail_driver_resume: AtomicBool::new(false),
            qos_flags: Mutex::new(QosFlags::empty()),
            resume_latency_ns: Mutex::new(None),
            driver_suspends: AtomicU32::new(0),
            driver_resumes: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: RuntimeStatus) {
        *self.status.lock() = status;
    }

    /// Make each driver runtime callback take `ns` on `clock`
    pub fn set_clock(&self, clock: Arc<ManualClock>, ns: u64) {
        *self.latency.lock() = Some((clock, ns));
    }

    /// Generic system-sleep callbacks run so far
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &'static str) -> DomainResult<()> {
        self.calls.lock().push(call);
        Ok(())
    }

    fn spend_time(&self) {
        if let Some((clock, ns)) = self.latency.lock().as_ref() {
            clock.advance(*ns);
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimePm for MockDevice {
    fn runtime_status(&self) -> RuntimeStatus {
        self.status()
    }

    fn runtime_error(&self) -> bool {
        self.runtime_error.load(Ordering::SeqCst)
    }

    fn runtime_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn irq_safe(&self) -> bool {
        self.irq_safe.load(Ordering::SeqCst)
    }

    fn resume_sync(&self) -> DomainResult<()> {
        self.set_status(RuntimeStatus::Active);
        Ok(())
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn set_active(&self) -> DomainResult<()> {
        self.set_status(RuntimeStatus::Active);
        Ok(())
    }
}

impl DeviceModel for MockDevice {
    fn prepare(&self) -> DomainResult<()> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(DomainError::from_kind(ErrorKind::HardwareError));
        }
        self.record("prepare")
    }

    fn suspend(&self) -> DomainResult<()> {
        self.record("suspend")
    }

    fn suspend_late(&self) -> DomainResult<()> {
        self.record("suspend_late")
    }

    fn resume_early(&self) -> DomainResult<()> {
        self.record("resume_early")
    }

    fn resume(&self) -> DomainResult<()> {
        self.record("resume")
    }

    fn freeze(&self) -> DomainResult<()> {
        self.record("freeze")
    }

    fn freeze_late(&self) -> DomainResult<()> {
        self.record("freeze_late")
    }

    fn thaw_early(&self) -> DomainResult<()> {
        self.record("thaw_early")
    }

    fn thaw(&self) -> DomainResult<()> {
        self.record("thaw")
    }

    fn complete(&self) {
        self.calls.lock().push("complete");
    }

    fn runtime_suspend(&self) -> DomainResult<()> {
        self.spend_time();
        self.driver_suspends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn runtime_resume(&self) -> DomainResult<()> {
        self.spend_time();
        if self.fail_driver_resume.load(Ordering::SeqCst) {
            return Err(DomainError::from_kind(ErrorKind::HardwareError));
        }
        self.driver_resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn can_wakeup(&self) -> bool {
        self.can_wakeup.load(Ordering::SeqCst)
    }

    fn may_wakeup(&self) -> bool {
        self.may_wakeup.load(Ordering::SeqCst)
    }

    fn wakeup_path(&self) -> bool {
        self.wakeup_path.load(Ordering::SeqCst)
    }

    fn wakeup_pending(&self) -> bool {
        self.wakeup_pending.load(Ordering::SeqCst)
    }

    fn qos_flags(&self) -> QosFlags {
        *self.qos_flags.lock()
    }

    fn qos_resume_latency_ns(&self) -> Option<u64> {
        *self.resume_latency_ns.lock()
    }

    fn ignore_children(&self) -> bool {
        self.ignore_children.load(Ordering::SeqCst)
    }
}

// =============================================================================
// DOMAIN HARDWARE
// =============================================================================

/// Domain hardware counting its transitions
#[derive(Debug, Default)]
pub struct MockOps {
    clock: Option<Arc<ManualClock>>,

    pub fail_power_on: AtomicBool,
    pub fail_power_off: AtomicBool,
    pub busy_power_off: AtomicBool,
    pub fail_attach: AtomicBool,
    pub latency_ns: AtomicU64,

    pub attaches: AtomicU32,
    pub detaches: AtomicU32,
    power_ons: AtomicU32,
    power_offs: AtomicU32,
}

impl MockOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transitions advance `clock` by `latency_ns`
    pub fn with_clock(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock: Some(clock),
            ..Self::default()
        })
    }

    pub fn power_ons(&self) -> u32 {
        self.power_ons.load(Ordering::SeqCst)
    }

    pub fn power_offs(&self) -> u32 {
        self.power_offs.load(Ordering::SeqCst)
    }

    fn spend_time(&self) {
        if let Some(clock) = &self.clock {
            clock.advance(self.latency_ns.load(Ordering::SeqCst));
        }
    }
}

impl DomainOps for MockOps {
    fn power_on(&self, _domain: &PowerDomain) -> DomainResult<()> {
        if self.fail_power_on.load(Ordering::SeqCst) {
            return Err(DomainError::from_kind(ErrorKind::HardwareError));
        }
        self.spend_time();
        self.power_ons.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn power_off(&self, _domain: &PowerDomain) -> DomainResult<()> {
        if self.busy_power_off.load(Ordering::SeqCst) {
            return Err(DomainError::from_kind(ErrorKind::Busy));
        }
        if self.fail_power_off.load(Ordering::SeqCst) {
            return Err(DomainError::from_kind(ErrorKind::HardwareError));
        }
        self.spend_time();
        self.power_offs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn attach_dev(&self, _domain: &PowerDomain, _dev: &Device) -> DomainResult<()> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(DomainError::from_kind(ErrorKind::HardwareError));
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach_dev(&self, _domain: &PowerDomain, _dev: &Device) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

/// Fresh registry driven by a manual clock
pub fn registry_fixture() -> (DomainRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let registry = DomainRegistry::with_clock(GenpdConfig::default(), clock.clone());
    (registry, clock)
}

/// Attach a fresh mock device to `domain`
pub fn attach_mock(domain: &Arc<PowerDomain>, name: &str) -> (Arc<Device>, Arc<MockDevice>) {
    let model = Arc::new(MockDevice::new());
    let dev = Device::new(name, model.clone());
    domain.add_device(&dev).unwrap();
    (dev, model)
}

/// Runtime suspend as the runtime-PM core would drive it
pub fn rpm_suspend(dev: &Device, model: &MockDevice) -> DomainResult<()> {
    model.set_status(RuntimeStatus::Suspending);
    let result = runtime::runtime_suspend(dev);
    model.set_status(if result.is_ok() {
        RuntimeStatus::Suspended
    } else {
        RuntimeStatus::Active
    });
    result
}

/// Runtime resume as the runtime-PM core would drive it
pub fn rpm_resume(dev: &Device, model: &MockDevice) -> DomainResult<()> {
    model.set_status(RuntimeStatus::Resuming);
    let result = runtime::runtime_resume(dev);
    model.set_status(if result.is_ok() {
        RuntimeStatus::Active
    } else {
        RuntimeStatus::Suspended
    });
    result
}
