//! # Device Records
//!
//! The core does not own the device model. Drivers and the runtime-PM layer
//! are reached through two capability traits:
//!
//! - [`RuntimePm`]: runtime status tracking and usage counting
//! - [`DeviceModel`]: driver callbacks, wakeup capabilities and QoS state
//!
//! A [`Device`] wraps one such model together with the PM record the core
//! manages for it: the domain slot, the attachment data and the detach/sync
//! hooks installed by automatic attach.
//!
//! ```text
//!   Device ──────────────┐
//!   │ name, parent, node │
//!   │ model ─────────────┼──▶ dyn DeviceModel (driver + runtime PM)
//!   │ power (Mutex)      │
//!   │   domain ──────────┼──▶ Arc<PowerDomain>
//!   │   domain_data ─────┼──▶ Arc<DomainData> ◀── Weak<Device> in domain list
//!   └────────────────────┘
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::domain::PowerDomain;
use crate::error::{DomainError, DomainResult, ErrorKind};
use crate::provider::DeviceNode;

// =============================================================================
// RUNTIME PM CAPABILITY
// =============================================================================

/// Runtime power status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeStatus {
    /// Fully operational
    Active,
    /// Resume callback in progress
    Resuming,
    /// Suspended
    Suspended,
    /// Suspend callback in progress
    Suspending,
}

impl RuntimeStatus {
    /// Name used in the summary dump
    pub const fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Active => "active",
            RuntimeStatus::Resuming => "resuming",
            RuntimeStatus::Suspended => "suspended",
            RuntimeStatus::Suspending => "suspending",
        }
    }
}

/// Runtime-PM status tracking provided by the device model
pub trait RuntimePm: Send + Sync {
    /// Current runtime status
    fn runtime_status(&self) -> RuntimeStatus;

    /// Last runtime transition failed
    fn runtime_error(&self) -> bool {
        false
    }

    /// Runtime PM is enabled for the device
    fn runtime_enabled(&self) -> bool {
        true
    }

    /// Suspended with runtime PM enabled
    fn is_runtime_suspended(&self) -> bool {
        self.runtime_status() == RuntimeStatus::Suspended && self.runtime_enabled()
    }

    /// Runtime callbacks may run in atomic context
    fn irq_safe(&self) -> bool {
        false
    }

    /// Take a usage reference without resuming
    fn get_noresume(&self) {}

    /// Drop a usage reference, possibly queueing an idle check
    fn put(&self) {}

    /// Drop a usage reference without an idle check
    fn put_noidle(&self) {}

    /// Flush pending runtime requests; true if a resume was pending
    fn barrier(&self) -> bool {
        false
    }

    /// Synchronously resume the device
    fn resume_sync(&self) -> DomainResult<()> {
        Ok(())
    }

    /// Disable runtime PM
    fn disable(&self) {}

    /// Enable runtime PM
    fn enable(&self) {}

    /// Force the runtime status to active
    fn set_active(&self) -> DomainResult<()> {
        Ok(())
    }

    /// Queue an idle check
    fn request_idle(&self) {}
}

bitflags! {
    /// Device QoS flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QosFlags: u32 {
        /// The device's domain must never be powered off
        const NO_POWER_OFF = 1 << 0;
        /// The device signals wakeups while suspended
        const REMOTE_WAKEUP = 1 << 1;
    }
}

/// Driver and device-model callbacks for one device
pub trait DeviceModel: RuntimePm {
    // -------------------------------------------------------------------------
    // System sleep (generic driver callbacks)
    // -------------------------------------------------------------------------

    fn prepare(&self) -> DomainResult<()> {
        Ok(())
    }

    fn suspend(&self) -> DomainResult<()> {
        Ok(())
    }

    fn suspend_late(&self) -> DomainResult<()> {
        Ok(())
    }

    fn resume_early(&self) -> DomainResult<()> {
        Ok(())
    }

    fn resume(&self) -> DomainResult<()> {
        Ok(())
    }

    fn freeze(&self) -> DomainResult<()> {
        Ok(())
    }

    fn freeze_late(&self) -> DomainResult<()> {
        Ok(())
    }

    fn thaw_early(&self) -> DomainResult<()> {
        Ok(())
    }

    fn thaw(&self) -> DomainResult<()> {
        Ok(())
    }

    fn complete(&self) {}

    // -------------------------------------------------------------------------
    // Runtime driver callbacks
    // -------------------------------------------------------------------------

    /// Driver runtime suspend (default device state save)
    fn runtime_suspend(&self) -> DomainResult<()> {
        Ok(())
    }

    /// Driver runtime resume (default device state restore)
    fn runtime_resume(&self) -> DomainResult<()> {
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Wakeup
    // -------------------------------------------------------------------------

    fn can_wakeup(&self) -> bool {
        false
    }

    fn may_wakeup(&self) -> bool {
        false
    }

    /// Device is on the path of a wakeup source
    fn wakeup_path(&self) -> bool {
        false
    }

    /// Report a wakeup event
    fn wakeup_event(&self, _msec: u32) {}

    /// A system wakeup is pending and the transition should abort
    fn wakeup_pending(&self) -> bool {
        false
    }

    // -------------------------------------------------------------------------
    // QoS
    // -------------------------------------------------------------------------

    fn qos_flags(&self) -> QosFlags {
        QosFlags::empty()
    }

    /// Resume latency the device tolerates; `None` if unconstrained
    fn qos_resume_latency_ns(&self) -> Option<u64> {
        None
    }

    /// Parent PM does not track this device's children
    fn ignore_children(&self) -> bool {
        false
    }
}

// =============================================================================
// ATTACHMENT DATA
// =============================================================================

/// Per-device timing bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingData {
    /// Worst observed save+stop time
    pub suspend_latency_ns: u64,
    /// Worst observed start+restore time
    pub resume_latency_ns: u64,
    /// Off-time budget this device leaves its domain; `None` if unconstrained
    pub effective_constraint_ns: Option<u64>,
    /// QoS layer must be re-queried
    pub constraint_changed: bool,
    /// Governor's last stop decision
    pub cached_stop_ok: bool,
}

impl Default for TimingData {
    fn default() -> Self {
        Self {
            suspend_latency_ns: 0,
            resume_latency_ns: 0,
            effective_constraint_ns: None,
            constraint_changed: true,
            cached_stop_ok: true,
        }
    }
}

/// Attachment record binding a device to its domain
#[derive(Debug)]
pub struct DomainData {
    timing: Mutex<TimingData>,
    notifier: AtomicBool,
}

impl DomainData {
    pub(crate) fn new(timing: Option<TimingData>) -> Self {
        let mut timing = timing.unwrap_or_default();
        timing.constraint_changed = true;
        timing.effective_constraint_ns = None;

        Self {
            timing: Mutex::new(timing),
            notifier: AtomicBool::new(false),
        }
    }

    /// Snapshot of the timing data
    pub fn timing(&self) -> TimingData {
        *self.timing.lock()
    }

    pub(crate) fn update_timing<R>(&self, f: impl FnOnce(&mut TimingData) -> R) -> R {
        f(&mut self.timing.lock())
    }

    /// QoS notifier is registered
    pub fn notifier_registered(&self) -> bool {
        self.notifier.load(Ordering::Acquire)
    }

    pub(crate) fn set_notifier(&self, registered: bool) {
        self.notifier.store(registered, Ordering::Release);
    }
}

// =============================================================================
// DEVICE
// =============================================================================

/// Hook removing a device from its domain (`power_off` queues a power-off)
pub type DetachHook = fn(&Device, bool);

/// Hook letting the domain re-evaluate after a failed probe
pub type SyncHook = fn(&Device);

#[derive(Default)]
pub(crate) struct DevicePower {
    pub(crate) domain: Option<Arc<PowerDomain>>,
    pub(crate) domain_data: Option<Arc<DomainData>>,
    pub(crate) detach: Option<DetachHook>,
    pub(crate) sync: Option<SyncHook>,
}

/// A device as seen by the power-domain core
pub struct Device {
    name: String,
    parent: Option<Arc<Device>>,
    of_node: Option<Arc<dyn DeviceNode>>,
    model: Arc<dyn DeviceModel>,
    pub(crate) power: Mutex<DevicePower>,
}

/// Builder for [`Device`]
pub struct DeviceBuilder {
    name: String,
    parent: Option<Arc<Device>>,
    of_node: Option<Arc<dyn DeviceNode>>,
    model: Arc<dyn DeviceModel>,
}

impl DeviceBuilder {
    /// Set the parent device
    pub fn parent(mut self, parent: Arc<Device>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the firmware node
    pub fn of_node(mut self, node: Arc<dyn DeviceNode>) -> Self {
        self.of_node = Some(node);
        self
    }

    /// Build the device
    pub fn build(self) -> Arc<Device> {
        Arc::new(Device {
            name: self.name,
            parent: self.parent,
            of_node: self.of_node,
            model: self.model,
            power: Mutex::new(DevicePower::default()),
        })
    }
}

impl Device {
    /// Create new device with no parent and no firmware node
    pub fn new(name: impl Into<String>, model: Arc<dyn DeviceModel>) -> Arc<Self> {
        Self::builder(name, model).build()
    }

    /// Start building a device
    pub fn builder(name: impl Into<String>, model: Arc<dyn DeviceModel>) -> DeviceBuilder {
        DeviceBuilder {
            name: name.into(),
            parent: None,
            of_node: None,
            model,
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent device
    pub fn parent(&self) -> Option<&Arc<Device>> {
        self.parent.as_ref()
    }

    /// Firmware node
    pub fn of_node(&self) -> Option<&Arc<dyn DeviceNode>> {
        self.of_node.as_ref()
    }

    /// Driver / device-model callbacks
    pub fn model(&self) -> &dyn DeviceModel {
        &*self.model
    }

    /// Domain the device is attached to
    pub fn pm_domain(&self) -> Option<Arc<PowerDomain>> {
        self.power.lock().domain.clone()
    }

    /// Attachment record
    pub fn domain_data(&self) -> Option<Arc<DomainData>> {
        self.power.lock().domain_data.clone()
    }

    /// Timing data of the attachment
    pub fn timing(&self) -> Option<TimingData> {
        self.domain_data().map(|data| data.timing())
    }

    /// Domain the device is attached to, or InvalidArgument
    pub(crate) fn require_domain(&self) -> DomainResult<Arc<PowerDomain>> {
        self.pm_domain().ok_or_else(|| {
            DomainError::new(ErrorKind::InvalidArgument, "Device has no power domain")
        })
    }

    /// Claim the attachment slot
    pub(crate) fn claim_domain_data(
        &self,
        timing: Option<TimingData>,
    ) -> DomainResult<Arc<DomainData>> {
        let mut power = self.power.lock();
        if power.domain_data.is_some() {
            return Err(DomainError::new(
                ErrorKind::InvalidArgument,
                "Device already attached to a domain",
            ));
        }

        let data = Arc::new(DomainData::new(timing));
        power.domain_data = Some(data.clone());
        Ok(data)
    }

    /// Release the attachment slot
    pub(crate) fn release_domain_data(&self) {
        let mut power = self.power.lock();
        power.domain_data = None;
    }

    pub(crate) fn set_pm_domain(&self, domain: Option<Arc<PowerDomain>>) {
        self.power.lock().domain = domain;
    }

    pub(crate) fn set_hooks(&self, detach: Option<DetachHook>, sync: Option<SyncHook>) {
        let mut power = self.power.lock();
        power.detach = detach;
        power.sync = sync;
    }

    /// Detach through the hook installed at automatic attach
    pub fn pm_domain_detach(&self, power_off: bool) {
        let hook = self.power.lock().detach;
        if let Some(detach) = hook {
            detach(self, power_off);
        }
    }

    /// Let the domain re-evaluate after the driver failed to bind
    pub fn pm_domain_sync(&self) {
        let hook = self.power.lock().sync;
        if let Some(sync) = hook {
            sync(self);
        }
    }

    /// Resume-latency constraint of this device changed
    ///
    /// Marks the attachment dirty and the domain's off-time cache stale,
    /// walking up parents until one ignores its children.
    pub fn notify_qos_change(&self) {
        match self.domain_data() {
            Some(data) if data.notifier_registered() => {}
            _ => return,
        }

        let mut dev = self;
        loop {
            let (data, domain) = {
                let power = dev.power.lock();
                (power.domain_data.clone(), power.domain.clone())
            };

            if let (Some(data), Some(domain)) = (data, domain) {
                data.update_timing(|td| td.constraint_changed = true);
                domain.mark_max_off_time_changed();
            }

            match dev.parent() {
                Some(parent) if !parent.model().ignore_children() => dev = parent,
                _ => break,
            }
        }
    }
}

impl fmt::Debug for DeviceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuilder")
            .field("name", &self.name)
            .field("has_node", &self.of_node.is_some())
            .finish()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("status", &self.model.runtime_status())
            .finish()
    }
}
