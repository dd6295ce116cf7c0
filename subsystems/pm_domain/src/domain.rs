//! # Domain State Machine
//!
//! A [`PowerDomain`] is either `Active` or `PowerOff`. Power-on walks up to
//! every master first, power-off releases every master afterwards.
//!
//! ```text
//!                      power_on()
//!        ┌──────────────────────────────────────────┐
//!        │  for each master M (slave lock held):    │
//!        │      M.sd_count += 1                     │
//!        │      M.power_on()   ── fails ──▶ unwind  │
//!        │  hw power_on()      ── fails ──▶ unwind  │
//!        ▼                                          │
//!   ┌──────────┐                              ┌───────────┐
//!   │ PowerOff │                              │  Active   │
//!   └──────────┘                              └───────────┘
//!        ▲                                          │
//!        │  checks: sd_count, QoS flags, devices,   │
//!        │          governor                        │
//!        │  hw power_off()                          │
//!        │  for each master M:                      │
//!        │      M.sd_count -= 1, queue M            │
//!        └──────────────────────────────────────────┘
//!                      power_off()
//! ```
//!
//! ## Locking
//!
//! Every status transition on the runtime path happens with the domain's
//! state lock held. Power-on recursion takes each master's lock in its own
//! frame after the slave's, which is the only nesting order used anywhere in
//! the crate. `sd_count` is the one counter written without the owner's lock.
//!
//! The remaining counters are atomics only so that the system-sleep noirq
//! path, which runs strictly sequentially, can use them without the lock.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::{Mutex, MutexGuard, RwLock};

use crate::config::{DomainConfig, GenpdConfig};
use crate::device::{Device, QosFlags};
use crate::error::{DomainError, DomainResult, ErrorKind};
use crate::governor::Governor;
use crate::link::DomainLinks;
use crate::ops::{DefaultDeviceOps, DomainDeviceOps, DomainFlags, DomainOps, PmClockOps};
use crate::time::{elapsed_since, Clock};
use crate::workqueue::PowerOffQueue;

// =============================================================================
// IDENTIFIERS
// =============================================================================

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique domain identifier, increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(u64);

impl DomainId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pd#{}", self.0)
    }
}

/// Domain power status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PowerStatus {
    /// Powered
    Active   = 0,
    /// Not powered
    PowerOff = 1,
}

impl PowerStatus {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PowerStatus::Active,
            _ => PowerStatus::PowerOff,
        }
    }

    /// Name used in the summary dump
    pub const fn as_str(&self) -> &'static str {
        match self {
            PowerStatus::Active => "on",
            PowerStatus::PowerOff => "off",
        }
    }
}

// =============================================================================
// LOCKED STATE
// =============================================================================

/// Domain state guarded by the domain lock
#[derive(Debug, Default)]
pub struct DomainState {
    pub(crate) devices: Vec<Weak<Device>>,
    pub(crate) prepared_count: u32,
    cached_power_down_ok: Option<bool>,
}

impl DomainState {
    /// Attached devices that are still alive
    pub fn devices(&self) -> impl Iterator<Item = Arc<Device>> + '_ {
        self.devices.iter().filter_map(Weak::upgrade)
    }

    /// Number of devices mid system-sleep transition
    pub fn prepared_count(&self) -> u32 {
        self.prepared_count
    }

    /// Governor's last power-down decision
    pub fn cached_power_down_ok(&self) -> Option<bool> {
        self.cached_power_down_ok
    }

    /// Store the governor's power-down decision
    pub fn set_cached_power_down_ok(&mut self, ok: bool) {
        self.cached_power_down_ok = Some(ok);
    }
}

// =============================================================================
// POWER DOMAIN
// =============================================================================

const NO_OFF_TIME: u64 = u64::MAX;

/// A generic power domain
pub struct PowerDomain {
    pub(crate) id: DomainId,
    pub(crate) name: String,

    pub(crate) state: Mutex<DomainState>,
    pub(crate) links: RwLock<DomainLinks>,

    pub(crate) status: AtomicU8,
    pub(crate) sd_count: AtomicU32,
    pub(crate) device_count: AtomicU32,
    pub(crate) suspended_count: AtomicU32,
    pub(crate) suspend_power_off: AtomicBool,

    pub(crate) power_on_latency_ns: AtomicU64,
    pub(crate) power_off_latency_ns: AtomicU64,
    pub(crate) max_off_time_changed: AtomicBool,
    pub(crate) max_off_time_ns: AtomicU64,

    /// Queued on the power-off queue
    pub(crate) power_off_pending: AtomicBool,

    pub(crate) ops: Option<Arc<dyn DomainOps>>,
    pub(crate) dev_ops: Arc<dyn DomainDeviceOps>,
    pub(crate) flags: DomainFlags,
    pub(crate) clock_ops: Option<Arc<dyn PmClockOps>>,
    pub(crate) governor: Option<Arc<dyn Governor>>,

    pub(crate) queue: Arc<PowerOffQueue>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: GenpdConfig,
}

impl PowerDomain {
    pub(crate) fn new(
        config: DomainConfig,
        queue: Arc<PowerOffQueue>,
        clock: Arc<dyn Clock>,
        genpd: GenpdConfig,
    ) -> Self {
        let status = if config.is_off {
            PowerStatus::PowerOff
        } else {
            PowerStatus::Active
        };
        let dev_ops: Arc<dyn DomainDeviceOps> = match config.dev_ops {
            Some(dev_ops) => dev_ops,
            None => Arc::new(DefaultDeviceOps),
        };

        Self {
            id: DomainId::next(),
            name: config.name,
            state: Mutex::new(DomainState::default()),
            links: RwLock::new(DomainLinks::default()),
            status: AtomicU8::new(status as u8),
            sd_count: AtomicU32::new(0),
            device_count: AtomicU32::new(0),
            suspended_count: AtomicU32::new(0),
            suspend_power_off: AtomicBool::new(false),
            power_on_latency_ns: AtomicU64::new(0),
            power_off_latency_ns: AtomicU64::new(0),
            max_off_time_changed: AtomicBool::new(true),
            max_off_time_ns: AtomicU64::new(NO_OFF_TIME),
            power_off_pending: AtomicBool::new(false),
            ops: config.ops,
            dev_ops,
            flags: config.flags,
            clock_ops: config.clock_ops,
            governor: config.governor,
            queue,
            clock,
            config: genpd,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> PowerStatus {
        PowerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.status() == PowerStatus::Active
    }

    pub fn is_off(&self) -> bool {
        self.status() == PowerStatus::PowerOff
    }

    pub(crate) fn set_status(&self, status: PowerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Number of dependents currently requiring this domain
    pub fn sd_count(&self) -> u32 {
        self.sd_count.load(Ordering::SeqCst)
    }

    pub fn device_count(&self) -> u32 {
        self.device_count.load(Ordering::Acquire)
    }

    pub fn suspended_count(&self) -> u32 {
        self.suspended_count.load(Ordering::Acquire)
    }

    /// Domain was off when the current system transition started
    pub fn suspend_power_off(&self) -> bool {
        self.suspend_power_off.load(Ordering::Acquire)
    }

    pub fn prepared_count(&self) -> u32 {
        self.state.lock().prepared_count
    }

    pub fn power_on_latency_ns(&self) -> u64 {
        self.power_on_latency_ns.load(Ordering::Relaxed)
    }

    pub fn power_off_latency_ns(&self) -> u64 {
        self.power_off_latency_ns.load(Ordering::Relaxed)
    }

    pub fn max_off_time_changed(&self) -> bool {
        self.max_off_time_changed.load(Ordering::Acquire)
    }

    /// Consume the off-time dirty flag
    pub fn take_max_off_time_changed(&self) -> bool {
        self.max_off_time_changed.swap(false, Ordering::AcqRel)
    }

    pub fn mark_max_off_time_changed(&self) {
        self.max_off_time_changed.store(true, Ordering::Release);
    }

    /// Longest time the domain may stay off; `None` if unbounded
    pub fn max_off_time_ns(&self) -> Option<u64> {
        match self.max_off_time_ns.load(Ordering::Acquire) {
            NO_OFF_TIME => None,
            ns => Some(ns),
        }
    }

    pub fn set_max_off_time_ns(&self, ns: Option<u64>) {
        self.max_off_time_ns
            .store(ns.unwrap_or(NO_OFF_TIME), Ordering::Release);
    }

    pub fn flags(&self) -> DomainFlags {
        self.flags
    }

    pub fn governor(&self) -> Option<&Arc<dyn Governor>> {
        self.governor.as_ref()
    }

    /// Attached devices that are still alive
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.state.lock().devices().collect()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DomainState> {
        self.state.lock()
    }

    /// Forget devices that were dropped without being detached
    pub(crate) fn prune_devices(&self, state: &mut DomainState) {
        let before = state.devices.len();
        state.devices.retain(|weak| weak.strong_count() > 0);

        let dead = (before - state.devices.len()) as u32;
        if dead > 0 {
            self.device_count.fetch_sub(dead, Ordering::AcqRel);
            self.mark_max_off_time_changed();
            log::debug!("{}: forgot {} dropped device(s)", self.name, dead);
        }
    }

    // -------------------------------------------------------------------------
    // Subdomain counter
    // -------------------------------------------------------------------------

    pub(crate) fn sd_counter_inc(&self) {
        self.sd_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the subdomain counter, refusing to go below zero
    pub(crate) fn sd_counter_dec(&self) -> bool {
        let result = self
            .sd_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            });

        if result.is_err() {
            let err = DomainError::from_kind(ErrorKind::CounterUnderflow).with_domain(self.id);
            log::error!("{}: subdomain counter: {}", self.name, err);
            return false;
        }

        true
    }

    // -------------------------------------------------------------------------
    // Hardware callbacks
    // -------------------------------------------------------------------------

    /// Run the hardware power-on callback, tracking worst latency
    pub(crate) fn hw_power_on(&self, timed: bool) -> DomainResult<()> {
        let Some(ops) = self.ops.as_ref() else {
            return Ok(());
        };

        if !timed {
            return ops.power_on(self);
        }

        let start = self.clock.now_ns();
        ops.power_on(self)?;

        let elapsed = elapsed_since(&*self.clock, start);
        if elapsed > self.power_on_latency_ns.fetch_max(elapsed, Ordering::Relaxed) {
            self.mark_max_off_time_changed();
            log::debug!("{}: Power-on latency exceeded, new value {} ns", self.name, elapsed);
        }

        Ok(())
    }

    /// Run the hardware power-off callback, tracking worst latency
    pub(crate) fn hw_power_off(&self, timed: bool) -> DomainResult<()> {
        let Some(ops) = self.ops.as_ref() else {
            return Ok(());
        };

        if !timed {
            return ops.power_off(self);
        }

        let start = self.clock.now_ns();
        let result = ops.power_off(self);
        if let Err(ref err) = result {
            if err.kind() == ErrorKind::Busy {
                return result;
            }
        }

        let elapsed = elapsed_since(&*self.clock, start);
        if elapsed > self.power_off_latency_ns.fetch_max(elapsed, Ordering::Relaxed) {
            self.mark_max_off_time_changed();
            log::debug!("{}: Power-off latency exceeded, new value {} ns", self.name, elapsed);
        }

        result
    }

    // -------------------------------------------------------------------------
    // Power on
    // -------------------------------------------------------------------------

    /// Power the domain and, transitively, all of its masters
    pub fn power_on(&self) -> DomainResult<()> {
        let mut state = self.lock();
        self.power_on_locked(&mut state)
    }

    pub(crate) fn power_on_locked(&self, state: &mut DomainState) -> DomainResult<()> {
        if self.is_active() || (state.prepared_count > 0 && self.suspend_power_off()) {
            return Ok(());
        }

        let masters = self.masters();

        // Count ourselves into each master before it powers up, so that a
        // concurrent power-off of the master sees the demand.
        for (i, master) in masters.iter().enumerate() {
            master.sd_counter_inc();

            if let Err(err) = master.power_on() {
                master.sd_counter_dec();
                self.release_masters(&masters[..i]);
                return Err(err);
            }
        }

        if let Err(err) = self.hw_power_on(true) {
            self.release_masters(&masters);
            return Err(err);
        }

        self.set_status(PowerStatus::Active);
        Ok(())
    }

    /// Drop our demand on `masters` and let them power off
    fn release_masters(&self, masters: &[Arc<PowerDomain>]) {
        for master in masters.iter().rev() {
            master.sd_counter_dec();
            self.queue.queue(master.clone());
        }
    }

    // -------------------------------------------------------------------------
    // Power off
    // -------------------------------------------------------------------------

    /// Try to remove power from the domain
    ///
    /// `is_async` marks a best-effort attempt that is not driven by the
    /// suspend of one of the domain's own devices.
    pub fn power_off(&self, is_async: bool) -> DomainResult<()> {
        let mut state = self.lock();
        self.power_off_locked(&mut state, is_async)
    }

    pub(crate) fn power_off_locked(
        &self,
        state: &mut DomainState,
        is_async: bool,
    ) -> DomainResult<()> {
        // Nothing to do while off or in the middle of a system transition
        if self.is_off() || state.prepared_count > 0 {
            return Ok(());
        }

        self.prune_devices(state);

        if self.sd_count() > 0 {
            return Err(self.busy("Subdomain still active"));
        }

        let mut not_suspended: u32 = 0;
        for dev in state.devices() {
            let model = dev.model();
            let flags = model.qos_flags();
            if flags.intersects(QosFlags::NO_POWER_OFF | QosFlags::REMOTE_WAKEUP) {
                return Err(self.busy("Device QoS forbids power off"));
            }

            if !model.is_runtime_suspended() || model.irq_safe() {
                not_suspended += 1;
            }
        }

        if not_suspended > 1 || (not_suspended == 1 && is_async) {
            return Err(self.busy("Device not suspended"));
        }

        if let Some(governor) = self.governor.clone() {
            if !governor.power_down_ok(self, state) {
                return Err(DomainError::from_kind(ErrorKind::TryLater).with_domain(self.id));
            }
        }

        if self.ops.is_some() {
            // A subdomain may have bumped the counter since the check above.
            // Its power-on will restore power right after this call.
            if self.sd_count() > 0 {
                log::debug!("{}: late subdomain power-on during power-off", self.name);
            }

            self.hw_power_off(true)?;
        }

        self.set_status(PowerStatus::PowerOff);
        log::debug!("{}: powered off", self.name);

        for master in self.masters() {
            master.sd_counter_dec();
            self.queue.queue(master);
        }

        Ok(())
    }

    fn busy(&self, message: &'static str) -> DomainError {
        DomainError::new(ErrorKind::Busy, message).with_domain(self.id)
    }

    /// Queue an asynchronous power-off attempt
    pub fn queue_power_off(self: &Arc<Self>) {
        self.queue.queue(self.clone());
    }
}

impl Drop for PowerDomain {
    fn drop(&mut self) {
        // A live slave going away releases its demand on its masters
        if self.is_active() {
            for master in self.masters() {
                master.sd_counter_dec();
            }
        }
    }
}

impl fmt::Debug for PowerDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerDomain")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("sd_count", &self.sd_count())
            .field("device_count", &self.device_count())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
