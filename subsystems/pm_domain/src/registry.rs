//! # Domain Registry
//!
//! The registry owns every registered domain, the shared power-off queue,
//! the clock used for latency measurement and the provider table used by
//! automatic attach.
//!
//! ## Registry Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          DOMAIN REGISTRY                             │
//! │                                                                      │
//! │  init_domain(DomainConfig)                                           │
//! │            │                                                         │
//! │            ▼                                                         │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  domains: RwLock<Vec<Arc<PowerDomain>>>                        │  │
//! │  │  - registration order, never reordered                         │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! │                                                                      │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐    │
//! │  │  PowerOffQueue   │  │   dyn Clock      │  │  ProviderTable   │    │
//! │  │  (shared by all  │  │  (latencies,     │  │  (node → domain  │    │
//! │  │   domains)       │  │   retry delays)  │  │   translation)   │    │
//! │  └──────────────────┘  └──────────────────┘  └──────────────────┘    │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A process-wide instance is created once with [`init_global`] and is never
//! torn down. Tests and hosted users create their own registries.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Once, RwLock};

use crate::config::{DomainConfig, GenpdConfig};
use crate::device::Device;
use crate::domain::{DomainId, PowerDomain, PowerStatus};
use crate::error::{DomainError, DomainResult, ErrorKind};
use crate::link;
use crate::ops::DomainFlags;
use crate::provider::ProviderTable;
use crate::time::{default_clock, Clock};
use crate::workqueue::PowerOffQueue;

// =============================================================================
// DOMAIN REGISTRY
// =============================================================================

/// Registry of generic power domains
pub struct DomainRegistry {
    domains: RwLock<Vec<Arc<PowerDomain>>>,
    queue: Arc<PowerOffQueue>,
    clock: Arc<dyn Clock>,
    config: GenpdConfig,
    providers: ProviderTable,
}

impl DomainRegistry {
    /// Create new registry using the platform clock
    pub fn new(config: GenpdConfig) -> Self {
        Self::with_clock(config, default_clock())
    }

    /// Create new registry with an explicit clock
    pub fn with_clock(config: GenpdConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            domains: RwLock::new(Vec::new()),
            queue: Arc::new(PowerOffQueue::new()),
            clock,
            config,
            providers: ProviderTable::new(),
        }
    }

    /// Core configuration
    pub fn config(&self) -> &GenpdConfig {
        &self.config
    }

    /// Shared power-off queue
    pub fn queue(&self) -> &Arc<PowerOffQueue> {
        &self.queue
    }

    /// Latency clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Provider table
    pub fn providers(&self) -> &ProviderTable {
        &self.providers
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Initialize a domain and register it
    pub fn init_domain(&self, config: DomainConfig) -> DomainResult<Arc<PowerDomain>> {
        if config.flags.contains(DomainFlags::PM_CLK) && config.clock_ops.is_none() {
            return Err(DomainError::new(
                ErrorKind::InvalidArgument,
                "PM_CLK domain without clock operations",
            ));
        }

        let domain = Arc::new(PowerDomain::new(
            config,
            self.queue.clone(),
            self.clock.clone(),
            self.config,
        ));

        {
            let mut domains = self.domains.write();
            domains.try_reserve(1)?;
            domains.push(domain.clone());
        }

        log::debug!(
            "{}: registered as {} ({})",
            domain.name(),
            domain.id(),
            domain.status().as_str()
        );
        Ok(domain)
    }

    /// Check if `domain` is registered here
    pub fn is_present(&self, domain: &PowerDomain) -> bool {
        self.domains
            .read()
            .iter()
            .any(|entry| core::ptr::eq(&**entry, domain))
    }

    /// Registered domain of `dev`, if any
    pub fn lookup_dev(&self, dev: &Device) -> Option<Arc<PowerDomain>> {
        dev.pm_domain().filter(|domain| self.is_present(domain))
    }

    /// Find a domain by name
    pub fn find(&self, name: &str) -> Option<Arc<PowerDomain>> {
        self.domains
            .read()
            .iter()
            .find(|domain| domain.name() == name)
            .cloned()
    }

    /// Find a domain by ID
    pub fn get(&self, id: DomainId) -> Option<Arc<PowerDomain>> {
        self.domains
            .read()
            .iter()
            .find(|domain| domain.id() == id)
            .cloned()
    }

    /// All domains in registration order
    pub fn domains(&self) -> Vec<Arc<PowerDomain>> {
        self.domains.read().clone()
    }

    /// Number of registered domains
    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.domains.read().is_empty()
    }

    // -------------------------------------------------------------------------
    // Hierarchy
    // -------------------------------------------------------------------------

    pub(crate) fn require_present(&self, domain: &PowerDomain) -> DomainResult<()> {
        if self.is_present(domain) {
            Ok(())
        } else {
            Err(DomainError::new(ErrorKind::InvalidArgument, "Domain not registered")
                .with_domain(domain.id()))
        }
    }

    /// Make `subdomain` depend on `genpd`
    pub fn add_subdomain(
        &self,
        genpd: &Arc<PowerDomain>,
        subdomain: &Arc<PowerDomain>,
    ) -> DomainResult<()> {
        self.require_present(genpd)?;
        self.require_present(subdomain)?;
        link::add_subdomain(genpd, subdomain)
    }

    /// Remove the `genpd` → `subdomain` dependency
    pub fn remove_subdomain(
        &self,
        genpd: &Arc<PowerDomain>,
        subdomain: &Arc<PowerDomain>,
    ) -> DomainResult<()> {
        self.require_present(genpd)?;
        self.require_present(subdomain)?;
        link::remove_subdomain(genpd, subdomain)
    }

    // -------------------------------------------------------------------------
    // Power-off scheduling
    // -------------------------------------------------------------------------

    /// Queue a power-off attempt for every domain (late init)
    ///
    /// Returns the number of newly queued attempts.
    pub fn power_off_unused(&self) -> usize {
        if self.config.ignore_unused {
            log::warn!("genpd: Not disabling unused power domains");
            return 0;
        }

        let mut queued = 0;
        for domain in self.domains() {
            if self.queue.queue(domain) {
                queued += 1;
            }
        }
        queued
    }

    /// Run every queued power-off attempt
    pub fn process_pending(&self) -> usize {
        self.queue.process_pending()
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Take a snapshot of the registry
    pub fn snapshot(&self) -> RegistrySnapshot {
        let domains: Vec<DomainSummary> = self
            .domains()
            .iter()
            .map(|domain| DomainSummary {
                id: domain.id(),
                status: domain.status(),
                device_count: domain.device_count(),
                sd_count: domain.sd_count(),
                power_on_latency_ns: domain.power_on_latency_ns(),
                power_off_latency_ns: domain.power_off_latency_ns(),
            })
            .collect();

        RegistrySnapshot {
            timestamp_ns: self.clock.now_ns(),
            total: domains.len(),
            active: domains
                .iter()
                .filter(|d| d.status == PowerStatus::Active)
                .count(),
            pending_power_offs: self.queue.len(),
            domains,
        }
    }
}

impl fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("domains", &self.len())
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish()
    }
}

static_assertions::assert_impl_all!(DomainRegistry: Send, Sync);
static_assertions::assert_impl_all!(PowerDomain: Send, Sync);
static_assertions::assert_impl_all!(Device: Send, Sync);

// =============================================================================
// REGISTRY SNAPSHOT
// =============================================================================

/// A snapshot of registry state for diagnostics
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Clock reading at snapshot time
    pub timestamp_ns: u64,
    /// Registered domains
    pub total: usize,
    /// Powered domains
    pub active: usize,
    /// Queued power-off attempts
    pub pending_power_offs: usize,
    /// Per-domain summaries
    pub domains: Vec<DomainSummary>,
}

/// Summary of a single domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSummary {
    /// Domain ID
    pub id: DomainId,
    /// Power status
    pub status: PowerStatus,
    /// Attached devices
    pub device_count: u32,
    /// Active dependents
    pub sd_count: u32,
    /// Worst power-on latency
    pub power_on_latency_ns: u64,
    /// Worst power-off latency
    pub power_off_latency_ns: u64,
}

// =============================================================================
// GLOBAL REGISTRY
// =============================================================================

static GLOBAL_REGISTRY: Once<DomainRegistry> = Once::new();

static GLOBAL_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the process-wide registry
pub fn init_global(config: GenpdConfig) -> DomainResult<&'static DomainRegistry> {
    if GLOBAL_INITIALIZED.swap(true, Ordering::AcqRel) {
        return Err(DomainError::new(
            ErrorKind::AlreadyExists,
            "Global registry already initialized",
        ));
    }

    Ok(GLOBAL_REGISTRY.call_once(|| DomainRegistry::new(config)))
}

/// Process-wide registry, if initialized
pub fn global() -> Option<&'static DomainRegistry> {
    GLOBAL_REGISTRY.get()
}

/// Access the process-wide registry
pub fn with_global<F, R>(f: F) -> DomainResult<R>
where
    F: FnOnce(&DomainRegistry) -> R,
{
    let registry = global().ok_or_else(|| {
        DomainError::new(ErrorKind::InternalError, "Global registry not initialized")
    })?;

    Ok(f(registry))
}

// =============================================================================
// TESTS
// =============================================================================
