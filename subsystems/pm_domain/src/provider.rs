//! # Domain Providers
//!
//! Platform code registers a provider for each firmware node that describes
//! power domains. A device referencing `power-domains = <&node args...>` is
//! resolved by asking the provider registered for `node` to translate the
//! arguments into a domain.
//!
//! ```text
//!   device node                 provider table               domains
//!   ┌──────────────────┐       ┌──────────────────┐
//!   │ power-domains =  │       │ node 7 ─▶ Onecell│──[1]──▶ ┌────────┐
//!   │   <&pd 1>        │──────▶│ node 3 ─▶ Simple │         │  vpu   │
//!   └──────────────────┘       └──────────────────┘         └────────┘
//! ```
//!
//! [`dev_pm_attach`] performs the whole sequence for a probing device and
//! maps every failure past the lookup stage to
//! [`ErrorKind::ProbeDefer`](crate::ErrorKind::ProbeDefer).

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::device::Device;
use crate::domain::PowerDomain;
use crate::error::{DomainError, DomainResult, ErrorKind};
use crate::registry::DomainRegistry;
use crate::time::Clock;

// =============================================================================
// FIRMWARE NODES
// =============================================================================

/// Property listing the domains of a device
pub const POWER_DOMAINS_PROP: &str = "power-domains";

/// Property giving the specifier size of a provider
pub const POWER_DOMAIN_CELLS_PROP: &str = "#power-domain-cells";

/// Single-phandle property used by older Samsung device trees
pub const LEGACY_POWER_DOMAIN_PROP: &str = "samsung,power-domain";

/// Firmware node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Create from raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A phandle reference with its specifier cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhandleArgs {
    /// Referenced node
    pub node: NodeId,
    /// Specifier cells
    pub args: Vec<u32>,
}

impl PhandleArgs {
    /// Create new reference
    pub fn new(node: NodeId, args: Vec<u32>) -> Self {
        Self { node, args }
    }
}

/// Firmware description of a device
pub trait DeviceNode: Send + Sync {
    /// Identity of this node
    fn id(&self) -> NodeId;

    /// Parse entry `index` of the phandle list `list`
    ///
    /// The number of cells following each phandle is read from the `cells`
    /// property of the referenced node. Returns `NotFound` if the list does
    /// not exist.
    fn parse_phandle_with_args(
        &self,
        list: &str,
        cells: &str,
        index: usize,
    ) -> DomainResult<PhandleArgs>;

    /// Parse entry `index` of a plain phandle list
    fn parse_phandle(&self, _list: &str, _index: usize) -> Option<NodeId> {
        None
    }
}

// =============================================================================
// TRANSLATORS
// =============================================================================

/// Translates a specifier into a domain
pub trait DomainXlate: Send + Sync {
    fn xlate(&self, spec: &PhandleArgs) -> DomainResult<Arc<PowerDomain>>;
}

/// Provider exposing a single domain with no specifier cells
pub struct SimpleXlate {
    domain: Arc<PowerDomain>,
}

impl SimpleXlate {
    /// Create new translator for `domain`
    pub fn new(domain: Arc<PowerDomain>) -> Self {
        Self { domain }
    }
}

impl DomainXlate for SimpleXlate {
    fn xlate(&self, spec: &PhandleArgs) -> DomainResult<Arc<PowerDomain>> {
        if !spec.args.is_empty() {
            return Err(DomainError::new(
                ErrorKind::InvalidArgument,
                "Simple provider takes no specifier cells",
            ));
        }

        Ok(self.domain.clone())
    }
}

/// Provider exposing an array of domains indexed by one cell
pub struct OnecellXlate {
    domains: Vec<Option<Arc<PowerDomain>>>,
}

impl OnecellXlate {
    /// Create new translator over `domains`
    pub fn new(domains: Vec<Option<Arc<PowerDomain>>>) -> Self {
        Self { domains }
    }
}

impl DomainXlate for OnecellXlate {
    fn xlate(&self, spec: &PhandleArgs) -> DomainResult<Arc<PowerDomain>> {
        let [cell] = spec.args.as_slice() else {
            return Err(DomainError::new(
                ErrorKind::InvalidArgument,
                "Onecell provider takes exactly one specifier cell",
            ));
        };

        let Some(slot) = self.domains.get(*cell as usize) else {
            log::error!("genpd: invalid domain index {}", cell);
            return Err(DomainError::new(ErrorKind::InvalidArgument, "Domain index out of range"));
        };

        slot.clone()
            .ok_or_else(|| DomainError::new(ErrorKind::NotFound, "No domain at index"))
    }
}

impl fmt::Debug for SimpleXlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleXlate")
            .field("domain", &self.domain.name())
            .finish()
    }
}

impl fmt::Debug for OnecellXlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnecellXlate")
            .field("domains", &self.domains.len())
            .finish()
    }
}

// =============================================================================
// PROVIDER TABLE
// =============================================================================

struct Provider {
    node: NodeId,
    xlate: Arc<dyn DomainXlate>,
}

/// Registered providers, most recent first
pub struct ProviderTable {
    providers: Mutex<Vec<Provider>>,
}

impl ProviderTable {
    /// Create new empty table
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(Vec::new()),
        }
    }

    /// Register a provider for `node`
    pub fn add_provider(&self, node: NodeId, xlate: Arc<dyn DomainXlate>) -> DomainResult<()> {
        let mut providers = self.providers.lock();
        providers.try_reserve(1)?;
        providers.insert(0, Provider { node, xlate });

        log::debug!("genpd: added provider for node {}", node.as_u64());
        Ok(())
    }

    /// Register a provider exposing exactly `domain`
    pub fn add_provider_simple(&self, node: NodeId, domain: Arc<PowerDomain>) -> DomainResult<()> {
        self.add_provider(node, Arc::new(SimpleXlate::new(domain)))
    }

    /// Register a provider exposing `domains` by index
    pub fn add_provider_onecell(
        &self,
        node: NodeId,
        domains: Vec<Option<Arc<PowerDomain>>>,
    ) -> DomainResult<()> {
        self.add_provider(node, Arc::new(OnecellXlate::new(domains)))
    }

    /// Remove the most recent provider registered for `node`
    pub fn del_provider(&self, node: NodeId) -> bool {
        let mut providers = self.providers.lock();
        match providers.iter().position(|p| p.node == node) {
            Some(pos) => {
                providers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Resolve `spec` to a domain
    pub fn get_from_provider(&self, spec: &PhandleArgs) -> DomainResult<Arc<PowerDomain>> {
        let mut result = Err(DomainError::new(ErrorKind::NotFound, "No provider for node"));

        let providers = self.providers.lock();
        for provider in providers.iter().filter(|p| p.node == spec.node) {
            result = provider.xlate.xlate(spec);
            if result.is_ok() {
                break;
            }
        }

        result
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.lock().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.providers.lock().is_empty()
    }
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTable")
            .field("providers", &self.len())
            .finish()
    }
}

// =============================================================================
// AUTOMATIC ATTACH
// =============================================================================

/// Retry `op` with exponential backoff while the domain is mid transition
fn retry_unavailable(
    clock: &dyn Clock,
    retry_max_ms: u64,
    mut op: impl FnMut() -> DomainResult<()>,
) -> DomainResult<()> {
    let mut delay_ms: u64 = 1;

    loop {
        let result = op();
        match result {
            Err(ref err)
                if err.kind() == ErrorKind::Unavailable
                    && delay_ms.saturating_mul(2) < retry_max_ms =>
            {
                clock.delay_ms(delay_ms);
                delay_ms <<= 1;
            }
            _ => return result,
        }
    }
}

/// Domain specifier of `node`, falling back to the legacy binding
fn domain_spec(node: &dyn DeviceNode) -> DomainResult<PhandleArgs> {
    match node.parse_phandle_with_args(POWER_DOMAINS_PROP, POWER_DOMAIN_CELLS_PROP, 0) {
        Ok(spec) => Ok(spec),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let legacy = node
                .parse_phandle(LEGACY_POWER_DOMAIN_PROP, 0)
                .ok_or(err)?;
            log::debug!("genpd: node {} uses {}", node.id().as_u64(), LEGACY_POWER_DOMAIN_PROP);
            Ok(PhandleArgs::new(legacy, Vec::new()))
        }
        Err(err) => Err(err),
    }
}

/// Attach a probing device to the domain its firmware node names
///
/// Fails with `NoDevice` without a firmware node, `AlreadyExists` if the
/// device already has a domain and `NotFound` if the node names none. Every
/// later failure is reported as `ProbeDefer`.
pub fn dev_pm_attach(registry: &DomainRegistry, dev: &Arc<Device>) -> DomainResult<()> {
    let Some(node) = dev.of_node() else {
        return Err(DomainError::new(ErrorKind::NoDevice, "Device has no firmware node"));
    };

    if dev.pm_domain().is_some() {
        return Err(DomainError::new(ErrorKind::AlreadyExists, "Device already has a domain"));
    }

    let spec = domain_spec(&**node)?;

    let domain = registry.providers().get_from_provider(&spec).map_err(|err| {
        log::debug!("{}: domain lookup failed: {}", dev.name(), err);
        probe_defer()
    })?;

    log::debug!("{}: adding to power domain {}", dev.name(), domain.name());

    let added = retry_unavailable(&**registry.clock(), registry.config().retry_max_ms, || {
        domain.add_device(dev)
    });
    if let Err(err) = added {
        log::error!("{}: failed to add to power domain {}: {}", dev.name(), domain.name(), err);
        return Err(probe_defer());
    }

    dev.set_hooks(Some(dev_pm_detach), Some(dev_pm_sync));

    domain.power_on().map_err(|err| {
        log::debug!("{}: power on of {} failed: {}", dev.name(), domain.name(), err);
        probe_defer()
    })
}

fn probe_defer() -> DomainError {
    DomainError::from_kind(ErrorKind::ProbeDefer)
}

/// Detach hook installed by [`dev_pm_attach`]
///
/// The domain is queued for a power-off attempt once the device is gone.
/// `power_off` is accepted for the device-core hook signature and unused.
pub fn dev_pm_detach(dev: &Device, _power_off: bool) {
    let Some(domain) = dev.pm_domain() else {
        return;
    };

    log::debug!("{}: removing from power domain {}", dev.name(), domain.name());

    let removed = retry_unavailable(&*domain.clock, domain.config.retry_max_ms, || {
        domain.remove_device(dev)
    });
    if let Err(err) = removed {
        log::error!(
            "{}: failed to remove from power domain {}: {}",
            dev.name(),
            domain.name(),
            err
        );
        return;
    }

    dev.set_hooks(None, None);

    domain.queue_power_off();
}

/// Sync hook installed by [`dev_pm_attach`]
pub fn dev_pm_sync(dev: &Device) {
    if let Some(domain) = dev.pm_domain() {
        domain.queue_power_off();
    }
}
