//! # Domain Links
//!
//! Master/slave edges between domains. Each edge is shared by the master's
//! `master_links` and the slave's `slave_links`.
//!
//! ```text
//!        ┌────────┐  master_links  ┌──────────┐
//!        │ master │ ─────────────▶ │   link   │ ── Weak ──▶ slave
//!        └────────┘                └──────────┘
//!             ▲                         ▲
//!             └──────── Weak ───────────┤
//!                                       │ slave_links
//!                                  ┌────────┐
//!                                  │ slave  │
//!                                  └────────┘
//! ```
//!
//! Links never own a domain; domains are owned by their registry. A link
//! whose other end has been dropped is skipped on reads and pruned on the
//! next topology change.
//!
//! Topology changes are serialized. The graph is checked for cycles before
//! any domain lock is taken, then the slave's lock is acquired before the
//! master's, matching the order used by power-on.

use alloc::collections::{BTreeSet, VecDeque};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::domain::PowerDomain;
use crate::error::{DomainError, DomainResult, ErrorKind};

/// Serializes every topology change
static TOPOLOGY_LOCK: Mutex<()> = Mutex::new(());

/// Directed master → slave edge
#[derive(Debug)]
pub struct DomainLink {
    master: Weak<PowerDomain>,
    slave: Weak<PowerDomain>,
}

impl DomainLink {
    /// Domain supplying power
    pub fn master(&self) -> Option<Arc<PowerDomain>> {
        self.master.upgrade()
    }

    /// Domain depending on the master
    pub fn slave(&self) -> Option<Arc<PowerDomain>> {
        self.slave.upgrade()
    }

    fn is_slave(&self, domain: &PowerDomain) -> bool {
        core::ptr::eq(self.slave.as_ptr(), domain)
    }

    fn is_alive(&self) -> bool {
        self.master.strong_count() > 0 && self.slave.strong_count() > 0
    }
}

/// Link lists of one domain
#[derive(Debug, Default)]
pub(crate) struct DomainLinks {
    /// Links where this domain is the master
    pub(crate) master_links: Vec<Arc<DomainLink>>,
    /// Links where this domain is the slave
    pub(crate) slave_links: Vec<Arc<DomainLink>>,
}

impl DomainLinks {
    /// Drop links whose other end is gone
    fn prune(&mut self) {
        self.master_links.retain(|link| link.is_alive());
        self.slave_links.retain(|link| link.is_alive());
    }
}

impl PowerDomain {
    /// Domains this one depends on, in link order
    pub fn masters(&self) -> Vec<Arc<PowerDomain>> {
        self.links
            .read()
            .slave_links
            .iter()
            .filter_map(|link| link.master())
            .collect()
    }

    /// Domains depending on this one, in link order
    pub fn subdomains(&self) -> Vec<Arc<PowerDomain>> {
        self.links
            .read()
            .master_links
            .iter()
            .filter_map(|link| link.slave())
            .collect()
    }

    /// This domain has live subdomains of its own
    pub fn has_subdomains(&self) -> bool {
        self.links
            .read()
            .master_links
            .iter()
            .any(|link| link.slave.strong_count() > 0)
    }

    /// Check if this domain depends on `other` (transitively)
    pub fn depends_on(&self, other: &PowerDomain) -> bool {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<Arc<PowerDomain>> = self.masters().into();

        while let Some(current) = queue.pop_front() {
            if core::ptr::eq(&*current, other) {
                return true;
            }

            if visited.insert(current.id()) {
                queue.extend(current.masters());
            }
        }

        false
    }
}

fn invalid(message: &'static str) -> DomainError {
    DomainError::new(ErrorKind::InvalidArgument, message)
}

/// Make `subdomain` depend on `genpd`
pub fn add_subdomain(genpd: &Arc<PowerDomain>, subdomain: &Arc<PowerDomain>) -> DomainResult<()> {
    if Arc::ptr_eq(genpd, subdomain) {
        return Err(invalid("Domain cannot be its own subdomain").with_domain(genpd.id()));
    }

    let _topology = TOPOLOGY_LOCK.lock();

    if genpd.depends_on(subdomain) {
        log::warn!(
            "{}: adding {} as subdomain would create a cycle",
            genpd.name(),
            subdomain.name()
        );
        return Err(invalid("Link would create a cycle").with_domain(genpd.id()));
    }

    let _sub_state = subdomain.lock();
    let _state = genpd.lock();

    if genpd.is_off() && !subdomain.is_off() {
        return Err(invalid("Active subdomain under powered-off master").with_domain(genpd.id()));
    }

    let mut master_links = genpd.links.write();
    master_links.prune();
    if master_links.master_links.iter().any(|link| link.is_slave(subdomain)) {
        return Err(invalid("Subdomain already linked").with_domain(genpd.id()));
    }

    let mut slave_links = subdomain.links.write();
    slave_links.prune();
    master_links.master_links.try_reserve(1)?;
    slave_links.slave_links.try_reserve(1)?;

    let link = Arc::new(DomainLink {
        master: Arc::downgrade(genpd),
        slave: Arc::downgrade(subdomain),
    });
    master_links.master_links.push(link.clone());
    slave_links.slave_links.push(link);

    if !subdomain.is_off() {
        genpd.sd_counter_inc();
    }

    log::debug!("{}: added subdomain {}", genpd.name(), subdomain.name());
    Ok(())
}

/// Remove the `genpd` → `subdomain` link
pub fn remove_subdomain(
    genpd: &Arc<PowerDomain>,
    subdomain: &Arc<PowerDomain>,
) -> DomainResult<()> {
    let _topology = TOPOLOGY_LOCK.lock();

    let _sub_state = subdomain.lock();
    let _state = genpd.lock();

    if subdomain.has_subdomains() || subdomain.device_count() > 0 {
        log::warn!(
            "{}: unable to remove subdomain {}",
            genpd.name(),
            subdomain.name()
        );
        return Err(DomainError::new(ErrorKind::Busy, "Subdomain still in use")
            .with_domain(subdomain.id()));
    }

    let mut master_links = genpd.links.write();
    master_links.prune();
    let Some(pos) = master_links
        .master_links
        .iter()
        .position(|link| link.is_slave(subdomain))
    else {
        return Err(invalid("Subdomain not linked").with_domain(genpd.id()));
    };
    let link = master_links.master_links.remove(pos);

    subdomain
        .links
        .write()
        .slave_links
        .retain(|other| !Arc::ptr_eq(other, &link));

    if !subdomain.is_off() {
        genpd.sd_counter_dec();
    }

    log::debug!("{}: removed subdomain {}", genpd.name(), subdomain.name());
    Ok(())
}
