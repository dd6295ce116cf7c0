//! # Power-Down Governors
//!
//! A governor decides *when* powering a domain down is advisable. The core
//! consults it in two places:
//!
//! - `stop_ok(dev)` before stopping a device in runtime suspend
//! - `power_down_ok(domain)` right before the hardware power-off
//!
//! A veto from `power_down_ok` surfaces as
//! [`ErrorKind::TryLater`](crate::ErrorKind::TryLater).
//!
//! ## QoS governor
//!
//! ```text
//!   device resume-latency limit ─┐
//!     - suspend latency          ├─▶ effective constraint (per device)
//!     - resume latency          ─┘                 │
//!                                                  ▼
//!   subdomain max off time ────────────▶ min(...) > off + on latency ?
//! ```
//!
//! Both decisions are cached until the inputs change (`constraint_changed`
//! on the device, `max_off_time_changed` on the domain).

use crate::device::Device;
use crate::domain::{DomainState, PowerDomain};

/// Power-down policy
pub trait Governor: Send + Sync {
    /// Governor name
    fn name(&self) -> &'static str;

    /// May the domain be powered off now?
    ///
    /// Called with the domain lock held.
    fn power_down_ok(&self, domain: &PowerDomain, state: &mut DomainState) -> bool;

    /// May the device be stopped in runtime suspend?
    fn stop_ok(&self, _dev: &Device) -> bool {
        true
    }
}

/// Keeps the domain powered
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnGovernor;

impl Governor for AlwaysOnGovernor {
    fn name(&self) -> &'static str {
        "always_on"
    }

    fn power_down_ok(&self, _domain: &PowerDomain, _state: &mut DomainState) -> bool {
        false
    }
}

/// Honours device resume-latency constraints
#[derive(Debug, Default, Clone, Copy)]
pub struct QosGovernor;

impl Governor for QosGovernor {
    fn name(&self) -> &'static str {
        "qos"
    }

    fn stop_ok(&self, dev: &Device) -> bool {
        let Some(data) = dev.domain_data() else {
            return true;
        };
        let limit = dev.model().qos_resume_latency_ns();

        data.update_timing(|td| {
            if !td.constraint_changed {
                return td.cached_stop_ok;
            }
            td.constraint_changed = false;

            let ok = match limit {
                None => {
                    td.effective_constraint_ns = None;
                    true
                }
                Some(limit) => {
                    let overhead = td.suspend_latency_ns.saturating_add(td.resume_latency_ns);
                    match limit.checked_sub(overhead) {
                        Some(budget) if budget > 0 => {
                            td.effective_constraint_ns = Some(budget);
                            true
                        }
                        _ => {
                            td.effective_constraint_ns = Some(0);
                            false
                        }
                    }
                }
            };

            td.cached_stop_ok = ok;
            ok
        })
    }

    fn power_down_ok(&self, domain: &PowerDomain, state: &mut DomainState) -> bool {
        if !domain.take_max_off_time_changed() {
            if let Some(ok) = state.cached_power_down_ok() {
                return ok;
            }
        }

        // Masters fold our off time into theirs
        for master in domain.masters() {
            master.mark_max_off_time_changed();
        }

        let mut min_off_time: Option<u64> = None;
        let mut fold = |ns: u64| {
            min_off_time = Some(min_off_time.map_or(ns, |cur| cur.min(ns)));
        };

        for sub in domain.subdomains() {
            if let Some(ns) = sub.max_off_time_ns() {
                fold(ns);
            }
        }

        for dev in state.devices() {
            if let Some(ns) = dev.timing().and_then(|td| td.effective_constraint_ns) {
                fold(ns);
            }
        }

        let off_on = domain
            .power_off_latency_ns()
            .saturating_add(domain.power_on_latency_ns());

        let ok = match min_off_time {
            None => {
                domain.set_max_off_time_ns(None);
                true
            }
            Some(min) if min > off_on => {
                domain.set_max_off_time_ns(Some(min - domain.power_on_latency_ns()));
                true
            }
            Some(_) => {
                domain.set_max_off_time_ns(None);
                false
            }
        };

        log::debug!("{}: governor {}: power down ok = {}", domain.name(), self.name(), ok);
        state.set_cached_power_down_ok(ok);
        ok
    }
}
