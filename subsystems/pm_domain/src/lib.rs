//! # Helix OS Generic Power Domains
//!
//! Core of the generic power-domain framework: groups of devices that share
//! a power rail, arranged in a master/slave hierarchy, powered down when
//! nothing inside them needs power and powered up on demand.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        GENERIC POWER DOMAIN CORE                            │
//! │                        ═════════════════════════                            │
//! │                                                                             │
//! │  ┌───────────────────────────────────────────────────────────────────────┐  │
//! │  │                         DOMAIN HIERARCHY                              │  │
//! │  │                                                                       │  │
//! │  │              ┌──────────┐                                             │  │
//! │  │              │  soc_top │   sd_count = active slaves                  │  │
//! │  │              └────┬─────┘                                             │  │
//! │  │          ┌────────┴────────┐                                          │  │
//! │  │          ▼                 ▼                                          │  │
//! │  │     ┌─────────┐       ┌─────────┐                                     │  │
//! │  │     │   gpu   │       │   mm    │◀── power on walks up                │  │
//! │  │     └────┬────┘       └────┬────┘    power off releases up            │  │
//! │  │          │                 │                                          │  │
//! │  │       devices           devices                                       │  │
//! │  └───────────────────────────────────────────────────────────────────────┘  │
//! │                                                                             │
//! │  ┌──────────────────────┐  ┌──────────────────────┐  ┌──────────────────┐   │
//! │  │    RUNTIME PATH      │  │     SLEEP PATH       │  │  BINDING LAYER   │   │
//! │  │                      │  │                      │  │                  │   │
//! │  │  runtime_suspend ──▶ │  │  prepare/complete    │  │  providers       │   │
//! │  │    power_off (lock)  │  │  noirq: sync paths   │  │  dev_pm_attach   │   │
//! │  │  runtime_resume  ──▶ │  │  (no lock, strictly  │  │  dev_pm_detach   │   │
//! │  │    power_on  (lock)  │  │   sequential)        │  │                  │   │
//! │  └──────────┬───────────┘  └──────────────────────┘  └──────────────────┘   │
//! │             │                                                               │
//! │             ▼                                                               │
//! │  ┌───────────────────────────────────────────────────────────────────────┐  │
//! │  │  POWER-OFF QUEUE: deduplicated, one domain at a time, best effort     │  │
//! │  └───────────────────────────────────────────────────────────────────────┘  │
//! │                                                                             │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use helix_pm_domain::{DomainConfig, DomainRegistry, GenpdConfig, QosGovernor};
//!
//! let registry = DomainRegistry::new(GenpdConfig::from_cmdline(cmdline));
//! let top = registry.init_domain(DomainConfig::new("soc_top").with_ops(top_regulator))?;
//! let gpu = registry.init_domain(
//!     DomainConfig::new("gpu")
//!         .initially_off(true)
//!         .with_ops(gpu_switch)
//!         .with_governor(Arc::new(QosGovernor)),
//! )?;
//! registry.add_subdomain(&top, &gpu)?;
//! gpu.add_device(&gpu_dev)?;
//!
//! // Device model installs GENPD_PM_OPS for gpu_dev
//! (GENPD_PM_OPS.runtime_resume)(&gpu_dev)?;
//! ```
//!
//! ## Invariants
//!
//! 1. **Off means idle**: a domain observed off outside its lock has no active
//!    subdomains and every attached device is suspended or exempt.
//!
//! 2. **Lock order**: a slave's lock is always taken before its master's.
//!
//! 3. **Counter discipline**: `sd_count` is incremented before a master is
//!    powered and decremented only after a slave is fully off.
//!
//! 4. **Rollback**: a failed power-on leaves every master's counter as it
//!    was before the attempt.

#![no_std]

// =============================================================================
// EXTERNAL DEPENDENCIES
// =============================================================================

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Error types
pub mod error;

/// Clock abstraction
pub mod time;

/// Core and per-domain configuration
pub mod config;

/// Hardware and device callback traits, PM operation table
pub mod ops;

/// Device records and the device-model capability traits
pub mod device;

/// Domain state machine
pub mod domain;

/// Master/slave links
pub mod link;

/// Deferred power-off queue
pub mod workqueue;

/// Power-down governors
pub mod governor;

/// Device attach / detach
pub mod attach;

/// Runtime PM callbacks
pub mod runtime;

/// System sleep callbacks
pub mod sleep;

/// Domain registry
pub mod registry;

/// Firmware providers and automatic attach
pub mod provider;

/// Textual summary
pub mod summary;

#[cfg(test)]
mod testing;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::{DomainConfig, GenpdConfig, GENPD_RETRY_MAX_MS};
pub use device::{
    DetachHook, Device, DeviceBuilder, DeviceModel, DomainData, QosFlags, RuntimePm,
    RuntimeStatus, SyncHook, TimingData,
};
pub use domain::{DomainId, DomainState, PowerDomain, PowerStatus};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use governor::{AlwaysOnGovernor, Governor, QosGovernor};
pub use link::{add_subdomain, remove_subdomain, DomainLink};
pub use ops::{
    DefaultDeviceOps, DevPmOps, DomainDeviceOps, DomainFlags, DomainOps, PmCallback, PmClockOps,
    GENPD_PM_OPS,
};
pub use provider::{
    dev_pm_attach, dev_pm_detach, dev_pm_sync, DeviceNode, DomainXlate, NodeId, OnecellXlate,
    PhandleArgs, ProviderTable, SimpleXlate,
};
pub use registry::{global, init_global, DomainRegistry, RegistrySnapshot};
pub use sleep::{syscore_power_off, syscore_power_on};
pub use summary::write_summary;
pub use time::{ArchClock, Clock};
pub use workqueue::PowerOffQueue;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_retry_bound() {
        assert_eq!(GenpdConfig::default().retry_max_ms, GENPD_RETRY_MAX_MS);
        assert_eq!(GENPD_RETRY_MAX_MS, 250);
    }
}
