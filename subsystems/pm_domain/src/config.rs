//! # Configuration
//!
//! Core-wide tunables ([`GenpdConfig`]) and the per-domain registration
//! builder ([`DomainConfig`]).

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::governor::Governor;
use crate::ops::{DomainDeviceOps, DomainFlags, DomainOps, PmClockOps};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Upper bound for the attach/detach backoff, in milliseconds
pub const GENPD_RETRY_MAX_MS: u64 = 250;

/// Boot parameter keeping unused domains powered
pub const PARAM_IGNORE_UNUSED: &str = "pd_ignore_unused";

// =============================================================================
// CORE CONFIGURATION
// =============================================================================

/// Core-wide configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenpdConfig {
    /// Leave domains that nobody uses powered at late init
    pub ignore_unused: bool,
    /// Backoff bound for attach/detach retries (ms)
    pub retry_max_ms: u64,
    /// Measure hardware latencies during system sleep transitions
    pub timed_sleep_transitions: bool,
}

impl Default for GenpdConfig {
    fn default() -> Self {
        Self {
            ignore_unused: false,
            retry_max_ms: GENPD_RETRY_MAX_MS,
            timed_sleep_transitions: true,
        }
    }
}

impl GenpdConfig {
    /// Defaults plus the options found on a kernel command line
    pub fn from_cmdline(cmdline: &str) -> Self {
        let ignore_unused = cmdline
            .split_whitespace()
            .any(|param| param == PARAM_IGNORE_UNUSED);

        if ignore_unused {
            log::info!("genpd: not disabling unused power domains");
        }

        Self {
            ignore_unused,
            ..Self::default()
        }
    }
}

// =============================================================================
// DOMAIN CONFIGURATION
// =============================================================================

/// Registration parameters for one domain
#[derive(Clone)]
pub struct DomainConfig {
    pub(crate) name: String,
    pub(crate) is_off: bool,
    pub(crate) ops: Option<Arc<dyn DomainOps>>,
    pub(crate) dev_ops: Option<Arc<dyn DomainDeviceOps>>,
    pub(crate) governor: Option<Arc<dyn Governor>>,
    pub(crate) flags: DomainFlags,
    pub(crate) clock_ops: Option<Arc<dyn PmClockOps>>,
}

impl DomainConfig {
    /// Create new configuration for an initially active domain
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_off: false,
            ops: None,
            dev_ops: None,
            governor: None,
            flags: DomainFlags::empty(),
            clock_ops: None,
        }
    }

    /// Set the initial power state
    pub fn initially_off(mut self, is_off: bool) -> Self {
        self.is_off = is_off;
        self
    }

    /// Install hardware sequencing callbacks
    pub fn with_ops(mut self, ops: Arc<dyn DomainOps>) -> Self {
        self.ops = Some(ops);
        self
    }

    /// Override the per-device callbacks
    pub fn with_device_ops(mut self, dev_ops: Arc<dyn DomainDeviceOps>) -> Self {
        self.dev_ops = Some(dev_ops);
        self
    }

    /// Install a power-down governor
    pub fn with_governor(mut self, governor: Arc<dyn Governor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Set domain flags
    pub fn with_flags(mut self, flags: DomainFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Install the clock-gating helper used with [`DomainFlags::PM_CLK`]
    pub fn with_clock_ops(mut self, clock_ops: Arc<dyn PmClockOps>) -> Self {
        self.clock_ops = Some(clock_ops);
        self
    }

    /// Domain name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for DomainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainConfig")
            .field("name", &self.name)
            .field("is_off", &self.is_off)
            .field("has_ops", &self.ops.is_some())
            .field("governor", &self.governor.as_ref().map(|g| g.name()))
            .field("flags", &self.flags)
            .finish()
    }
}
