//! # Summary Dump
//!
//! Human-readable table of every registered domain, its subdomains and the
//! runtime status of its devices. The format is advisory and meant for
//! debug consoles.
//!
//! ```text
//! domain                          status          slaves
//!     /device                                             runtime status
//! ----------------------------------------------------------------------
//! top                             on              mid
//!     /uart0                                              active
//! mid                             off
//! ```

use core::fmt::{self, Write};

use crate::device::Device;
use crate::domain::PowerDomain;
use crate::registry::DomainRegistry;

const HEADER_WIDTH: usize = 70;

fn runtime_status_str(dev: &Device) -> &'static str {
    let model = dev.model();
    if model.runtime_error() {
        "error"
    } else if !model.runtime_enabled() {
        "unsupported"
    } else {
        model.runtime_status().as_str()
    }
}

fn write_domain<W: Write>(out: &mut W, domain: &PowerDomain) -> fmt::Result {
    let state = domain.lock();

    write!(out, "{:<30}  {:<15} ", domain.name(), domain.status().as_str())?;

    for (i, sub) in domain.subdomains().iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        out.write_str(sub.name())?;
    }

    for dev in state.devices() {
        write!(out, "\n    /{:<49}  {}", dev.name(), runtime_status_str(&dev))?;
    }

    out.write_char('\n')
}

/// Write the summary of every domain in `registry`
pub fn write_summary<W: Write>(registry: &DomainRegistry, out: &mut W) -> fmt::Result {
    out.write_str("domain                          status          slaves\n")?;
    out.write_str("    /device                                             runtime status\n")?;
    for _ in 0..HEADER_WIDTH {
        out.write_char('-')?;
    }
    out.write_char('\n')?;

    for domain in registry.domains() {
        write_domain(out, &domain)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use crate::device::RuntimeStatus;
    use crate::testing::{attach_mock, registry_fixture};
    use alloc::string::String;
    use core::sync::atomic::Ordering;

    #[test]
    fn test_summary_layout() {
        let (registry, _clock) = registry_fixture();
        let top = registry.init_domain(DomainConfig::new("top")).unwrap();
        let mid = registry
            .init_domain(DomainConfig::new("mid").initially_off(true))
            .unwrap();
        registry.add_subdomain(&top, &mid).unwrap();
        let (_uart, _) = attach_mock(&top, "uart0");
        let (_spi, spi_model) = attach_mock(&top, "spi0");
        spi_model.set_status(RuntimeStatus::Suspended);

        let mut out = String::new();
        write_summary(&registry, &mut out).unwrap();
        let lines: alloc::vec::Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "domain                          status          slaves");
        assert_eq!(lines[2].len(), HEADER_WIDTH);
        assert_eq!(lines[3], "top                             on              mid");
        assert!(lines[4].starts_with("    /uart0 "));
        assert!(lines[4].ends_with("  active"));
        assert!(lines[5].ends_with("  suspended"));
        assert_eq!(lines[6], "mid                             off             ");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn test_summary_runtime_flags() {
        let (registry, _clock) = registry_fixture();
        let pd = registry.init_domain(DomainConfig::new("d")).unwrap();
        let (dev, model) = attach_mock(&pd, "dev0");

        model.enabled.store(false, Ordering::SeqCst);
        assert_eq!(runtime_status_str(&dev), "unsupported");

        model.runtime_error.store(true, Ordering::SeqCst);
        assert_eq!(runtime_status_str(&dev), "error");
    }
}
