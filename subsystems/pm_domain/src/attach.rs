//! # Device Attach / Detach
//!
//! Binding a device to a domain claims the device's attachment slot, runs
//! the domain's attach hook and links the device into the domain's list.
//! Both directions refuse with
//! [`ErrorKind::Unavailable`](crate::ErrorKind::Unavailable) while a system
//! sleep transition is in flight; callers are expected to retry.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::device::{Device, TimingData};
use crate::domain::PowerDomain;
use crate::error::{DomainError, DomainResult, ErrorKind};

impl PowerDomain {
    /// Attach `dev` to this domain
    pub fn add_device(self: &Arc<Self>, dev: &Arc<Device>) -> DomainResult<()> {
        self.add_device_with_timing(dev, None)
    }

    /// Attach `dev`, seeding its timing data
    pub fn add_device_with_timing(
        self: &Arc<Self>,
        dev: &Arc<Device>,
        timing: Option<TimingData>,
    ) -> DomainResult<()> {
        log::debug!("{}: adding device {}", self.name(), dev.name());

        let data = dev.claim_domain_data(timing)?;

        match self.link_device(dev) {
            Ok(()) => {
                data.set_notifier(true);
                Ok(())
            }
            Err(err) => {
                dev.release_domain_data();
                Err(err)
            }
        }
    }

    fn link_device(self: &Arc<Self>, dev: &Arc<Device>) -> DomainResult<()> {
        let mut state = self.lock();

        if state.prepared_count > 0 {
            return Err(self.in_transition());
        }

        self.prune_devices(&mut state);
        state.devices.try_reserve(1)?;

        if let Some(ops) = self.ops.as_ref() {
            ops.attach_dev(self, dev)?;
        }

        dev.set_pm_domain(Some(self.clone()));
        self.device_count.fetch_add(1, Ordering::AcqRel);
        self.mark_max_off_time_changed();
        state.devices.push(Arc::downgrade(dev));

        Ok(())
    }

    /// Detach `dev` from this domain
    pub fn remove_device(&self, dev: &Device) -> DomainResult<()> {
        log::debug!("{}: removing device {}", self.name(), dev.name());

        let attached_here = dev
            .pm_domain()
            .is_some_and(|domain| core::ptr::eq(&*domain, self));
        if !attached_here {
            return Err(DomainError::new(
                ErrorKind::InvalidArgument,
                "Device not attached to this domain",
            )
            .with_domain(self.id()));
        }

        let data = dev.domain_data().ok_or_else(|| {
            DomainError::new(ErrorKind::InternalError, "Attached device without data")
                .with_domain(self.id())
        })?;
        data.set_notifier(false);

        {
            let mut state = self.lock();

            if state.prepared_count > 0 {
                drop(state);
                data.set_notifier(true);
                return Err(self.in_transition());
            }

            self.prune_devices(&mut state);
            self.device_count.fetch_sub(1, Ordering::AcqRel);
            self.mark_max_off_time_changed();

            if let Some(ops) = self.ops.as_ref() {
                ops.detach_dev(self, dev);
            }

            dev.set_pm_domain(None);
            state
                .devices
                .retain(|weak| !core::ptr::eq(weak.as_ptr(), dev));
        }

        dev.release_domain_data();
        Ok(())
    }

    fn in_transition(&self) -> DomainError {
        DomainError::new(ErrorKind::Unavailable, "System sleep transition in progress")
            .with_domain(self.id())
    }
}
