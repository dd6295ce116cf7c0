//! # Deferred Power-Off Queue
//!
//! Power-off attempts triggered by "this may now be safe" events are never
//! run inline. They are queued here, at most once per domain, and executed
//! one domain at a time as best-effort (`is_async`) attempts.
//!
//! ```text
//!   power_off(B) ──▶ queue(A) ──┐
//!   detach(dev)  ──▶ queue(B) ──┤     ┌─────────────────────┐
//!   unwind       ──▶ queue(M) ──┼───▶ │ VecDeque<Arc<PD>>   │ ──▶ process_pending()
//!   queue(A) again ─── dedup ───┘     └─────────────────────┘        │
//!                                                                    ▼
//!                                                   lock(A); power_off(A, async)
//! ```

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::Ordering;

use spin::{Mutex, RwLock};

use crate::domain::PowerDomain;

/// Callback waking the platform worker that drains the queue
pub type WakeHook = fn();

/// Queue of pending asynchronous power-off attempts
pub struct PowerOffQueue {
    pending: Mutex<VecDeque<Arc<PowerDomain>>>,
    wake: RwLock<Option<WakeHook>>,
}

impl PowerOffQueue {
    /// Create new empty queue
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            wake: RwLock::new(None),
        }
    }

    /// Install the worker wake-up hook
    pub fn set_wake_hook(&self, hook: Option<WakeHook>) {
        *self.wake.write() = hook;
    }

    /// Queue a power-off attempt for `domain`
    ///
    /// Returns false if an attempt was already pending.
    pub fn queue(&self, domain: Arc<PowerDomain>) -> bool {
        if domain.power_off_pending.swap(true, Ordering::AcqRel) {
            return false;
        }

        {
            let mut pending = self.pending.lock();
            if pending.try_reserve(1).is_err() {
                domain.power_off_pending.store(false, Ordering::Release);
                log::error!("{}: cannot queue power off", domain.name());
                return false;
            }
            pending.push_back(domain);
        }

        if let Some(wake) = *self.wake.read() {
            wake();
        }

        true
    }

    /// Check if a power-off attempt is pending for `domain`
    pub fn is_queued(&self, domain: &PowerDomain) -> bool {
        domain.power_off_pending.load(Ordering::Acquire)
    }

    /// Number of pending attempts
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Run one pending attempt; false if the queue was empty
    pub fn process_one(&self) -> bool {
        let Some(domain) = self.pending.lock().pop_front() else {
            return false;
        };

        // Cleared first so a trigger arriving while we run queues a new attempt
        domain.power_off_pending.store(false, Ordering::Release);

        let mut state = domain.lock();
        if let Err(err) = domain.power_off_locked(&mut state, true) {
            log::debug!("{}: deferred power off: {}", domain.name(), err);
        }

        true
    }

    /// Drain the queue, including attempts queued while draining
    pub fn process_pending(&self) -> usize {
        let mut processed = 0;
        while self.process_one() {
            processed += 1;
        }
        processed
    }
}

impl Default for PowerOffQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PowerOffQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerOffQueue")
            .field("pending", &self.len())
            .finish()
    }
}
