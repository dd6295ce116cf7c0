//! # Time Source
//!
//! Monotonic clock used to measure domain and device latencies, and the
//! millisecond delay used by the attach retry loop.

use alloc::sync::Arc;

/// Nanoseconds per millisecond
pub const NSEC_PER_MSEC: u64 = 1_000_000;

/// Monotonic clock capability
pub trait Clock: Send + Sync {
    /// Monotonic timestamp in nanoseconds
    fn now_ns(&self) -> u64;

    /// Busy-wait for `ms` milliseconds
    fn delay_ms(&self, ms: u64) {
        let start = self.now_ns();
        let target = ms.saturating_mul(NSEC_PER_MSEC);
        let mut spins: u64 = 0;

        while self.now_ns().wrapping_sub(start) < target {
            core::hint::spin_loop();
            spins += 1;

            // Counter is not ticking on this platform
            if spins >= target && self.now_ns() == start {
                break;
            }
        }
    }
}

/// Elapsed nanoseconds since `start`
#[inline]
pub fn elapsed_since(clock: &dyn Clock, start: u64) -> u64 {
    clock.now_ns().saturating_sub(start)
}

// =============================================================================
// ARCHITECTURE COUNTER
// =============================================================================

/// Clock backed by the architecture cycle/timer counter
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchClock;

impl Clock for ArchClock {
    fn now_ns(&self) -> u64 {
        read_counter_ns()
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        fn read_counter_ns() -> u64 {
            let tsc: u64;
            // SAFETY: rdtsc has no side effects and is available in all modes
            unsafe {
                core::arch::asm!(
                    "rdtsc",
                    "shl rdx, 32",
                    "or rax, rdx",
                    out("rax") tsc,
                    out("rdx") _,
                    options(nostack, nomem)
                );
            }
            // Assume 3GHz TSC
            tsc / 3
        }
    } else if #[cfg(target_arch = "aarch64")] {
        fn read_counter_ns() -> u64 {
            let cnt: u64;
            // SAFETY: CNTPCT_EL0 is readable from every exception level we run at
            unsafe {
                core::arch::asm!(
                    "mrs {}, CNTPCT_EL0",
                    out(reg) cnt,
                    options(nostack, nomem)
                );
            }
            // Assume 1MHz counter
            cnt.saturating_mul(1_000)
        }
    } else if #[cfg(target_arch = "riscv64")] {
        fn read_counter_ns() -> u64 {
            let time: u64;
            // SAFETY: rdtime only reads the time CSR
            unsafe {
                core::arch::asm!(
                    "rdtime {}",
                    out(reg) time,
                    options(nostack, nomem)
                );
            }
            // Assume 10MHz timebase
            time.saturating_mul(100)
        }
    } else {
        fn read_counter_ns() -> u64 {
            0
        }
    }
}

// =============================================================================
// HOSTED CLOCK
// =============================================================================

/// Clock backed by `std::time::Instant`
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StdClock {
    base: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Create new clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            base: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ns(&self) -> u64 {
        self.base.elapsed().as_nanos() as u64
    }

    fn delay_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// Clock used when the caller does not supply one
#[cfg(feature = "std")]
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(StdClock::new())
}

/// Clock used when the caller does not supply one
#[cfg(not(feature = "std"))]
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(ArchClock)
}
