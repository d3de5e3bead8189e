//! Monotonic cycle counter shared by all threads.

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
use std::sync::OnceLock;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
use std::time::Instant;

/// Read the CPU timestamp counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
#[must_use]
pub fn cycles() -> u64 {
    // SAFETY: RDTSC has no preconditions and is available on every x86_64 CPU.
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Read the virtual counter register.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
#[must_use]
pub fn cycles() -> u64 {
    let t: u64;
    // SAFETY: cntvct_el0 is readable from EL0 on every aarch64 OS we target.
    unsafe {
        core::arch::asm!("mrs {t}, cntvct_el0", t = out(reg) t, options(nomem, nostack));
    }
    t
}

/// Nanoseconds since the first call in this process.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
#[must_use]
pub fn cycles() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_does_not_go_backwards() {
        let mut last = cycles();
        for _ in 0..1000 {
            let now = cycles();
            assert!(now >= last);
            last = now;
        }
    }
}
