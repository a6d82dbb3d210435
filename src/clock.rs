//! Monotonic time source.
//!
//! All deadlines in the supervisor are expressed as seconds since an
//! arbitrary epoch taken from `CLOCK_MONOTONIC`. Losing access to that
//! clock mid-flight means every deadline computation in the loop becomes
//! unsound, so [`MonotonicClock::now`] does not return a `Result`: on
//! failure it logs and exits the process immediately, exactly as the
//! upstream port program's `timestamp_seconds()` does.

use std::mem::MaybeUninit;

use log::error;

/// Seam the supervision loop reads wall-clock time through. Production
/// code uses [`MonotonicClock`]; tests drive [`crate::testing::FakeClock`]
/// so that deadline arithmetic can be exercised without real sleeps.
pub trait Clock {
    /// Monotonic seconds elapsed since an arbitrary, fixed epoch.
    fn now(&self) -> u64;
}

/// Real clock backed by `clock_gettime(CLOCK_MONOTONIC, ..)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        let mut ts = MaybeUninit::<libc::timespec>::uninit();
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            error!("heart: fatal, could not get clock_monotonic value, terminating! {err}");
            std::process::exit(1);
        }
        // SAFETY: clock_gettime returned 0, so the kernel filled in `ts`.
        let ts = unsafe { ts.assume_init() };
        ts.tv_sec as u64
    }
}
