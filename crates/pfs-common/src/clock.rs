//! Monotonic clock helpers

use crate::error::{PfsError, PfsResult};
use std::time::{Duration, Instant};

/// Nanoseconds per second
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Upper bound for an idle nap on the data path
pub const MAX_NAP: Duration = Duration::from_millis(1);

/// Read `CLOCK_MONOTONIC` in nanoseconds.
#[inline(always)]
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: ts is a valid, writable timespec
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * NANOS_PER_SEC + ts.tv_nsec as u64
}

/// Sleep for at most [`MAX_NAP`].
#[inline]
pub fn nap(d: Duration) {
    std::thread::sleep(d.min(MAX_NAP));
}

/// Run length from a seconds value. Negative, NaN, infinite and
/// unrepresentable values are rejected.
pub fn run_duration(secs: f64) -> PfsResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| PfsError::InvalidDuration(secs))
}

/// Wall deadline `secs` from now; `None` when it lies beyond what the
/// clock can represent. Bad values are treated as zero on the low side and
/// as unbounded on the high side.
pub fn deadline_after(secs: f64) -> Option<Instant> {
    let d = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
    Instant::now().checked_add(d)
}

/// [`monotonic_ns`] deadline `secs` from now, saturating at `u64::MAX`.
pub fn deadline_ns_after(secs: f64) -> u64 {
    let d = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
    monotonic_ns().saturating_add(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_advances() {
        let a = monotonic_ns();
        std::thread::sleep(Duration::from_millis(2));
        let b = monotonic_ns();
        assert!(b > a);
        assert!(b - a >= 2_000_000);
    }

    #[test]
    fn test_nap_is_capped() {
        let start = std::time::Instant::now();
        nap(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_run_duration_bounds() {
        assert_eq!(run_duration(1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(run_duration(0.0).unwrap(), Duration::ZERO);
        for bad in [-1.0, f64::NAN, f64::INFINITY, 1e20] {
            assert!(matches!(run_duration(bad), Err(PfsError::InvalidDuration(_))), "{bad}");
        }
    }

    #[test]
    fn test_deadlines_saturate() {
        assert!(deadline_after(f64::INFINITY).is_none());
        assert!(deadline_after(1e20).is_none());
        assert!(deadline_after(-3.0).is_some_and(|d| d <= Instant::now()));
        assert_eq!(deadline_ns_after(f64::INFINITY), u64::MAX);
        assert_eq!(deadline_ns_after(1e20), u64::MAX);
        let near = deadline_ns_after(0.5);
        assert!(near > monotonic_ns() && near < u64::MAX);
    }
}
