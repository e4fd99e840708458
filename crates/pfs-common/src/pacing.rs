//! Deadline pacing
//!
//! The pacer keeps a single "next departure" timestamp. A send that is early
//! waits for the deadline; a send that is late resets the deadline to now,
//! so an idle or slow period never turns into a burst.

use crate::clock::{monotonic_ns, NANOS_PER_SEC};
use std::time::Duration;

/// Monotonic-clock pacer targeting a packets-per-second rate.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval_ns: u64,
    next_ns: u64,
    waits: u64,
}

impl Pacer {
    /// Create a pacer for `pps` packets per second. `0` disables pacing.
    pub fn new(pps: u64) -> Self {
        let interval_ns = if pps == 0 { 0 } else { (NANOS_PER_SEC / pps).max(1) };
        Self {
            interval_ns,
            next_ns: 0,
            waits: 0,
        }
    }

    /// Pacing disabled
    pub fn is_unpaced(&self) -> bool {
        self.interval_ns == 0
    }

    /// Gap between departures
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }

    /// Number of departures that had to wait
    pub fn waits(&self) -> u64 {
        self.waits
    }

    /// Reserve the next departure at time `now_ns`; returns how long the
    /// caller must wait before sending.
    #[inline]
    pub fn reserve_at(&mut self, now_ns: u64) -> u64 {
        if self.interval_ns == 0 {
            return 0;
        }
        let depart = self.next_ns.max(now_ns);
        self.next_ns = depart + self.interval_ns;
        let wait = depart - now_ns;
        if wait > 0 {
            self.waits += 1;
        }
        wait
    }

    /// Block until the next departure slot.
    #[inline]
    pub fn pace(&mut self) {
        let wait = self.reserve_at(monotonic_ns());
        if wait > 0 {
            std::thread::sleep(Duration::from_nanos(wait));
        }
    }
}
