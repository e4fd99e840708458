//! Emitter counters

use pfs_common::Sample;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Probe counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Default)]
pub struct ProbeStats {
    pub sent: AtomicU64,
    pub bytes: AtomicU64,
    /// Sends refused with `ENOBUFS`/`EAGAIN` and retried
    pub backoffs: AtomicU64,
    /// Probes addressed but never sent
    pub failed: AtomicU64,
}

impl ProbeStats {
    #[inline(always)]
    pub fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_backoff(&self) {
        self.backoffs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProbeStatsSnapshot {
        ProbeStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Probe snapshot (non-atomic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeStatsSnapshot {
    pub sent: u64,
    pub bytes: u64,
    pub backoffs: u64,
    pub failed: u64,
}

impl ProbeStatsSnapshot {
    /// Reporter view; back-offs show up as ring-full
    pub fn sample(&self) -> Sample {
        Sample {
            pkts: self.sent,
            bytes: self.bytes,
            ring_full: self.backoffs,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_sample() {
        let stats = ProbeStats::default();
        stats.record_sent(40);
        stats.record_sent(40);
        stats.record_backoff();
        let snap = stats.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.bytes, 80);
        let s = snap.sample();
        assert_eq!((s.pkts, s.bytes, s.ring_full), (2, 80, 1));
    }
}
