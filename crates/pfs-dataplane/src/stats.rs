//! Ring Statistics
//!
//! Lock-free counters bumped on the hot path and read by reporters.

use pfs_common::Sample;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// TX counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Default)]
pub struct TxStats {
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    /// Submits that found the next slot still owned by the kernel
    pub ring_full: AtomicU64,
    /// Slots the kernel refused
    pub rejected: AtomicU64,
    pub kicks: AtomicU64,
}

impl TxStats {
    #[inline(always)]
    pub fn record_tx(&self, packets: u64, bytes: u64) {
        self.tx_packets.fetch_add(packets, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_ring_full(&self) {
        self.ring_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_kick(&self) {
        self.kicks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            ring_full: self.ring_full.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            kicks: self.kicks.load(Ordering::Relaxed),
        }
    }
}

/// TX snapshot (non-atomic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TxStatsSnapshot {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub ring_full: u64,
    pub rejected: u64,
    pub kicks: u64,
}

impl TxStatsSnapshot {
    /// Reporter view
    pub fn sample(&self) -> Sample {
        Sample {
            pkts: self.tx_packets,
            bytes: self.tx_bytes,
            ring_full: self.ring_full,
            ..Default::default()
        }
    }
}

/// RX counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Default)]
pub struct RxStats {
    /// Frames captured, valid or not
    pub rx_packets: AtomicU64,
    /// Captured bytes of those frames
    pub rx_bytes: AtomicU64,
    /// Frames that failed to decode
    pub ignored: AtomicU64,
    /// Frames whose op code is not one we apply
    pub unknown_op: AtomicU64,
    /// Jumps in the sequence number
    pub seq_gaps: AtomicU64,
    pub verify_failures: AtomicU64,
    pub blocks: AtomicU64,
}

impl RxStats {
    #[inline(always)]
    pub fn record_rx(&self, bytes: u64) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_unknown_op(&self) {
        self.unknown_op.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_seq_gap(&self) {
        self.seq_gaps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_verify_failure(&self) {
        self.verify_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_blocks(&self, n: u64) {
        self.blocks.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RxStatsSnapshot {
        RxStatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            unknown_op: self.unknown_op.load(Ordering::Relaxed),
            seq_gaps: self.seq_gaps.load(Ordering::Relaxed),
            verify_failures: self.verify_failures.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
        }
    }
}

/// RX snapshot (non-atomic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RxStatsSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub ignored: u64,
    pub unknown_op: u64,
    pub seq_gaps: u64,
    pub verify_failures: u64,
    pub blocks: u64,
}

impl RxStatsSnapshot {
    /// Reporter view
    pub fn sample(&self) -> Sample {
        Sample {
            pkts: self.rx_packets,
            bytes: self.rx_bytes,
            ignored: self.ignored,
            unknown_op: self.unknown_op,
            ..Default::default()
        }
    }

    /// Fraction of captured frames that decoded
    pub fn decode_rate(&self) -> f64 {
        if self.rx_packets == 0 {
            return 0.0;
        }
        self.rx_packets.saturating_sub(self.ignored) as f64 / self.rx_packets as f64
    }
}
