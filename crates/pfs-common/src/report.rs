//! Periodic throughput reporting
//!
//! Reports are `tracing` events; they go to whatever diagnostic sink the
//! binary installed and never touch the data path beyond a clock read.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Sample {
    /// Packets moved
    pub pkts: u64,
    /// Bytes moved
    pub bytes: u64,
    /// Producer back-offs on a saturated ring
    pub ring_full: u64,
    /// Frames dropped as malformed
    pub ignored: u64,
    /// Frames carrying an unknown op code
    pub unknown_op: u64,
}

/// One emitted report
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Component name
    pub label: &'static str,
    /// Cumulative counters
    #[serde(flatten)]
    pub sample: Sample,
    /// Seconds since the reporter started
    pub secs: f64,
    /// MB/s over the last interval (or the whole run for a final report)
    pub mbps: f64,
}

/// Emits a [`Report`] every `interval`.
#[derive(Debug)]
pub struct Reporter {
    label: &'static str,
    interval: Duration,
    started: Instant,
    last_at: Instant,
    last: Sample,
}

impl Reporter {
    /// Create a reporter; `interval` of zero disables periodic output.
    pub fn new(label: &'static str, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            label,
            interval,
            started: now,
            last_at: now,
            last: Sample::default(),
        }
    }

    /// Time since start
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Emit a report if the interval elapsed at `now`.
    pub fn poll_at(&mut self, now: Instant, sample: Sample) -> Option<Report> {
        if self.interval.is_zero() || now.duration_since(self.last_at) < self.interval {
            return None;
        }
        let window = now.duration_since(self.last_at).as_secs_f64();
        let delta = sample.bytes.saturating_sub(self.last.bytes);
        let report = Report {
            label: self.label,
            sample,
            secs: now.duration_since(self.started).as_secs_f64(),
            mbps: mb_per_sec(delta, window),
        };
        self.last_at = now;
        self.last = sample;
        log(&report);
        Some(report)
    }

    /// [`poll_at`](Self::poll_at) with the current time.
    #[inline]
    pub fn poll(&mut self, sample: Sample) -> Option<Report> {
        self.poll_at(Instant::now(), sample)
    }

    /// Whole-run summary.
    pub fn finish(&self, sample: Sample) -> Report {
        let secs = self.started.elapsed().as_secs_f64();
        let report = Report {
            label: self.label,
            sample,
            secs,
            mbps: mb_per_sec(sample.bytes, secs),
        };
        log(&report);
        report
    }
}

fn mb_per_sec(bytes: u64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / secs / 1_000_000.0
}

fn log(r: &Report) {
    tracing::info!(
        target: "pfs::report",
        component = r.label,
        pkts = r.sample.pkts,
        bytes = r.sample.bytes,
        secs = r.secs,
        mbps = r.mbps,
        ring_full = r.sample.ring_full,
        ignored = r.sample.ignored,
        unknown_op = r.sample.unknown_op,
        "throughput"
    );
}
