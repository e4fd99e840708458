//! TX and RX engines
//!
//! Single-threaded loops driving one ring each. Loops never unwind: a
//! failing syscall ends the loop, is logged, and is returned in the summary
//! after the ring has been drained and closed. Only setup errors come back
//! as `Err`.

use crate::config::{RxConfig, TxConfig};
use crate::socket::{interface_mac, page_size};
use crate::stats::{RxStats, RxStatsSnapshot, TxStats, TxStatsSnapshot};
use crate::tx::{Blocked, SubmitOutcome, TxRing};
use crate::{RingResult, RxRing};
use crossbeam::utils::Backoff;
use pfs_common::clock::MAX_NAP;
use pfs_common::{deadline_after, deadline_ns_after, monotonic_ns, nap, Pacer, Reporter, StopFlag, GRACE_PERIOD_MS};
use pfs_wire::frame::{Op, HEADER_LEN};
use pfs_wire::{apply_op, decode_mut, encode, FrameHeader, MacAddr, OpOutcome, PayloadPattern};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Slice of time an RX poll runs before the loop rechecks the stop flag
const RX_SLICE: Duration = Duration::from_millis(10);

/// Builds consecutive frames from one header template. The payload is
/// prepared once (pattern, then op) and copied into each slot.
#[derive(Debug, Clone)]
pub struct FrameSource {
    header: FrameHeader,
    payload: Vec<u8>,
    next_seq: u64,
}

impl FrameSource {
    /// Frames of `payload_len` bytes carrying `pattern` transformed by `op`
    pub fn new(dst: MacAddr, src: MacAddr, op: Op, imm: u8, pattern: PayloadPattern, payload_len: usize) -> Self {
        let mut payload = vec![0u8; payload_len];
        pattern.fill(&mut payload);
        apply_op(&mut payload, op.code(), imm);
        Self {
            header: FrameHeader::new(dst, src, op, imm, 0, payload_len as u32),
            payload,
            next_seq: 0,
        }
    }

    /// Sequence number the next frame gets
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Encode the next frame into `out`; `0` if it does not fit.
    #[inline]
    pub fn fill(&mut self, out: &mut [u8]) -> usize {
        let total = HEADER_LEN + self.payload.len();
        if out.len() < total {
            return 0;
        }
        out[HEADER_LEN..total].copy_from_slice(&self.payload);
        self.header.seq = self.next_seq;
        match encode(&self.header, PayloadPattern::Preset, out) {
            Ok(n) => {
                self.next_seq += 1;
                n
            }
            Err(_) => 0,
        }
    }
}

/// What the TX loop needs from a ring
pub trait TxPort {
    /// Fill up to `batch` slots
    fn submit(&mut self, batch: usize, fill: &mut dyn FnMut(&mut [u8]) -> usize) -> SubmitOutcome;
    /// Ask the kernel to drain
    fn kick(&mut self) -> RingResult<usize>;
    /// Return a refused slot to the producer
    fn reclaim(&mut self) -> bool;
    /// Kick until drained or `grace` elapses; returns slots still queued
    fn flush(&mut self, grace: Duration) -> RingResult<usize>;
    /// Flush, then give the port up; returns slots still queued
    fn close(self, grace: Duration) -> RingResult<usize>
    where
        Self: Sized;
}

/// A borrowed port is flushed on close and stays usable by its owner.
impl<P: TxPort + ?Sized> TxPort for &mut P {
    fn submit(&mut self, batch: usize, fill: &mut dyn FnMut(&mut [u8]) -> usize) -> SubmitOutcome {
        (**self).submit(batch, fill)
    }

    fn kick(&mut self) -> RingResult<usize> {
        (**self).kick()
    }

    fn reclaim(&mut self) -> bool {
        (**self).reclaim()
    }

    fn flush(&mut self, grace: Duration) -> RingResult<usize> {
        (**self).flush(grace)
    }

    fn close(self, grace: Duration) -> RingResult<usize> {
        P::flush(self, grace)
    }
}

impl TxPort for TxRing {
    fn submit(&mut self, batch: usize, fill: &mut dyn FnMut(&mut [u8]) -> usize) -> SubmitOutcome {
        self.submit_batch(batch, fill)
    }

    fn kick(&mut self) -> RingResult<usize> {
        TxRing::kick(self)
    }

    fn reclaim(&mut self) -> bool {
        TxRing::reclaim(self)
    }

    fn flush(&mut self, grace: Duration) -> RingResult<usize> {
        TxRing::flush(self, grace)
    }

    fn close(self, grace: Duration) -> RingResult<usize> {
        TxRing::close(self, grace)
    }
}

/// End-of-run TX summary
#[derive(Debug, Clone, Serialize)]
pub struct TxSummary {
    /// Interface
    pub iface: String,
    /// Counters
    #[serde(flatten)]
    pub stats: TxStatsSnapshot,
    /// Wall time
    pub secs: f64,
    /// Average MB/s over the run
    pub mbps: f64,
    /// Frames still queued when the grace period ran out
    pub pending: usize,
    /// Error that ended the loop early
    pub error: Option<String>,
}

/// Raw-Ethernet transmitter
pub struct TxEngine {
    config: TxConfig,
    stop: StopFlag,
    stats: Arc<TxStats>,
}

impl TxEngine {
    /// Create engine with config
    pub fn new(config: TxConfig, stop: StopFlag) -> Self {
        Self {
            config,
            stop,
            stats: Arc::new(TxStats::default()),
        }
    }

    /// Get engine stats
    pub fn stats(&self) -> TxStatsSnapshot {
        self.stats.snapshot()
    }

    /// Source MAC: configured, read from the interface, or a local fallback
    pub fn source_mac(&self) -> MacAddr {
        if let Some(mac) = self.config.src_mac {
            return mac;
        }
        match interface_mac(&self.config.iface).filter(|m| *m != MacAddr([0; 6])) {
            Some(mac) => mac,
            None => {
                warn!(
                    iface = %self.config.iface,
                    fallback = %MacAddr::LOCAL_FALLBACK,
                    "no hardware address, using fallback source MAC"
                );
                MacAddr::LOCAL_FALLBACK
            }
        }
    }

    /// Open the ring and transmit until stopped or a limit is reached.
    pub fn run(&self) -> RingResult<TxSummary> {
        self.config.validate(page_size())?;
        let ring = TxRing::open(&self.config.iface, self.config.geometry, self.config.qdisc_bypass)?;
        Ok(self.drive(ring, self.source_mac()))
    }

    /// The transmit loop over any [`TxPort`]. The port is closed (flushed
    /// for up to the grace period) when the loop ends.
    pub fn drive<P: TxPort>(&self, mut port: P, src: MacAddr) -> TxSummary {
        let cfg = &self.config;
        let pattern = if cfg.ramp { PayloadPattern::Ramp } else { PayloadPattern::Zero };
        let mut source = FrameSource::new(cfg.dst_mac, src, cfg.op, cfg.imm, pattern, cfg.payload_len);
        let mut reporter = Reporter::new("tx", Duration::from_millis(cfg.report_ms));
        let mut pacer = Pacer::new(cfg.pps);
        let deadline = cfg.duration_secs.and_then(deadline_after);
        let backoff = Backoff::new();
        let mut failure = None;

        info!(
            iface = %cfg.iface,
            dst = %cfg.dst_mac,
            src = %src,
            payload_len = cfg.payload_len,
            op = ?cfg.op,
            imm = cfg.imm,
            pps = cfg.pps,
            "tx started"
        );

        loop {
            if self.stop.is_set() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            let mut batch = cfg.batch_frames;
            if let Some(max) = cfg.max_frames {
                let left = max.saturating_sub(source.next_seq());
                if left == 0 {
                    break;
                }
                batch = batch.min(usize::try_from(left).unwrap_or(usize::MAX));
            }
            if !pacer.is_unpaced() {
                batch = 1;
                pacer.pace();
            }

            let out = port.submit(batch, &mut |buf| source.fill(buf));
            if out.submitted > 0 {
                self.stats.record_tx(out.submitted as u64, out.bytes);
                backoff.reset();
            }

            match out.blocked {
                Some(Blocked::RingFull) => {
                    self.stats.record_ring_full();
                    if out.submitted == 0 {
                        if backoff.is_completed() {
                            nap(MAX_NAP);
                        } else {
                            backoff.snooze();
                        }
                    }
                }
                Some(Blocked::Rejected) => {
                    if port.reclaim() {
                        self.stats.record_rejected();
                    }
                }
                Some(Blocked::SourceDry) | None => {}
            }

            if out.submitted > 0 || out.blocked == Some(Blocked::RingFull) {
                match port.kick() {
                    Ok(_) => self.stats.record_kick(),
                    Err(e) => {
                        error!(error = %e, "tx kick failed, stopping");
                        failure = Some(e.to_string());
                        self.stop.request();
                        break;
                    }
                }
            }

            reporter.poll(self.stats.snapshot().sample());
        }

        let pending = match port.close(Duration::from_millis(GRACE_PERIOD_MS)) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "tx flush failed");
                failure.get_or_insert(e.to_string());
                0
            }
        };

        let snap = self.stats.snapshot();
        let report = reporter.finish(snap.sample());
        info!(frames = snap.tx_packets, rejected = snap.rejected, pending, "tx finished");

        TxSummary {
            iface: cfg.iface.clone(),
            stats: snap,
            secs: report.secs,
            mbps: report.mbps,
            pending,
            error: failure,
        }
    }
}

/// Default per-frame policy of the RX loop: decode, track sequence, apply
/// the configured op in place, optionally verify the result.
pub struct FrameProcessor {
    op: u8,
    imm: u8,
    verify_ramp: bool,
    last_seq: Option<u64>,
    stats: Arc<RxStats>,
}

impl FrameProcessor {
    /// Processor applying raw op code `op` with `imm`
    pub fn new(op: u8, imm: u8, verify_ramp: bool, stats: Arc<RxStats>) -> Self {
        Self {
            op,
            imm,
            verify_ramp,
            last_seq: None,
            stats,
        }
    }

    /// Handle one captured frame. Every frame is counted; frames that do
    /// not decode are counted as ignored and left untouched.
    #[inline]
    pub fn process(&mut self, frame: &mut [u8]) {
        self.stats.record_rx(frame.len() as u64);

        let Some((header, payload)) = decode_mut(frame) else {
            self.stats.record_ignored();
            return;
        };

        if let Some(last) = self.last_seq {
            if header.seq != last.wrapping_add(1) {
                self.stats.record_seq_gap();
            }
        }
        self.last_seq = Some(header.seq);

        match apply_op(payload, self.op, self.imm) {
            OpOutcome::Unknown => self.stats.record_unknown_op(),
            OpOutcome::Applied | OpOutcome::Noop => {
                if self.verify_ramp && !is_ramp(payload) {
                    self.stats.record_verify_failure();
                }
            }
        }
    }
}

fn is_ramp(buf: &[u8]) -> bool {
    buf.iter().enumerate().all(|(i, b)| *b == i as u8)
}

/// End-of-run RX summary
#[derive(Debug, Clone, Serialize)]
pub struct RxSummary {
    /// Interface
    pub iface: String,
    /// Counters
    #[serde(flatten)]
    pub stats: RxStatsSnapshot,
    /// Packets the kernel saw for this socket
    pub kernel_packets: u64,
    /// Packets the kernel dropped because the ring was full
    pub kernel_drops: u64,
    /// Wall time
    pub secs: f64,
    /// Average MB/s over the run
    pub mbps: f64,
}

/// Raw-Ethernet receiver
pub struct RxEngine {
    config: RxConfig,
    stop: StopFlag,
    stats: Arc<RxStats>,
}

impl RxEngine {
    /// Create engine with config
    pub fn new(config: RxConfig, stop: StopFlag) -> Self {
        Self {
            config,
            stop,
            stats: Arc::new(RxStats::default()),
        }
    }

    /// Get engine stats
    pub fn stats(&self) -> RxStatsSnapshot {
        self.stats.snapshot()
    }

    /// Open the ring and receive until stopped or the duration elapses.
    pub fn run(&self) -> RingResult<RxSummary> {
        let cfg = &self.config;
        cfg.validate(page_size())?;
        let mut ring = RxRing::open(&cfg.iface, cfg.geometry, cfg.promiscuous)?;

        if Op::from_code(cfg.op).is_none() {
            warn!(op = cfg.op, "reserved op code, payloads will be left untouched");
        }
        info!(iface = %cfg.iface, op = cfg.op, imm = cfg.imm, verify = cfg.verify_ramp, "rx started");

        let mut processor = FrameProcessor::new(cfg.op, cfg.imm, cfg.verify_ramp, self.stats.clone());
        let mut reporter = Reporter::new("rx", Duration::from_millis(cfg.report_ms));
        let end_ns = cfg.duration_secs.map(deadline_ns_after);
        let slice_ns = RX_SLICE.as_nanos() as u64;

        while !self.stop.is_set() {
            let now = monotonic_ns();
            if end_ns.is_some_and(|end| now >= end) {
                break;
            }
            let slice_end = now + slice_ns;
            let deadline = end_ns.map_or(slice_end, |end| end.min(slice_end));

            let out = ring.poll(deadline, |frame| processor.process(frame));
            self.stats.record_blocks(out.blocks);
            if out.truncated > 0 {
                warn!(blocks = out.truncated, "rx block walk stopped early");
            }
            reporter.poll(self.stats.snapshot().sample());
        }

        let iface = ring.iface().to_string();
        let (kernel_packets, kernel_drops) = ring.close();
        let snap = self.stats.snapshot();
        let report = reporter.finish(snap.sample());
        info!(
            frames = snap.rx_packets,
            seq_gaps = snap.seq_gaps,
            verify_failures = snap.verify_failures,
            kernel_drops,
            "rx finished"
        );

        Ok(RxSummary {
            iface,
            stats: snap,
            kernel_packets,
            kernel_drops,
            secs: report.secs,
            mbps: report.mbps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TxGeometry;
    use crate::tx::SlotRing;
    use pfs_wire::decode;

    const DST: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);
    const SRC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0b]);

    /// TX ring in heap memory; `kick` plays the kernel and keeps the frames.
    struct HeapPort {
        _mem: Vec<u64>,
        ring: SlotRing,
        wire: Vec<Vec<u8>>,
    }

    impl HeapPort {
        fn new(geom: TxGeometry) -> Self {
            let mut mem = vec![0u64; geom.map_len() / 8];
            let ring = unsafe { SlotRing::new(mem.as_mut_ptr() as *mut u8, geom) };
            Self {
                _mem: mem,
                ring,
                wire: Vec::new(),
            }
        }
    }

    impl TxPort for HeapPort {
        fn submit(&mut self, batch: usize, fill: &mut dyn FnMut(&mut [u8]) -> usize) -> SubmitOutcome {
            self.ring.submit_batch(batch, fill)
        }

        fn kick(&mut self) -> RingResult<usize> {
            let mut bytes = 0;
            // drain in slot order starting at the oldest queued slot
            let cap = self.ring.capacity();
            let start = self.ring.cursor();
            for i in 0..cap {
                if let Some(frame) = self.ring.complete((start + i) % cap) {
                    bytes += frame.len();
                    self.wire.push(frame);
                }
            }
            Ok(bytes)
        }

        fn reclaim(&mut self) -> bool {
            self.ring.reclaim()
        }

        fn flush(&mut self, _grace: Duration) -> RingResult<usize> {
            self.kick()?;
            Ok(self.ring.in_flight())
        }

        fn close(mut self, grace: Duration) -> RingResult<usize> {
            self.flush(grace)
        }
    }

    /// Borrowed [`HeapPort`] that records being closed.
    struct ClosingPort<'a> {
        inner: &'a mut HeapPort,
        closed: &'a mut bool,
    }

    impl TxPort for ClosingPort<'_> {
        fn submit(&mut self, batch: usize, fill: &mut dyn FnMut(&mut [u8]) -> usize) -> SubmitOutcome {
            self.inner.submit(batch, fill)
        }

        fn kick(&mut self) -> RingResult<usize> {
            self.inner.kick()
        }

        fn reclaim(&mut self) -> bool {
            self.inner.reclaim()
        }

        fn flush(&mut self, grace: Duration) -> RingResult<usize> {
            self.inner.flush(grace)
        }

        fn close(self, grace: Duration) -> RingResult<usize> {
            let ClosingPort { inner, closed } = self;
            *closed = true;
            inner.flush(grace)
        }
    }

    fn small_geometry() -> TxGeometry {
        TxGeometry {
            frame_size: 256,
            block_size: 4096,
            blocks: 2,
        }
    }

    fn tx_config(op: Op, imm: u8, frames: u64) -> TxConfig {
        TxConfig {
            dst_mac: DST,
            payload_len: 64,
            op,
            imm,
            ramp: true,
            batch_frames: 8,
            geometry: small_geometry(),
            max_frames: Some(frames),
            report_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_source_sequences() {
        let mut source = FrameSource::new(DST, SRC, Op::None, 0, PayloadPattern::Ramp, 16);
        let mut buf = [0u8; 128];
        for seq in 0..3 {
            let n = source.fill(&mut buf);
            assert_eq!(n, HEADER_LEN + 16);
            let view = decode(&buf[..n]).unwrap();
            assert_eq!(view.header.seq, seq);
            assert_eq!(view.payload[5], 5);
        }
        assert_eq!(source.fill(&mut [0u8; 20]), 0);
        assert_eq!(source.next_seq(), 3);
    }

    #[test]
    fn test_tx_emits_sequenced_frames() {
        let engine = TxEngine::new(tx_config(Op::None, 0, 100), StopFlag::new());
        let mut port = HeapPort::new(small_geometry());
        let summary = engine.drive(&mut port, SRC);

        assert_eq!(summary.stats.tx_packets, 100);
        assert_eq!(summary.stats.tx_bytes, 100 * (HEADER_LEN as u64 + 64));
        assert_eq!(summary.pending, 0);
        assert!(summary.error.is_none());
        assert_eq!(port.wire.len(), 100);

        for (i, frame) in port.wire.iter().enumerate() {
            let view = decode(frame).unwrap();
            assert_eq!(view.header.seq, i as u64);
            assert_eq!(view.header.payload_len, 64);
            assert_eq!(view.header.src, SRC);
            assert_eq!(view.header.dst, DST);
        }
    }

    #[test]
    fn test_tx_closes_port_when_done() {
        let engine = TxEngine::new(tx_config(Op::None, 0, 40), StopFlag::new());
        let mut heap = HeapPort::new(small_geometry());
        let mut closed = false;
        let summary = engine.drive(
            ClosingPort {
                inner: &mut heap,
                closed: &mut closed,
            },
            SRC,
        );
        assert!(closed);
        assert_eq!(summary.pending, 0);
        assert_eq!(heap.wire.len(), 40);
    }

    #[test]
    fn test_loopback_through_processor() {
        let engine = TxEngine::new(tx_config(Op::None, 0, 500), StopFlag::new());
        let mut port = HeapPort::new(small_geometry());
        engine.drive(&mut port, SRC);

        let stats = Arc::new(RxStats::default());
        let mut rx = FrameProcessor::new(0, 0, true, stats.clone());
        for frame in port.wire.iter_mut() {
            rx.process(frame);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 500);
        assert_eq!(snap.ignored, 0);
        assert_eq!(snap.seq_gaps, 0);
        assert_eq!(snap.verify_failures, 0);
    }

    #[test]
    fn test_xor_round_trip() {
        let engine = TxEngine::new(tx_config(Op::Xor, 0x5A, 20), StopFlag::new());
        let mut port = HeapPort::new(small_geometry());
        engine.drive(&mut port, SRC);

        // on the wire the payload is transformed
        let view = decode(&port.wire[0]).unwrap();
        assert_eq!(view.payload[0], 0x5A);

        let stats = Arc::new(RxStats::default());
        let mut rx = FrameProcessor::new(1, 0x5A, true, stats.clone());
        for frame in port.wire.iter_mut() {
            rx.process(frame);
            let view = decode(frame).unwrap();
            assert!(is_ramp(view.payload));
        }
        assert_eq!(stats.snapshot().verify_failures, 0);
    }

    #[test]
    fn test_add_inverse_round_trip() {
        let engine = TxEngine::new(tx_config(Op::Add, 7, 5), StopFlag::new());
        let mut port = HeapPort::new(small_geometry());
        engine.drive(&mut port, SRC);

        let stats = Arc::new(RxStats::default());
        let mut rx = FrameProcessor::new(Op::Add.code(), Op::Add.inverse_imm(7), true, stats.clone());
        for frame in port.wire.iter_mut() {
            rx.process(frame);
        }
        assert_eq!(stats.snapshot().verify_failures, 0);
    }

    #[test]
    fn test_stop_flag_ends_loop() {
        let stop = StopFlag::new();
        stop.request();
        let engine = TxEngine::new(tx_config(Op::None, 0, 1_000), stop);
        let mut port = HeapPort::new(small_geometry());
        let summary = engine.drive(&mut port, SRC);
        assert_eq!(summary.stats.tx_packets, 0);
    }

    #[test]
    fn test_corrupted_magic_is_ignored() {
        let mut source = FrameSource::new(DST, SRC, Op::None, 0, PayloadPattern::Fill(0x11), 32);
        let mut frame = vec![0u8; HEADER_LEN + 32];
        source.fill(&mut frame);
        frame[14..18].fill(0);

        let stats = Arc::new(RxStats::default());
        let mut rx = FrameProcessor::new(Op::Xor.code(), 0xFF, false, stats.clone());
        rx.process(&mut frame);

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 1);
        assert_eq!(snap.ignored, 1);
        // payload untouched: no op was applied
        assert!(frame[HEADER_LEN..].iter().all(|b| *b == 0x11));
    }

    #[test]
    fn test_short_and_foreign_frames_ignored() {
        let stats = Arc::new(RxStats::default());
        let mut rx = FrameProcessor::new(0, 0, false, stats.clone());
        rx.process(&mut [0u8; 10]);
        let mut arp = [0u8; 60];
        arp[12] = 0x08;
        arp[13] = 0x06;
        rx.process(&mut arp);

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 2);
        assert_eq!(snap.rx_bytes, 70);
        assert_eq!(snap.ignored, 2);
    }

    #[test]
    fn test_unknown_op_counted() {
        let mut source = FrameSource::new(DST, SRC, Op::None, 0, PayloadPattern::Fill(3), 8);
        let mut frame = vec![0u8; HEADER_LEN + 8];
        source.fill(&mut frame);

        let stats = Arc::new(RxStats::default());
        let mut rx = FrameProcessor::new(9, 1, false, stats.clone());
        rx.process(&mut frame);
        assert_eq!(stats.snapshot().unknown_op, 1);
        assert!(frame[HEADER_LEN..].iter().all(|b| *b == 3));
    }

    #[test]
    fn test_seq_gaps_counted() {
        let mut source = FrameSource::new(DST, SRC, Op::None, 0, PayloadPattern::Zero, 8);
        let mut frames: Vec<Vec<u8>> = (0..5)
            .map(|_| {
                let mut f = vec![0u8; HEADER_LEN + 8];
                source.fill(&mut f);
                f
            })
            .collect();
        frames.remove(2);

        let stats = Arc::new(RxStats::default());
        let mut rx = FrameProcessor::new(0, 0, false, stats.clone());
        for f in frames.iter_mut() {
            rx.process(f);
        }
        assert_eq!(stats.snapshot().seq_gaps, 1);
    }
}
