//! The SYN emitter loop
//!
//! Single-threaded. Transient send errors (`ENOBUFS`, `EAGAIN`) are retried
//! after a short nap; any other error on the first probe is a setup error
//! returned as `Err`, and on a later probe ends the loop and is reported in
//! the summary.

use crate::config::ProbeConfig;
use crate::local::is_local;
use crate::stats::{ProbeStats, ProbeStatsSnapshot};
use crate::{ProbeError, ProbeResult};
use pfs_common::clock::MAX_NAP;
use pfs_common::error::is_transient;
use pfs_common::{deadline_after, nap, Pacer, Reporter, StopFlag};
use pfs_wire::{SynBuilder, SYN_PACKET_LEN};
use serde::Serialize;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Where built probes go
pub trait ProbeSink {
    /// Send one complete IPv4 packet to `dst`
    fn send(&mut self, dst: Ipv4Addr, packet: &[u8]) -> io::Result<usize>;
}

/// Raw IPv4 socket with `IP_HDRINCL`; the kernel sends our header as is.
pub struct RawIpv4Socket {
    socket: Socket,
}

impl RawIpv4Socket {
    /// Needs `CAP_NET_RAW`
    pub fn open() -> ProbeResult<Self> {
        let socket =
            Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::TCP)).map_err(|e| ProbeError::os("socket", e))?;
        socket
            .set_header_included_v4(true)
            .map_err(|e| ProbeError::os("IP_HDRINCL", e))?;
        Ok(Self { socket })
    }
}

impl<S: ProbeSink + ?Sized> ProbeSink for &mut S {
    #[inline]
    fn send(&mut self, dst: Ipv4Addr, packet: &[u8]) -> io::Result<usize> {
        (**self).send(dst, packet)
    }
}

impl ProbeSink for RawIpv4Socket {
    #[inline]
    fn send(&mut self, dst: Ipv4Addr, packet: &[u8]) -> io::Result<usize> {
        self.socket.send_to(packet, &SockAddr::from(SocketAddrV4::new(dst, 0)))
    }
}

/// End-of-run summary
#[derive(Debug, Clone, Serialize)]
pub struct ProbeSummary {
    /// Destination range
    pub cidr: String,
    /// Ports per address
    pub ports: usize,
    /// Counters
    #[serde(flatten)]
    pub stats: ProbeStatsSnapshot,
    /// Completed sweeps of range × ports
    pub sweeps: u64,
    /// Wall time
    pub secs: f64,
    /// Average MB/s over the run
    pub mbps: f64,
    /// Error that ended the loop early
    pub error: Option<String>,
}

/// Builds, paces and sends probes one at a time. Used by the sweep loop
/// and by workers that take destinations from elsewhere.
pub struct Prober<S: ProbeSink> {
    sink: S,
    builder: SynBuilder,
    pacer: Pacer,
    packet: [u8; SYN_PACKET_LEN],
    ip_id: u16,
    stats: Arc<ProbeStats>,
    stop: StopFlag,
}

impl<S: ProbeSink> Prober<S> {
    /// Prober with the source, TTL and rate of `config`
    pub fn new(sink: S, config: &ProbeConfig, stats: Arc<ProbeStats>, stop: StopFlag) -> Self {
        Self {
            sink,
            builder: SynBuilder::new(config.src_ip, config.src_port, config.ttl),
            pacer: Pacer::new(config.pps),
            packet: [0u8; SYN_PACKET_LEN],
            ip_id: 0,
            stats,
            stop,
        }
    }

    /// Get prober stats
    pub fn stats(&self) -> ProbeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait for the pacer, then send one SYN to `dst:port`, napping through
    /// transient refusals. Gives up quietly if a stop arrives while backing
    /// off.
    pub fn probe(&mut self, dst: Ipv4Addr, port: u16) -> ProbeResult<()> {
        self.pacer.pace();
        let len = self
            .builder
            .build(dst, port, self.ip_id, &mut self.packet)
            .map_err(|e| ProbeError::os("build", e.into()))?;
        self.ip_id = self.ip_id.wrapping_add(1);

        loop {
            match self.sink.send(dst, &self.packet[..len]) {
                Ok(n) => {
                    self.stats.record_sent(n);
                    return Ok(());
                }
                Err(e) if is_transient(&e) => {
                    self.stats.record_backoff();
                    if self.stop.is_set() {
                        return Ok(());
                    }
                    nap(MAX_NAP);
                }
                Err(e) => {
                    self.stats.record_failed();
                    return Err(ProbeError::os("sendto", e));
                }
            }
        }
    }
}

/// Paced SYN emitter over a CIDR range and a port list
pub struct SynEmitter {
    config: ProbeConfig,
    stop: StopFlag,
    stats: Arc<ProbeStats>,
}

impl SynEmitter {
    /// Emitter for `config`
    pub fn new(config: ProbeConfig, stop: StopFlag) -> Self {
        Self {
            config,
            stop,
            stats: Arc::new(ProbeStats::default()),
        }
    }

    /// Get emitter stats
    pub fn stats(&self) -> ProbeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Validate, self-test, open the raw socket and sweep.
    pub fn run(&self) -> ProbeResult<ProbeSummary> {
        self.config.validate()?;
        if self.config.skip_self_test {
            debug!(src = %self.config.src_ip, "source address check skipped");
        } else {
            check_source(self.config.src_ip)?;
        }
        let mut socket = RawIpv4Socket::open()?;
        self.drive(&mut socket)
    }

    /// The sweep loop over any [`ProbeSink`].
    pub fn drive<S: ProbeSink>(&self, sink: &mut S) -> ProbeResult<ProbeSummary> {
        let cfg = &self.config;
        let mut prober = Prober::new(sink, cfg, self.stats.clone(), self.stop.clone());
        let mut reporter = Reporter::new("syn", Duration::from_millis(cfg.report_ms));
        let deadline = cfg.duration_secs.and_then(deadline_after);
        let mut first = true;
        let mut sweeps = 0u64;
        let mut failure = None;

        info!(
            cidr = %cfg.cidr,
            ports = cfg.ports.len(),
            src = %cfg.src_ip,
            src_port = cfg.src_port,
            pps = cfg.pps,
            ttl = cfg.ttl,
            probes = cfg.sweep_len(),
            "syn emitter started"
        );

        'run: loop {
            for addr in &cfg.cidr {
                for &port in cfg.ports.as_slice() {
                    if self.stop.is_set() || deadline.is_some_and(|d| Instant::now() >= d) {
                        break 'run;
                    }
                    match prober.probe(addr, port) {
                        Ok(()) => {}
                        Err(e) if first => {
                            error!(dst = %addr, port, error = %e, "first probe refused");
                            return Err(e);
                        }
                        Err(e) => {
                            error!(dst = %addr, port, error = %e, "send failed, stopping");
                            failure = Some(e.to_string());
                            self.stop.request();
                            break 'run;
                        }
                    }
                    if first {
                        debug!(dst = %addr, port, "first probe accepted");
                        first = false;
                    }
                    reporter.poll(self.stats.snapshot().sample());
                }
            }
            sweeps += 1;
            if !cfg.loop_sweep {
                break;
            }
        }

        let snap = self.stats.snapshot();
        let report = reporter.finish(snap.sample());
        info!(sent = snap.sent, backoffs = snap.backoffs, sweeps, "syn emitter finished");

        Ok(ProbeSummary {
            cidr: cfg.cidr.to_string(),
            ports: cfg.ports.len(),
            stats: snap,
            sweeps,
            secs: report.secs,
            mbps: report.mbps,
            error: failure,
        })
    }
}

/// The source must be one of ours, or the kernel may drop or rewrite every
/// probe.
pub fn check_source(src: Ipv4Addr) -> ProbeResult<()> {
    if !is_local(src).map_err(|e| ProbeError::os("getifaddrs", e))? {
        return Err(ProbeError::SourceNotLocal(src));
    }
    debug!(src = %src, "source address is local");
    Ok(())
}
