//! Probe run configuration

use crate::{ProbeError, ProbeResult};
use pfs_common::{run_duration, Ipv4Range, PortList, DEFAULT_REPORT_MS};
use serde::Serialize;
use std::net::Ipv4Addr;

/// Everything one emitter run needs
#[derive(Debug, Clone, Serialize)]
pub struct ProbeConfig {
    /// Destination range
    pub cidr: Ipv4Range,
    /// Destination ports, probed for every address
    pub ports: PortList,
    /// Source address written into every probe
    pub src_ip: Ipv4Addr,
    /// Source port
    pub src_port: u16,
    /// Probes per second; 0 sends as fast as the socket accepts
    pub pps: u64,
    /// IP time-to-live
    pub ttl: u8,
    /// Stop after this many seconds
    pub duration_secs: Option<f64>,
    /// Restart the sweep when it completes instead of stopping
    pub loop_sweep: bool,
    /// Skip the local-address check (spoofed sources on test rigs)
    pub skip_self_test: bool,
    /// Report interval; 0 disables periodic reports
    pub report_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            cidr: Ipv4Range::single(Ipv4Addr::LOCALHOST),
            ports: PortList::single(80),
            src_ip: Ipv4Addr::LOCALHOST,
            src_port: 40000,
            pps: 0,
            ttl: 64,
            duration_secs: None,
            loop_sweep: false,
            skip_self_test: false,
            report_ms: DEFAULT_REPORT_MS,
        }
    }
}

impl ProbeConfig {
    /// Probes in one full sweep
    pub fn sweep_len(&self) -> u64 {
        self.cidr.len() * self.ports.len() as u64
    }

    /// Reject values the kernel would refuse or that make no sense
    pub fn validate(&self) -> ProbeResult<()> {
        if self.ports.is_empty() {
            return Err(ProbeError::Config("no destination ports".into()));
        }
        if self.ttl == 0 {
            return Err(ProbeError::Config("ttl must be at least 1".into()));
        }
        if self.src_ip.is_unspecified() || self.src_ip.is_broadcast() || self.src_ip.is_multicast() {
            return Err(ProbeError::Config(format!("{} cannot be a source address", self.src_ip)));
        }
        if let Some(secs) = self.duration_secs {
            if !(secs > 0.0) {
                return Err(ProbeError::Config("duration must be positive".into()));
            }
            run_duration(secs).map_err(|e| ProbeError::Config(e.to_string()))?;
        }
        Ok(())
    }
}
