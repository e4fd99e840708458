//! packetfs SYN probe emitter
//!
//! Walks a CIDR range crossed with a port list and sends one TCP SYN per
//! pair through a raw IPv4 socket with `IP_HDRINCL`. One-way only: replies
//! are never read.
//!
//! ```text
//! Ipv4Range × PortList ──► SynBuilder ──► Pacer ──► ProbeSink (raw socket)
//! ```
//!
//! Before the loop a self-test checks that the source address is local and
//! sends the first probe synchronously, so a kernel that refuses the source
//! fails the run at startup rather than silently mid-sweep.

#![warn(missing_docs)]

pub mod config;
pub mod emitter;
pub mod local;
pub mod stats;

pub use config::ProbeConfig;
pub use emitter::{check_source, ProbeSink, ProbeSummary, Prober, RawIpv4Socket, SynEmitter};
pub use stats::{ProbeStats, ProbeStatsSnapshot};

use pfs_common::{classify, ErrorClass};
use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Probe emitter errors
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Configuration rejected before any socket was opened
    #[error("invalid probe configuration: {0}")]
    Config(String),

    /// The source address is not assigned to any local interface
    #[error("source address {0} is not assigned to a local interface")]
    SourceNotLocal(Ipv4Addr),

    /// A syscall failed
    #[error("{op}: {source}")]
    Os {
        /// Operation that failed
        op: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl ProbeError {
    pub(crate) fn os(op: &'static str, source: io::Error) -> Self {
        ProbeError::Os { op, source }
    }

    /// Setup / transient / fatal
    pub fn class(&self) -> ErrorClass {
        match self {
            ProbeError::Config(_) | ProbeError::SourceNotLocal(_) => ErrorClass::Setup,
            ProbeError::Os { source, .. } => classify(source),
        }
    }
}

/// Result type for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let e = ProbeError::os("socket", io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(e.class(), ErrorClass::Setup);
        assert!(e.to_string().starts_with("socket: "));

        let e = ProbeError::os("sendto", io::Error::from_raw_os_error(libc::ENOBUFS));
        assert_eq!(e.class(), ErrorClass::Transient);

        assert_eq!(ProbeError::SourceNotLocal(Ipv4Addr::LOCALHOST).class(), ErrorClass::Setup);
    }
}
