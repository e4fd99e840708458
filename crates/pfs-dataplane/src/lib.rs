//! packetfs raw-Ethernet data plane
//!
//! Memory-mapped `AF_PACKET` rings shared with the kernel.
//!
//! # Architecture
//!
//! ```text
//!   producer                                   consumer
//!  ┌──────────────┐                          ┌──────────────┐
//!  │  TxEngine    │ encode + op              │  RxEngine    │ decode + op
//!  └──────┬───────┘                          └──────▲───────┘
//!         │ submit_batch                            │ poll
//!  ┌──────▼───────┐  kick (sendto len 0)     ┌──────┴───────┐
//!  │  TxRing      │ ───────────────────────► │  RxRing      │
//!  │  V2 slots    │        kernel / NIC      │  V3 blocks   │
//!  └──────────────┘                          └──────────────┘
//! ```
//!
//! Each ring has a memory-only half ([`SlotRing`], [`BlockRing`]) that owns
//! the slot/block ownership protocol and a socket-owning half ([`TxRing`],
//! [`RxRing`]) that sets the ring up with the kernel.
//!
//! Exactly one producer per TX ring, one consumer per RX ring. Nothing here
//! spawns threads.

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod rx;
pub mod socket;
pub mod stats;
// names and fields mirror linux/if_packet.h
#[allow(missing_docs)]
pub mod tpacket;
pub mod tx;

pub use config::{RxConfig, RxGeometry, TxConfig, TxGeometry};
pub use engine::{FrameProcessor, FrameSource, RxEngine, RxSummary, TxEngine, TxPort, TxSummary};
pub use rx::{BlockRing, BlockSummary, PollOutcome, RxRing};
pub use stats::{RxStats, RxStatsSnapshot, TxStats, TxStatsSnapshot};
pub use tx::{Blocked, SlotRing, SlotStatus, SubmitOutcome, TxRing};

use pfs_common::{classify, ErrorClass};
use pfs_wire::WireError;
use std::io;

/// Default TX submit batch
pub const BATCH_SIZE: usize = 64;

/// Ring errors
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// Geometry rejected before touching the kernel
    #[error("invalid ring geometry: {0}")]
    Geometry(String),

    /// A run parameter is out of range
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A syscall failed
    #[error("{op} on {iface}: {source}")]
    Os {
        /// Operation that failed
        op: &'static str,
        /// Interface name
        iface: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Frame encoding failed
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl RingError {
    pub(crate) fn os(op: &'static str, iface: &str, source: io::Error) -> Self {
        RingError::Os {
            op,
            iface: iface.to_string(),
            source,
        }
    }

    /// Setup / transient / fatal
    pub fn class(&self) -> ErrorClass {
        match self {
            RingError::Geometry(_) | RingError::Config(_) | RingError::Wire(_) => ErrorClass::Setup,
            RingError::Os { source, .. } => classify(source),
        }
    }
}

/// Result type for ring operations
pub type RingResult<T> = Result<T, RingError>;
