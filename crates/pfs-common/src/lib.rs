//! packetfs common plumbing
//!
//! Pieces shared by every pipeline component:
//!
//! - [`error`]: OS error classification (setup / transient / fatal)
//! - [`clock`]: monotonic nanosecond clock and short naps
//! - [`pacing`]: deadline pacer without burst credit
//! - [`report`]: periodic throughput reports on the diagnostic stream
//! - [`shutdown`]: cooperative stop flag wired to SIGINT/SIGTERM
//! - [`net`]: CIDR ranges and port lists

#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod net;
pub mod pacing;
pub mod report;
pub mod shutdown;

pub use clock::{deadline_after, deadline_ns_after, monotonic_ns, nap, run_duration};
pub use error::{classify, ErrorClass, PfsError, PfsResult};
pub use net::{Ipv4Range, PortList};
pub use pacing::Pacer;
pub use report::{Report, Reporter, Sample};
pub use shutdown::StopFlag;

/// Grace period granted to in-flight work after a stop request
pub const GRACE_PERIOD_MS: u64 = 100;

/// Default report interval
pub const DEFAULT_REPORT_MS: u64 = 1000;
