//! packetfs wire formats
//!
//! The only place that knows byte layouts:
//!
//! - [`frame`]: L2 frame with the fixed application header (EtherType `0x88B5`)
//!   and the per-byte payload ops
//! - [`syn`]: IPv4 + TCP SYN probe packets
//! - [`checksum`]: RFC 1071 Internet checksum
//! - [`mac`]: MAC address parsing and formatting
//!
//! Nothing in this crate allocates on the encode/decode paths.

#![warn(missing_docs)]

pub mod checksum;
pub mod frame;
pub mod mac;
pub mod syn;

pub use frame::{apply_op, decode, decode_mut, encode, FrameHeader, FrameView, Op, OpOutcome, PayloadPattern};
pub use mac::MacAddr;
pub use syn::{SynBuilder, SYN_PACKET_LEN};

use thiserror::Error;

/// Wire-format errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame would not fit in the destination buffer
    #[error("payload of {payload_len} bytes exceeds capacity of {capacity} bytes")]
    PayloadTooLarge {
        /// Requested payload
        payload_len: usize,
        /// Available payload room
        capacity: usize,
    },

    /// Output buffer is too small for a fixed-size packet
    #[error("buffer of {have} bytes, need {need}")]
    BufferTooSmall {
        /// Provided length
        have: usize,
        /// Required length
        need: usize,
    },

    /// MAC address did not parse
    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),
}

impl From<WireError> for std::io::Error {
    fn from(e: WireError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    }
}

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;
