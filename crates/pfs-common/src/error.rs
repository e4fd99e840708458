//! Error types shared across packetfs crates

use std::io;
use thiserror::Error;

/// How a failed OS call should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad interface, missing privileges, invalid geometry. Fatal at startup.
    Setup,
    /// Back off briefly and retry.
    Transient,
    /// The resource is gone; close the component.
    Fatal,
}

/// Classify an I/O error.
pub fn classify(err: &io::Error) -> ErrorClass {
    match err.raw_os_error() {
        Some(libc::EPERM | libc::EACCES | libc::ENODEV | libc::EINVAL | libc::EADDRNOTAVAIL) => {
            ErrorClass::Setup
        }
        Some(libc::EAGAIN | libc::ENOBUFS | libc::EINTR) => ErrorClass::Transient,
        Some(_) => ErrorClass::Fatal,
        None => match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => ErrorClass::Transient,
            io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput => ErrorClass::Setup,
            _ => ErrorClass::Fatal,
        },
    }
}

/// True for `EAGAIN`/`ENOBUFS`/`EINTR` style errors.
#[inline]
pub fn is_transient(err: &io::Error) -> bool {
    classify(err) == ErrorClass::Transient
}

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum PfsError {
    /// CIDR did not parse
    #[error("invalid CIDR {input:?}: {reason}")]
    InvalidCidr {
        /// Offending input
        input: String,
        /// Parser message
        reason: String,
    },

    /// Port list did not parse
    #[error("invalid port list {input:?}: {reason}")]
    InvalidPorts {
        /// Offending input
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// Run length is negative, not finite, or too large
    #[error("invalid duration {0} s")]
    InvalidDuration(f64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for the shared helpers
pub type PfsResult<T> = Result<T, PfsError>;
