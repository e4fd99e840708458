//! CLI Commands

pub mod rx;
pub mod syn;
pub mod taskring;
pub mod tx;

use crate::config::Profile;
use crate::output::OutputFormat;
use crossbeam::utils::Backoff;
use pfs_common::clock::MAX_NAP;
use pfs_common::{nap, StopFlag};
use std::fmt;

/// Bad input caught after parsing (geometry, missing source address, ...).
/// The binary exits with status 2 for these.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Wrap a validation failure as a usage error
pub fn usage(err: impl fmt::Display) -> anyhow::Error {
    anyhow::Error::new(UsageError(err.to_string()))
}

/// What every command gets besides its own arguments
pub struct Context {
    pub format: OutputFormat,
    pub profile: Profile,
    pub stop: StopFlag,
}

impl Context {
    pub fn new(format: OutputFormat, profile: Profile) -> Self {
        Self {
            format,
            profile,
            stop: StopFlag::new(),
        }
    }

    /// Report interval: flag or env, then profile, then the default
    pub fn report_ms(&self, flag: Option<u64>) -> u64 {
        flag.or(self.profile.report_ms).unwrap_or(pfs_common::DEFAULT_REPORT_MS)
    }
}

/// Spin, then yield, then nap; the wait used on a full or empty task ring
pub(crate) fn idle(backoff: &Backoff) {
    if backoff.is_completed() {
        nap(MAX_NAP);
    } else {
        backoff.snooze();
    }
}
