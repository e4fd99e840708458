//! Cooperative shutdown
//!
//! SIGINT/SIGTERM flip a process-wide flag; every loop polls a [`StopFlag`]
//! which also carries a local flag so a component can be stopped on its own
//! (tests, fatal errors inside one loop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set by the signal handler; once true, never false.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SIGNALLED.store(true, Ordering::Relaxed);
}

/// Route SIGINT and SIGTERM to the process-wide stop flag.
pub fn install_signal_handlers() {
    // SAFETY: the handler only performs an atomic store
    unsafe {
        libc::signal(libc::SIGINT, on_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as *const () as libc::sighandler_t);
    }
}

/// Stop flag polled by data-plane loops.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    local: Arc<AtomicBool>,
}

impl StopFlag {
    /// New, unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request this component (and its clones) to stop.
    pub fn request(&self) {
        self.local.store(true, Ordering::Release);
    }

    /// True once a stop was requested locally or by a signal.
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.local.load(Ordering::Relaxed) || SIGNALLED.load(Ordering::Relaxed)
    }
}
