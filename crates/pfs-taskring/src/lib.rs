//! packetfs task ring
//!
//! Hands batches of scan descriptors from one producer process to one
//! consumer process through a memory-mapped file.
//!
//! # Layout
//!
//! ```text
//! 0        64        128                192              data_offset
//! ┌────────┬─────────┬──────────────────┬────────────────┬────────────────────┐
//! │ header │ head    │ tail, bump       │ slot offsets   │ slab: records      │
//! │ (geom) │ (cons.) │ (producer)       │ u32 × slots    │ [len][task × n]    │
//! └────────┴─────────┴──────────────────┴────────────────┴────────────────────┘
//! ```
//!
//! The producer writes a record into the slab, stores its offset in
//! `slots[tail]`, then advances `tail` with release ordering. The consumer
//! loads `tail` with acquire ordering, reads the record, then advances
//! `head` with release ordering. No locks.

#![warn(missing_docs)]

pub mod consumer;
pub mod layout;
pub mod producer;
pub mod region;
pub mod task;

pub use consumer::Consumer;
pub use layout::TaskRingGeometry;
pub use producer::{Producer, Publish};
pub use task::{Proto, ScanTask};

use std::io;
use std::path::PathBuf;

/// Task ring errors
#[derive(Debug, thiserror::Error)]
pub enum TaskRingError {
    /// Geometry rejected before touching the file
    #[error("invalid task ring geometry: {0}")]
    Geometry(String),

    /// The file holds a ring with a different shape, or no ring at all
    #[error("task ring {path}: {reason}")]
    Mismatch {
        /// Ring file
        path: PathBuf,
        /// What disagreed
        reason: String,
    },

    /// A record failed its bounds check; the consumer stops
    #[error("corrupt record in slot {slot}: offset {offset}, length {len}, slab {region_bytes} bytes")]
    Corrupt {
        /// Slot index
        slot: u32,
        /// Record offset in the slab
        offset: u32,
        /// Record length prefix
        len: u32,
        /// Slab size
        region_bytes: u64,
    },

    /// A batch that can never fit the slab
    #[error("batch of {tasks} tasks needs {need} bytes, slab holds {capacity}")]
    BatchTooLarge {
        /// Tasks in the batch
        tasks: usize,
        /// Aligned record bytes
        need: u64,
        /// Slab bytes
        capacity: u64,
    },

    /// File or mapping failure
    #[error("task ring {path}: {source}")]
    Io {
        /// Ring file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Result type for task ring operations
pub type TaskRingResult<T> = Result<T, TaskRingError>;
