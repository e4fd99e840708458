//! Producer side

use crate::layout::{record_len, record_span, TaskRingGeometry, PREFIX_LEN};
use crate::region::TaskRegion;
use crate::task::{ScanTask, TASK_LEN};
use crate::{TaskRingError, TaskRingResult};
use std::path::Path;
use std::sync::atomic::Ordering;

/// Outcome of [`Producer::publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Publish {
    /// The batch is visible to the consumer
    Published,
    /// No free slot, or no slab room outside unconsumed records
    Full,
}

/// The single writer of a task ring
#[derive(Debug)]
pub struct Producer {
    region: TaskRegion,
    batches: u64,
    tasks: u64,
}

impl Producer {
    /// Create (or attach to a matching) ring file
    pub fn create(path: impl AsRef<Path>, geom: TaskRingGeometry) -> TaskRingResult<Self> {
        Ok(Self::attach(TaskRegion::create(path, geom)?))
    }

    /// Attach to an existing ring file
    pub fn open(path: impl AsRef<Path>) -> TaskRingResult<Self> {
        Ok(Self::attach(TaskRegion::open(path)?))
    }

    fn attach(region: TaskRegion) -> Self {
        Self {
            region,
            batches: 0,
            tasks: 0,
        }
    }

    /// Ring geometry
    pub fn geometry(&self) -> TaskRingGeometry {
        self.region.geometry()
    }

    /// Batches published by this handle
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Tasks published by this handle
    pub fn tasks(&self) -> u64 {
        self.tasks
    }

    /// Publish one batch as a single record. An empty batch publishes
    /// nothing.
    pub fn publish(&mut self, batch: &[ScanTask]) -> TaskRingResult<Publish> {
        if batch.is_empty() {
            return Ok(Publish::Published);
        }
        let region_bytes = self.region.region_bytes();
        let span = record_span(batch.len());
        if span > region_bytes {
            return Err(TaskRingError::BatchTooLarge {
                tasks: batch.len(),
                need: span as u64,
                capacity: region_bytes as u64,
            });
        }

        let mask = self.region.mask();
        let tail = self.region.tail().load(Ordering::Relaxed);
        let head = self.region.head().load(Ordering::Acquire);
        if (tail.wrapping_add(1) & mask) == head {
            return Ok(Publish::Full);
        }

        let live_start = (head != tail).then(|| self.region.slot(head).load(Ordering::Relaxed) as usize);
        let bump = self.region.bump().load(Ordering::Relaxed) as usize;
        let Some(offset) = place(bump, span, live_start, region_bytes) else {
            return Ok(Publish::Full);
        };

        let slab = self.region.slab();
        // SAFETY: offset + span <= region_bytes, and the range holds no
        // record the consumer has yet to read
        unsafe {
            let rec = slab.add(offset);
            std::ptr::write_unaligned(rec as *mut u32, record_len(batch.len()) as u32);
            for (i, task) in batch.iter().enumerate() {
                let mut buf = [0u8; TASK_LEN];
                task.encode(&mut buf);
                std::ptr::copy_nonoverlapping(buf.as_ptr(), rec.add(PREFIX_LEN + i * TASK_LEN), TASK_LEN);
            }
        }

        self.region.slot(tail).store(offset as u32, Ordering::Relaxed);
        self.region.bump().store((offset + span) as u32, Ordering::Relaxed);
        self.region.tail().store(tail.wrapping_add(1) & mask, Ordering::Release);

        self.batches += 1;
        self.tasks += batch.len() as u64;
        Ok(Publish::Published)
    }

    /// Records waiting for the consumer
    pub fn pending(&self) -> u32 {
        let tail = self.region.tail().load(Ordering::Relaxed);
        let head = self.region.head().load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.region.mask()
    }
}

/// Slab offset for a record of `span` bytes. Unconsumed records occupy
/// `[live_start, bump)`, wrapped around the end of the slab when
/// `bump <= live_start`. A new record starts at the bump offset, or at 0
/// when the tail of the slab is too short; it never reaches `live_start`.
fn place(bump: usize, span: usize, live_start: Option<usize>, region_bytes: usize) -> Option<usize> {
    let fits_here = bump + span <= region_bytes;
    match live_start {
        None if fits_here => Some(bump),
        None => Some(0),
        Some(start) if bump > start => {
            if fits_here {
                Some(bump)
            } else if span < start {
                Some(0)
            } else {
                None
            }
        }
        Some(start) => (bump + span < start).then_some(bump),
    }
}
