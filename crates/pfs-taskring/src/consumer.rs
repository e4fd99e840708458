//! Consumer side

use crate::layout::{TaskRingGeometry, PREFIX_LEN};
use crate::region::TaskRegion;
use crate::task::{ScanTask, TASK_LEN};
use crate::{TaskRingError, TaskRingResult};
use std::path::Path;
use std::sync::atomic::Ordering;

/// The single reader of a task ring
#[derive(Debug)]
pub struct Consumer {
    region: TaskRegion,
    batches: u64,
    tasks: u64,
}

impl Consumer {
    /// Attach to an existing ring file
    pub fn open(path: impl AsRef<Path>) -> TaskRingResult<Self> {
        Ok(Self {
            region: TaskRegion::open(path)?,
            batches: 0,
            tasks: 0,
        })
    }

    /// Attach and insist on a slab size agreed out of band
    pub fn open_expecting(path: impl AsRef<Path>, region_bytes: u64) -> TaskRingResult<Self> {
        let consumer = Self::open(path)?;
        let found = consumer.region.geometry().region_bytes;
        if found != region_bytes {
            return Err(TaskRingError::Mismatch {
                path: consumer.region.path().to_path_buf(),
                reason: format!("region_bytes {found}, expected {region_bytes}"),
            });
        }
        Ok(consumer)
    }

    /// Ring geometry
    pub fn geometry(&self) -> TaskRingGeometry {
        self.region.geometry()
    }

    /// Batches consumed by this handle
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Tasks consumed by this handle
    pub fn tasks(&self) -> u64 {
        self.tasks
    }

    /// True if no record is waiting
    pub fn is_empty(&self) -> bool {
        self.region.head().load(Ordering::Relaxed) == self.region.tail().load(Ordering::Acquire)
    }

    /// Consume one record, handing each task to `f`. Returns the number of
    /// tasks, or `None` if the ring is empty. A record that fails its bounds
    /// check is an error and is not consumed.
    pub fn consume_with<F>(&mut self, mut f: F) -> TaskRingResult<Option<usize>>
    where
        F: FnMut(ScanTask),
    {
        let mask = self.region.mask();
        let head = self.region.head().load(Ordering::Relaxed);
        let tail = self.region.tail().load(Ordering::Acquire);
        if head == tail {
            return Ok(None);
        }

        let region_bytes = self.region.region_bytes();
        let offset = self.region.slot(head).load(Ordering::Relaxed);
        let corrupt = |len: u32| TaskRingError::Corrupt {
            slot: head,
            offset,
            len,
            region_bytes: region_bytes as u64,
        };
        if head > mask || tail > mask || offset as usize + PREFIX_LEN > region_bytes {
            return Err(corrupt(0));
        }

        let slab = self.region.slab();
        // SAFETY: offset + PREFIX_LEN is inside the slab
        let len = unsafe { std::ptr::read_unaligned(slab.add(offset as usize) as *const u32) };
        let body = (len as usize).checked_sub(PREFIX_LEN).ok_or_else(|| corrupt(len))?;
        if body % TASK_LEN != 0 || offset as usize + len as usize > region_bytes {
            return Err(corrupt(len));
        }

        let n = body / TASK_LEN;
        for i in 0..n {
            let mut buf = [0u8; TASK_LEN];
            // SAFETY: the whole record was bounds-checked above
            unsafe {
                std::ptr::copy_nonoverlapping(
                    slab.add(offset as usize + PREFIX_LEN + i * TASK_LEN),
                    buf.as_mut_ptr(),
                    TASK_LEN,
                );
            }
            f(ScanTask::decode(&buf));
        }

        self.region.head().store((head + 1) & mask, Ordering::Release);
        self.batches += 1;
        self.tasks += n as u64;
        Ok(Some(n))
    }

    /// Consume one record, appending its tasks to `out`. Returns `false` if
    /// the ring is empty.
    pub fn consume_into(&mut self, out: &mut Vec<ScanTask>) -> TaskRingResult<bool> {
        Ok(self.consume_with(|t| out.push(t))?.is_some())
    }

    /// Consume one record into a fresh vector
    pub fn consume(&mut self) -> TaskRingResult<Option<Vec<ScanTask>>> {
        let mut out = Vec::new();
        Ok(self.consume_into(&mut out)?.then_some(out))
    }
}
