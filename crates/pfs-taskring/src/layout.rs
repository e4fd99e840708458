//! On-file layout
//!
//! All integers are host byte order. Offsets below are from the start of
//! the file.

use crate::task::TASK_LEN;
use crate::{TaskRingError, TaskRingResult};
use serde::{Deserialize, Serialize};

/// `"PFTR"`
pub const RING_MAGIC: u32 = 0x5046_5452;

/// Layout version
pub const RING_VERSION: u32 = 1;

pub(crate) const OFF_MAGIC: usize = 0;
pub(crate) const OFF_VERSION: usize = 4;
pub(crate) const OFF_SLOTS: usize = 8;
pub(crate) const OFF_MASK: usize = 12;
pub(crate) const OFF_DATA: usize = 16;
pub(crate) const OFF_REGION: usize = 24;

/// Consumer-owned cache line
pub(crate) const OFF_HEAD: usize = 64;
/// Producer-owned cache line
pub(crate) const OFF_TAIL: usize = 128;
/// Slab bump offset; producer-owned, persisted so a restarted producer
/// does not overwrite unconsumed records
pub(crate) const OFF_BUMP: usize = 132;

/// Bytes before the slot array
pub const HEADER_LEN: usize = 192;

/// Records start on this boundary
pub const RECORD_ALIGN: usize = 64;

/// Length prefix of each record
pub const PREFIX_LEN: usize = 4;

/// Largest `slots_pow2` accepted
pub const MAX_SLOTS_POW2: u8 = 20;

/// Unaligned record length for `n` tasks, as stored in the prefix
pub const fn record_len(n: usize) -> usize {
    PREFIX_LEN + n * TASK_LEN
}

/// Slab bytes a record of `n` tasks occupies
pub const fn record_span(n: usize) -> usize {
    align_up(record_len(n), RECORD_ALIGN)
}

pub(crate) const fn align_up(x: usize, a: usize) -> usize {
    (x + a - 1) & !(a - 1)
}

/// Ring shape shared by both peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRingGeometry {
    /// Slab size in bytes
    pub region_bytes: u64,
    /// `log2` of the slot count
    pub slots_pow2: u8,
}

impl Default for TaskRingGeometry {
    fn default() -> Self {
        Self {
            region_bytes: 4 << 20,
            slots_pow2: 10,
        }
    }
}

impl TaskRingGeometry {
    /// Slot count
    pub fn slots(&self) -> u32 {
        1u32 << self.slots_pow2
    }

    /// `slots - 1`
    pub fn mask(&self) -> u32 {
        self.slots() - 1
    }

    /// File offset of the slab
    pub fn data_offset(&self) -> usize {
        align_up(HEADER_LEN + 4 * self.slots() as usize, RECORD_ALIGN)
    }

    /// Exact file size
    pub fn file_len(&self) -> u64 {
        self.data_offset() as u64 + self.region_bytes
    }

    /// Check ranges before creating a file
    pub fn validate(&self) -> TaskRingResult<()> {
        if self.slots_pow2 == 0 || self.slots_pow2 > MAX_SLOTS_POW2 {
            return Err(TaskRingError::Geometry(format!(
                "slots_pow2 {} outside 1..={}",
                self.slots_pow2, MAX_SLOTS_POW2
            )));
        }
        if self.region_bytes < record_span(1) as u64 || self.region_bytes > u64::from(u32::MAX) {
            return Err(TaskRingError::Geometry(format!(
                "region_bytes {} outside {}..={}",
                self.region_bytes,
                record_span(1),
                u32::MAX
            )));
        }
        if self.region_bytes % RECORD_ALIGN as u64 != 0 {
            return Err(TaskRingError::Geometry(format!(
                "region_bytes {} is not a multiple of {}",
                self.region_bytes, RECORD_ALIGN
            )));
        }
        Ok(())
    }
}

/// Static header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub magic: u32,
    pub version: u32,
    pub slots: u32,
    pub mask: u32,
    pub data_offset: u32,
    pub region_bytes: u64,
}

impl Header {
    pub fn for_geometry(geom: &TaskRingGeometry) -> Self {
        Self {
            magic: RING_MAGIC,
            version: RING_VERSION,
            slots: geom.slots(),
            mask: geom.mask(),
            data_offset: geom.data_offset() as u32,
            region_bytes: geom.region_bytes,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&self.magic.to_ne_bytes());
        buf[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&self.version.to_ne_bytes());
        buf[OFF_SLOTS..OFF_SLOTS + 4].copy_from_slice(&self.slots.to_ne_bytes());
        buf[OFF_MASK..OFF_MASK + 4].copy_from_slice(&self.mask.to_ne_bytes());
        buf[OFF_DATA..OFF_DATA + 4].copy_from_slice(&self.data_offset.to_ne_bytes());
        buf[OFF_REGION..OFF_REGION + 8].copy_from_slice(&self.region_bytes.to_ne_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let u32_at = |off: usize| buf[off..off + 4].try_into().ok().map(u32::from_ne_bytes);
        Some(Self {
            magic: u32_at(OFF_MAGIC)?,
            version: u32_at(OFF_VERSION)?,
            slots: u32_at(OFF_SLOTS)?,
            mask: u32_at(OFF_MASK)?,
            data_offset: u32_at(OFF_DATA)?,
            region_bytes: buf[OFF_REGION..OFF_REGION + 8].try_into().ok().map(u64::from_ne_bytes)?,
        })
    }

    /// First disagreement with `expected`, if any
    pub fn mismatch(&self, expected: &Header) -> Option<String> {
        if self.magic != expected.magic {
            return Some(format!("bad magic {:#010x}", self.magic));
        }
        if self.version != expected.version {
            return Some(format!("unsupported version {}", self.version));
        }
        if self.slots != expected.slots || self.mask != expected.mask {
            return Some(format!(
                "slots {} / mask {:#x}, expected {} / {:#x}",
                self.slots, self.mask, expected.slots, expected.mask
            ));
        }
        if self.region_bytes != expected.region_bytes || self.data_offset != expected.data_offset {
            return Some(format!(
                "region_bytes {} at {}, expected {} at {}",
                self.region_bytes, self.data_offset, expected.region_bytes, expected.data_offset
            ));
        }
        None
    }

    /// Geometry recorded in a self-consistent header
    pub fn geometry(&self) -> Option<TaskRingGeometry> {
        if self.magic != RING_MAGIC || self.version != RING_VERSION || !self.slots.is_power_of_two() {
            return None;
        }
        let geom = TaskRingGeometry {
            region_bytes: self.region_bytes,
            slots_pow2: self.slots.trailing_zeros() as u8,
        };
        geom.validate().ok()?;
        (Header::for_geometry(&geom) == *self).then_some(geom)
    }
}
