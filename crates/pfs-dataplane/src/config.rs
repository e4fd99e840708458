//! Ring geometry and engine configuration

use crate::tpacket::{TPACKET3_HDRLEN, TPACKET_ALIGNMENT, TX_DATA_OFFSET};
use crate::{RingError, RingResult, BATCH_SIZE};
use pfs_common::{run_duration, DEFAULT_REPORT_MS};
use pfs_wire::frame::{Op, HEADER_LEN};
use pfs_wire::MacAddr;
use serde::{Deserialize, Serialize};

fn check_duration(secs: Option<f64>) -> RingResult<()> {
    match secs {
        Some(s) => run_duration(s).map(|_| ()).map_err(|e| RingError::Config(e.to_string())),
        None => Ok(()),
    }
}

/// TX ring shape: `blocks` blocks of `block_size` bytes, each holding
/// `block_size / frame_size` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxGeometry {
    /// Bytes per slot, including the slot header
    pub frame_size: usize,
    /// Bytes per block; a multiple of the page size
    pub block_size: usize,
    /// Number of blocks
    pub blocks: usize,
}

impl Default for TxGeometry {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            block_size: 1 << 16,
            blocks: 64,
        }
    }
}

impl TxGeometry {
    /// Shape from slot size and count; the block is rounded up to `page`.
    pub fn from_slots(slot_bytes: usize, frames_per_block: usize, blocks: usize, page: usize) -> Self {
        let raw = slot_bytes.saturating_mul(frames_per_block);
        let block_size = raw.div_ceil(page.max(1)) * page.max(1);
        Self {
            frame_size: slot_bytes,
            block_size,
            blocks,
        }
    }

    /// Slots per block
    pub fn frames_per_block(&self) -> usize {
        if self.frame_size == 0 {
            0
        } else {
            self.block_size / self.frame_size
        }
    }

    /// Slots in the ring
    pub fn total_frames(&self) -> usize {
        self.frames_per_block() * self.blocks
    }

    /// Bytes to map
    pub fn map_len(&self) -> usize {
        self.block_size * self.blocks
    }

    /// Largest L2 frame a slot carries
    pub fn max_frame_len(&self) -> usize {
        self.frame_size.saturating_sub(TX_DATA_OFFSET)
    }

    /// Largest payload a slot carries
    pub fn max_payload(&self) -> usize {
        self.max_frame_len().saturating_sub(HEADER_LEN)
    }

    /// Check against kernel constraints for the given page size
    pub fn validate(&self, page: usize) -> RingResult<()> {
        if self.frame_size % TPACKET_ALIGNMENT != 0 || self.frame_size <= TX_DATA_OFFSET + HEADER_LEN {
            return Err(RingError::Geometry(format!(
                "frame_size {} must be a multiple of {} and exceed {}",
                self.frame_size,
                TPACKET_ALIGNMENT,
                TX_DATA_OFFSET + HEADER_LEN
            )));
        }
        if self.block_size == 0 || self.block_size % page != 0 || self.block_size < self.frame_size {
            return Err(RingError::Geometry(format!(
                "block_size {} must be a non-zero multiple of the page size {} and hold a frame",
                self.block_size, page
            )));
        }
        if self.blocks == 0 || u32::try_from(self.total_frames()).is_err() {
            return Err(RingError::Geometry(format!("block count {} out of range", self.blocks)));
        }
        Ok(())
    }
}

/// RX ring shape (block mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxGeometry {
    /// Nominal frame record size
    pub frame_size: usize,
    /// Bytes per block; a multiple of the page size
    pub block_size: usize,
    /// Must equal `block_size / frame_size`
    pub frames_per_block: usize,
    /// Number of blocks
    pub blocks: usize,
    /// Kernel retires a partially filled block after this many ms
    pub retire_ms: u32,
}

impl Default for RxGeometry {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            block_size: 1 << 18,
            frames_per_block: (1 << 18) / 2048,
            blocks: 64,
            retire_ms: 10,
        }
    }
}

impl RxGeometry {
    /// Bytes to map
    pub fn map_len(&self) -> usize {
        self.block_size * self.blocks
    }

    /// Check against kernel constraints for the given page size
    pub fn validate(&self, page: usize) -> RingResult<()> {
        if self.frame_size % TPACKET_ALIGNMENT != 0 || self.frame_size < TPACKET3_HDRLEN + HEADER_LEN {
            return Err(RingError::Geometry(format!(
                "frame_size {} must be a multiple of {} and at least {}",
                self.frame_size,
                TPACKET_ALIGNMENT,
                TPACKET3_HDRLEN + HEADER_LEN
            )));
        }
        if self.block_size == 0 || self.block_size % page != 0 {
            return Err(RingError::Geometry(format!(
                "block_size {} must be a non-zero multiple of the page size {}",
                self.block_size, page
            )));
        }
        if self.frames_per_block == 0 || self.frames_per_block != self.block_size / self.frame_size {
            return Err(RingError::Geometry(format!(
                "frames_per_block {} must equal block_size / frame_size = {}",
                self.frames_per_block,
                self.block_size / self.frame_size
            )));
        }
        if self.blocks == 0 || u32::try_from(self.frames_per_block * self.blocks).is_err() {
            return Err(RingError::Geometry(format!("block count {} out of range", self.blocks)));
        }
        if self.retire_ms == 0 {
            return Err(RingError::Geometry("retire_ms must be at least 1".into()));
        }
        Ok(())
    }
}

/// TX engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxConfig {
    /// Interface to transmit on
    pub iface: String,
    /// Destination MAC
    pub dst_mac: MacAddr,
    /// Source MAC; `None` reads it from the interface
    pub src_mac: Option<MacAddr>,
    /// Payload bytes per frame
    pub payload_len: usize,
    /// Op applied to the payload before sending (and stamped in the header)
    pub op: Op,
    /// Immediate for `op`
    pub imm: u8,
    /// Fill payloads with a ramp instead of zeros
    pub ramp: bool,
    /// Slots filled per submit
    pub batch_frames: usize,
    /// Target frames per second; 0 sends as fast as the ring drains
    pub pps: u64,
    /// Ring shape
    pub geometry: TxGeometry,
    /// Ask the kernel to skip the qdisc layer
    pub qdisc_bypass: bool,
    /// Stop after this many frames
    pub max_frames: Option<u64>,
    /// Stop after this many seconds
    pub duration_secs: Option<f64>,
    /// Report interval in ms (0 disables)
    pub report_ms: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            iface: "lo".into(),
            dst_mac: MacAddr::BROADCAST,
            src_mac: None,
            payload_len: 64,
            op: Op::None,
            imm: 0,
            ramp: true,
            batch_frames: BATCH_SIZE,
            pps: 0,
            geometry: TxGeometry::default(),
            qdisc_bypass: true,
            max_frames: None,
            duration_secs: None,
            report_ms: DEFAULT_REPORT_MS,
        }
    }
}

impl TxConfig {
    /// Check everything that does not need the kernel
    pub fn validate(&self, page: usize) -> RingResult<()> {
        self.geometry.validate(page)?;
        if self.payload_len > self.geometry.max_payload() {
            return Err(RingError::Wire(pfs_wire::WireError::PayloadTooLarge {
                payload_len: self.payload_len,
                capacity: self.geometry.max_payload(),
            }));
        }
        if self.batch_frames == 0 {
            return Err(RingError::Geometry("batch_frames must be at least 1".into()));
        }
        if self.iface.is_empty() {
            return Err(RingError::Geometry("interface name is empty".into()));
        }
        check_duration(self.duration_secs)
    }
}

/// RX engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxConfig {
    /// Interface to receive on
    pub iface: String,
    /// Raw op code applied to each valid payload (unknown codes are counted)
    pub op: u8,
    /// Immediate for `op`
    pub imm: u8,
    /// After the op, check payloads against the TX ramp pattern
    pub verify_ramp: bool,
    /// Join the promiscuous set (needed to see locally sourced traffic)
    pub promiscuous: bool,
    /// Ring shape
    pub geometry: RxGeometry,
    /// Stop after this many seconds
    pub duration_secs: Option<f64>,
    /// Report interval in ms (0 disables)
    pub report_ms: u64,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            iface: "lo".into(),
            op: 0,
            imm: 0,
            verify_ramp: false,
            promiscuous: true,
            geometry: RxGeometry::default(),
            duration_secs: None,
            report_ms: DEFAULT_REPORT_MS,
        }
    }
}

impl RxConfig {
    /// Check everything that does not need the kernel
    pub fn validate(&self, page: usize) -> RingResult<()> {
        if self.iface.is_empty() {
            return Err(RingError::Geometry("interface name is empty".into()));
        }
        check_duration(self.duration_secs)?;
        self.geometry.validate(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_defaults_valid() {
        let g = TxGeometry::default();
        g.validate(4096).unwrap();
        assert_eq!(g.frames_per_block(), 32);
        assert_eq!(g.total_frames(), 2048);
        assert_eq!(g.max_payload(), 2048 - 32 - 34);
        TxConfig::default().validate(4096).unwrap();
    }

    #[test]
    fn test_tx_from_slots_rounds_block() {
        let g = TxGeometry::from_slots(2048, 3, 4, 4096);
        assert_eq!(g.block_size, 8192);
        assert_eq!(g.frames_per_block(), 4);
        g.validate(4096).unwrap();
    }

    #[test]
    fn test_tx_rejects_bad_geometry() {
        let unaligned = TxGeometry { frame_size: 2050, ..Default::default() };
        assert!(unaligned.validate(4096).is_err());
        let tiny = TxGeometry { frame_size: 64, ..Default::default() };
        assert!(tiny.validate(4096).is_err());
        let odd_block = TxGeometry { block_size: 5000, ..Default::default() };
        assert!(odd_block.validate(4096).is_err());
        let none = TxGeometry { blocks: 0, ..Default::default() };
        assert!(none.validate(4096).is_err());
    }

    #[test]
    fn test_tx_payload_capacity() {
        let cfg = TxConfig { payload_len: 4000, ..Default::default() };
        assert!(matches!(cfg.validate(4096), Err(RingError::Wire(_))));
    }

    #[test]
    fn test_rx_geometry() {
        RxGeometry::default().validate(4096).unwrap();
        let mismatch = RxGeometry { frames_per_block: 7, ..Default::default() };
        assert!(mismatch.validate(4096).is_err());
        let no_retire = RxGeometry { retire_ms: 0, ..Default::default() };
        assert!(no_retire.validate(4096).is_err());
    }

    #[test]
    fn test_unbounded_duration_rejected() {
        for secs in [f64::INFINITY, f64::NAN, 1e20, -1.0] {
            let tx = TxConfig { duration_secs: Some(secs), ..Default::default() };
            assert!(matches!(tx.validate(4096), Err(RingError::Config(_))), "{secs}");
            let rx = RxConfig { duration_secs: Some(secs), ..Default::default() };
            assert!(matches!(rx.validate(4096), Err(RingError::Config(_))), "{secs}");
        }
        let tx = TxConfig { duration_secs: Some(2.5), ..Default::default() };
        tx.validate(4096).unwrap();
        let rx = RxConfig { duration_secs: Some(0.0), ..Default::default() };
        rx.validate(4096).unwrap();
    }
}
