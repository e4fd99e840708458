//! EtherType `0x88B5` frame codec
//!
//! ```text
//!  0      6      12   14      18  19  20     22          26              34
//!  +------+------+----+-------+---+---+------+-----------+---------------+---------
//!  | dst  | src  |type| magic |op |imm|flags |payload_len|      seq      | payload
//!  +------+------+----+-------+---+---+------+-----------+---------------+---------
//! ```
//!
//! EtherType is in network order like every L2 type field; the application
//! header fields are little-endian.

use crate::mac::MacAddr;
use crate::{WireError, WireResult};
use serde::{Deserialize, Serialize};

/// Experimental EtherType carried by every frame
pub const ETHERTYPE_PFS: u16 = 0x88B5;

/// Application header magic ("PFS1")
pub const PFS_MAGIC: u32 = 0x5046_5331;

/// Ethernet header length
pub const ETH_HDR_LEN: usize = 14;

/// Application header length
pub const APP_HDR_LEN: usize = 20;

/// L2 + application header
pub const HEADER_LEN: usize = ETH_HDR_LEN + APP_HDR_LEN;

const OFF_ETHERTYPE: usize = 12;
const OFF_MAGIC: usize = 14;
const OFF_OP: usize = 18;
const OFF_IMM: usize = 19;
const OFF_FLAGS: usize = 20;
const OFF_PAYLOAD_LEN: usize = 22;
const OFF_SEQ: usize = 26;

/// Per-byte payload transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Op {
    /// Leave bytes alone
    #[default]
    None = 0,
    /// `b ^= imm`
    Xor = 1,
    /// `b = b + imm (mod 256)`
    Add = 2,
}

impl Op {
    /// Known op for a wire code
    pub fn from_code(code: u8) -> Option<Op> {
        match code {
            0 => Some(Op::None),
            1 => Some(Op::Xor),
            2 => Some(Op::Add),
            _ => None,
        }
    }

    /// Wire code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Immediate that undoes this op applied with `imm`
    pub fn inverse_imm(self, imm: u8) -> u8 {
        match self {
            Op::Add => imm.wrapping_neg(),
            Op::None | Op::Xor => imm,
        }
    }
}

/// What [`apply_op`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// Bytes transformed
    Applied,
    /// `op = 0`
    Noop,
    /// Reserved op code; bytes untouched
    Unknown,
}

/// Apply a wire op code to `buf` in place.
#[inline]
pub fn apply_op(buf: &mut [u8], op: u8, imm: u8) -> OpOutcome {
    match Op::from_code(op) {
        Some(Op::None) => OpOutcome::Noop,
        Some(Op::Xor) => {
            for b in buf.iter_mut() {
                *b ^= imm;
            }
            OpOutcome::Applied
        }
        Some(Op::Add) => {
            for b in buf.iter_mut() {
                *b = b.wrapping_add(imm);
            }
            OpOutcome::Applied
        }
        None => OpOutcome::Unknown,
    }
}

/// How the encoder fills the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadPattern {
    /// All zero
    #[default]
    Zero,
    /// Byte `i` is `i mod 256`
    Ramp,
    /// Every byte set to the value
    Fill(u8),
    /// Payload bytes already written by the caller; left as is
    Preset,
}

impl PayloadPattern {
    /// Write the pattern into `buf`
    #[inline]
    pub fn fill(self, buf: &mut [u8]) {
        match self {
            PayloadPattern::Zero => buf.fill(0),
            PayloadPattern::Fill(v) => buf.fill(v),
            PayloadPattern::Ramp => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = i as u8;
                }
            }
            PayloadPattern::Preset => {}
        }
    }
}

/// Header fields of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Destination MAC
    pub dst: MacAddr,
    /// Source MAC
    pub src: MacAddr,
    /// Raw op code (unknown codes survive decoding)
    pub op: u8,
    /// Byte immediate for the op
    pub imm: u8,
    /// Reserved, zero on encode
    pub flags: u16,
    /// Payload bytes following the header
    pub payload_len: u32,
    /// Sender sequence number
    pub seq: u64,
}

impl FrameHeader {
    /// Header for a frame with `op`/`imm`
    pub fn new(dst: MacAddr, src: MacAddr, op: Op, imm: u8, seq: u64, payload_len: u32) -> Self {
        Self {
            dst,
            src,
            op: op.code(),
            imm,
            flags: 0,
            payload_len,
            seq,
        }
    }

    /// Total frame length
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }

    /// Write the L2 and application headers into the first [`HEADER_LEN`] bytes.
    #[inline]
    pub fn write(&self, out: &mut [u8]) -> WireResult<()> {
        if out.len() < HEADER_LEN {
            return Err(WireError::BufferTooSmall {
                have: out.len(),
                need: HEADER_LEN,
            });
        }
        out[0..6].copy_from_slice(&self.dst.0);
        out[6..12].copy_from_slice(&self.src.0);
        out[OFF_ETHERTYPE..OFF_MAGIC].copy_from_slice(&ETHERTYPE_PFS.to_be_bytes());
        out[OFF_MAGIC..OFF_OP].copy_from_slice(&PFS_MAGIC.to_le_bytes());
        out[OFF_OP] = self.op;
        out[OFF_IMM] = self.imm;
        out[OFF_FLAGS..OFF_PAYLOAD_LEN].copy_from_slice(&self.flags.to_le_bytes());
        out[OFF_PAYLOAD_LEN..OFF_SEQ].copy_from_slice(&self.payload_len.to_le_bytes());
        out[OFF_SEQ..HEADER_LEN].copy_from_slice(&self.seq.to_le_bytes());
        Ok(())
    }

    fn read(frame: &[u8]) -> Option<FrameHeader> {
        if frame.len() < HEADER_LEN {
            return None;
        }
        if u16::from_be_bytes([frame[12], frame[13]]) != ETHERTYPE_PFS {
            return None;
        }
        if u32::from_le_bytes(frame[OFF_MAGIC..OFF_OP].try_into().ok()?) != PFS_MAGIC {
            return None;
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&frame[0..6]);
        src.copy_from_slice(&frame[6..12]);
        Some(FrameHeader {
            dst: MacAddr(dst),
            src: MacAddr(src),
            op: frame[OFF_OP],
            imm: frame[OFF_IMM],
            flags: u16::from_le_bytes(frame[OFF_FLAGS..OFF_PAYLOAD_LEN].try_into().ok()?),
            payload_len: u32::from_le_bytes(frame[OFF_PAYLOAD_LEN..OFF_SEQ].try_into().ok()?),
            seq: u64::from_le_bytes(frame[OFF_SEQ..HEADER_LEN].try_into().ok()?),
        })
    }
}

/// Encode a frame into `out`, filling `payload_len` bytes with `pattern`.
/// Returns the total frame length `HEADER_LEN + payload_len`.
#[inline]
pub fn encode(hdr: &FrameHeader, pattern: PayloadPattern, out: &mut [u8]) -> WireResult<usize> {
    let total = hdr.frame_len();
    if total > out.len() {
        return Err(WireError::PayloadTooLarge {
            payload_len: hdr.payload_len as usize,
            capacity: out.len().saturating_sub(HEADER_LEN),
        });
    }
    hdr.write(out)?;
    pattern.fill(&mut out[HEADER_LEN..total]);
    Ok(total)
}

/// Borrowed view of a decoded frame
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Header fields
    pub header: FrameHeader,
    /// Exactly `payload_len` bytes
    pub payload: &'a [u8],
}

/// Decode without copying. `None` for short frames, a foreign EtherType,
/// a wrong magic, or a `payload_len` that runs past the captured bytes.
#[inline]
pub fn decode(frame: &[u8]) -> Option<FrameView<'_>> {
    let header = FrameHeader::read(frame)?;
    let end = HEADER_LEN.checked_add(header.payload_len as usize)?;
    let payload = frame.get(HEADER_LEN..end)?;
    Some(FrameView { header, payload })
}

/// Like [`decode`] but hands out the payload mutably for in-place ops.
#[inline]
pub fn decode_mut(frame: &mut [u8]) -> Option<(FrameHeader, &mut [u8])> {
    let header = FrameHeader::read(frame)?;
    let end = HEADER_LEN.checked_add(header.payload_len as usize)?;
    let payload = frame.get_mut(HEADER_LEN..end)?;
    Some((header, payload))
}
