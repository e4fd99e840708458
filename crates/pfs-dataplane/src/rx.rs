//! TPACKET_V3 RX ring
//!
//! The kernel fills whole blocks of frames and flips the block status to
//! `USER`. The consumer walks every frame of the block, then hands the block
//! back by storing `KERNEL` with release ordering. Blocks are consumed
//! strictly in ring order.

use crate::config::RxGeometry;
use crate::socket::{page_size, PacketSocket, RingMap};
use crate::tpacket::*;
use crate::{RingError, RingResult};
use pfs_common::{monotonic_ns, nap};
use pfs_wire::frame::ETHERTYPE_PFS;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One drained block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSummary {
    /// Frames delivered to the callback
    pub frames: u32,
    /// Captured bytes delivered
    pub bytes: u64,
    /// The walk stopped early on an out-of-bounds frame record
    pub truncated: bool,
}

/// Result of one [`RxRing::poll`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Blocks returned to the kernel
    pub blocks: u64,
    /// Frames delivered
    pub frames: u64,
    /// Blocks whose walk stopped early
    pub truncated: u64,
}

/// Consumer view over an RX block array. Holds no kernel resources.
#[derive(Debug)]
pub struct BlockRing {
    base: NonNull<u8>,
    block_size: usize,
    blocks: usize,
    cursor: usize,
}

// SAFETY: the ring is used by exactly one consumer at a time
unsafe impl Send for BlockRing {}

impl BlockRing {
    /// # Safety
    ///
    /// `base` must point to `block_size * blocks` writable bytes, aligned to
    /// 8, that outlive the ring and are only touched by this consumer and
    /// the kernel (or a stand-in following the same status protocol).
    pub unsafe fn new(base: *mut u8, block_size: usize, blocks: usize) -> Self {
        Self {
            // SAFETY: caller guarantees a valid mapping
            base: NonNull::new_unchecked(base),
            block_size,
            blocks,
            cursor: 0,
        }
    }

    /// Index of the next block to drain
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn block_ptr(&self, idx: usize) -> *mut u8 {
        // SAFETY: idx < blocks keeps the offset inside the mapping
        unsafe { self.base.as_ptr().add(idx * self.block_size) }
    }

    fn status_word(&self, idx: usize) -> &AtomicU32 {
        // SAFETY: block_status sits at a fixed, 4-aligned offset in every
        // block and the kernel accesses it atomically too
        unsafe { &*(self.block_ptr(idx).add(BLOCK_STATUS_OFFSET) as *const AtomicU32) }
    }

    /// True if the block at the cursor belongs to user space
    pub fn ready(&self) -> bool {
        self.status_word(self.cursor).load(Ordering::Acquire) & TP_STATUS_USER != 0
    }

    /// Drain the block at the cursor, if user-owned. `on_frame` receives
    /// each captured frame starting at its Ethernet header. The block is
    /// returned to the kernel even if the walk stops early.
    pub fn drain_block<F>(&mut self, mut on_frame: F) -> Option<BlockSummary>
    where
        F: FnMut(&mut [u8]),
    {
        if !self.ready() {
            return None;
        }

        let block = self.block_ptr(self.cursor);
        // SAFETY: the block is user-owned; the header is plain data
        let desc = unsafe { std::ptr::read(block as *const TpacketBlockDesc) };
        let mut summary = BlockSummary::default();
        let mut offset = desc.hdr.offset_to_first_pkt as usize;

        for i in 0..desc.hdr.num_pkts {
            if offset + size_of::<Tpacket3Hdr>() > self.block_size {
                summary.truncated = true;
                break;
            }
            // SAFETY: bounds checked above; records are 16-byte aligned but
            // read_unaligned keeps a corrupt offset from being UB
            let hdr = unsafe { std::ptr::read_unaligned(block.add(offset) as *const Tpacket3Hdr) };
            let start = offset + hdr.tp_mac as usize;
            let len = hdr.tp_snaplen as usize;
            if start + len > self.block_size {
                summary.truncated = true;
                break;
            }

            // SAFETY: range checked against the block; the block is user-owned
            let frame = unsafe { std::slice::from_raw_parts_mut(block.add(start), len) };
            on_frame(frame);
            summary.frames += 1;
            summary.bytes += len as u64;

            if hdr.tp_next_offset == 0 {
                if i + 1 < desc.hdr.num_pkts {
                    summary.truncated = true;
                }
                break;
            }
            offset += hdr.tp_next_offset as usize;
        }

        self.status_word(self.cursor).store(TP_STATUS_KERNEL, Ordering::Release);
        self.cursor = (self.cursor + 1) % self.blocks;
        Some(summary)
    }
}

/// RX ring owned by one consumer
pub struct RxRing {
    // declared before `map`: the socket closes before the ring is unmapped
    socket: PacketSocket,
    map: RingMap,
    blocks: BlockRing,
}

impl RxRing {
    /// Create the socket, configure a block ring, map it and bind to
    /// `iface` for the packetfs EtherType.
    pub fn open(iface: &str, geom: RxGeometry, promiscuous: bool) -> RingResult<Self> {
        geom.validate(page_size())?;

        let socket = PacketSocket::open(iface, ETHERTYPE_PFS).map_err(|e| RingError::os("socket", iface, e))?;
        socket
            .set_version(TPACKET_V3)
            .map_err(|e| RingError::os("PACKET_VERSION", iface, e))?;

        let req = TpacketReq3 {
            tp_block_size: geom.block_size as u32,
            tp_block_nr: geom.blocks as u32,
            tp_frame_size: geom.frame_size as u32,
            tp_frame_nr: (geom.frames_per_block * geom.blocks) as u32,
            tp_retire_blk_tov: geom.retire_ms,
            tp_sizeof_priv: 0,
            tp_feature_req_word: 0,
        };
        socket
            .set_opt(PACKET_RX_RING, &req)
            .map_err(|e| RingError::os("PACKET_RX_RING", iface, e))?;

        let map = socket
            .map(geom.map_len())
            .map_err(|e| RingError::os("mmap", iface, e))?;
        socket
            .bind(ETHERTYPE_PFS)
            .map_err(|e| RingError::os("bind", iface, e))?;

        if promiscuous {
            if let Err(e) = socket.join_promiscuous() {
                warn!(iface, error = %e, "promiscuous mode refused");
            }
        }

        // SAFETY: map covers block_size * blocks bytes and lives as long as blocks
        let blocks = unsafe { BlockRing::new(map.as_ptr(), geom.block_size, geom.blocks) };

        info!(
            iface,
            block_size = geom.block_size,
            blocks = geom.blocks,
            frame_size = geom.frame_size,
            retire_ms = geom.retire_ms,
            promiscuous,
            "rx ring ready"
        );

        Ok(Self { socket, map, blocks })
    }

    /// Interface name
    pub fn iface(&self) -> &str {
        self.socket.iface()
    }

    /// Drain ready blocks until `deadline_ns` (monotonic). Naps at most a
    /// millisecond at a time while no block is ready.
    pub fn poll<F>(&mut self, deadline_ns: u64, mut on_frame: F) -> PollOutcome
    where
        F: FnMut(&mut [u8]),
    {
        let mut out = PollOutcome::default();
        loop {
            if let Some(block) = self.blocks.drain_block(&mut on_frame) {
                out.blocks += 1;
                out.frames += u64::from(block.frames);
                out.truncated += u64::from(block.truncated);
                if monotonic_ns() >= deadline_ns {
                    return out;
                }
                continue;
            }
            let now = monotonic_ns();
            if now >= deadline_ns {
                return out;
            }
            nap(Duration::from_nanos(deadline_ns - now));
        }
    }

    /// Kernel counters since the last read: `(packets, drops)`.
    pub fn kernel_stats(&self) -> RingResult<(u64, u64)> {
        let s = self
            .socket
            .rx_stats()
            .map_err(|e| RingError::os("PACKET_STATISTICS", self.iface(), e))?;
        Ok((u64::from(s.tp_packets), u64::from(s.tp_drops)))
    }

    /// Release the socket and mapping, returning final kernel counters.
    pub fn close(self) -> (u64, u64) {
        let stats = self.kernel_stats().unwrap_or_else(|e| {
            debug!(error = %e, "kernel stats unavailable");
            (0, 0)
        });
        debug!(iface = self.iface(), bytes = self.map.len(), "rx ring closed");
        stats
    }
}
