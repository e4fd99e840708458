//! TPACKET TX ring
//!
//! Slot ownership protocol: a slot whose status word is `AVAILABLE` belongs
//! to the producer. The producer writes the frame at the data offset, sets
//! the length, then publishes `SEND_REQUEST` with release ordering. The
//! kernel hands the slot back by storing `AVAILABLE`, or `WRONG_FORMAT` if
//! it refused the frame. Status reads use acquire ordering so the producer
//! never overwrites a slot the kernel still owns.

use crate::config::TxGeometry;
use crate::socket::{page_size, PacketSocket, RingMap};
use crate::tpacket::*;
use crate::{RingError, RingResult};
use pfs_common::{classify, nap, ErrorClass};
use pfs_wire::frame::ETHERTYPE_PFS;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transient kick failures retried before giving up
const KICK_RETRIES: u32 = 8;

const KICK_BACKOFF: Duration = Duration::from_micros(50);

/// Decoded slot status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Owned by the producer
    Available,
    /// Queued for the kernel
    SendRequest,
    /// Kernel is transmitting it
    Sending,
    /// Kernel refused the frame
    WrongFormat,
}

impl SlotStatus {
    fn from_word(word: u32) -> Self {
        if word & TP_STATUS_WRONG_FORMAT != 0 {
            SlotStatus::WrongFormat
        } else if word & TP_STATUS_SENDING != 0 {
            SlotStatus::Sending
        } else if word & TP_STATUS_SEND_REQUEST != 0 {
            SlotStatus::SendRequest
        } else {
            // timestamp flags may ride along with AVAILABLE
            SlotStatus::Available
        }
    }
}

/// Why a batch stopped short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    /// Next slot still owned by the kernel
    RingFull,
    /// Next slot was refused by the kernel; see [`SlotRing::reclaim`]
    Rejected,
    /// The fill callback had nothing to write
    SourceDry,
}

/// Result of one [`SlotRing::submit_batch`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Slots handed to the kernel
    pub submitted: usize,
    /// Frame bytes handed to the kernel
    pub bytes: u64,
    /// Set when fewer than the requested slots were filled
    pub blocked: Option<Blocked>,
}

/// Producer view over a TX slot array. Holds no kernel resources, so it can
/// run over any memory laid out like a ring.
#[derive(Debug)]
pub struct SlotRing {
    base: NonNull<u8>,
    geom: TxGeometry,
    frames_per_block: usize,
    total: usize,
    cursor: usize,
}

// SAFETY: the ring is used by exactly one producer at a time
unsafe impl Send for SlotRing {}

impl SlotRing {
    /// # Safety
    ///
    /// `base` must point to `geom.map_len()` writable bytes, aligned to 4,
    /// that outlive the ring and are only touched by this producer and the
    /// kernel (or a stand-in following the same status protocol).
    pub unsafe fn new(base: *mut u8, geom: TxGeometry) -> Self {
        Self {
            // SAFETY: caller guarantees a valid mapping
            base: NonNull::new_unchecked(base),
            geom,
            frames_per_block: geom.frames_per_block(),
            total: geom.total_frames(),
            cursor: 0,
        }
    }

    /// Slots in the ring
    pub fn capacity(&self) -> usize {
        self.total
    }

    /// Index of the next slot to fill
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Largest L2 frame a slot carries
    pub fn max_frame_len(&self) -> usize {
        self.geom.max_frame_len()
    }

    fn slot_offset(&self, idx: usize) -> usize {
        (idx / self.frames_per_block) * self.geom.block_size + (idx % self.frames_per_block) * self.geom.frame_size
    }

    fn slot_ptr(&self, idx: usize) -> *mut u8 {
        // SAFETY: idx < total keeps the offset inside the mapping
        unsafe { self.base.as_ptr().add(self.slot_offset(idx)) }
    }

    fn status_word(&self, idx: usize) -> &AtomicU32 {
        // SAFETY: tp_status is the first field of every slot, slots are
        // 16-byte aligned and the kernel accesses it atomically too
        unsafe { &*(self.slot_ptr(idx) as *const AtomicU32) }
    }

    /// Status of slot `idx`
    pub fn status(&self, idx: usize) -> SlotStatus {
        SlotStatus::from_word(self.status_word(idx % self.total).load(Ordering::Acquire))
    }

    /// Fill up to `batch` consecutive slots. `fill` gets the slot's frame
    /// area and returns the frame length written; `0` ends the batch. A
    /// length beyond the slot capacity is clamped to it.
    pub fn submit_batch<F>(&mut self, batch: usize, mut fill: F) -> SubmitOutcome
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        let mut out = SubmitOutcome::default();
        let cap = self.max_frame_len();

        while out.submitted < batch {
            let idx = self.cursor;
            match self.status(idx) {
                SlotStatus::Available => {}
                SlotStatus::WrongFormat => {
                    out.blocked = Some(Blocked::Rejected);
                    break;
                }
                SlotStatus::SendRequest | SlotStatus::Sending => {
                    out.blocked = Some(Blocked::RingFull);
                    break;
                }
            }

            let slot = self.slot_ptr(idx);
            // SAFETY: the slot is AVAILABLE so the producer owns its bytes
            let data = unsafe { std::slice::from_raw_parts_mut(slot.add(TX_DATA_OFFSET), cap) };
            let len = fill(data).min(cap);
            if len == 0 {
                out.blocked = Some(Blocked::SourceDry);
                break;
            }

            let hdr = slot as *mut Tpacket2Hdr;
            // SAFETY: header fields of an owned slot; status is published last
            unsafe {
                std::ptr::addr_of_mut!((*hdr).tp_len).write(len as u32);
                std::ptr::addr_of_mut!((*hdr).tp_snaplen).write(len as u32);
            }
            self.status_word(idx).store(TP_STATUS_SEND_REQUEST, Ordering::Release);

            self.cursor = (idx + 1) % self.total;
            out.submitted += 1;
            out.bytes += len as u64;
        }
        out
    }

    /// Hand a refused slot at the cursor back to the producer. Returns
    /// `true` if one was reclaimed; the next submit overwrites it.
    pub fn reclaim(&mut self) -> bool {
        let word = self.status_word(self.cursor);
        if SlotStatus::from_word(word.load(Ordering::Acquire)) != SlotStatus::WrongFormat {
            return false;
        }
        word.store(TP_STATUS_AVAILABLE, Ordering::Release);
        true
    }

    /// Slots still owned by the kernel
    pub fn in_flight(&self) -> usize {
        (0..self.total)
            .filter(|&i| matches!(self.status(i), SlotStatus::SendRequest | SlotStatus::Sending))
            .count()
    }

    /// Play the kernel for slot `idx`: take the queued frame and hand the
    /// slot back.
    #[cfg(test)]
    pub(crate) fn complete(&mut self, idx: usize) -> Option<Vec<u8>> {
        if self.status(idx) != SlotStatus::SendRequest {
            return None;
        }
        let slot = self.slot_ptr(idx);
        // SAFETY: queued slot; the test plays the kernel side
        let frame = unsafe {
            let len = std::ptr::addr_of!((*(slot as *const Tpacket2Hdr)).tp_len).read() as usize;
            std::slice::from_raw_parts(slot.add(TX_DATA_OFFSET), len).to_vec()
        };
        self.status_word(idx).store(TP_STATUS_AVAILABLE, Ordering::Release);
        Some(frame)
    }
}

/// TX ring owned by one producer
pub struct TxRing {
    // declared before `map`: the socket closes before the ring is unmapped
    socket: PacketSocket,
    map: RingMap,
    slots: SlotRing,
    kick_retries: u64,
}

impl TxRing {
    /// Create the socket, configure the ring, map it and bind to `iface`.
    pub fn open(iface: &str, geom: TxGeometry, qdisc_bypass: bool) -> RingResult<Self> {
        geom.validate(page_size())?;

        let socket = PacketSocket::open(iface, 0).map_err(|e| RingError::os("socket", iface, e))?;
        socket
            .set_version(TPACKET_V2)
            .map_err(|e| RingError::os("PACKET_VERSION", iface, e))?;

        if qdisc_bypass {
            if let Err(e) = socket.set_qdisc_bypass(true) {
                warn!(iface, error = %e, "qdisc bypass refused, using the regular path");
            }
        }

        let req = TpacketReq {
            tp_block_size: geom.block_size as u32,
            tp_block_nr: geom.blocks as u32,
            tp_frame_size: geom.frame_size as u32,
            tp_frame_nr: geom.total_frames() as u32,
        };
        socket
            .set_opt(PACKET_TX_RING, &req)
            .map_err(|e| RingError::os("PACKET_TX_RING", iface, e))?;

        let map = socket
            .map(geom.map_len())
            .map_err(|e| RingError::os("mmap", iface, e))?;
        socket.bind(0).map_err(|e| RingError::os("bind", iface, e))?;

        // SAFETY: map covers geom.map_len() bytes and lives as long as slots
        let slots = unsafe { SlotRing::new(map.as_ptr(), geom) };

        info!(
            iface,
            slots = slots.capacity(),
            frame_size = geom.frame_size,
            block_size = geom.block_size,
            blocks = geom.blocks,
            ethertype = format!("{:#06x}", ETHERTYPE_PFS),
            "tx ring ready"
        );

        Ok(Self {
            socket,
            map,
            slots,
            kick_retries: 0,
        })
    }

    /// Interface name
    pub fn iface(&self) -> &str {
        self.socket.iface()
    }

    /// Largest L2 frame a slot carries
    pub fn max_frame_len(&self) -> usize {
        self.slots.max_frame_len()
    }

    /// See [`SlotRing::submit_batch`]
    pub fn submit_batch<F>(&mut self, batch: usize, fill: F) -> SubmitOutcome
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        self.slots.submit_batch(batch, fill)
    }

    /// See [`SlotRing::reclaim`]
    pub fn reclaim(&mut self) -> bool {
        self.slots.reclaim()
    }

    /// Slots still owned by the kernel
    pub fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }

    /// Transient kick failures absorbed so far
    pub fn kick_retries(&self) -> u64 {
        self.kick_retries
    }

    /// Ask the kernel to transmit every pending slot. Transient failures
    /// (`EAGAIN`, `ENOBUFS`, `EINTR`) are retried a few times after a short
    /// nap; if they persist the pending slots stay queued and `Ok(0)` is
    /// returned so the caller's next kick picks them up.
    pub fn kick(&mut self) -> RingResult<usize> {
        let socket = &self.socket;
        retry_kick(|| socket.kick(), &mut self.kick_retries)
            .map_err(|e| RingError::os("kick", socket.iface(), e))
    }

    /// Keep kicking until the kernel owns no slots or `grace` elapses.
    /// Returns the slots still in flight.
    pub fn flush(&mut self, grace: Duration) -> RingResult<usize> {
        let start = std::time::Instant::now();
        loop {
            self.kick()?;
            let pending = self.in_flight();
            if pending == 0 || start.elapsed() >= grace {
                return Ok(pending);
            }
            nap(Duration::from_millis(1));
        }
    }

    /// Flush, then release the socket and mapping. Returns the slots the
    /// kernel still held when `grace` ran out.
    pub fn close(mut self, grace: Duration) -> RingResult<usize> {
        let pending = self.flush(grace)?;
        if pending > 0 {
            warn!(iface = self.iface(), pending, "closing with frames still queued");
        }
        debug!(iface = self.iface(), bytes = self.map.len(), "tx ring closed");
        Ok(pending)
    }
}

/// Run `send` until it succeeds, fails hard, or [`KICK_RETRIES`] transient
/// failures in a row have been absorbed (then `Ok(0)`). Every absorbed
/// failure bumps `retries`.
fn retry_kick<F>(mut send: F, retries: &mut u64) -> io::Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    let mut attempt = 0;
    loop {
        match send() {
            Ok(n) => return Ok(n),
            Err(e) if classify(&e) == ErrorClass::Transient => {
                *retries += 1;
                attempt += 1;
                if attempt >= KICK_RETRIES {
                    debug!(error = %e, "kick deferred");
                    return Ok(0);
                }
                nap(KICK_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Ring memory with a stand-in for the kernel side.
    struct HeapRing {
        mem: Vec<u64>,
        geom: TxGeometry,
    }

    impl HeapRing {
        fn new(frame_size: usize, block_size: usize, blocks: usize) -> Self {
            let geom = TxGeometry {
                frame_size,
                block_size,
                blocks,
            };
            Self {
                mem: vec![0u64; geom.map_len() / 8],
                geom,
            }
        }

        fn ring(&mut self) -> SlotRing {
            unsafe { SlotRing::new(self.mem.as_mut_ptr() as *mut u8, self.geom) }
        }

        fn word(&self, idx: usize) -> u32 {
            let fpb = self.geom.frames_per_block();
            let off = (idx / fpb) * self.geom.block_size + (idx % fpb) * self.geom.frame_size;
            let bytes: &[u8] = unsafe { std::slice::from_raw_parts(self.mem.as_ptr() as *const u8, self.geom.map_len()) };
            u32::from_ne_bytes(bytes[off..off + 4].try_into().unwrap())
        }

        fn set_word(&mut self, idx: usize, v: u32) {
            let fpb = self.geom.frames_per_block();
            let off = (idx / fpb) * self.geom.block_size + (idx % fpb) * self.geom.frame_size;
            let bytes: &mut [u8] =
                unsafe { std::slice::from_raw_parts_mut(self.mem.as_mut_ptr() as *mut u8, self.geom.map_len()) };
            bytes[off..off + 4].copy_from_slice(&v.to_ne_bytes());
        }

        fn frame(&self, idx: usize) -> &[u8] {
            let fpb = self.geom.frames_per_block();
            let off = (idx / fpb) * self.geom.block_size + (idx % fpb) * self.geom.frame_size;
            let bytes: &[u8] = unsafe { std::slice::from_raw_parts(self.mem.as_ptr() as *const u8, self.geom.map_len()) };
            let len = u32::from_ne_bytes(bytes[off + 4..off + 8].try_into().unwrap()) as usize;
            &bytes[off + TX_DATA_OFFSET..off + TX_DATA_OFFSET + len]
        }

        /// Kernel transmits everything queued
        fn drain(&mut self) {
            for i in 0..self.geom.total_frames() {
                if self.word(i) == TP_STATUS_SEND_REQUEST {
                    self.set_word(i, TP_STATUS_AVAILABLE);
                }
            }
        }
    }

    fn fill_with(byte: u8, len: usize) -> impl FnMut(&mut [u8]) -> usize {
        move |buf: &mut [u8]| {
            buf[..len].fill(byte);
            len
        }
    }

    #[test]
    fn test_submit_marks_send_request() {
        let mut heap = HeapRing::new(256, 1024, 2);
        let mut ring = heap.ring();
        assert_eq!(ring.capacity(), 8);

        let out = ring.submit_batch(3, fill_with(0xAB, 60));
        assert_eq!(out.submitted, 3);
        assert_eq!(out.bytes, 180);
        assert_eq!(out.blocked, None);
        assert_eq!(ring.cursor(), 3);
        assert_eq!(ring.in_flight(), 3);

        drop(ring);
        for i in 0..3 {
            assert_eq!(heap.word(i), TP_STATUS_SEND_REQUEST);
            assert_eq!(heap.frame(i), &[0xAB; 60][..]);
        }
        assert_eq!(heap.word(3), TP_STATUS_AVAILABLE);
    }

    #[test]
    fn test_slots_span_blocks() {
        // 3 slots per 1024-byte block leaves a 64-byte tail unused
        let mut heap = HeapRing::new(320, 1024, 2);
        let mut ring = heap.ring();
        assert_eq!(ring.capacity(), 6);
        assert_eq!(ring.slot_offset(3), 1024);
        let out = ring.submit_batch(6, fill_with(1, 40));
        assert_eq!(out.submitted, 6);
        assert_eq!(ring.cursor(), 0);
        drop(ring);
        assert_eq!(heap.word(3), TP_STATUS_SEND_REQUEST);
        assert_eq!(heap.frame(5).len(), 40);
    }

    #[test]
    fn test_full_ring_stops_then_resumes() {
        let mut heap = HeapRing::new(256, 1024, 1);
        let mut ring = heap.ring();

        let out = ring.submit_batch(10, fill_with(2, 64));
        assert_eq!(out.submitted, 4);
        assert_eq!(out.blocked, Some(Blocked::RingFull));
        assert_eq!(ring.cursor(), 0);

        let again = ring.submit_batch(10, fill_with(2, 64));
        assert_eq!(again.submitted, 0);
        assert_eq!(again.blocked, Some(Blocked::RingFull));

        heap.drain();
        let mut ring = heap.ring();
        let out = ring.submit_batch(2, fill_with(3, 64));
        assert_eq!(out.submitted, 2);
        assert_eq!(ring.in_flight(), 2);
    }

    #[test]
    fn test_never_overwrites_kernel_slot() {
        let mut heap = HeapRing::new(256, 1024, 1);
        heap.set_word(2, TP_STATUS_SENDING);
        let mut ring = heap.ring();
        let out = ring.submit_batch(4, fill_with(9, 50));
        assert_eq!(out.submitted, 2);
        assert_eq!(out.blocked, Some(Blocked::RingFull));
        drop(ring);
        assert_eq!(heap.word(2), TP_STATUS_SENDING);
    }

    #[test]
    fn test_wrong_format_is_reclaimed() {
        let mut heap = HeapRing::new(256, 1024, 1);
        heap.set_word(0, TP_STATUS_WRONG_FORMAT);
        let mut ring = heap.ring();

        let out = ring.submit_batch(4, fill_with(5, 50));
        assert_eq!(out.submitted, 0);
        assert_eq!(out.blocked, Some(Blocked::Rejected));
        assert_eq!(ring.status(0), SlotStatus::WrongFormat);

        assert!(ring.reclaim());
        assert!(!ring.reclaim());
        let out = ring.submit_batch(4, fill_with(5, 50));
        assert_eq!(out.submitted, 4);
    }

    #[test]
    fn test_dry_source_and_clamp() {
        let mut heap = HeapRing::new(256, 1024, 1);
        let mut ring = heap.ring();

        let mut left = 2;
        let out = ring.submit_batch(4, |buf| {
            if left == 0 {
                return 0;
            }
            left -= 1;
            buf.len() + 100
        });
        assert_eq!(out.submitted, 2);
        assert_eq!(out.blocked, Some(Blocked::SourceDry));
        assert_eq!(out.bytes, 2 * (256 - TX_DATA_OFFSET) as u64);
    }

    #[test]
    fn test_cursor_wraps() {
        let mut heap = HeapRing::new(256, 1024, 1);
        let mut ring = heap.ring();
        ring.submit_batch(3, fill_with(1, 20));
        drop(ring);
        heap.drain();

        // a fresh view starts at 0; walk it to the end and around
        let mut ring = heap.ring();
        ring.submit_batch(3, fill_with(1, 20));
        assert_eq!(ring.cursor(), 3);
        let cursor_before = ring.cursor();
        drop(ring);
        heap.drain();
        let mut ring = heap.ring();
        ring.cursor = cursor_before;
        let out = ring.submit_batch(2, fill_with(7, 20));
        assert_eq!(out.submitted, 2);
        assert_eq!(ring.cursor(), 1);
    }

    proptest! {
        #[test]
        fn prop_submit_only_touches_available(
            busy in proptest::collection::vec(any::<bool>(), 8),
            batch in 1usize..12,
            len in 1usize..200,
        ) {
            let mut heap = HeapRing::new(256, 1024, 2);
            for (i, b) in busy.iter().enumerate() {
                if *b {
                    heap.set_word(i, TP_STATUS_SENDING);
                }
            }
            let mut ring = heap.ring();
            let out = ring.submit_batch(batch, fill_with(0x42, len));
            drop(ring);

            let first_busy = busy.iter().position(|b| *b).unwrap_or(8);
            prop_assert_eq!(out.submitted, batch.min(first_busy));
            for i in 0..8 {
                let expect = if busy[i] {
                    TP_STATUS_SENDING
                } else if i < out.submitted {
                    TP_STATUS_SEND_REQUEST
                } else {
                    TP_STATUS_AVAILABLE
                };
                prop_assert_eq!(heap.word(i), expect);
            }
        }
    }

    #[test]
    fn test_status_ignores_timestamp_bits() {
        assert_eq!(SlotStatus::from_word(1 << 29), SlotStatus::Available);
        assert_eq!(SlotStatus::from_word(TP_STATUS_SEND_REQUEST | (1 << 29)), SlotStatus::SendRequest);
    }

    /// Replays scripted errnos, then reports `bytes` sent.
    fn scripted(errnos: &[i32], bytes: usize) -> impl FnMut() -> io::Result<usize> + '_ {
        let mut calls = 0;
        move || {
            let i = calls;
            calls += 1;
            match errnos.get(i) {
                Some(&errno) => Err(io::Error::from_raw_os_error(errno)),
                None => Ok(bytes),
            }
        }
    }

    #[test]
    fn test_kick_retries_transient_errors() {
        let mut retries = 0;
        let sent = retry_kick(scripted(&[libc::EAGAIN, libc::ENOBUFS], 1500), &mut retries).unwrap();
        assert_eq!(sent, 1500);
        assert_eq!(retries, 2);
    }

    #[test]
    fn test_kick_defers_after_persistent_back_pressure() {
        let mut retries = 5;
        let errnos = [libc::ENOBUFS; KICK_RETRIES as usize + 4];
        let sent = retry_kick(scripted(&errnos, 1500), &mut retries).unwrap();
        assert_eq!(sent, 0);
        assert_eq!(retries, 5 + KICK_RETRIES as u64);
    }

    #[test]
    fn test_kick_fails_on_fatal_error() {
        let mut retries = 0;
        let err = retry_kick(scripted(&[libc::EAGAIN, libc::ENETDOWN], 1500), &mut retries).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENETDOWN));
        assert_eq!(retries, 1);
    }
}
