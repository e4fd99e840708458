//! Kernel packet-mmap ABI
//!
//! Constants and `repr(C)` layouts from `linux/if_packet.h`. TX uses
//! `TPACKET_V2` (one status word per slot); RX uses `TPACKET_V3` (block
//! descriptors holding variable-length frame records).

use libc::c_int;

pub const SOL_PACKET: c_int = 263;

pub const PACKET_ADD_MEMBERSHIP: c_int = 1;
pub const PACKET_RX_RING: c_int = 5;
pub const PACKET_STATISTICS: c_int = 6;
pub const PACKET_VERSION: c_int = 10;
pub const PACKET_TX_RING: c_int = 13;
pub const PACKET_QDISC_BYPASS: c_int = 20;

pub const PACKET_MR_PROMISC: u16 = 1;

pub const TPACKET_V2: c_int = 1;
pub const TPACKET_V3: c_int = 2;

/// Frame and block sizes are multiples of this
pub const TPACKET_ALIGNMENT: usize = 16;

// Per-frame / per-block status words
pub const TP_STATUS_KERNEL: u32 = 0;
pub const TP_STATUS_USER: u32 = 1 << 0;
pub const TP_STATUS_AVAILABLE: u32 = 0;
pub const TP_STATUS_SEND_REQUEST: u32 = 1 << 0;
pub const TP_STATUS_SENDING: u32 = 1 << 1;
pub const TP_STATUS_WRONG_FORMAT: u32 = 1 << 2;

#[inline]
pub const fn tpacket_align(x: usize) -> usize {
    (x + TPACKET_ALIGNMENT - 1) & !(TPACKET_ALIGNMENT - 1)
}

/// `struct tpacket_req` (V2 TX ring)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketReq {
    pub tp_block_size: u32,
    pub tp_block_nr: u32,
    pub tp_frame_size: u32,
    pub tp_frame_nr: u32,
}

/// `struct tpacket_req3` (V3 RX ring)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketReq3 {
    pub tp_block_size: u32,
    pub tp_block_nr: u32,
    pub tp_frame_size: u32,
    pub tp_frame_nr: u32,
    pub tp_retire_blk_tov: u32,
    pub tp_sizeof_priv: u32,
    pub tp_feature_req_word: u32,
}

/// `struct tpacket2_hdr`, at the start of every TX slot
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Tpacket2Hdr {
    pub tp_status: u32,
    pub tp_len: u32,
    pub tp_snaplen: u32,
    pub tp_mac: u16,
    pub tp_net: u16,
    pub tp_sec: u32,
    pub tp_nsec: u32,
    pub tp_vlan_tci: u16,
    pub tp_vlan_tpid: u16,
    pub tp_padding: [u8; 4],
}

/// Offset of frame data inside a TX slot: the aligned V2 header. The kernel
/// reserves room for a `sockaddr_ll` only on the RX side.
pub const TX_DATA_OFFSET: usize = tpacket_align(std::mem::size_of::<Tpacket2Hdr>());

/// `struct tpacket_hdr_v1` inside a V3 block descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketHdrV1 {
    pub block_status: u32,
    pub num_pkts: u32,
    pub offset_to_first_pkt: u32,
    pub blk_len: u32,
    pub seq_num: u64,
    pub ts_first_pkt: [u32; 2],
    pub ts_last_pkt: [u32; 2],
}

/// `struct tpacket_block_desc`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketBlockDesc {
    pub version: u32,
    pub offset_to_priv: u32,
    pub hdr: TpacketHdrV1,
}

/// Byte offset of `hdr.block_status` from the start of a block
pub const BLOCK_STATUS_OFFSET: usize = 8;

/// `struct tpacket3_hdr`, leading every RX frame record
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Tpacket3Hdr {
    pub tp_next_offset: u32,
    pub tp_sec: u32,
    pub tp_nsec: u32,
    pub tp_snaplen: u32,
    pub tp_len: u32,
    pub tp_status: u32,
    pub tp_mac: u16,
    pub tp_net: u16,
    pub hv1_rxhash: u32,
    pub hv1_vlan_tci: u32,
    pub hv1_vlan_tpid: u16,
    pub hv1_padding: u16,
    pub tp_padding: [u8; 8],
}

/// Smallest frame record the kernel will carve out for RX
pub const TPACKET3_HDRLEN: usize =
    tpacket_align(std::mem::size_of::<Tpacket3Hdr>()) + std::mem::size_of::<libc::sockaddr_ll>();

/// `struct packet_mreq`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketMreq {
    pub mr_ifindex: c_int,
    pub mr_type: u16,
    pub mr_alen: u16,
    pub mr_address: [u8; 8],
}

/// `struct tpacket_stats_v3`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketStatsV3 {
    pub tp_packets: u32,
    pub tp_drops: u32,
    pub tp_freeze_q_cnt: u32,
}
