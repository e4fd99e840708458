//! IPv4 + TCP SYN probe packets for a raw `IP_HDRINCL` socket

use crate::checksum::{internet_checksum, Checksum};
use crate::{WireError, WireResult};
use std::net::Ipv4Addr;

/// IPv4 header without options
pub const IPV4_HDR_LEN: usize = 20;

/// TCP header without options
pub const TCP_HDR_LEN: usize = 20;

/// Full probe: IP + TCP, no payload
pub const SYN_PACKET_LEN: usize = IPV4_HDR_LEN + TCP_HDR_LEN;

/// IANA protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;

/// TCP SYN flag
pub const TCP_FLAG_SYN: u8 = 0x02;

/// Advertised window on probes
pub const PROBE_WINDOW: u16 = 1024;

const GOLDEN_RATIO_32: u32 = 0x9E37_79B1;

/// Initial sequence number for a probe: mixes the destination so replies can
/// be matched without keeping state.
#[inline]
pub fn probe_seq(dst: Ipv4Addr, port: u16) -> u32 {
    u32::from(dst).wrapping_mul(GOLDEN_RATIO_32) ^ port as u32
}

/// Builds SYN probes from a fixed source.
#[derive(Debug, Clone, Copy)]
pub struct SynBuilder {
    src: Ipv4Addr,
    src_port: u16,
    ttl: u8,
}

impl SynBuilder {
    /// Probes from `src:src_port` with the given TTL
    pub fn new(src: Ipv4Addr, src_port: u16, ttl: u8) -> Self {
        Self { src, src_port, ttl }
    }

    /// Source address
    pub fn src(&self) -> Ipv4Addr {
        self.src
    }

    /// Write a probe for `dst:port` into `out`; returns [`SYN_PACKET_LEN`].
    pub fn build(&self, dst: Ipv4Addr, port: u16, ip_id: u16, out: &mut [u8]) -> WireResult<usize> {
        if out.len() < SYN_PACKET_LEN {
            return Err(WireError::BufferTooSmall {
                have: out.len(),
                need: SYN_PACKET_LEN,
            });
        }
        let (ip, rest) = out.split_at_mut(IPV4_HDR_LEN);
        let tcp = &mut rest[..TCP_HDR_LEN];

        ip[0] = 0x45; // v4, IHL 5
        ip[1] = 0;
        ip[2..4].copy_from_slice(&(SYN_PACKET_LEN as u16).to_be_bytes());
        ip[4..6].copy_from_slice(&ip_id.to_be_bytes());
        ip[6..8].copy_from_slice(&0u16.to_be_bytes());
        ip[8] = self.ttl;
        ip[9] = IPPROTO_TCP;
        ip[10..12].copy_from_slice(&[0, 0]);
        ip[12..16].copy_from_slice(&self.src.octets());
        ip[16..20].copy_from_slice(&dst.octets());
        let ip_sum = internet_checksum(ip);
        ip[10..12].copy_from_slice(&ip_sum.to_be_bytes());

        tcp[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&port.to_be_bytes());
        tcp[4..8].copy_from_slice(&probe_seq(dst, port).to_be_bytes());
        tcp[8..12].copy_from_slice(&0u32.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = TCP_FLAG_SYN;
        tcp[14..16].copy_from_slice(&PROBE_WINDOW.to_be_bytes());
        tcp[16..18].copy_from_slice(&[0, 0]);
        tcp[18..20].copy_from_slice(&0u16.to_be_bytes());
        let tcp_sum = tcp_checksum(self.src, dst, tcp);
        tcp[16..18].copy_from_slice(&tcp_sum.to_be_bytes());

        Ok(SYN_PACKET_LEN)
    }
}

/// TCP checksum over the IPv4 pseudo-header and `segment`.
pub fn tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    Checksum::new()
        .add_bytes(&src.octets())
        .add_bytes(&dst.octets())
        .add_u16(IPPROTO_TCP as u16)
        .add_u16(segment.len() as u16)
        .add_bytes(segment)
        .finish()
}
