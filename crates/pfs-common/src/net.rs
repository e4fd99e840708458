//! Address-space helpers: CIDR ranges and port lists

use crate::error::{PfsError, PfsResult};
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Inclusive IPv4 range covered by a CIDR prefix, iterated in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv4Range {
    first: u32,
    last: u32,
    prefix: u8,
}

impl Ipv4Range {
    /// Parse `a.b.c.d/nn` (prefix 0..=32). Host bits are masked off; a bare
    /// address means `/32`.
    pub fn parse(input: &str) -> PfsResult<Self> {
        let net = Ipv4Network::from_str(input.trim()).map_err(|e| PfsError::InvalidCidr {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        let prefix = net.prefix();
        let host_mask = if prefix == 0 {
            u32::MAX
        } else {
            ((1u64 << (32 - prefix as u32)) - 1) as u32
        };
        let first = u32::from(net.network()) & !host_mask;
        Ok(Self {
            first,
            last: first | host_mask,
            prefix,
        })
    }

    /// The `/32` holding only `addr`
    pub fn single(addr: Ipv4Addr) -> Self {
        let a = u32::from(addr);
        Self {
            first: a,
            last: a,
            prefix: 32,
        }
    }

    /// First address
    pub fn first(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.first)
    }

    /// Last address
    pub fn last(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.last)
    }

    /// Prefix length
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses (2^32 for /0)
    pub fn len(&self) -> u64 {
        self.last as u64 - self.first as u64 + 1
    }

    /// Never empty; present for clippy symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Addresses in ascending host order
    pub fn iter(&self) -> Ipv4RangeIter {
        Ipv4RangeIter {
            next: self.first as u64,
            end: self.last as u64,
        }
    }
}

impl fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first(), self.prefix)
    }
}

impl FromStr for Ipv4Range {
    type Err = PfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl IntoIterator for &Ipv4Range {
    type Item = Ipv4Addr;
    type IntoIter = Ipv4RangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over an [`Ipv4Range`]
#[derive(Debug, Clone)]
pub struct Ipv4RangeIter {
    next: u64,
    end: u64,
}

impl Iterator for Ipv4RangeIter {
    type Item = Ipv4Addr;

    #[inline]
    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.next > self.end {
            return None;
        }
        let addr = Ipv4Addr::from(self.next as u32);
        self.next += 1;
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.end + 1).saturating_sub(self.next);
        let left = usize::try_from(left).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

/// Flat list of destination ports, in the order given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortList(Vec<u16>);

impl PortList {
    /// Parse `80,443,22-25` (ranges inclusive).
    pub fn parse(input: &str) -> PfsResult<Self> {
        let bad = |reason: String| PfsError::InvalidPorts {
            input: input.to_string(),
            reason,
        };
        let mut ports = Vec::new();
        for item in input.split(',') {
            let item = item.trim();
            if item.is_empty() {
                return Err(bad("empty entry".into()));
            }
            match item.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u16 = lo.trim().parse().map_err(|_| bad(format!("bad port {lo:?}")))?;
                    let hi: u16 = hi.trim().parse().map_err(|_| bad(format!("bad port {hi:?}")))?;
                    if lo > hi {
                        return Err(bad(format!("range {lo}-{hi} is reversed")));
                    }
                    ports.extend(lo..=hi);
                }
                None => {
                    let p: u16 = item.parse().map_err(|_| bad(format!("bad port {item:?}")))?;
                    ports.push(p);
                }
            }
        }
        Ok(Self(ports))
    }

    /// Single port
    pub fn single(port: u16) -> Self {
        Self(vec![port])
    }

    /// Ports as a slice
    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    /// Number of ports
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No ports
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for PortList {
    type Err = PfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cidr_24() {
        let r = Ipv4Range::parse("192.0.2.0/24").unwrap();
        assert_eq!(r.len(), 256);
        assert_eq!(r.first(), Ipv4Addr::new(192, 0, 2, 0));
        assert_eq!(r.last(), Ipv4Addr::new(192, 0, 2, 255));
        let all: Vec<_> = r.iter().collect();
        assert_eq!(all.len(), 256);
        assert!(all.windows(2).all(|w| u32::from(w[0]) + 1 == u32::from(w[1])));
    }

    #[test]
    fn test_cidr_masks_host_bits() {
        let r = Ipv4Range::parse("198.51.100.7/30").unwrap();
        assert_eq!(r.first(), Ipv4Addr::new(198, 51, 100, 4));
        assert_eq!(r.len(), 4);
        assert_eq!(r.to_string(), "198.51.100.4/30");
    }

    #[test]
    fn test_cidr_edges() {
        let host = Ipv4Range::parse("10.1.2.3/32").unwrap();
        assert_eq!(host.iter().collect::<Vec<_>>(), vec![Ipv4Addr::new(10, 1, 2, 3)]);

        let all = Ipv4Range::parse("0.0.0.0/0").unwrap();
        assert_eq!(all.len(), 1u64 << 32);
        assert_eq!(all.last(), Ipv4Addr::BROADCAST);

        let top = Ipv4Range::parse("255.255.255.254/31").unwrap();
        assert_eq!(top.iter().count(), 2);

        assert_eq!(Ipv4Range::single(Ipv4Addr::new(10, 1, 2, 3)), host);
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!(Ipv4Range::parse("192.0.2.0/33").is_err());
        assert!(Ipv4Range::parse("not-an-ip/8").is_err());
    }

    #[test]
    fn test_ports() {
        let p = PortList::parse("80,443,22-25").unwrap();
        assert_eq!(p.as_slice(), &[80, 443, 22, 23, 24, 25]);
        assert_eq!(PortList::parse(" 8080 ").unwrap().as_slice(), &[8080]);
    }

    #[test]
    fn test_ports_reject() {
        assert!(PortList::parse("").is_err());
        assert!(PortList::parse("80,,443").is_err());
        assert!(PortList::parse("25-22").is_err());
        assert!(PortList::parse("70000").is_err());
        assert!(PortList::parse("http").is_err());
    }

    proptest! {
        #[test]
        fn prop_range_covers_addr(raw: u32, prefix in 16u8..=32) {
            let addr = Ipv4Addr::from(raw);
            let r = Ipv4Range::parse(&format!("{addr}/{prefix}")).unwrap();
            prop_assert_eq!(r.len(), 1u64 << (32 - prefix as u32));
            prop_assert!(r.first() <= addr && addr <= r.last());
            prop_assert_eq!(r.iter().count() as u64, r.len());
            prop_assert_eq!(r.to_string().parse::<Ipv4Range>().unwrap(), r);
        }

        #[test]
        fn prop_port_range_len(lo: u16, span in 0u16..64) {
            let hi = lo.saturating_add(span);
            let p = PortList::parse(&format!("{lo}-{hi}")).unwrap();
            prop_assert_eq!(p.len(), (hi - lo) as usize + 1);
            prop_assert_eq!(p.as_slice().first().copied(), Some(lo));
        }
    }
}
