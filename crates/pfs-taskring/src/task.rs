//! Scan task descriptors

use pfs_common::{Ipv4Range, PortList};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Encoded descriptor size
pub const TASK_LEN: usize = 12;

/// Transport protocol of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    /// IP protocol 6
    Tcp,
    /// IP protocol 17
    Udp,
    /// Any other protocol number, carried through untouched
    Other(u8),
}

impl Proto {
    /// IP protocol number
    pub fn number(self) -> u8 {
        match self {
            Proto::Tcp => 6,
            Proto::Udp => 17,
            Proto::Other(n) => n,
        }
    }
}

impl From<u8> for Proto {
    fn from(n: u8) -> Self {
        match n {
            6 => Proto::Tcp,
            17 => Proto::Udp,
            n => Proto::Other(n),
        }
    }
}

impl FromStr for Proto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Proto::Tcp),
            "udp" => Ok(Proto::Udp),
            other => other
                .parse::<u8>()
                .map(Proto::from)
                .map_err(|_| format!("unknown protocol '{s}' (tcp, udp or 0-255)")),
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proto::Tcp => f.write_str("tcp"),
            Proto::Udp => f.write_str("udp"),
            Proto::Other(n) => write!(f, "{n}"),
        }
    }
}

/// One unit of scan work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTask {
    /// Destination address
    pub addr: Ipv4Addr,
    /// Destination port
    pub port: u16,
    /// Transport protocol
    pub proto: Proto,
}

impl ScanTask {
    /// New task
    pub fn new(addr: Ipv4Addr, port: u16, proto: Proto) -> Self {
        Self { addr, port, proto }
    }

    /// Wire form: address and port in network byte order, protocol, one
    /// reserved zero byte.
    pub fn encode(&self, out: &mut [u8; TASK_LEN]) {
        out[0..4].copy_from_slice(&self.addr.octets());
        out[4..6].copy_from_slice(&self.port.to_be_bytes());
        out[6] = self.proto.number();
        out[7..].fill(0);
    }

    /// Inverse of [`encode`](Self::encode)
    pub fn decode(buf: &[u8; TASK_LEN]) -> Self {
        Self {
            addr: Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]),
            port: u16::from_be_bytes([buf[4], buf[5]]),
            proto: Proto::from(buf[6]),
        }
    }
}

impl fmt::Display for ScanTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.addr, self.port, self.proto)
    }
}

/// Every address of `range` crossed with every port, address-major.
pub fn sweep<'a>(range: &'a Ipv4Range, ports: &'a PortList, proto: Proto) -> impl Iterator<Item = ScanTask> + 'a {
    range
        .iter()
        .flat_map(move |addr| ports.as_slice().iter().map(move |&port| ScanTask::new(addr, port, proto)))
}
