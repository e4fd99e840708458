//! `AF_PACKET` socket and ring mapping
//!
//! Thin, owned wrappers over the handful of syscalls the rings need. The
//! ring owners declare the socket before the mapping so the descriptor is
//! closed first and the memory the kernel may still touch is unmapped last.

use crate::tpacket::*;
use pfs_wire::MacAddr;
use std::ffi::CString;
use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;

/// Raw `AF_PACKET` socket bound to one interface
#[derive(Debug)]
pub struct PacketSocket {
    fd: OwnedFd,
    ifindex: i32,
    iface: String,
}

impl PacketSocket {
    /// Open a raw packet socket. `protocol` is the host-order EtherType the
    /// socket receives; `0` receives nothing (TX-only).
    pub fn open(iface: &str, protocol: u16) -> io::Result<Self> {
        let ifindex = interface_index(iface)?;
        // SAFETY: plain syscall, result checked
        let fd = unsafe {
            libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, protocol.to_be() as i32)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd is a freshly created descriptor we own
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            fd,
            ifindex,
            iface: iface.to_string(),
        })
    }

    /// Interface index
    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }

    /// Interface name
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Bind to the interface; `protocol` is the host-order EtherType.
    pub fn bind(&self, protocol: u16) -> io::Result<()> {
        // SAFETY: sockaddr_ll is plain data; all-zero is a valid value
        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = protocol.to_be();
        sll.sll_ifindex = self.ifindex;
        // SAFETY: sll is a valid sockaddr_ll for the length passed
        let rc = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// `setsockopt(SOL_PACKET, name, value)`
    pub fn set_opt<T>(&self, name: libc::c_int, value: &T) -> io::Result<()> {
        // SAFETY: value points to size_of::<T>() readable bytes
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_PACKET,
                name,
                value as *const T as *const libc::c_void,
                size_of::<T>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// `getsockopt(SOL_PACKET, name)`
    pub fn get_opt<T: Default>(&self, name: libc::c_int) -> io::Result<T> {
        let mut value = T::default();
        let mut len = size_of::<T>() as libc::socklen_t;
        // SAFETY: value has room for len bytes
        let rc = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                SOL_PACKET,
                name,
                &mut value as *mut T as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(value)
    }

    /// Select the TPACKET header version
    pub fn set_version(&self, version: libc::c_int) -> io::Result<()> {
        self.set_opt(PACKET_VERSION, &version)
    }

    /// Skip the qdisc layer on transmit
    pub fn set_qdisc_bypass(&self, on: bool) -> io::Result<()> {
        let v: libc::c_int = on as libc::c_int;
        self.set_opt(PACKET_QDISC_BYPASS, &v)
    }

    /// Join the interface's promiscuous set for the lifetime of the socket.
    pub fn join_promiscuous(&self) -> io::Result<()> {
        let mreq = PacketMreq {
            mr_ifindex: self.ifindex,
            mr_type: PACKET_MR_PROMISC,
            ..Default::default()
        };
        self.set_opt(PACKET_ADD_MEMBERSHIP, &mreq)
    }

    /// Kernel receive counters; reading them resets them.
    pub fn rx_stats(&self) -> io::Result<TpacketStatsV3> {
        self.get_opt(PACKET_STATISTICS)
    }

    /// Zero-length send: asks the kernel to transmit every slot marked
    /// `SEND_REQUEST`. Returns bytes handed to the driver.
    pub fn kick(&self) -> io::Result<usize> {
        // SAFETY: null buffer with zero length is the documented TX-ring flush
        let rc = unsafe {
            libc::sendto(self.fd.as_raw_fd(), std::ptr::null(), 0, 0, std::ptr::null(), 0)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    /// Map `len` bytes of the socket's ring(s)
    pub fn map(&self, len: usize) -> io::Result<RingMap> {
        RingMap::new(self.fd.as_raw_fd(), len)
    }
}

impl AsRawFd for PacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Shared mapping of a kernel packet ring; unmapped on drop.
#[derive(Debug)]
pub struct RingMap {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain shared memory; access discipline is enforced
// by the single owner (one producer for TX, one consumer for RX)
unsafe impl Send for RingMap {}

impl RingMap {
    fn new(fd: RawFd, len: usize) -> io::Result<Self> {
        // SAFETY: mapping a packet socket ring; result checked against MAP_FAILED
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;
        Ok(Self { ptr, len })
    }

    /// Base of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Mapping length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Zero-length mapping (never constructed, kept for API symmetry)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for RingMap {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// `if_nametoindex`, mapping "no such interface" to `ENODEV`.
pub fn interface_index(iface: &str) -> io::Result<i32> {
    let name = CString::new(iface).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    // SAFETY: name is NUL-terminated
    let idx = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if idx == 0 {
        return Err(io::Error::from_raw_os_error(libc::ENODEV));
    }
    Ok(idx as i32)
}

/// Hardware address of `iface` from sysfs.
pub fn interface_mac(iface: &str) -> Option<MacAddr> {
    let path = format!("/sys/class/net/{iface}/address");
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// System page size
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if v <= 0 {
        4096
    } else {
        v as usize
    }
}
