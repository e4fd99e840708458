//! Local interface addresses

use std::io;
use std::net::Ipv4Addr;

/// Every IPv4 address assigned to a local interface, as `getifaddrs` lists
/// them.
pub fn local_ipv4_addrs() -> io::Result<Vec<Ipv4Addr>> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: head is a valid out-pointer; the list is freed below
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut addrs = Vec::new();
    let mut cur = head;
    while !cur.is_null() {
        // SAFETY: cur is a live node of the list returned above
        let ifa = unsafe { &*cur };
        if !ifa.ifa_addr.is_null() {
            // SAFETY: ifa_addr points at a sockaddr whose family tells its
            // concrete type
            let family = unsafe { (*ifa.ifa_addr).sa_family } as libc::c_int;
            if family == libc::AF_INET {
                let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                addrs.push(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
            }
        }
        cur = ifa.ifa_next;
    }
    // SAFETY: head came from getifaddrs and is freed once
    unsafe { libc::freeifaddrs(head) };
    Ok(addrs)
}

/// True if `addr` is assigned to a local interface
pub fn is_local(addr: Ipv4Addr) -> io::Result<bool> {
    Ok(local_ipv4_addrs()?.contains(&addr))
}
