use std::ffi::{CStr, CString};
use std::net::Ipv4Addr;

/// One IPv4 address bound to a named interface.
struct IfaceAddr {
    name: String,
    addr: Ipv4Addr,
}

/// Walk `getifaddrs` and collect every IPv4 (name, address) pair.
fn ipv4_addrs() -> Vec<IfaceAddr> {
    let mut out = Vec::new();
    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifaddrs) != 0 {
            return out;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            if !ifa.ifa_addr.is_null()
                && (*ifa.ifa_addr).sa_family == libc::AF_INET as libc::sa_family_t
            {
                let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                out.push(IfaceAddr {
                    name: CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned(),
                    addr: Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                });
            }
            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }
    out
}

/// Resolve a network interface name (e.g., "eth0") to its first IPv4 address.
/// Returns `None` if the interface doesn't exist or has no IPv4 address.
pub fn resolve_iface_ipv4(iface: &str) -> Option<Ipv4Addr> {
    ipv4_addrs()
        .into_iter()
        .find(|a| a.name == iface)
        .map(|a| a.addr)
}

/// Name of the interface that owns `addr`, e.g. `127.0.0.1` → `lo`.
pub fn iface_name_for(addr: Ipv4Addr) -> Option<String> {
    ipv4_addrs()
        .into_iter()
        .find(|a| a.addr == addr)
        .map(|a| a.name)
}

/// Kernel interface index for `name`, or `None` if unknown.
pub fn iface_index(name: &str) -> Option<u32> {
    let c_name = CString::new(name).ok()?;
    let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    (idx != 0).then_some(idx)
}
