//! # Promiscuous Capture
//!
//! [`PacketCapture`] backed by a Linux `AF_PACKET` socket.
//!
//! The socket is `SOCK_DGRAM` for `ETH_P_IP`, so the kernel strips the link
//! header and every read yields an IPv4 packet. It is bound to the interface
//! that owns the configured local address and, when asked, puts that
//! interface in promiscuous mode (`PACKET_MR_PROMISC`, undone by the kernel
//! when the socket closes). A reader thread parses the destination address
//! and hands matching packets to the callback.
//!
//! Requires `CAP_NET_RAW`. On other platforms `open` fails with
//! `Unsupported`.

use std::io;
use std::net::Ipv4Addr;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::source::{CaptureFilter, PacketCallback, PacketCapture};

/// Read timeout on the capture socket; bounds how long `stop` waits.
#[cfg(target_os = "linux")]
const READ_TIMEOUT_US: libc::suseconds_t = 100_000;

pub struct AfPacketCapture {
    fd: Option<Arc<OwnedFd>>,
    interface: Option<String>,
    filter: Option<CaptureFilter>,
    running: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl AfPacketCapture {
    pub fn new() -> Self {
        Self {
            fd: None,
            interface: None,
            filter: None,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }
}

impl Default for AfPacketCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AfPacketCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PacketCapture for AfPacketCapture {
    fn open(&mut self, interface: Ipv4Addr, promiscuous: bool) -> io::Result<()> {
        if interface.is_unspecified() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "capture needs an explicit local interface address",
            ));
        }
        let name = super::iface::iface_name_for(interface).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no interface owns {interface}"),
            )
        })?;

        let fd = sys::open_packet_socket(&name, promiscuous)?;
        info!(interface = %name, promiscuous, "capture opened");
        self.fd = Some(Arc::new(fd));
        self.interface = Some(name);
        Ok(())
    }

    fn set_filter(&mut self, filter: &CaptureFilter) -> io::Result<()> {
        self.filter = Some(filter.clone());
        Ok(())
    }

    fn start(&mut self, mut on_packet: PacketCallback) -> io::Result<()> {
        let fd = self
            .fd
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "capture not open"))?;
        let filter = self
            .filter
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "capture filter not set"))?;
        if self.reader.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "capture already started",
            ));
        }

        self.running.store(true, Ordering::Relaxed);
        let running = self.running.clone();
        let name = self.interface.clone().unwrap_or_default();

        let handle = thread::Builder::new()
            .name(format!("mcast-capture-{name}"))
            .spawn(move || {
                let mut buf = vec![0u8; 65536];
                let mut seen: u64 = 0;
                while running.load(Ordering::Relaxed) {
                    match sys::read_packet(&fd, &mut buf) {
                        Ok(Some(n)) => {
                            if let Some(dst) = ipv4_destination(&buf[..n]) {
                                if filter.matches(dst) {
                                    seen += 1;
                                    on_packet(dst);
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "capture read failed");
                            break;
                        }
                    }
                }
                debug!(matched = seen, "capture reader exiting");
            })?;
        self.reader = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        self.fd = None;
    }
}

/// Destination address of an IPv4 packet, if `pkt` is one.
fn ipv4_destination(pkt: &[u8]) -> Option<Ipv4Addr> {
    if pkt.len() < 20 || pkt[0] >> 4 != 4 {
        return None;
    }
    Some(Ipv4Addr::new(pkt[16], pkt[17], pkt[18], pkt[19]))
}

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    use super::READ_TIMEOUT_US;

    fn check(ret: libc::c_int) -> io::Result<()> {
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn open_packet_socket(iface: &str, promiscuous: bool) -> io::Result<OwnedFd> {
        let ifindex = crate::net::iface::iface_index(iface).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown interface {iface}"))
        })?;
        let proto = (libc::ETH_P_IP as u16).to_be();

        unsafe {
            let fd = libc::socket(
                libc::AF_PACKET,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::c_int::from(proto),
            );
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let owned = OwnedFd::from_raw_fd(fd);

            let mut sll: libc::sockaddr_ll = std::mem::zeroed();
            sll.sll_family = libc::AF_PACKET as libc::c_ushort;
            sll.sll_protocol = proto;
            sll.sll_ifindex = ifindex as libc::c_int;
            check(libc::bind(
                fd,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            ))?;

            if promiscuous {
                let mut mreq: libc::packet_mreq = std::mem::zeroed();
                mreq.mr_ifindex = ifindex as libc::c_int;
                mreq.mr_type = libc::PACKET_MR_PROMISC as libc::c_ushort;
                check(libc::setsockopt(
                    fd,
                    libc::SOL_PACKET,
                    libc::PACKET_ADD_MEMBERSHIP,
                    &mreq as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
                ))?;
            }

            let tv = libc::timeval {
                tv_sec: 0,
                tv_usec: READ_TIMEOUT_US,
            };
            check(libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            ))?;

            Ok(owned)
        }
    }

    /// One packet into `buf`. `Ok(None)` on read timeout.
    pub fn read_packet(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let n = unsafe {
            libc::recv(
                fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n >= 0 {
            return Ok(Some(n as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                Ok(None)
            }
            _ => Err(err),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::os::fd::OwnedFd;

    pub fn open_packet_socket(_iface: &str, _promiscuous: bool) -> io::Result<OwnedFd> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "promiscuous capture is only implemented for Linux AF_PACKET",
        ))
    }

    pub fn read_packet(_fd: &OwnedFd, _buf: &mut [u8]) -> io::Result<Option<usize>> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}
