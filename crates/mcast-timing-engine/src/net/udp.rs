//! # UDP Datagram Source
//!
//! [`DatagramSource`] over a UDP socket bound to `0.0.0.0:<port>`.
//!
//! Receives go through `quinn-udp`, which enables `IP_PKTINFO` on the socket
//! and reports the header destination address of every datagram. That address
//! is what the JOIN phase matches against the tracked groups, so several
//! groups can share one socket and port.

use std::io::{self, IoSliceMut};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::{FromRawFd, OwnedFd};
use std::time::Duration;

use quinn_udp::{RecvMeta, UdpSocketState};
use tracing::debug;

use crate::source::{DatagramSource, Reception};

const RECV_BUF: usize = 64 * 1024;

pub struct UdpDatagramSource {
    socket: UdpSocket,
    state: UdpSocketState,
    buf: Vec<u8>,
    read_timeout: Option<Duration>,
}

impl UdpDatagramSource {
    /// Bind `0.0.0.0:port` with `SO_REUSEADDR` so an emitter or a second
    /// analyzer can share the port on the same host.
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket = bind_reuse(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        Self::from_socket(socket)
    }

    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        let state = UdpSocketState::new((&socket).into())?;
        debug!(local = %socket.local_addr()?, "datagram source bound");
        Ok(Self {
            socket,
            state,
            buf: vec![0u8; RECV_BUF],
            read_timeout: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSource for UdpDatagramSource {
    fn join_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
        self.socket.join_multicast_v4(&group, &interface)
    }

    fn leave_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
        self.socket.leave_multicast_v4(&group, &interface)
    }

    fn receive_next(&mut self, timeout: Duration) -> io::Result<Reception> {
        // A zero read timeout means "block forever" to the kernel.
        let timeout = timeout.max(Duration::from_millis(1));
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }

        let mut meta = [RecvMeta::default()];
        let mut bufs = [IoSliceMut::new(&mut self.buf)];
        match self.state.recv((&self.socket).into(), &mut bufs, &mut meta) {
            Ok(_) => Ok(match meta[0].dst_ip {
                Some(IpAddr::V4(destination)) => Reception::Datagram {
                    destination,
                    multicast: destination.is_multicast(),
                },
                _ => Reception::Datagram {
                    destination: Ipv4Addr::UNSPECIFIED,
                    multicast: false,
                },
            }),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(Reception::Timeout)
            }
            Err(e) => Err(e),
        }
    }
}

/// Create an IPv4 UDP socket with `SO_REUSEADDR` set before `bind`.
fn bind_reuse(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let owned = OwnedFd::from_raw_fd(fd);

        let on: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }

        let mut sin: libc::sockaddr_in = std::mem::zeroed();
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_port = addr.port().to_be();
        sin.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
        if libc::bind(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
        {
            return Err(io::Error::last_os_error());
        }

        Ok(UdpSocket::from(owned))
    }
}
