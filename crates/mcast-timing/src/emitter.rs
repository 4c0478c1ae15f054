//! # Signal Emitter
//!
//! Sends one small sequenced datagram to every group of a range each
//! interval, so the analyzer on another host has traffic to time against.
//!
//! Payload layout (12 bytes, big-endian):
//!
//! ```text
//! ┌──────────┬───────────────┬────────────┐
//! │ "MCT\x01"│ round seq u32 │ index u32  │
//! └──────────┴───────────────┴────────────┘
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mcast_timing_engine::GroupRange;
use tracing::{debug, info, warn};

const MAGIC: [u8; 4] = *b"MCT\x01";
const PAYLOAD_LEN: usize = 12;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub interval: Duration,
    pub ttl: u32,
    /// Outgoing interface; unspecified lets the routing table decide.
    pub interface: Ipv4Addr,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            ttl: 32,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

pub struct Emitter {
    socket: UdpSocket,
    targets: Vec<SocketAddrV4>,
    interval: Duration,
    seq: u32,
    sent: u64,
    errors: u64,
}

impl Emitter {
    /// Emitter for every group of `groups` on `port`.
    pub fn new(groups: GroupRange, port: u16, cfg: &EmitterConfig) -> io::Result<Self> {
        let targets = groups.iter().map(|g| SocketAddrV4::new(g, port)).collect();
        Self::to_targets(targets, cfg)
    }

    pub fn to_targets(targets: Vec<SocketAddrV4>, cfg: &EmitterConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_ttl_v4(cfg.ttl)?;
        socket.set_multicast_loop_v4(true)?;
        if !cfg.interface.is_unspecified() {
            set_multicast_if(&socket, cfg.interface)?;
        }
        Ok(Self {
            socket,
            targets,
            interval: cfg.interval,
            seq: 0,
            sent: 0,
            errors: 0,
        })
    }

    /// Send one datagram to each target. Per-target send failures are
    /// counted, not fatal; returns how many were sent.
    pub fn emit_round(&mut self) -> usize {
        let mut ok = 0;
        for (idx, target) in self.targets.iter().enumerate() {
            let payload = encode_payload(self.seq, idx as u32);
            match self.socket.send_to(&payload, target) {
                Ok(_) => ok += 1,
                Err(e) => {
                    self.errors += 1;
                    debug!(%target, error = %e, "send failed");
                }
            }
        }
        self.sent += ok as u64;
        self.seq = self.seq.wrapping_add(1);
        ok
    }

    /// Emit until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        info!(
            targets = self.targets.len(),
            interval_ms = self.interval.as_millis() as u64,
            "emitter started"
        );
        let mut next = Instant::now();
        let mut last_stats = Instant::now();

        while running.load(Ordering::Relaxed) {
            if self.emit_round() == 0 && !self.targets.is_empty() {
                warn!(round = self.seq, "no datagram could be sent this round");
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                info!(
                    rounds = self.seq,
                    sent = self.sent,
                    errors = self.errors,
                    "emitter stats"
                );
                last_stats = Instant::now();
            }

            next += self.interval;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                next = now;
            }
        }

        info!(
            rounds = self.seq,
            sent = self.sent,
            errors = self.errors,
            "emitter stopped"
        );
    }
}

fn encode_payload(seq: u32, index: u32) -> [u8; PAYLOAD_LEN] {
    let mut buf = [0u8; PAYLOAD_LEN];
    buf[..4].copy_from_slice(&MAGIC);
    buf[4..8].copy_from_slice(&seq.to_be_bytes());
    buf[8..12].copy_from_slice(&index.to_be_bytes());
    buf
}

/// `IP_MULTICAST_IF`: std exposes no setter for it.
fn set_multicast_if(socket: &UdpSocket, addr: Ipv4Addr) -> io::Result<()> {
    let in_addr = libc::in_addr {
        s_addr: u32::from(addr).to_be(),
    };
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &in_addr as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::in_addr>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
