//! # Collaborator Contracts
//!
//! The engine never touches sockets directly. It drives two collaborators:
//!
//! - [`DatagramSource`] — membership operations plus a bounded-wait receive
//!   that reports each datagram's destination address (JOIN phase).
//! - [`PacketCapture`] — promiscuous link-level capture that calls back
//!   asynchronously for every packet matching a destination filter
//!   (LEAVE phase).
//!
//! Socket-backed implementations live in [`crate::net`]; tests script both.

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::group::GroupRange;

/// Result of one bounded-wait receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    Datagram {
        destination: Ipv4Addr,
        /// Set when the datagram was delivered as multicast.
        multicast: bool,
    },
    /// The poll slice elapsed with nothing to read. Not an error.
    Timeout,
}

pub trait DatagramSource {
    fn join_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()>;
    fn leave_group(&mut self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()>;
    /// Block for at most `timeout` waiting for the next datagram.
    fn receive_next(&mut self, timeout: Duration) -> io::Result<Reception>;
}

/// Per-packet callback. Runs on the capture's own thread.
pub type PacketCallback = Box<dyn FnMut(Ipv4Addr) + Send + 'static>;

pub trait PacketCapture {
    fn open(&mut self, interface: Ipv4Addr, promiscuous: bool) -> io::Result<()>;
    fn set_filter(&mut self, filter: &CaptureFilter) -> io::Result<()>;
    /// Begin delivering matching packets to `on_packet`.
    fn start(&mut self, on_packet: PacketCallback) -> io::Result<()>;
    /// Stop delivery. After return, `on_packet` is no longer invoked.
    /// Idempotent.
    fn stop(&mut self);
}

// ─── Capture Filter ─────────────────────────────────────────────────────────

/// Destination-address disjunction over the tracked set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFilter {
    range: GroupRange,
}

impl CaptureFilter {
    pub fn for_groups(range: GroupRange) -> Self {
        Self { range }
    }

    pub fn matches(&self, destination: Ipv4Addr) -> bool {
        self.range.contains(destination)
    }

    /// pcap-syntax rendering, e.g. `dst host 230.8.97.10 or dst host 230.8.97.11`.
    pub fn expression(&self) -> String {
        self.range
            .iter()
            .map(|g| format!("dst host {g}"))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_expression_is_an_or_chain() {
        let f = CaptureFilter::for_groups(GroupRange::parse("230.8.97.10", 2).unwrap());
        assert_eq!(
            f.expression(),
            "dst host 230.8.97.10 or dst host 230.8.97.11"
        );
    }

    #[test]
    fn filter_matches_only_tracked() {
        let f = CaptureFilter::for_groups(GroupRange::parse("230.8.97.10", 2).unwrap());
        assert!(f.matches(Ipv4Addr::new(230, 8, 97, 11)));
        assert!(!f.matches(Ipv4Addr::new(230, 8, 97, 12)));
        assert!(!f.matches(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
