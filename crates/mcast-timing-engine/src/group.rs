//! # Multicast Group Range
//!
//! The tracked set is a contiguous block `a.b.c.first … a.b.c.(first+count-1)`
//! inside a single /24 ("class-C block"), with `a` in 224..=239.
//! Groups are addressed by index (`addr − first`) everywhere in the engine.

use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::ConfigError;

pub const MAX_GROUPS: u32 = 254;

/// Validated, contiguous range of multicast groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GroupRange {
    first: Ipv4Addr,
    count: u8,
}

impl GroupRange {
    /// Build a range from its first address and a group count.
    pub fn new(first: Ipv4Addr, count: u32) -> Result<Self, ConfigError> {
        let octets = first.octets();
        if !(224..=239).contains(&octets[0]) {
            return Err(ConfigError::NotMulticast(octets[0]));
        }
        if !(1..=MAX_GROUPS).contains(&count) {
            return Err(ConfigError::InvalidCount(count));
        }
        if u32::from(octets[3]) + count - 1 > 255 {
            return Err(ConfigError::CrossesBoundary { first, count });
        }
        Ok(Self {
            first,
            count: count as u8,
        })
    }

    /// Parse the first address from dotted-quad text.
    pub fn parse(first: &str, count: u32) -> Result<Self, ConfigError> {
        let addr = Ipv4Addr::from_str(first.trim())
            .map_err(|_| ConfigError::InvalidAddress(first.to_string()))?;
        Self::new(addr, count)
    }

    pub fn first(&self) -> Ipv4Addr {
        self.first
    }

    pub fn last(&self) -> Ipv4Addr {
        let [a, b, c, d] = self.first.octets();
        Ipv4Addr::new(a, b, c, d + (self.count - 1))
    }

    pub fn len(&self) -> usize {
        usize::from(self.count)
    }

    /// Never true for a validated range; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Table index of `addr`, or `None` if it is not tracked.
    pub fn index_of(&self, addr: Ipv4Addr) -> Option<usize> {
        let [a, b, c, d] = addr.octets();
        let [fa, fb, fc, fd] = self.first.octets();
        if (a, b, c) != (fa, fb, fc) || d < fd {
            return None;
        }
        let idx = usize::from(d - fd);
        (idx < self.len()).then_some(idx)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.index_of(addr).is_some()
    }

    /// Address at table index `idx`. Panics if out of range.
    pub fn addr_at(&self, idx: usize) -> Ipv4Addr {
        assert!(idx < self.len(), "group index {idx} out of range");
        let [a, b, c, d] = self.first.octets();
        Ipv4Addr::new(a, b, c, d + idx as u8)
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (0..self.len()).map(move |i| self.addr_at(i))
    }
}

impl fmt::Display for GroupRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last().octets()[3])
        }
    }
}
