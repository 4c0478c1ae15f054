//! # Group Timer Registry
//!
//! Fixed-size table of JOIN timers, one slot per tracked group, indexed by
//! `addr − first`. Each slot is an explicit three-state tag:
//!
//! ```text
//!   Pending ──start()──▶ Running{started} ──complete()──▶ Completed{elapsed}
//! ```
//!
//! Each transition happens at most once. Anything else is a no-op, so a second
//! qualifying packet can never move a recorded elapsed time.

use quanta::Instant;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::group::GroupRange;

/// JOIN timer for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTimer {
    Pending,
    Running { started: Instant },
    Completed { elapsed: Duration },
}

impl GroupTimer {
    pub fn is_completed(&self) -> bool {
        matches!(self, GroupTimer::Completed { .. })
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            GroupTimer::Completed { elapsed } => Some(*elapsed),
            _ => None,
        }
    }
}

pub struct GroupTimerRegistry {
    range: GroupRange,
    timers: Vec<GroupTimer>,
    completed: usize,
}

impl GroupTimerRegistry {
    pub fn new(range: GroupRange) -> Self {
        Self {
            range,
            timers: vec![GroupTimer::Pending; range.len()],
            completed: 0,
        }
    }

    pub fn range(&self) -> GroupRange {
        self.range
    }

    /// Pending → Running. Returns `false` if the slot was not Pending.
    pub fn start(&mut self, idx: usize, now: Instant) -> bool {
        match self.timers[idx] {
            GroupTimer::Pending => {
                self.timers[idx] = GroupTimer::Running { started: now };
                true
            }
            _ => false,
        }
    }

    /// Running → Completed for the group owning `addr`.
    ///
    /// Returns the recorded elapsed time on the transition, `None` for
    /// untracked addresses and for groups not currently Running.
    pub fn complete(&mut self, addr: Ipv4Addr, now: Instant) -> Option<Duration> {
        let idx = self.range.index_of(addr)?;
        match self.timers[idx] {
            GroupTimer::Running { started } => {
                let elapsed = now.saturating_duration_since(started);
                self.timers[idx] = GroupTimer::Completed { elapsed };
                self.completed += 1;
                Some(elapsed)
            }
            _ => None,
        }
    }

    pub fn get(&self, idx: usize) -> GroupTimer {
        self.timers[idx]
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn all_completed(&self) -> bool {
        self.completed == self.timers.len()
    }

    pub fn any_completed(&self) -> bool {
        self.completed > 0
    }

    /// `(group, timer)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (Ipv4Addr, GroupTimer)> + '_ {
        self.timers
            .iter()
            .enumerate()
            .map(|(i, t)| (self.range.addr_at(i), *t))
    }
}
