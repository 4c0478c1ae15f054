//! # Results Aggregation
//!
//! Pure reduction of the final JOIN registry and LEAVE table into an
//! immutable [`ResultsSnapshot`]. Statistics only cover groups that produced a
//! figure; when none did, every statistic is [`NO_DATA`] (never zero or NaN).
//! The snapshot depends only on its inputs, so the same final state always
//! serializes to the same bytes.

use serde::Serialize;
use std::net::Ipv4Addr;

use crate::clock::to_micros;
use crate::config::Mode;
use crate::group::GroupRange;
use crate::join::PhaseEnd;
use crate::leave::LeaveTable;
use crate::registry::GroupTimerRegistry;

/// Sentinel for "no completed entries".
pub const NO_DATA: i64 = -1;

/// Fastest / average / slowest over one phase, in µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseStats {
    pub fastest_us: i64,
    pub average_us: i64,
    pub slowest_us: i64,
    /// Number of groups the figures are computed over.
    pub samples: usize,
}

impl PhaseStats {
    pub const EMPTY: PhaseStats = PhaseStats {
        fastest_us: NO_DATA,
        average_us: NO_DATA,
        slowest_us: NO_DATA,
        samples: 0,
    };

    pub fn from_micros<I: IntoIterator<Item = i64>>(values: I) -> Self {
        let mut samples = 0usize;
        let mut sum: i128 = 0;
        let mut fastest = i64::MAX;
        let mut slowest = i64::MIN;
        for v in values {
            samples += 1;
            sum += i128::from(v);
            fastest = fastest.min(v);
            slowest = slowest.max(v);
        }
        if samples == 0 {
            return Self::EMPTY;
        }
        Self {
            fastest_us: fastest,
            average_us: (sum / samples as i128) as i64,
            slowest_us: slowest,
            samples,
        }
    }

    pub fn has_data(&self) -> bool {
        self.samples > 0
    }
}

/// Per-group figures. `None` = the group never produced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupResult {
    pub group: Ipv4Addr,
    pub join_us: Option<i64>,
    pub leave_us: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultsSnapshot {
    pub groups: GroupRange,
    pub mode: Mode,
    pub results: Vec<GroupResult>,
    /// At least one group completed JOIN.
    pub has_results: bool,
    /// Every group completed JOIN and, with LEAVE enabled, has a LEAVE time.
    pub is_complete: bool,
    pub join: PhaseStats,
    pub leave: PhaseStats,
    pub join_end: PhaseEnd,
    /// `None` when the LEAVE phase did not run.
    pub leave_end: Option<PhaseEnd>,
    /// The run was cut short by an external abort.
    pub aborted: bool,
}

impl ResultsSnapshot {
    /// JOIN figure for `group`, if it completed.
    pub fn join_us(&self, group: Ipv4Addr) -> Option<i64> {
        self.groups
            .index_of(group)
            .and_then(|i| self.results[i].join_us)
    }

    pub fn leave_us(&self, group: Ipv4Addr) -> Option<i64> {
        self.groups
            .index_of(group)
            .and_then(|i| self.results[i].leave_us)
    }
}

/// Reduces final phase state into a [`ResultsSnapshot`].
pub struct ResultsAggregator<'a> {
    mode: Mode,
    registry: &'a GroupTimerRegistry,
    join_end: PhaseEnd,
    leave: Option<(&'a LeaveTable, PhaseEnd)>,
}

impl<'a> ResultsAggregator<'a> {
    pub fn new(mode: Mode, registry: &'a GroupTimerRegistry, join_end: PhaseEnd) -> Self {
        Self {
            mode,
            registry,
            join_end,
            leave: None,
        }
    }

    pub fn with_leave(mut self, table: &'a LeaveTable, end: PhaseEnd) -> Self {
        self.leave = Some((table, end));
        self
    }

    pub fn aggregate(&self) -> ResultsSnapshot {
        let groups = self.registry.range();
        let leave_table = self.leave.map(|(t, _)| t);

        let results: Vec<GroupResult> = self
            .registry
            .iter()
            .enumerate()
            .map(|(idx, (group, timer))| GroupResult {
                group,
                join_us: timer.elapsed().map(to_micros),
                leave_us: leave_table
                    .map(|t| t.get(idx))
                    .filter(|t| t.has_observation())
                    .and_then(|t| t.last_seen())
                    .map(to_micros),
            })
            .collect();

        let join = PhaseStats::from_micros(results.iter().filter_map(|r| r.join_us));
        let leave = PhaseStats::from_micros(results.iter().filter_map(|r| r.leave_us));

        let leave_complete = match self.mode {
            Mode::JoinOnly => true,
            Mode::JoinAndLeave => {
                leave_table.is_some() && results.iter().all(|r| r.leave_us.is_some())
            }
        };
        let leave_end = self.leave.map(|(_, end)| end);
        let aborted =
            self.join_end == PhaseEnd::Aborted || leave_end == Some(PhaseEnd::Aborted);

        ResultsSnapshot {
            groups,
            mode: self.mode,
            has_results: self.registry.any_completed(),
            is_complete: self.registry.all_completed() && leave_complete,
            results,
            join,
            leave,
            join_end: self.join_end,
            leave_end,
            aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta::Clock;
    use std::time::Duration;

    fn g(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(230, 8, 97, last)
    }

    #[test]
    fn stats_over_completed_subset() {
        let s = PhaseStats::from_micros([2000, 5000]);
        assert_eq!(s.fastest_us, 2000);
        assert_eq!(s.average_us, 3500);
        assert_eq!(s.slowest_us, 5000);
        assert_eq!(s.samples, 2);
    }

    #[test]
    fn empty_stats_are_sentinel() {
        let s = PhaseStats::from_micros(std::iter::empty());
        assert_eq!(s, PhaseStats::EMPTY);
        assert_eq!(s.fastest_us, NO_DATA);
        assert!(!s.has_data());
    }

    #[test]
    fn no_completed_groups_is_a_valid_outcome() {
        let (clock, _mock) = Clock::mock();
        let mut reg = GroupTimerRegistry::new(GroupRange::new(g(10), 2).unwrap());
        reg.start(0, clock.now());
        reg.start(1, clock.now());

        let snap = ResultsAggregator::new(Mode::JoinOnly, &reg, PhaseEnd::DeadlineExpired)
            .aggregate();
        assert!(!snap.has_results);
        assert!(!snap.is_complete);
        assert_eq!(snap.join, PhaseStats::EMPTY);
        assert_eq!(snap.leave, PhaseStats::EMPTY);
        assert!(snap.results.iter().all(|r| r.join_us.is_none()));
    }

    #[test]
    fn leave_mode_needs_every_leave_time() {
        let (clock, mock) = Clock::mock();
        let range = GroupRange::new(g(10), 2).unwrap();
        let mut reg = GroupTimerRegistry::new(range);
        reg.start(0, clock.now());
        reg.start(1, clock.now());
        mock.increment(Duration::from_millis(3));
        reg.complete(g(10), clock.now());
        reg.complete(g(11), clock.now());

        let base = clock.now();
        let mut table = LeaveTable::new(range, base);
        table.observe(crate::leave::Observation {
            destination: g(10),
            at: base + Duration::from_millis(120),
        });

        let snap = ResultsAggregator::new(Mode::JoinAndLeave, &reg, PhaseEnd::Completed)
            .with_leave(&table, PhaseEnd::Completed)
            .aggregate();
        assert!(snap.has_results);
        assert!(!snap.is_complete);
        assert_eq!(snap.leave_us(g(10)), Some(120_000));
        assert_eq!(snap.leave_us(g(11)), None);
        assert_eq!(snap.leave.samples, 1);

        let join_only = ResultsAggregator::new(Mode::JoinOnly, &reg, PhaseEnd::Completed)
            .aggregate();
        assert!(join_only.is_complete);
    }

    #[test]
    fn leave_mode_without_leave_phase_is_incomplete() {
        let (clock, _mock) = Clock::mock();
        let mut reg = GroupTimerRegistry::new(GroupRange::new(g(10), 1).unwrap());
        reg.start(0, clock.now());
        reg.complete(g(10), clock.now());

        let snap =
            ResultsAggregator::new(Mode::JoinAndLeave, &reg, PhaseEnd::Aborted).aggregate();
        assert!(!snap.is_complete);
        assert!(snap.aborted);
        assert_eq!(snap.leave_end, None);
    }

    #[test]
    fn snapshot_serializes_deterministically() {
        let (clock, mock) = Clock::mock();
        let mut reg = GroupTimerRegistry::new(GroupRange::new(g(10), 3).unwrap());
        for i in 0..3 {
            reg.start(i, clock.now());
        }
        mock.increment(Duration::from_millis(2));
        reg.complete(g(10), clock.now());

        let agg = ResultsAggregator::new(Mode::JoinOnly, &reg, PhaseEnd::DeadlineExpired);
        let a = serde_json::to_string(&agg.aggregate()).unwrap();
        mock.increment(Duration::from_secs(30));
        let b = serde_json::to_string(&agg.aggregate()).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("\"join_us\":2000"));
    }
}
