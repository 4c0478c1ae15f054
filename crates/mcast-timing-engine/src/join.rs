//! # JOIN Phase
//!
//! Issues "add membership" for every tracked group, starting that group's
//! timer at the instant of issuance, then polls the datagram source in
//! bounded slices until every timer has completed or the deadline passes.
//!
//! The measured figure covers network propagation plus local stack
//! processing: the timer starts before the JOIN leaves the host and stops
//! when user space sees the first datagram.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::clock::{to_micros, RunClock};
use crate::error::{EngineError, MembershipOp};
use crate::group::GroupRange;
use crate::registry::GroupTimerRegistry;
use crate::source::{DatagramSource, Reception};

/// Why a phase's poll loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEnd {
    /// Every group reached its terminal condition.
    Completed,
    DeadlineExpired,
    Aborted,
}

pub struct JoinOutcome {
    pub registry: GroupTimerRegistry,
    pub end: PhaseEnd,
}

pub struct JoinPhaseController {
    range: GroupRange,
    interface: Ipv4Addr,
    deadline: Duration,
    poll_interval: Duration,
}

impl JoinPhaseController {
    pub fn new(
        range: GroupRange,
        interface: Ipv4Addr,
        deadline: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            range,
            interface,
            deadline,
            poll_interval,
        }
    }

    /// Run the phase to completion, deadline, or abort.
    ///
    /// Timers already completed when the loop stops are kept in the
    /// returned registry whatever the reason for stopping.
    pub fn run<S: DatagramSource + ?Sized>(
        &self,
        source: &mut S,
        clock: &RunClock,
        abort: &AtomicBool,
    ) -> Result<JoinOutcome, EngineError> {
        let mut registry = GroupTimerRegistry::new(self.range);
        let phase_start = clock.now();
        let deadline_at = phase_start + self.deadline;

        for (idx, group) in self.range.iter().enumerate() {
            registry.start(idx, clock.now());
            source
                .join_group(group, self.interface)
                .map_err(|source| EngineError::Membership {
                    op: MembershipOp::Join,
                    group,
                    source,
                })?;
        }
        info!(
            groups = %self.range,
            interface = %self.interface,
            deadline_ms = self.deadline.as_millis() as u64,
            "JOIN issued, waiting for first packets"
        );

        let end = loop {
            if registry.all_completed() {
                break PhaseEnd::Completed;
            }
            if abort.load(Ordering::Relaxed) {
                break PhaseEnd::Aborted;
            }
            if clock.now() >= deadline_at {
                break PhaseEnd::DeadlineExpired;
            }

            match source
                .receive_next(self.poll_interval)
                .map_err(EngineError::Receive)?
            {
                Reception::Datagram {
                    destination,
                    multicast: true,
                } => {
                    if let Some(elapsed) = registry.complete(destination, clock.now()) {
                        debug!(
                            group = %destination,
                            elapsed_us = to_micros(elapsed),
                            "first packet after JOIN"
                        );
                    }
                }
                Reception::Datagram { destination, .. } => {
                    trace!(%destination, "ignoring non-multicast datagram");
                }
                Reception::Timeout => {}
            }
        };

        info!(
            completed = registry.completed_count(),
            total = self.range.len(),
            ?end,
            elapsed_ms = clock.elapsed_since(phase_start).as_millis() as u64,
            "JOIN phase finished"
        );

        Ok(JoinOutcome { registry, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta::{Clock, Mock};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;

    /// Source that replays `(at, destination, multicast)` arrivals on a mock clock.
    struct Replay {
        mock: Arc<Mock>,
        arrivals: VecDeque<(Duration, Ipv4Addr, bool)>,
        joined: Vec<Ipv4Addr>,
        fail_join: bool,
    }

    impl Replay {
        fn new(mock: Arc<Mock>, arrivals: Vec<(u64, Ipv4Addr, bool)>) -> Self {
            Self {
                mock,
                arrivals: arrivals
                    .into_iter()
                    .map(|(ms, a, m)| (Duration::from_millis(ms), a, m))
                    .collect(),
                joined: Vec::new(),
                fail_join: false,
            }
        }

        fn now(&self) -> Duration {
            Duration::from_nanos(self.mock.value())
        }
    }

    impl DatagramSource for Replay {
        fn join_group(&mut self, group: Ipv4Addr, _: Ipv4Addr) -> io::Result<()> {
            if self.fail_join {
                return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no route"));
            }
            self.joined.push(group);
            Ok(())
        }

        fn leave_group(&mut self, _: Ipv4Addr, _: Ipv4Addr) -> io::Result<()> {
            Ok(())
        }

        fn receive_next(&mut self, timeout: Duration) -> io::Result<Reception> {
            let now = self.now();
            match self.arrivals.front() {
                Some(&(at, destination, multicast)) if at <= now + timeout => {
                    self.arrivals.pop_front();
                    if at > now {
                        self.mock.increment(at - now);
                    }
                    Ok(Reception::Datagram {
                        destination,
                        multicast,
                    })
                }
                _ => {
                    self.mock.increment(timeout);
                    Ok(Reception::Timeout)
                }
            }
        }
    }

    fn g(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(230, 8, 97, last)
    }

    fn controller(count: u32, deadline_ms: u64) -> JoinPhaseController {
        JoinPhaseController::new(
            GroupRange::new(g(10), count).unwrap(),
            Ipv4Addr::UNSPECIFIED,
            Duration::from_millis(deadline_ms),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn completes_early_when_all_groups_arrive() {
        let (clock, mock) = Clock::mock();
        let clock = RunClock::from_clock(clock);
        let mut src = Replay::new(mock.clone(), vec![(2, g(10), true), (7, g(11), true)]);

        let out = controller(2, 5000)
            .run(&mut src, &clock, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(out.end, PhaseEnd::Completed);
        assert_eq!(src.joined, vec![g(10), g(11)]);
        assert_eq!(out.registry.get(0).elapsed(), Some(Duration::from_millis(2)));
        assert_eq!(out.registry.get(1).elapsed(), Some(Duration::from_millis(7)));
        assert_eq!(src.now(), Duration::from_millis(7));
    }

    #[test]
    fn ignores_unicast_and_untracked_and_repeats() {
        let (clock, mock) = Clock::mock();
        let clock = RunClock::from_clock(clock);
        let mut src = Replay::new(
            mock.clone(),
            vec![
                (1, g(10), false),
                (2, g(50), true),
                (3, g(10), true),
                (4, g(10), true),
            ],
        );

        let out = controller(2, 1000)
            .run(&mut src, &clock, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(out.end, PhaseEnd::DeadlineExpired);
        assert_eq!(out.registry.get(0).elapsed(), Some(Duration::from_millis(3)));
        assert!(!out.registry.get(1).is_completed());
    }

    #[test]
    fn deadline_bounds_wall_time() {
        let (clock, mock) = Clock::mock();
        let clock = RunClock::from_clock(clock);
        let mut src = Replay::new(mock.clone(), vec![]);

        let out = controller(1, 1000)
            .run(&mut src, &clock, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(out.end, PhaseEnd::DeadlineExpired);
        assert!(src.now() >= Duration::from_millis(1000));
        assert!(src.now() <= Duration::from_millis(1100));
        assert!(matches!(
            out.registry.get(0),
            crate::registry::GroupTimer::Running { .. }
        ));
    }

    #[test]
    fn abort_keeps_completed_timers() {
        let (clock, mock) = Clock::mock();
        let clock = RunClock::from_clock(clock);
        let src = Replay::new(mock.clone(), vec![(1, g(10), true)]);
        let abort = AtomicBool::new(false);

        // Abort after the first packet has been consumed.
        struct AbortAfterFirst<'a> {
            inner: Replay,
            abort: &'a AtomicBool,
        }
        impl DatagramSource for AbortAfterFirst<'_> {
            fn join_group(&mut self, g: Ipv4Addr, i: Ipv4Addr) -> io::Result<()> {
                self.inner.join_group(g, i)
            }
            fn leave_group(&mut self, g: Ipv4Addr, i: Ipv4Addr) -> io::Result<()> {
                self.inner.leave_group(g, i)
            }
            fn receive_next(&mut self, t: Duration) -> io::Result<Reception> {
                let r = self.inner.receive_next(t);
                self.abort.store(true, Ordering::Relaxed);
                r
            }
        }
        let mut wrapped = AbortAfterFirst {
            inner: src,
            abort: &abort,
        };

        let out = controller(3, 5000).run(&mut wrapped, &clock, &abort).unwrap();
        assert_eq!(out.end, PhaseEnd::Aborted);
        assert_eq!(out.registry.completed_count(), 1);
        assert_eq!(out.registry.get(0).elapsed(), Some(Duration::from_millis(1)));
        assert!(wrapped.inner.now() < Duration::from_millis(200));
    }

    #[test]
    fn join_failure_is_fatal() {
        let (clock, mock) = Clock::mock();
        let clock = RunClock::from_clock(clock);
        let mut src = Replay::new(mock, vec![]);
        src.fail_join = true;

        let err = controller(2, 1000)
            .run(&mut src, &clock, &AtomicBool::new(false))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EngineError::Membership {
                op: MembershipOp::Join,
                ..
            }
        ));
    }
}
