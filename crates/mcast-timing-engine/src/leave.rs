//! # LEAVE Phase
//!
//! Measures how long traffic keeps arriving after "drop membership".
//!
//! There is no explicit "delivery stopped" event to wait for, so stopping is
//! inferred from silence: a group is **quiescent** once no packet destined to
//! it has been observed for [`QUIESCENCE_THRESHOLD`]. The figure reported for
//! the group is the time from its LEAVE to the last packet actually seen.
//!
//! The socket-level datagram source cannot be trusted for this (some stacks
//! keep delivering to it after the wire goes quiet, others stop early), so the
//! phase observes the link through a promiscuous [`PacketCapture`] instead.
//!
//! ## Caveat
//!
//! "Last packet observed" is only a proxy for "moment delivery stopped". It is
//! bounded below by capture latency and above by the poll grain, and is known
//! to be biased on platforms that suppress delivery irrespective of the real
//! network state. The heuristic is kept as is so results stay comparable
//! across hosts.
//!
//! ## Threading
//!
//! The capture callback runs on the capture's thread. It only timestamps the
//! packet and pushes an [`Observation`] into a bounded channel; the tracker
//! table is owned and mutated solely by the polling loop.

use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use quanta::Instant;
use tracing::{debug, info, warn};

use crate::clock::RunClock;
use crate::error::{EngineError, MembershipOp};
use crate::group::GroupRange;
use crate::join::PhaseEnd;
use crate::source::{CaptureFilter, DatagramSource, PacketCapture};

/// Silence required before a group counts as stopped.
pub const QUIESCENCE_THRESHOLD: Duration = Duration::from_micros(2_000_000);

/// Capacity of the capture → poll loop channel.
const OBSERVATION_QUEUE: usize = 8192;

// ─── LeaveTracker ───────────────────────────────────────────────────────────

/// LEAVE state for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveTracker {
    started: Instant,
    /// Elapsed from `started` to the latest packet seen. `None` = never seen.
    last_seen: Option<Duration>,
}

impl LeaveTracker {
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            last_seen: None,
        }
    }

    /// Record a packet seen at `at`. Never moves `last_seen` backwards.
    /// Returns `true` if the value advanced.
    pub fn observe(&mut self, at: Instant) -> bool {
        let rel = at.saturating_duration_since(self.started);
        match self.last_seen {
            Some(prev) if prev >= rel => false,
            _ => {
                self.last_seen = Some(rel);
                true
            }
        }
    }

    pub fn last_seen(&self) -> Option<Duration> {
        self.last_seen
    }

    /// Phase-relative time at which the group becomes quiescent if nothing
    /// else arrives.
    pub fn quiescent_at(&self) -> Duration {
        self.last_seen.unwrap_or_default() + QUIESCENCE_THRESHOLD
    }

    pub fn is_quiescent(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.quiescent_at()
    }

    /// A packet was seen after LEAVE, so a LEAVE time exists.
    pub fn has_observation(&self) -> bool {
        self.last_seen.is_some_and(|d| !d.is_zero())
    }
}

// ─── LeaveTable ─────────────────────────────────────────────────────────────

/// Packet seen by the capture for a tracked destination.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub destination: Ipv4Addr,
    pub at: Instant,
}

/// One [`LeaveTracker`] per tracked group, indexed like the JOIN registry.
pub struct LeaveTable {
    range: GroupRange,
    trackers: Vec<LeaveTracker>,
}

impl LeaveTable {
    /// Build a table whose trackers all start at `started`.
    pub fn new(range: GroupRange, started: Instant) -> Self {
        Self {
            range,
            trackers: vec![LeaveTracker::new(started); range.len()],
        }
    }

    /// Restart the phase clock for one group (at its LEAVE issuance).
    pub fn restart(&mut self, idx: usize, at: Instant) {
        self.trackers[idx] = LeaveTracker::new(at);
    }

    pub fn range(&self) -> GroupRange {
        self.range
    }

    pub fn observe(&mut self, obs: Observation) {
        if let Some(idx) = self.range.index_of(obs.destination) {
            self.trackers[idx].observe(obs.at);
        }
    }

    pub fn get(&self, idx: usize) -> LeaveTracker {
        self.trackers[idx]
    }

    pub fn all_quiescent(&self, now: Instant) -> bool {
        self.trackers.iter().all(|t| t.is_quiescent(now))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Ipv4Addr, LeaveTracker)> + '_ {
        self.trackers
            .iter()
            .enumerate()
            .map(|(i, t)| (self.range.addr_at(i), *t))
    }
}

// ─── LeavePhaseController ───────────────────────────────────────────────────

pub struct LeaveOutcome {
    pub table: LeaveTable,
    pub end: PhaseEnd,
    /// Observations lost because the channel was full.
    pub dropped_observations: u64,
}

pub struct LeavePhaseController {
    range: GroupRange,
    interface: Ipv4Addr,
    deadline: Duration,
    poll_interval: Duration,
}

/// Stops the capture on every exit path.
struct ActiveCapture<'a, C: PacketCapture + ?Sized>(&'a mut C);

impl<C: PacketCapture + ?Sized> Drop for ActiveCapture<'_, C> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

impl LeavePhaseController {
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

    pub fn run<S, C>(
        &self,
        source: &mut S,
        capture: &mut C,
        clock: &RunClock,
        abort: &AtomicBool,
    ) -> Result<LeaveOutcome, EngineError>
    where
        S: DatagramSource + ?Sized,
        C: PacketCapture + ?Sized,
    {
        let filter = CaptureFilter::for_groups(self.range);
        capture
            .open(self.interface, true)
            .map_err(EngineError::Capture)?;
        let capture = ActiveCapture(capture);
        capture
            .0
            .set_filter(&filter)
            .map_err(EngineError::Capture)?;
        debug!(filter = %filter.expression(), "capture filter installed");

        let phase_start = clock.now();
        let deadline_at = phase_start + self.deadline;
        let mut table = LeaveTable::new(self.range, phase_start);

        for (idx, group) in self.range.iter().enumerate() {
            table.restart(idx, clock.now());
            source
                .leave_group(group, self.interface)
                .map_err(|source| EngineError::Membership {
                    op: MembershipOp::Leave,
                    group,
                    source,
                })?;
        }

        let (tx, rx) = bounded::<Observation>(OBSERVATION_QUEUE);
        let dropped = Arc::new(AtomicU64::new(0));
        {
            let clock = clock.clone();
            let dropped = dropped.clone();
            capture
                .0
                .start(Box::new(move |destination| {
                    let obs = Observation {
                        destination,
                        at: clock.now(),
                    };
                    if tx.try_send(obs).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }))
                .map_err(EngineError::Capture)?;
        }
        info!(
            groups = %self.range,
            interface = %self.interface,
            threshold_ms = QUIESCENCE_THRESHOLD.as_millis() as u64,
            "LEAVE issued, waiting for quiescence"
        );

        let end = loop {
            if abort.load(Ordering::Relaxed) {
                break PhaseEnd::Aborted;
            }

            match rx.recv_timeout(self.poll_interval) {
                Ok(obs) => table.observe(obs),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Capture(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "capture stopped unexpectedly",
                    )));
                }
            }
            for obs in rx.try_iter() {
                table.observe(obs);
            }

            let now = clock.now();
            if table.all_quiescent(now) {
                break PhaseEnd::Completed;
            }
            if now >= deadline_at {
                break PhaseEnd::DeadlineExpired;
            }
        };
        drop(capture);

        let dropped_observations = dropped.load(Ordering::Relaxed);
        if dropped_observations > 0 {
            warn!(
                dropped = dropped_observations,
                "observation queue overflowed, LEAVE times may be early"
            );
        }
        info!(
            ?end,
            elapsed_ms = clock.elapsed_since(phase_start).as_millis() as u64,
            "LEAVE phase finished"
        );

        Ok(LeaveOutcome {
            table,
            end,
            dropped_observations,
        })
    }
}
