//! # Measurement Engine
//!
//! Sequences the phases of one run on the calling thread:
//!
//! 1. JOIN phase on the datagram source (always).
//! 2. LEAVE phase on the promiscuous capture, if requested and JOIN was not
//!    aborted.
//! 3. Aggregation of both phases into a [`ResultsSnapshot`].
//!
//! An abort (shared flag, typically flipped from a Ctrl-C handler) stops the
//! active phase at its next poll slice. Whatever completed before is kept.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;

use crate::clock::RunClock;
use crate::config::MeasurementConfig;
use crate::error::EngineError;
use crate::join::{JoinPhaseController, PhaseEnd};
use crate::leave::LeavePhaseController;
use crate::net::capture::AfPacketCapture;
use crate::net::udp::UdpDatagramSource;
use crate::results::{ResultsAggregator, ResultsSnapshot};
use crate::source::{DatagramSource, PacketCapture};

pub struct MeasurementEngine {
    config: MeasurementConfig,
    clock: RunClock,
    abort: Arc<AtomicBool>,
}

impl MeasurementEngine {
    pub fn new(config: MeasurementConfig) -> Self {
        Self {
            config,
            clock: RunClock::new(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_clock(mut self, clock: RunClock) -> Self {
        self.clock = clock;
        self
    }

    /// Share an externally owned abort flag.
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Run both phases against the given collaborators.
    ///
    /// `capture` may be `None` for JOIN-only runs; a JOIN+LEAVE run without
    /// one fails before any membership is touched.
    pub fn run<S: DatagramSource + ?Sized>(
        &self,
        source: &mut S,
        capture: Option<&mut dyn PacketCapture>,
    ) -> Result<ResultsSnapshot, EngineError> {
        let cfg = &self.config;
        if cfg.mode.measures_leave() && capture.is_none() {
            return Err(EngineError::CaptureUnavailable);
        }

        info!(
            groups = %cfg.groups,
            mode = ?cfg.mode,
            deadline_s = cfg.deadline.as_secs(),
            "measurement starting"
        );

        let join = JoinPhaseController::new(
            cfg.groups,
            cfg.interface,
            cfg.deadline,
            cfg.poll_interval,
        )
        .run(source, &self.clock, &self.abort)?;

        let leave = match capture {
            Some(capture) if cfg.mode.measures_leave() && join.end != PhaseEnd::Aborted => {
                let controller = LeavePhaseController::new(
                    cfg.groups,
                    cfg.interface,
                    cfg.deadline,
                    cfg.poll_interval,
                );
                Some(controller.run(source, capture, &self.clock, &self.abort)?)
            }
            _ => None,
        };

        let mut aggregator = ResultsAggregator::new(cfg.mode, &join.registry, join.end);
        if let Some(leave) = &leave {
            aggregator = aggregator.with_leave(&leave.table, leave.end);
        }
        let snapshot = aggregator.aggregate();

        info!(
            has_results = snapshot.has_results,
            is_complete = snapshot.is_complete,
            aborted = snapshot.aborted,
            run_ms = self.clock.uptime().as_millis() as u64,
            "measurement finished"
        );
        Ok(snapshot)
    }
}

/// Run a measurement on the host network stack.
///
/// Binds a UDP socket on `config.port`, and for JOIN+LEAVE runs opens an
/// `AF_PACKET` capture on the configured interface. Both are released when
/// this returns, on success, error, or abort alike.
pub fn run_measurement(
    config: MeasurementConfig,
    abort: Arc<AtomicBool>,
) -> Result<ResultsSnapshot, EngineError> {
    let mut source = UdpDatagramSource::bind(config.port).map_err(EngineError::Bind)?;
    let mut capture = AfPacketCapture::new();
    let capture: Option<&mut dyn PacketCapture> = if config.mode.measures_leave() {
        Some(&mut capture)
    } else {
        None
    };

    MeasurementEngine::new(config)
        .with_abort(abort)
        .run(&mut source, capture)
}
