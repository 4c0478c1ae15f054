//! # mcast-timing-engine
//!
//! Multicast group lifecycle timing engine.
//!
//! Correlates membership changes (IGMP JOIN / LEAVE issued through the local
//! stack) with the inbound packet stream to measure, per group, how long the
//! network takes to start delivering traffic after a JOIN and how long it
//! keeps delivering after a LEAVE.
//!
//! ## Crate structure
//!
//! - [`clock`] — Monotonic run clock and the µs conversion shared by both phases
//! - [`group`] — Multicast group range (contiguous block inside one /24)
//! - [`registry`] — Per-group JOIN timer table
//! - [`join`] — JOIN phase controller
//! - [`leave`] — LEAVE trackers, quiescence heuristic, LEAVE phase controller
//! - [`results`] — Reduction of final phase state into a [`ResultsSnapshot`]
//! - [`source`] — Collaborator traits: datagram source and promiscuous capture
//! - [`config`] — TOML / flag input resolved into a validated [`MeasurementConfig`]
//! - [`engine`] — `run_measurement` entry point
//! - [`net`] — Socket-backed collaborators (UDP source, `AF_PACKET` capture)
//!
//! [`ResultsSnapshot`]: results::ResultsSnapshot
//! [`MeasurementConfig`]: config::MeasurementConfig

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod join;
pub mod leave;
pub mod net;
pub mod registry;
pub mod results;
pub mod source;

pub use config::{MeasurementConfig, Mode};
pub use engine::{run_measurement, MeasurementEngine};
pub use error::{ConfigError, EngineError};
pub use group::GroupRange;
pub use results::ResultsSnapshot;
