//! Rendering of a [`ResultsSnapshot`] for the terminal.

use std::fmt::Write;

use mcast_timing_engine::join::PhaseEnd;
use mcast_timing_engine::results::PhaseStats;
use mcast_timing_engine::ResultsSnapshot;

/// Per-group table followed by the per-phase statistics.
pub fn render_text(snap: &ResultsSnapshot) -> String {
    let leave = snap.mode.measures_leave();
    let mut out = String::new();

    let _ = write!(out, "{:<17} {:>12}", "GROUP", "JOIN (µs)");
    if leave {
        let _ = write!(out, " {:>12}", "LEAVE (µs)");
    }
    out.push('\n');

    for r in &snap.results {
        let _ = write!(out, "{:<17} {:>12}", r.group.to_string(), cell(r.join_us));
        if leave {
            let _ = write!(out, " {:>12}", cell(r.leave_us));
        }
        out.push('\n');
    }

    out.push('\n');
    stats_line(&mut out, "JOIN", &snap.join, Some(snap.join_end));
    if leave {
        stats_line(&mut out, "LEAVE", &snap.leave, snap.leave_end);
    }

    let status = match (snap.aborted, snap.is_complete, snap.has_results) {
        (true, _, _) => "aborted",
        (false, true, _) => "complete",
        (false, false, true) => "partial",
        (false, false, false) => "no results",
    };
    let _ = writeln!(out, "status: {status}");
    out
}

pub fn render_json(snap: &ResultsSnapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snap)
}

fn cell(v: Option<i64>) -> String {
    v.map_or_else(|| "-".to_string(), |us| us.to_string())
}

fn stats_line(out: &mut String, phase: &str, s: &PhaseStats, end: Option<PhaseEnd>) {
    let end = match end {
        Some(PhaseEnd::Completed) => "completed",
        Some(PhaseEnd::DeadlineExpired) => "deadline",
        Some(PhaseEnd::Aborted) => "aborted",
        None => "not run",
    };
    if !s.has_data() {
        let _ = writeln!(out, "{phase:<5} no completed groups [{end}]");
        return;
    }
    let _ = writeln!(
        out,
        "{phase:<5} fastest {} / average {} / slowest {} µs over {} group(s) [{end}]",
        s.fastest_us, s.average_us, s.slowest_us, s.samples
    );
}
