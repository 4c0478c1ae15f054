//! # mcast-timing
//!
//! Multicast JOIN / LEAVE timing tool.
//!
//! ## Usage
//!
//! ```bash
//! # Source host: send to 230.8.97.10-12 every 100 ms
//! mcast-timing emit --group 230.8.97.10 --count 3
//!
//! # Measuring host: JOIN delay only, 10 s deadline
//! mcast-timing analyze --group 230.8.97.10 --count 3 --interface eth0
//!
//! # JOIN and LEAVE (needs CAP_NET_RAW), JSON output
//! mcast-timing analyze --group 230.8.97.10 --count 3 --interface eth0 --leave --json
//!
//! # Settings from a file, flags override
//! mcast-timing analyze --config analyzer.toml --deadline-secs 20
//! ```
//!
//! Logs go to stderr (`RUST_LOG` filters them); results go to stdout.

mod emitter;
mod output;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mcast_timing_engine::config::{parse_interface, AnalyzerConfigInput, DEFAULT_PORT};
use mcast_timing_engine::{run_measurement, GroupRange, Mode};
use tracing_subscriber::EnvFilter;

use crate::emitter::{Emitter, EmitterConfig};

/// Multicast group JOIN / LEAVE timing.
#[derive(Parser, Debug)]
#[command(name = "mcast-timing", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send sequenced datagrams to a group range until interrupted.
    Emit(EmitArgs),
    /// Join a group range and time JOIN (and optionally LEAVE) delays.
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct EmitArgs {
    /// First multicast group of the range.
    #[arg(long)]
    group: String,

    /// Number of contiguous groups.
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Destination UDP port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Milliseconds between rounds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Multicast TTL.
    #[arg(long, default_value_t = 32)]
    ttl: u32,

    /// Outgoing interface, as an IPv4 address or a name.
    #[arg(long)]
    interface: Option<String>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// First multicast group of the range.
    #[arg(long)]
    group: Option<String>,

    /// Number of contiguous groups (1-254).
    #[arg(long)]
    count: Option<u32>,

    /// Also measure LEAVE quiescence (needs CAP_NET_RAW).
    #[arg(long, default_value_t = false)]
    leave: bool,

    /// Per-phase deadline in seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Local interface, as an IPv4 address or a name.
    #[arg(long)]
    interface: Option<String>,

    /// UDP port the groups are sent to.
    #[arg(long)]
    port: Option<u16>,

    /// TOML file with analyzer settings; flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the results snapshot as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl AnalyzeArgs {
    fn to_input(&self) -> AnalyzerConfigInput {
        AnalyzerConfigInput {
            first_group: self.group.clone(),
            count: self.count,
            mode: self.leave.then_some(Mode::JoinAndLeave),
            deadline_secs: self.deadline_secs,
            interface: self.interface.clone(),
            port: self.port,
            poll_interval_ms: None,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let abort = Arc::new(AtomicBool::new(false));
    {
        let running = running.clone();
        let abort = abort.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received, stopping");
            running.store(false, Ordering::Relaxed);
            abort.store(true, Ordering::Relaxed);
        })
        .context("installing Ctrl-C handler")?;
    }

    match cli.command {
        Command::Emit(args) => emit(args, &running),
        Command::Analyze(args) => analyze(args, abort),
    }
}

fn emit(args: EmitArgs, running: &AtomicBool) -> anyhow::Result<()> {
    let groups = GroupRange::parse(&args.group, args.count)?;
    let interface = match args.interface.as_deref() {
        Some(s) => parse_interface(s)?,
        None => std::net::Ipv4Addr::UNSPECIFIED,
    };
    let cfg = EmitterConfig {
        interval: Duration::from_millis(args.interval_ms.max(1)),
        ttl: args.ttl,
        interface,
    };

    tracing::info!(
        %groups,
        port = args.port,
        ttl = cfg.ttl,
        %interface,
        "mcast-timing emit starting"
    );
    let mut emitter = Emitter::new(groups, args.port, &cfg).context("creating emitter socket")?;

    emitter.run(running);
    Ok(())
}

fn analyze(args: AnalyzeArgs, abort: Arc<AtomicBool>) -> anyhow::Result<()> {
    let file_input = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            AnalyzerConfigInput::from_toml_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => AnalyzerConfigInput::default(),
    };
    let config = file_input.merge(args.to_input()).resolve()?;

    tracing::info!(
        groups = %config.groups,
        mode = ?config.mode,
        interface = %config.interface,
        port = config.port,
        "mcast-timing analyze starting"
    );

    let snapshot = run_measurement(config, abort)?;

    let rendered = if args.json {
        output::render_json(&snapshot)?
    } else {
        output::render_text(&snapshot)
    };
    println!("{rendered}");
    Ok(())
}
