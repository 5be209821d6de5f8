//! Gauntlet — network-impairment test orchestrator.
//!
//! Runs the scenario catalog against the Grid Clash server and clients:
//!
//! - applies a `tc netem` rule per scenario (loss, delay, jitter)
//! - captures traffic with `tcpdump` when available
//! - supervises one server and N clients per scenario
//! - merges per-client metric CSVs into one dataset per scenario
//! - guarantees the interface is clean and no child survives on any exit
//!
//! Exit code 0 means the catalog completed, even with degraded scenarios;
//! non-zero means a pre-flight failure before anything ran.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gauntlet_harness::config::{self, RunConfig};
use gauntlet_harness::layout::RunPaths;
use gauntlet_harness::run;
use gauntlet_harness::runlock::{CleanupGuard, RunLock};

/// Impairment test harness for the Grid Clash client/server.
#[derive(Parser, Debug)]
#[command(name = "gauntlet", about = "Network-impairment test orchestrator")]
struct Cli {
    /// Network interface to impair and capture on.
    #[arg(long, default_value = "lo")]
    interface: String,

    /// Number of concurrent test clients per scenario.
    #[arg(long, default_value_t = 2)]
    clients: u32,

    /// Per-scenario client run time in seconds.
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// UDP port the game server listens on.
    #[arg(long, default_value_t = 12000)]
    port: u16,

    /// Root directory for run artifacts.
    #[arg(long, default_value = "test_results")]
    base_dir: PathBuf,

    /// Scenario catalog TOML file; the built-in catalog is used when
    /// omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Server launch command, whitespace-split.
    #[arg(long, default_value = "python3 server_final.py")]
    server_cmd: String,

    /// Client launch command, whitespace-split. The harness appends
    /// --client-id, --duration, --output, --server, --port.
    #[arg(long, default_value = "python3 client_test.py")]
    client_cmd: String,

    /// Packet capture program; a missing binary degrades the run instead
    /// of failing it.
    #[arg(long, default_value = "tcpdump")]
    capture_cmd: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = RunConfig {
        interface: cli.interface,
        num_clients: cli.clients,
        duration_secs: cli.duration,
        port: cli.port,
        base_dir: cli.base_dir,
        server_cmd: cli.server_cmd.split_whitespace().map(str::to_string).collect(),
        client_cmd: cli.client_cmd.split_whitespace().map(str::to_string).collect(),
        capture_cmd: cli.capture_cmd,
    };

    let run_ts = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    tracing::info!(
        run = %run_ts,
        interface = %cfg.interface,
        clients = cfg.num_clients,
        duration_s = cfg.duration_secs,
        "gauntlet starting"
    );

    // ── Pre-flight ──────────────────────────────────────────────
    let catalog = match &cli.catalog {
        Some(path) => config::load_catalog(path)?,
        None => config::default_catalog(),
    };
    let specs = config::build_specs(catalog, &run_ts)?;

    run::preflight(&cfg)?;

    let paths = RunPaths::new(&cfg.base_dir);
    paths.create_all()?;

    let lock = RunLock::acquire(&paths.lock_file(), &cfg.interface)?;

    // ── Exit guard ──────────────────────────────────────────────
    // Covers every exit path: the guard handles normal completion, errors,
    // and panics; the signal handler handles SIGINT/SIGTERM, where it
    // clears the impairment, stops tracked children, and exits.
    let guard = CleanupGuard::new(lock.clone());
    let signal_lock = lock.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted — clearing impairment and stopping children...");
        signal_lock.cleanup();
        std::process::exit(130);
    })
    .expect("Error setting signal handler");

    // ── Scenario loop ───────────────────────────────────────────
    let reports = run::execute(&cfg, &specs, &paths, &lock, &run_ts);

    let degraded = reports.iter().filter(|r| r.degraded()).count();
    tracing::info!(
        scenarios = reports.len(),
        degraded,
        "gauntlet finished"
    );

    drop(guard);
    Ok(())
}
