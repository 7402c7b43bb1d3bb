//! # Cell Control Binary
//!
//! Runs every station described in `cell.toml` against the configured
//! line controller and manipulators.
//!
//! # Usage
//!
//! ```bash
//! # Run with simulation drivers
//! cell_control --config config/cell.toml --simulate
//!
//! # Verbose JSON logs
//! cell_control -c config/cell.toml -v --json
//!
//! # Manually pulse a coil (skipped if it is already ON)
//! cell_control -c config/cell.toml pulse Y11 --on-ms 500
//! ```

use cell_common::address::SignalAddress;
use cell_control::{BitChannel, Cell, CellConfig, LineLink};
use cell_hal::DriverRegistry;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Cell Control - line controller and manipulator synchronization
#[derive(Parser, Debug)]
#[command(name = "cell_control")]
#[command(version)]
#[command(about = "Coordinates a line controller with queued-motion manipulators")]
#[command(long_about = None)]
struct Args {
    /// Path to the cell configuration file.
    #[arg(short, long, default_value = "config/cell.toml")]
    config: PathBuf,

    /// Force simulation drivers for the line controller and every manipulator
    #[arg(short = 's', long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all stations until interrupted (default)
    Run,
    /// Pulse one coil once, unless it already reads ON
    Pulse {
        /// Bit device address, e.g. `Y11`
        address: SignalAddress,
        #[arg(long, default_value_t = 200)]
        on_ms: u64,
        #[arg(long, default_value_t = 200)]
        off_ms: u64,
    },
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("Cell control failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match CellConfig::load_validated(&args.config) {
        Ok(config) => {
            setup_tracing(&args, config.shared.log_level.into());
            config
        }
        Err(e) => {
            setup_tracing(&args, Level::INFO);
            return Err(e.into());
        }
    };

    info!("Cell Control v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.simulate {
        info!("Simulation mode enabled (exclusive)");
        config.line.driver = "simulation".to_string();
        for station in &mut config.stations {
            if let Some(m) = station.manipulator.as_mut() {
                m.driver = "simulation".to_string();
            }
        }
    }

    let registry = DriverRegistry::with_builtin();
    let config_dir = args.config.parent().unwrap_or(Path::new("."));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_cell(&config, config_dir, &registry),
        Command::Pulse {
            address,
            on_ms,
            off_ms,
        } => pulse(&config, &registry, address, on_ms, off_ms),
    }
}

fn run_cell(
    config: &CellConfig,
    config_dir: &Path,
    registry: &DriverRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cell = Cell::from_config(config, config_dir, registry)?;

    let running = cell.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    if let Err(e) = cell.connect() {
        cell.shutdown();
        return Err(e.into());
    }
    if let Err(e) = cell.run() {
        error!("Cell loop error: {}", e);
    }
    cell.shutdown();

    for station in cell.stations() {
        let stats = station.stats();
        info!(
            station = %station.name(),
            started = stats.started,
            completed = stats.completed,
            aborted = stats.aborted,
            "Station summary"
        );
    }
    info!("Cell Control shutdown complete");
    Ok(())
}

fn pulse(
    config: &CellConfig,
    registry: &DriverRegistry,
    address: SignalAddress,
    on_ms: u64,
    off_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let link = LineLink::new(
        registry.create_line(&config.line.driver)?,
        config.line.endpoint.clone(),
    );
    let channel = BitChannel::new(&link, address)?;

    // One attempt; a manual pulse should not sit in a retry loop.
    let running = AtomicBool::new(false);
    if !link.reconnect(config.line.reconnect_backoff(), &running) {
        return Err(format!("cannot connect to {}", link.endpoint()).into());
    }

    let (on, off) = (Duration::from_millis(on_ms), Duration::from_millis(off_ms));
    let pulsed = channel.pulse_if_clear(on, off);
    link.close();
    if pulsed? {
        info!(%address, "Pulsed");
    } else {
        warn!(%address, "Already ON; not pulsed");
    }
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: Level) {
    let level = if args.verbose { Level::DEBUG } else { configured };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
