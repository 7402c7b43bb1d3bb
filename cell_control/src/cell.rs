//! Cell supervisor: the shared line link and every station on it.
//!
//! The `Cell` owns the one line controller connection and the stations
//! built from `cell.toml`. It runs them either round-robin from a single
//! loop or one scoped thread per station, reconnects with a fixed backoff
//! when a station reports a lost connection, and tears everything down on
//! shutdown.

use crate::config::{CellConfig, DoneConfig, Scheduling, StartConfig, StationConfig};
use crate::coordinator::{CycleCoordinator, DoneSignal, MotionPlan, StartSignal};
use crate::error::{CellError, CycleError};
use crate::motion_queue::MotionQueue;
use crate::router::JobRouter;
use crate::signal::{BitChannel, LineLink, WordChannel};
use cell_common::config::resolve_path;
use cell_common::line::LineTransport;
use cell_common::motion::MotionDriver;
use cell_common::waypoint::{WaypointFile, WaypointSource};
use cell_hal::DriverRegistry;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest uninterrupted sleep; shutdown is noticed within this.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Line link plus all stations.
pub struct Cell {
    link: LineLink,
    stations: Vec<CycleCoordinator>,
    scheduling: Scheduling,
    reconnect_backoff: Duration,
    /// Running flag for loop control
    running: Arc<AtomicBool>,
}

impl Cell {
    pub fn new(
        link: LineLink,
        stations: Vec<CycleCoordinator>,
        scheduling: Scheduling,
        reconnect_backoff: Duration,
    ) -> Self {
        Self {
            link,
            stations,
            scheduling,
            reconnect_backoff,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Build a cell with drivers looked up in `registry`.
    ///
    /// `config_dir` resolves relative program paths.
    pub fn from_config(
        config: &CellConfig,
        config_dir: &Path,
        registry: &DriverRegistry,
    ) -> Result<Self, CellError> {
        let transport = registry.create_line(&config.line.driver)?;
        Self::build(config, config_dir, transport, |station| {
            let driver = station
                .manipulator
                .as_ref()
                .map(|m| m.driver.as_str())
                .unwrap_or_default();
            Ok(registry.create_motion(driver)?)
        })
    }

    /// Build a cell around an existing transport, asking `motion_driver`
    /// for each station that has a manipulator.
    ///
    /// Validates the configuration and every referenced program file. No
    /// device I/O happens here.
    pub fn build<F>(
        config: &CellConfig,
        config_dir: &Path,
        transport: Box<dyn LineTransport>,
        mut motion_driver: F,
    ) -> Result<Self, CellError>
    where
        F: FnMut(&StationConfig) -> Result<Box<dyn MotionDriver>, CellError>,
    {
        config.validate()?;
        let link = LineLink::new(transport, config.line.endpoint.clone());
        let running = Arc::new(AtomicBool::new(true));

        let mut stations = Vec::with_capacity(config.stations.len());
        for station in &config.stations {
            stations.push(build_station(
                config,
                station,
                config_dir,
                &link,
                &running,
                &mut motion_driver,
            )?);
        }
        info!(
            "Cell {:?} built with {} station(s), scheduling={:?}",
            config.shared.service_name,
            stations.len(),
            config.scheduling
        );

        Ok(Self {
            link,
            stations,
            scheduling: config.scheduling,
            reconnect_backoff: config.line.reconnect_backoff(),
            running,
        })
    }

    /// Get the running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn link(&self) -> &LineLink {
        &self.link
    }

    pub fn stations(&self) -> &[CycleCoordinator] {
        &self.stations
    }

    pub fn station_mut(&mut self, name: &str) -> Option<&mut CycleCoordinator> {
        self.stations.iter_mut().find(|s| s.name() == name)
    }

    /// Connect the line controller (retrying with backoff) and every
    /// manipulator.
    pub fn connect(&mut self) -> Result<(), CellError> {
        info!(endpoint = %self.link.endpoint(), "Connecting to line controller");
        if !self.link.reconnect(self.reconnect_backoff, &self.running) {
            return Err(CellError::Interrupted);
        }
        for station in &mut self.stations {
            station.connect().map_err(|e| CellError::Motion {
                station: station.name().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Tick every station once, reconnecting if one lost the link.
    ///
    /// Returns the shortest interval any station asked for.
    pub fn tick_all(&mut self) -> Duration {
        let mut wait = Duration::MAX;
        for station in &mut self.stations {
            let result = station.tick();
            wait = wait.min(station.next_poll_interval());
            if let Err(e) = result {
                let (link, backoff) = (&self.link, self.reconnect_backoff);
                if !recover(station.name(), &e, link, backoff, &self.running) {
                    break;
                }
                // Remaining stations would only see the stale connection.
                if e.requires_reconnect() {
                    break;
                }
            }
        }
        if wait == Duration::MAX {
            SLEEP_SLICE
        } else {
            wait
        }
    }

    /// Run until the running flag is cleared.
    pub fn run(&mut self) -> Result<(), CellError> {
        info!(
            "Starting cell loop ({} station(s), {:?})",
            self.stations.len(),
            self.scheduling
        );

        match self.scheduling {
            Scheduling::RoundRobin => {
                while self.running.load(Ordering::SeqCst) {
                    let wait = self.tick_all();
                    sleep_while_running(wait, &self.running);
                }
            }
            Scheduling::Threaded => {
                let link = &self.link;
                let running = &self.running;
                let backoff = self.reconnect_backoff;
                std::thread::scope(|scope| {
                    for station in self.stations.iter_mut() {
                        scope.spawn(move || station_loop(station, link, running, backoff));
                    }
                });
            }
        }

        info!("Cell loop stopped");
        Ok(())
    }

    /// Stop loops, release every station's outputs, close the link.
    pub fn shutdown(&mut self) {
        info!("Shutdown requested");
        self.running.store(false, Ordering::SeqCst);
        for station in &mut self.stations {
            station.teardown();
        }
        self.link.close();
    }
}

fn station_loop(
    station: &mut CycleCoordinator,
    link: &LineLink,
    running: &AtomicBool,
    backoff: Duration,
) {
    debug!(station = %station.name(), "Station thread started");
    while running.load(Ordering::SeqCst) {
        if let Err(e) = station.tick() {
            if !recover(station.name(), &e, link, backoff, running) {
                break;
            }
        }
        sleep_while_running(station.next_poll_interval(), running);
    }
    debug!(station = %station.name(), "Station thread stopped");
}

/// Log a tick failure and reconnect if needed. False once shutting down.
fn recover(
    station: &str,
    error: &CycleError,
    link: &LineLink,
    backoff: Duration,
    running: &AtomicBool,
) -> bool {
    warn!(station, "Tick failed: {error}");
    if error.requires_reconnect() {
        warn!(station, "Line connection lost; reconnecting");
        return link.reconnect(backoff, running);
    }
    true
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLEEP_SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
}

fn build_station<F>(
    config: &CellConfig,
    station: &StationConfig,
    config_dir: &Path,
    link: &LineLink,
    running: &Arc<AtomicBool>,
    motion_driver: &mut F,
) -> Result<CycleCoordinator, CellError>
where
    F: FnMut(&StationConfig) -> Result<Box<dyn MotionDriver>, CellError>,
{
    let start = match station.start {
        StartConfig::Bit(a) => StartSignal::Bit(BitChannel::new(link, a)?),
        StartConfig::Word(a) => StartSignal::Word(WordChannel::new(link, a)?),
    };
    let done = match station.done {
        DoneConfig::Pulse {
            address,
            on_ms,
            off_ms,
        } => DoneSignal::Pulse {
            done: BitChannel::new(link, address)?,
            on: Duration::from_millis(on_ms),
            off: Duration::from_millis(off_ms),
        },
        DoneConfig::Latch { address } => DoneSignal::Latch {
            done: BitChannel::new(link, address)?,
            start: BitChannel::new(link, station.start.address())?,
        },
        DoneConfig::Word { address } => DoneSignal::Word {
            done: WordChannel::new(link, address)?,
            start: WordChannel::new(link, station.start.address())?,
        },
    };

    let mut coordinator = CycleCoordinator::new(&station.name, start, done, station.timing());
    if let Some(busy) = station.busy {
        coordinator = coordinator.with_busy(BitChannel::new(link, busy)?);
    }
    if station.routing {
        let router = JobRouter::new(link, &config.handshake, &config.router)?;
        coordinator = coordinator.with_router(router, station.clear_flags_after_cycle);
    }

    if let Some(m) = &station.manipulator {
        let queue = MotionQueue::new(&station.name, motion_driver(station)?)
            .with_polling(m.poll_interval(), m.timeout())
            .with_running_flag(Arc::clone(running));
        let mut plan = MotionPlan::new(queue, &m.port, m.baud);
        if let Some(path) = &m.program {
            plan = plan.with_default(program_file(config_dir, path)?);
        }
        for (outcome, path) in m.outcome_programs()? {
            plan = plan.with_program(outcome, program_file(config_dir, &path)?);
        }
        coordinator = coordinator.with_motion(plan);
    }

    debug!(station = %station.name, routing = station.routing, "Station built");
    Ok(coordinator)
}

/// Program file, loaded once here so a bad file fails before any I/O.
fn program_file(config_dir: &Path, path: &Path) -> Result<Box<dyn WaypointSource>, CellError> {
    let file = WaypointFile::new(resolve_path(config_dir, path));
    let program = file.load()?;
    info!(
        "Loaded program {:?} ({} waypoints) from {}",
        program.name,
        program.waypoints.len(),
        file.describe()
    );
    Ok(Box::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_common::config::ConfigLoader;
    use cell_hal::drivers::simulation::{SimLineController, SimManipulator};
    use std::io::Write;

    fn config(text: &str) -> CellConfig {
        CellConfig::from_toml_str(text).unwrap()
    }

    const ROUTING_ONLY: &str = r#"
        [shared]
        service_name = "cell"

        [line]
        endpoint = { host = "sim", port = 5052 }
        reconnect_backoff_ms = 1

        [[stations]]
        name = "inspection"
        start = { bit = "M100" }
        done = { mode = "latch", address = "M101" }
        routing = true
    "#;

    #[test]
    fn builds_from_registry() {
        let registry = DriverRegistry::with_builtin();
        let cell = Cell::from_config(&config(ROUTING_ONLY), Path::new("."), &registry).unwrap();
        assert_eq!(cell.stations().len(), 1);
        assert!(cell.stations()[0].router().is_some());
    }

    #[test]
    fn unknown_line_driver_is_rejected() {
        let registry = DriverRegistry::with_builtin();
        let text = ROUTING_ONLY.replace("[line]", "[line]\ndriver = \"mc3e\"");
        assert!(matches!(
            Cell::from_config(&config(&text), Path::new("."), &registry),
            Err(CellError::Driver(_))
        ));
    }

    #[test]
    fn program_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut program = std::fs::File::create(dir.path().join("home.toml")).unwrap();
        writeln!(
            program,
            "name = \"home\"\n[[waypoints]]\npose = {{ x = 0.0, y = 0.0, z = 0.0, r = 0.0 }}"
        )
        .unwrap();

        let text = ROUTING_ONLY.to_string()
            + r#"
            [[stations]]
            name = "robot1"
            start = { bit = "M110" }
            done = { mode = "pulse", address = "M112" }
            [stations.manipulator]
            port = "SIM0"
            program = "home.toml"
            "#;
        let cfg = config(&text);
        let built = Cell::build(&cfg, dir.path(), Box::new(SimLineController::new()), |_| {
            Ok(Box::new(SimManipulator::new()))
        });
        assert!(built.is_ok());

        let missing = Cell::build(
            &cfg,
            Path::new("/nonexistent"),
            Box::new(SimLineController::new()),
            |_| Ok(Box::new(SimManipulator::new())),
        );
        assert!(matches!(missing, Err(CellError::Config(_))));
    }

    #[test]
    fn connect_gives_up_when_stopped() {
        let sim = SimLineController::new();
        let handle = sim.handle();
        handle.refuse_connects(usize::MAX);
        let mut cell = Cell::build(&config(ROUTING_ONLY), Path::new("."), Box::new(sim), |_| {
            Ok(Box::new(SimManipulator::new()))
        })
        .unwrap();
        cell.running_flag().store(false, Ordering::SeqCst);
        assert!(matches!(cell.connect(), Err(CellError::Interrupted)));
    }

    #[test]
    fn shutdown_closes_link() {
        let sim = SimLineController::new();
        let handle = sim.handle();
        let mut cell = Cell::build(&config(ROUTING_ONLY), Path::new("."), Box::new(sim), |_| {
            Ok(Box::new(SimManipulator::new()))
        })
        .unwrap();
        cell.connect().unwrap();
        handle.set_bit(cell_common::address::SignalAddress::parse("Y1E").unwrap(), true);

        cell.shutdown();
        assert!(!handle.is_connected());
        assert!(!cell.running_flag().load(Ordering::SeqCst));
        assert!(!handle.bit(cell_common::address::SignalAddress::parse("Y1E").unwrap()));
    }

    #[test]
    fn tick_all_reconnects_after_lost_link() {
        let sim = SimLineController::new();
        let handle = sim.handle();
        let mut cell = Cell::build(&config(ROUTING_ONLY), Path::new("."), Box::new(sim), |_| {
            Ok(Box::new(SimManipulator::new()))
        })
        .unwrap();
        cell.connect().unwrap();
        handle.drop_connection();

        let wait = cell.tick_all();
        assert!(handle.is_connected());
        assert_eq!(handle.connect_count(), 2);
        assert_eq!(wait, Duration::from_millis(200));
    }

    #[test]
    fn second_recovery_keeps_restored_link() {
        let sim = SimLineController::new();
        let handle = sim.handle();
        let link = LineLink::new(Box::new(sim), config(ROUTING_ONLY).line.endpoint);
        let running = AtomicBool::new(true);
        link.connect().unwrap();
        handle.drop_connection();

        let lost = CycleError::signal(
            cell_common::address::SignalAddress::parse("M100").unwrap(),
            cell_common::line::TransportError::ConnectionLost("reset".into()),
        );
        assert!(recover("a", &lost, &link, Duration::from_millis(1), &running));
        assert_eq!(handle.connect_count(), 2);

        // A second station reporting the same stale fault finds the link up.
        assert!(recover("b", &lost, &link, Duration::from_millis(1), &running));
        assert_eq!(handle.connect_count(), 2);
        assert!(handle.is_connected());
    }
}
