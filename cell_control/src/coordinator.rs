//! Per-station cycle coordination.
//!
//! A station watches a level-triggered start signal. When it reads high,
//! one full cycle runs inside the tick: busy ON, job routing, the motion
//! program for the outcome, done signaling. The station then sits in
//! `Debounce` until the start signal drops, so a held start never runs
//! twice. A fault aborts the cycle and returns to `Idle`, so a start that
//! is still held triggers a fresh cycle from the entry job.

use crate::error::CycleError;
use crate::motion_queue::{Completion, MotionQueue};
use crate::router::JobRouter;
use crate::router::table::CycleOutcome;
use crate::signal::{BitChannel, WordChannel};
use cell_common::address::SignalAddress;
use cell_common::line::TransportError;
use cell_common::motion::MotionError;
use cell_common::waypoint::WaypointSource;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ─── Signals ────────────────────────────────────────────────────────

/// Level-triggered start request.
#[derive(Clone)]
pub enum StartSignal {
    /// Start coil, high = start.
    Bit(BitChannel),
    /// Start word, 1 = start.
    Word(WordChannel),
}

impl StartSignal {
    pub fn address(&self) -> SignalAddress {
        match self {
            Self::Bit(ch) => ch.address(),
            Self::Word(ch) => ch.address(),
        }
    }

    pub fn is_asserted(&self) -> Result<bool, TransportError> {
        match self {
            Self::Bit(ch) => ch.read(),
            Self::Word(ch) => Ok(ch.read()? == 1),
        }
    }
}

/// How a finished cycle is reported back to the line controller.
#[derive(Clone)]
pub enum DoneSignal {
    /// Momentary done pulse; the line controller drops start itself.
    Pulse {
        done: BitChannel,
        on: Duration,
        off: Duration,
    },
    /// Start coil reset, done coil latched ON.
    Latch { done: BitChannel, start: BitChannel },
    /// Done word set to 1, start word reset to 0.
    Word { done: WordChannel, start: WordChannel },
}

impl DoneSignal {
    fn signal(&self) -> Result<(), CycleError> {
        match self {
            Self::Pulse { done, on, off } => done
                .pulse(*on, *off)
                .map_err(|e| CycleError::signal(done.address(), e)),
            Self::Latch { done, start } => {
                start
                    .write(false)
                    .map_err(|e| CycleError::signal(start.address(), e))?;
                done.write(true)
                    .map_err(|e| CycleError::signal(done.address(), e))
            }
            Self::Word { done, start } => {
                done.write(1)
                    .map_err(|e| CycleError::signal(done.address(), e))?;
                start
                    .write(0)
                    .map_err(|e| CycleError::signal(start.address(), e))
            }
        }
    }
}

// ─── Motion plan ────────────────────────────────────────────────────

/// A station's manipulator and the programs it runs.
pub struct MotionPlan {
    pub queue: MotionQueue,
    pub port: String,
    pub baud: u32,
    /// Program used when no outcome-specific one applies.
    pub default: Option<Box<dyn WaypointSource>>,
    pub by_outcome: Vec<(CycleOutcome, Box<dyn WaypointSource>)>,
}

impl MotionPlan {
    pub fn new(queue: MotionQueue, port: impl Into<String>, baud: u32) -> Self {
        Self {
            queue,
            port: port.into(),
            baud,
            default: None,
            by_outcome: Vec::new(),
        }
    }

    pub fn with_default(mut self, source: Box<dyn WaypointSource>) -> Self {
        self.default = Some(source);
        self
    }

    pub fn with_program(mut self, outcome: CycleOutcome, source: Box<dyn WaypointSource>) -> Self {
        self.by_outcome.push((outcome, source));
        self
    }

    fn source_for(&self, outcome: Option<CycleOutcome>) -> Option<&dyn WaypointSource> {
        outcome
            .and_then(|o| self.by_outcome.iter().find(|(k, _)| *k == o))
            .map(|(_, s)| s.as_ref())
            .or(self.default.as_deref())
    }
}

// ─── Phases and reports ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Detected,
    Routing,
    Moving,
    Signaling,
    Debounce,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub outcome: Option<CycleOutcome>,
    pub motion: Option<Completion>,
    pub elapsed: Duration,
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// Start not asserted.
    Waiting,
    Completed(CycleSummary),
    /// Start still held after a cycle.
    Debouncing,
    /// Start dropped; back to idle.
    Released,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub started: u64,
    pub completed: u64,
    pub aborted: u64,
    pub last_outcome: Option<CycleOutcome>,
}

/// Poll intervals for one station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    pub poll_interval: Duration,
    pub debounce_interval: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            debounce_interval: Duration::from_millis(500),
        }
    }
}

// ─── Coordinator ────────────────────────────────────────────────────

/// One station's start → route → move → signal loop.
pub struct CycleCoordinator {
    name: String,
    start: StartSignal,
    busy: Option<BitChannel>,
    done: DoneSignal,
    router: Option<JobRouter>,
    reset_router: bool,
    motion: Option<MotionPlan>,
    timing: CycleTiming,
    phase: CyclePhase,
    stats: CycleStats,
}

impl CycleCoordinator {
    pub fn new(
        name: impl Into<String>,
        start: StartSignal,
        done: DoneSignal,
        timing: CycleTiming,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            busy: None,
            done,
            router: None,
            reset_router: false,
            motion: None,
            timing,
            phase: CyclePhase::Idle,
            stats: CycleStats::default(),
        }
    }

    pub fn with_busy(mut self, busy: BitChannel) -> Self {
        self.busy = Some(busy);
        self
    }

    /// Route every cycle; `reset_after` clears router outputs after signaling.
    pub fn with_router(mut self, router: JobRouter, reset_after: bool) -> Self {
        self.router = Some(router);
        self.reset_router = reset_after;
        self
    }

    pub fn with_motion(mut self, plan: MotionPlan) -> Self {
        self.motion = Some(plan);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn router(&self) -> Option<&JobRouter> {
        self.router.as_ref()
    }

    /// Interval the caller should wait before the next tick.
    pub fn next_poll_interval(&self) -> Duration {
        match self.phase {
            CyclePhase::Debounce => self.timing.debounce_interval,
            _ => self.timing.poll_interval,
        }
    }

    /// Connect the station's manipulator, if it has one.
    pub fn connect(&mut self) -> Result<(), MotionError> {
        if let Some(plan) = self.motion.as_mut() {
            plan.queue.connect(&plan.port, plan.baud)?;
        }
        Ok(())
    }

    /// Observe the start signal once and act on it.
    pub fn tick(&mut self) -> Result<TickReport, CycleError> {
        match self.phase {
            CyclePhase::Debounce => {
                if self.start_asserted()? {
                    Ok(TickReport::Debouncing)
                } else {
                    debug!(station = %self.name, "Start released");
                    self.phase = CyclePhase::Idle;
                    Ok(TickReport::Released)
                }
            }
            _ => {
                if self.start_asserted()? {
                    self.run_cycle()
                } else {
                    Ok(TickReport::Waiting)
                }
            }
        }
    }

    /// Release outputs and stop the manipulator. Errors are logged.
    pub fn teardown(&mut self) {
        info!(station = %self.name, "Tearing down station");
        if let Some(router) = &self.router {
            if let Err(e) = router.reset() {
                warn!(station = %self.name, "Router reset failed: {e}");
            }
        }
        if let Some(plan) = self.motion.as_mut() {
            plan.queue.abort();
            plan.queue.disconnect();
        }
        self.release_busy();
        self.phase = CyclePhase::Idle;
    }

    fn start_asserted(&self) -> Result<bool, CycleError> {
        self.start
            .is_asserted()
            .map_err(|e| CycleError::signal(self.start.address(), e))
    }

    fn run_cycle(&mut self) -> Result<TickReport, CycleError> {
        let started = Instant::now();
        self.phase = CyclePhase::Detected;
        self.stats.started += 1;
        info!(station = %self.name, start = %self.start.address(), "Start detected");

        match self.execute() {
            Ok((outcome, motion)) => {
                self.phase = CyclePhase::Debounce;
                self.stats.completed += 1;
                self.stats.last_outcome = outcome;
                let elapsed = started.elapsed();
                info!(station = %self.name, ?outcome, "Cycle complete in {elapsed:?}");
                Ok(TickReport::Completed(CycleSummary {
                    outcome,
                    motion,
                    elapsed,
                }))
            }
            Err(e) => {
                error!(station = %self.name, phase = %self.phase, "Cycle aborted: {e}");
                self.release_busy();
                self.stats.aborted += 1;
                self.phase = CyclePhase::Idle;
                Err(e)
            }
        }
    }

    fn execute(&mut self) -> Result<(Option<CycleOutcome>, Option<Completion>), CycleError> {
        if let Some(busy) = &self.busy {
            busy.write(true)
                .map_err(|e| CycleError::signal(busy.address(), e))?;
        }

        self.phase = CyclePhase::Routing;
        let outcome = match self.router.as_mut() {
            Some(router) => Some(router.run_cycle()?),
            None => None,
        };

        self.phase = CyclePhase::Moving;
        let motion = self.run_motion(outcome)?;

        self.phase = CyclePhase::Signaling;
        if let Some(busy) = &self.busy {
            busy.write(false)
                .map_err(|e| CycleError::signal(busy.address(), e))?;
        }
        self.done.signal()?;
        if self.reset_router {
            if let Some(router) = &self.router {
                router.reset()?;
            }
        }
        Ok((outcome, motion))
    }

    fn run_motion(
        &mut self,
        outcome: Option<CycleOutcome>,
    ) -> Result<Option<Completion>, CycleError> {
        let Some(plan) = self.motion.as_mut() else {
            return Ok(None);
        };
        let program = match plan.source_for(outcome) {
            Some(source) => source.load().map_err(|e| CycleError::Program {
                program: source.describe(),
                source: e,
            })?,
            None => {
                debug!(station = %self.name, ?outcome, "No program for this cycle");
                return Ok(None);
            }
        };
        Ok(Some(plan.queue.run_program(&program)?))
    }

    fn release_busy(&self) {
        if let Some(busy) = &self.busy {
            if let Err(e) = busy.write(false) {
                warn!(station = %self.name, address = %busy.address(), "Failed to clear busy: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::LineLink;
    use cell_common::line::Endpoint;
    use cell_common::motion::Pose;
    use cell_common::waypoint::{Waypoint, WaypointProgram};
    use cell_hal::drivers::simulation::{
        CompletionModel, SimLineController, SimLineHandle, SimManipulator, SimManipulatorHandle,
    };

    fn addr(s: &str) -> SignalAddress {
        SignalAddress::parse(s).unwrap()
    }

    fn link() -> (LineLink, SimLineHandle) {
        let sim = SimLineController::new();
        let handle = sim.handle();
        let link = LineLink::new(
            Box::new(sim),
            Endpoint {
                host: "sim".into(),
                port: 5052,
            },
        );
        link.connect().unwrap();
        (link, handle)
    }

    fn motion_station(link: &LineLink) -> (CycleCoordinator, SimManipulatorHandle) {
        motion_station_with_timeout(link, Duration::from_secs(5))
    }

    fn motion_station_with_timeout(
        link: &LineLink,
        timeout: Duration,
    ) -> (CycleCoordinator, SimManipulatorHandle) {
        let sim = SimManipulator::new();
        let handle = sim.handle();
        let queue = MotionQueue::new("robot1", Box::new(sim))
            .with_polling(Duration::from_millis(1), Some(timeout));
        let home = Waypoint::at(Pose::new(1.0, 2.0, 3.0, 0.0));
        let program = WaypointProgram::new("home", vec![home]);
        let plan = MotionPlan::new(queue, "SIM0", 115_200).with_default(Box::new(program));

        let start = StartSignal::Bit(BitChannel::new(link, addr("M100")).unwrap());
        let done = DoneSignal::Pulse {
            done: BitChannel::new(link, addr("M102")).unwrap(),
            on: Duration::ZERO,
            off: Duration::ZERO,
        };
        let mut station = CycleCoordinator::new("robot1", start, done, CycleTiming::default())
            .with_busy(BitChannel::new(link, addr("M101")).unwrap())
            .with_motion(plan);
        station.connect().unwrap();
        (station, handle)
    }

    #[test]
    fn idle_without_start() {
        let (link, _) = link();
        let (mut station, robot) = motion_station(&link);
        assert_eq!(station.tick().unwrap(), TickReport::Waiting);
        assert_eq!(station.phase(), CyclePhase::Idle);
        assert_eq!(robot.polls(), 0);
    }

    #[test]
    fn bit_station_runs_program_and_pulses_done() {
        let (link, line) = link();
        let (mut station, robot) = motion_station(&link);
        line.set_bit(addr("M100"), true);

        let summary = match station.tick().unwrap() {
            TickReport::Completed(summary) => summary,
            other => panic!("expected a completed cycle, got {other:?}"),
        };
        assert_eq!(summary.outcome, None);
        assert!(summary.motion.is_some());
        assert_eq!(robot.pose(), Pose::new(1.0, 2.0, 3.0, 0.0));
        assert_eq!(line.writes_to(addr("M101")), vec![true, false]);
        assert_eq!(line.writes_to(addr("M102")), vec![true, false]);
        assert_eq!(station.phase(), CyclePhase::Debounce);
        assert_eq!(station.next_poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn held_start_debounces_until_released() {
        let (link, line) = link();
        let (mut station, _) = motion_station(&link);
        line.set_bit(addr("M100"), true);
        station.tick().unwrap();

        for _ in 0..3 {
            assert_eq!(station.tick().unwrap(), TickReport::Debouncing);
        }
        assert_eq!(station.stats().started, 1);

        line.set_bit(addr("M100"), false);
        assert_eq!(station.tick().unwrap(), TickReport::Released);
        assert_eq!(station.phase(), CyclePhase::Idle);

        line.set_bit(addr("M100"), true);
        assert!(matches!(station.tick().unwrap(), TickReport::Completed(_)));
        assert_eq!(station.stats().completed, 2);
    }

    #[test]
    fn word_station_clears_its_own_start() {
        let (link, line) = link();
        let start = StartSignal::Word(WordChannel::new(&link, addr("D100")).unwrap());
        let done = DoneSignal::Word {
            done: WordChannel::new(&link, addr("D101")).unwrap(),
            start: WordChannel::new(&link, addr("D100")).unwrap(),
        };
        let sim = SimManipulator::new();
        let queue =
            MotionQueue::new("robot2", Box::new(sim)).with_polling(Duration::from_millis(1), None);
        let plan = MotionPlan::new(queue, "SIM1", 115_200)
            .with_default(Box::new(WaypointProgram::new("p", vec![Waypoint::at(Pose::default())])));
        let mut station =
            CycleCoordinator::new("robot2", start, done, CycleTiming::default()).with_motion(plan);
        station.connect().unwrap();

        line.set_word(addr("D100"), 1);
        assert!(matches!(station.tick().unwrap(), TickReport::Completed(_)));
        assert_eq!(line.word(addr("D101")), 1);
        assert_eq!(line.word(addr("D100")), 0);
        assert_eq!(station.tick().unwrap(), TickReport::Released);
    }

    #[test]
    fn motion_failure_aborts_to_idle() {
        let (link, line) = link();
        let (mut station, robot) = motion_station_with_timeout(&link, Duration::from_millis(10));
        robot.set_model(CompletionModel::Stalled);
        line.set_bit(addr("M100"), true);

        assert!(matches!(station.tick(), Err(CycleError::Motion(MotionError::Timeout { .. }))));
        assert_eq!(station.phase(), CyclePhase::Idle);
        assert!(!line.bit(addr("M101")));
        assert!(line.writes_to(addr("M102")).is_empty());
        assert_eq!(station.stats().aborted, 1);
    }

    #[test]
    fn lost_start_read_is_reported() {
        let (link, line) = link();
        let (mut station, _) = motion_station(&link);
        line.drop_connection();
        let err = station.tick().unwrap_err();
        assert!(err.requires_reconnect());
    }
}
