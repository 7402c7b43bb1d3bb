//! Queued motion execution.
//!
//! The manipulator firmware runs commands from its own queue and reports
//! the index of the last command it finished. `MotionQueue` submits
//! commands, remembers the last index it handed out, and waits for the
//! firmware to catch up with bounded polling.

use cell_common::motion::{MotionCommand, MotionDriver, MotionError, Pose, QueueIndex};
use cell_common::waypoint::WaypointProgram;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default completion poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a completed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Index that was awaited.
    pub index: QueueIndex,
    /// Completion index polls taken.
    pub polls: usize,
    pub elapsed: Duration,
}

/// Wrapper around one manipulator's firmware queue.
pub struct MotionQueue {
    label: String,
    driver: Box<dyn MotionDriver>,
    last_submitted: Option<QueueIndex>,
    poll_interval: Duration,
    timeout: Option<Duration>,
    /// Cleared on shutdown; waits observe it between polls.
    running: Option<Arc<AtomicBool>>,
}

impl MotionQueue {
    pub fn new(label: impl Into<String>, driver: Box<dyn MotionDriver>) -> Self {
        Self {
            label: label.into(),
            driver,
            last_submitted: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            running: None,
        }
    }

    /// Poll interval and bound used by [`MotionQueue::run_program`].
    pub fn with_polling(mut self, poll_interval: Duration, timeout: Option<Duration>) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    /// Abandon waits once `running` reads false.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn connect(&mut self, port: &str, baud: u32) -> Result<(), MotionError> {
        self.driver.connect(port, baud)?;
        info!(manipulator = %self.label, port, baud, "Manipulator connected");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.driver.disconnect();
    }

    /// Submit one command. Never waits for it to run.
    pub fn enqueue(&mut self, command: &MotionCommand) -> Result<QueueIndex, MotionError> {
        let index = self.driver.enqueue(command)?;
        debug!(manipulator = %self.label, %index, %command, "Enqueued");
        self.last_submitted = Some(index);
        Ok(index)
    }

    /// Index of the most recently submitted command since the last clear.
    pub fn last_submitted(&self) -> Option<QueueIndex> {
        self.last_submitted
    }

    pub fn start_execution(&mut self) -> Result<(), MotionError> {
        self.driver.start_queue()
    }

    pub fn stop_execution(&mut self) -> Result<(), MotionError> {
        self.driver.stop_queue()
    }

    /// Discard pending commands. Safe to call repeatedly.
    pub fn clear_queue(&mut self) -> Result<(), MotionError> {
        self.driver.clear_queue()?;
        self.last_submitted = None;
        Ok(())
    }

    pub fn current_pose(&mut self) -> Result<Pose, MotionError> {
        self.driver.current_pose()
    }

    /// Block until the firmware reports `index` as completed.
    ///
    /// Polls every `poll_interval`. With `timeout = None` the wait is
    /// unbounded apart from the running flag.
    ///
    /// # Errors
    /// - `MotionError::Timeout` once `timeout` has elapsed
    /// - `MotionError::Cancelled` when the running flag drops
    /// - any driver error from the poll itself
    pub fn await_index(
        &mut self,
        index: QueueIndex,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<Completion, MotionError> {
        let started = Instant::now();
        let mut polls = 0usize;

        loop {
            if self.cancelled() {
                return Err(MotionError::Cancelled { index });
            }

            let completed = self.driver.current_completed_index()?;
            polls += 1;
            if completed >= index {
                let elapsed = started.elapsed();
                debug!(manipulator = %self.label, %index, polls, "Index completed in {elapsed:?}");
                return Ok(Completion {
                    index,
                    polls,
                    elapsed,
                });
            }

            if let Some(limit) = timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(MotionError::Timeout {
                        index,
                        completed,
                        waited,
                    });
                }
            }

            std::thread::sleep(poll_interval);
        }
    }

    /// Wait for the last submitted command using the configured polling.
    ///
    /// Returns immediately with zero polls if nothing was submitted.
    pub fn await_last(&mut self) -> Result<Completion, MotionError> {
        match self.last_submitted {
            Some(index) => self.await_index(index, self.poll_interval, self.timeout),
            None => Ok(Completion {
                index: QueueIndex::default(),
                polls: 0,
                elapsed: Duration::ZERO,
            }),
        }
    }

    /// Execute a whole waypoint program and wait for it.
    ///
    /// Each waypoint becomes one group: params, effector (unless held),
    /// move, dwell (if any). On any failure the queue is stopped and
    /// cleared before the error is returned.
    pub fn run_program(&mut self, program: &WaypointProgram) -> Result<Completion, MotionError> {
        info!(
            manipulator = %self.label,
            program = %program.name,
            waypoints = program.waypoints.len(),
            "Running program"
        );

        match self.submit_and_wait(program) {
            Ok(completion) => {
                self.stop_execution()?;
                match self.current_pose() {
                    Ok(pose) => info!(manipulator = %self.label, %pose, "Program finished"),
                    Err(e) => warn!(manipulator = %self.label, "Pose unavailable: {e}"),
                }
                Ok(completion)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Stop and clear, logging failures.
    pub fn abort(&mut self) {
        if let Err(e) = self.stop_execution() {
            warn!(manipulator = %self.label, "Failed to stop queue: {e}");
        }
        if let Err(e) = self.clear_queue() {
            warn!(manipulator = %self.label, "Failed to clear queue: {e}");
        }
    }

    fn submit_and_wait(&mut self, program: &WaypointProgram) -> Result<Completion, MotionError> {
        self.clear_queue()?;
        for waypoint in &program.waypoints {
            let (velocity, acceleration) = program.params_for(waypoint);
            self.enqueue(&MotionCommand::Params {
                velocity,
                acceleration,
            })?;
            if let Some(enabled) = waypoint.effector.enabled() {
                self.enqueue(&MotionCommand::Effector {
                    tool: program.tool,
                    enabled,
                })?;
            }
            self.enqueue(&MotionCommand::Move {
                mode: program.move_mode,
                pose: waypoint.pose,
            })?;
            if waypoint.dwell_ms > 0 {
                self.enqueue(&MotionCommand::Dwell {
                    duration: waypoint.dwell(),
                })?;
            }
        }
        self.start_execution()?;
        self.await_last()
    }

    fn cancelled(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.load(Ordering::SeqCst))
    }
}
