//! Simulated manipulator with a firmware-style command queue.
//!
//! Indices are assigned from a counter that never resets, the way the
//! firmware does it. Queue consumption happens lazily: each poll of
//! `current_completed_index()` while the queue is executing advances the
//! simulation according to the configured [`CompletionModel`].

use cell_common::motion::{
    EffectorTool, MotionCommand, MotionDriver, MotionError, Pose, QueueIndex,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// How the simulated firmware works through its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionModel {
    /// Execute up to N commands per poll.
    PerPoll(usize),
    /// Execute the whole queue on the Nth poll after `start_queue()`.
    AfterPolls(usize),
    /// Never execute anything (stalled axis).
    Stalled,
}

impl Default for CompletionModel {
    fn default() -> Self {
        Self::PerPoll(1)
    }
}

#[derive(Debug)]
struct SimManipulatorState {
    connected: bool,
    executing: bool,
    next_index: u64,
    completed: QueueIndex,
    queue: VecDeque<(QueueIndex, MotionCommand)>,
    model: CompletionModel,
    polls: usize,
    polls_since_start: usize,
    pose: Pose,
    tools: HashMap<EffectorTool, bool>,
    executed: Vec<MotionCommand>,
    clears: usize,
}

impl Default for SimManipulatorState {
    fn default() -> Self {
        Self {
            connected: false,
            executing: false,
            next_index: 1,
            completed: QueueIndex(0),
            queue: VecDeque::new(),
            model: CompletionModel::default(),
            polls: 0,
            polls_since_start: 0,
            pose: Pose::default(),
            tools: HashMap::new(),
            executed: Vec::new(),
            clears: 0,
        }
    }
}

impl SimManipulatorState {
    fn ensure_connected(&self) -> Result<(), MotionError> {
        if self.connected {
            Ok(())
        } else {
            Err(MotionError::NotConnected)
        }
    }

    fn execute_next(&mut self) -> bool {
        let Some((index, command)) = self.queue.pop_front() else {
            return false;
        };
        match &command {
            MotionCommand::Move { pose, .. } => self.pose = *pose,
            MotionCommand::Effector { tool, enabled } => {
                self.tools.insert(*tool, *enabled);
            }
            MotionCommand::Params { .. } | MotionCommand::Dwell { .. } => {}
        }
        debug!("Simulated manipulator executed {} {}", index, command);
        self.completed = index;
        self.executed.push(command);
        true
    }

    fn advance(&mut self) {
        if !self.executing {
            return;
        }
        self.polls_since_start += 1;
        match self.model {
            CompletionModel::PerPoll(n) => {
                for _ in 0..n {
                    if !self.execute_next() {
                        break;
                    }
                }
            }
            CompletionModel::AfterPolls(n) => {
                if self.polls_since_start >= n {
                    while self.execute_next() {}
                }
            }
            CompletionModel::Stalled => {}
        }
    }
}

/// Cloneable handle for scripting and inspecting a [`SimManipulator`].
#[derive(Debug, Clone, Default)]
pub struct SimManipulatorHandle {
    state: Arc<Mutex<SimManipulatorState>>,
}

impl SimManipulatorHandle {
    /// Change how the queue is consumed.
    pub fn set_model(&self, model: CompletionModel) {
        self.state.lock().model = model;
    }

    /// Total calls to `current_completed_index()`.
    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    /// Commands still waiting in the queue.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Commands executed so far, in order.
    pub fn executed(&self) -> Vec<MotionCommand> {
        self.state.lock().executed.clone()
    }

    /// Whether the queue is currently being consumed.
    pub fn is_executing(&self) -> bool {
        self.state.lock().executing
    }

    /// Whether the serial link is open.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Last completed index.
    pub fn completed(&self) -> QueueIndex {
        self.state.lock().completed
    }

    /// Current simulated pose.
    pub fn pose(&self) -> Pose {
        self.state.lock().pose
    }

    /// Last commanded state of a tool.
    pub fn tool(&self, tool: EffectorTool) -> Option<bool> {
        self.state.lock().tools.get(&tool).copied()
    }

    /// Number of `clear_queue()` calls.
    pub fn clears(&self) -> usize {
        self.state.lock().clears
    }
}

/// Simulated manipulator implementing [`MotionDriver`].
#[derive(Debug, Default)]
pub struct SimManipulator {
    handle: SimManipulatorHandle,
}

impl SimManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle sharing this manipulator's state.
    pub fn handle(&self) -> SimManipulatorHandle {
        self.handle.clone()
    }
}

impl MotionDriver for SimManipulator {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn connect(&mut self, port: &str, baud: u32) -> Result<(), MotionError> {
        self.handle.state.lock().connected = true;
        info!("Simulated manipulator connected on {} @ {} baud", port, baud);
        Ok(())
    }

    fn enqueue(&mut self, command: &MotionCommand) -> Result<QueueIndex, MotionError> {
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;
        let index = QueueIndex(state.next_index);
        state.next_index += 1;
        state.queue.push_back((index, command.clone()));
        Ok(index)
    }

    fn current_completed_index(&mut self) -> Result<QueueIndex, MotionError> {
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;
        state.polls += 1;
        state.advance();
        Ok(state.completed)
    }

    fn start_queue(&mut self) -> Result<(), MotionError> {
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;
        state.executing = true;
        state.polls_since_start = 0;
        Ok(())
    }

    fn stop_queue(&mut self) -> Result<(), MotionError> {
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;
        state.executing = false;
        Ok(())
    }

    fn clear_queue(&mut self) -> Result<(), MotionError> {
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;
        state.queue.clear();
        state.clears += 1;
        Ok(())
    }

    fn current_pose(&mut self) -> Result<Pose, MotionError> {
        let state = self.handle.state.lock();
        state.ensure_connected()?;
        Ok(state.pose)
    }

    fn disconnect(&mut self) {
        let mut state = self.handle.state.lock();
        if state.connected {
            debug!("Simulated manipulator disconnected");
        }
        state.connected = false;
        state.executing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_common::motion::MoveMode;

    fn connected() -> (SimManipulator, SimManipulatorHandle) {
        let mut sim = SimManipulator::new();
        let handle = sim.handle();
        sim.connect("SIM0", 115_200).unwrap();
        (sim, handle)
    }

    fn move_to(x: f64) -> MotionCommand {
        MotionCommand::Move {
            mode: MoveMode::Linear,
            pose: Pose::new(x, 0.0, 0.0, 0.0),
        }
    }

    #[test]
    fn indices_are_monotonic_across_clears() {
        let (mut sim, _) = connected();
        assert_eq!(sim.enqueue(&move_to(1.0)).unwrap(), QueueIndex(1));
        sim.clear_queue().unwrap();
        assert_eq!(sim.enqueue(&move_to(2.0)).unwrap(), QueueIndex(2));
    }

    #[test]
    fn nothing_executes_before_start() {
        let (mut sim, handle) = connected();
        sim.enqueue(&move_to(1.0)).unwrap();
        assert_eq!(sim.current_completed_index().unwrap(), QueueIndex(0));
        assert_eq!(handle.pending(), 1);
    }

    #[test]
    fn per_poll_model_executes_in_order() {
        let (mut sim, handle) = connected();
        sim.enqueue(&move_to(1.0)).unwrap();
        sim.enqueue(&move_to(2.0)).unwrap();
        sim.start_queue().unwrap();

        assert_eq!(sim.current_completed_index().unwrap(), QueueIndex(1));
        assert_eq!(handle.pose().x, 1.0);
        assert_eq!(sim.current_completed_index().unwrap(), QueueIndex(2));
        assert_eq!(sim.current_pose().unwrap().x, 2.0);
    }

    #[test]
    fn after_polls_model_completes_on_nth_poll() {
        let (mut sim, handle) = connected();
        handle.set_model(CompletionModel::AfterPolls(2));
        sim.enqueue(&move_to(1.0)).unwrap();
        sim.start_queue().unwrap();

        assert_eq!(sim.current_completed_index().unwrap(), QueueIndex(0));
        assert_eq!(sim.current_completed_index().unwrap(), QueueIndex(1));
        assert_eq!(handle.polls(), 2);
    }

    #[test]
    fn effector_commands_update_tools() {
        let (mut sim, handle) = connected();
        sim.enqueue(&MotionCommand::Effector {
            tool: EffectorTool::Gripper,
            enabled: true,
        })
        .unwrap();
        sim.start_queue().unwrap();
        sim.current_completed_index().unwrap();
        assert_eq!(handle.tool(EffectorTool::Gripper), Some(true));
        assert_eq!(handle.tool(EffectorTool::SuctionCup), None);
    }

    #[test]
    fn disconnected_driver_rejects_commands() {
        let mut sim = SimManipulator::new();
        assert_eq!(sim.enqueue(&move_to(1.0)), Err(MotionError::NotConnected));
    }
}
