//! Manipulator driver trait, queued command types and error types.
//!
//! The manipulator executes commands from an internal firmware queue. Each
//! queued command is assigned a monotonically increasing [`QueueIndex`];
//! the firmware reports the index of the last fully executed command. The
//! driver trait exposes exactly that and nothing about the SDK's encoding.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error types for manipulator operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MotionError {
    /// An operation was attempted before `connect()` succeeded.
    #[error("Manipulator not connected")]
    NotConnected,

    /// Connection establishment failed.
    #[error("Connect to manipulator on {port} failed: {reason}")]
    ConnectFailed {
        /// Serial port.
        port: String,
        /// Driver-specific reason.
        reason: String,
    },

    /// The firmware rejected a command.
    #[error("Command {command} rejected: {reason}")]
    Command {
        /// Rendered command.
        command: String,
        /// Driver-specific reason.
        reason: String,
    },

    /// The completion index did not reach the target within the bound.
    #[error("Index {index} not completed after {waited:?} (completed: {completed})")]
    Timeout {
        /// Index being waited for.
        index: QueueIndex,
        /// Last completed index observed.
        completed: QueueIndex,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The wait was abandoned because shutdown was requested.
    #[error("Wait for index {index} cancelled")]
    Cancelled {
        /// Index being waited for.
        index: QueueIndex,
    },
}

/// Firmware-assigned sequence number of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueIndex(pub u64);

impl fmt::Display for QueueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cartesian pose of the end effector (X, Y, Z in mm, R in degrees).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, z: f64, r: f64) -> Self {
        Self { x, y, z, r }
    }

    /// Whether all coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.r.is_finite()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X={:.2} Y={:.2} Z={:.2} R={:.2}",
            self.x, self.y, self.z, self.r
        )
    }
}

/// End-effector tool mounted on the manipulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectorTool {
    #[default]
    SuctionCup,
    Gripper,
}

/// Requested end-effector state at a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectorState {
    /// Release / suction off.
    #[default]
    Off,
    /// Grip / suction on.
    On,
    /// Keep whatever state the tool is in; no command is queued.
    Hold,
}

impl EffectorState {
    /// Tool command to queue, if any.
    pub const fn enabled(self) -> Option<bool> {
        match self {
            Self::Off => Some(false),
            Self::On => Some(true),
            Self::Hold => None,
        }
    }
}

/// Point-to-point move interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveMode {
    /// Straight line in Cartesian space.
    #[default]
    Linear,
    /// Joint-interpolated move.
    Joint,
}

/// One command for the manipulator's firmware queue.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionCommand {
    /// Point-to-point velocity/acceleration for subsequent moves (percent).
    Params { velocity: f64, acceleration: f64 },
    /// Switch an end-effector tool.
    Effector { tool: EffectorTool, enabled: bool },
    /// Move to a pose.
    Move { mode: MoveMode, pose: Pose },
    /// Firmware-side wait.
    Dwell { duration: Duration },
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Params {
                velocity,
                acceleration,
            } => write!(f, "params(v={velocity}, a={acceleration})"),
            Self::Effector { tool, enabled } => write!(f, "effector({tool:?}, on={enabled})"),
            Self::Move { mode, pose } => write!(f, "move({mode:?}, {pose})"),
            Self::Dwell { duration } => write!(f, "dwell({}ms)", duration.as_millis()),
        }
    }
}

/// Trait defining the interface for manipulator drivers.
///
/// # Lifecycle
///
/// 1. `connect()` - Called once at startup
/// 2. `clear_queue()` / `enqueue()` / `start_queue()` - Per motion sequence
/// 3. `current_completed_index()` - Polled until the sequence completes
/// 4. `stop_queue()` - After completion, timeout or cancellation
/// 5. `disconnect()` - On shutdown
pub trait MotionDriver: Send {
    /// Returns the driver's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Open the serial link to the manipulator.
    fn connect(&mut self, port: &str, baud: u32) -> Result<(), MotionError>;

    /// Append a command to the firmware queue and return its index.
    fn enqueue(&mut self, command: &MotionCommand) -> Result<QueueIndex, MotionError>;

    /// Index of the last command the firmware has fully executed.
    fn current_completed_index(&mut self) -> Result<QueueIndex, MotionError>;

    /// Let the firmware consume its queue.
    fn start_queue(&mut self) -> Result<(), MotionError>;

    /// Stop queue consumption.
    fn stop_queue(&mut self) -> Result<(), MotionError>;

    /// Discard all pending commands.
    fn clear_queue(&mut self) -> Result<(), MotionError>;

    /// Current end-effector pose.
    fn current_pose(&mut self) -> Result<Pose, MotionError>;

    /// Close the serial link. Disconnecting twice is not an error.
    fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_index_orders_numerically() {
        assert!(QueueIndex(2) > QueueIndex(1));
        assert_eq!(QueueIndex(7).to_string(), "#7");
    }

    #[test]
    fn command_display_names_pose() {
        let cmd = MotionCommand::Move {
            mode: MoveMode::Linear,
            pose: Pose::new(1.0, 2.0, 3.0, 4.0),
        };
        assert_eq!(cmd.to_string(), "move(Linear, X=1.00 Y=2.00 Z=3.00 R=4.00)");
    }

    #[test]
    fn timeout_error_mentions_indices() {
        let err = MotionError::Timeout {
            index: QueueIndex(5),
            completed: QueueIndex(3),
            waited: Duration::from_secs(1),
        };
        let text = err.to_string();
        assert!(text.contains("#5"));
        assert!(text.contains("#3"));
    }
}
