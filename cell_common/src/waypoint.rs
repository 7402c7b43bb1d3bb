//! Waypoint programs for the manipulator.
//!
//! A program is an ordered, finite list of waypoints plus the defaults used
//! when a waypoint does not carry its own velocity/acceleration. Programs
//! are supplied either in memory or from a TOML file; both are exposed
//! through [`WaypointSource`], which can be loaded any number of times.
//!
//! # TOML Example
//!
//! ```toml
//! name = "orange_to_bin"
//! tool = "suction_cup"
//! velocity = 50.0
//! acceleration = 50.0
//!
//! [[waypoints]]
//! pose = { x = 101.3, y = -114.6, z = 12.2, r = -48.5 }
//!
//! [[waypoints]]
//! pose = { x = 125.7, y = -142.2, z = 47.3, r = -48.5 }
//! velocity = 20.0
//! effector = "on"
//! dwell_ms = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ConfigError, ConfigLoader};
use crate::motion::{EffectorState, EffectorTool, MoveMode, Pose};

/// Default point-to-point velocity (percent of maximum).
pub const DEFAULT_VELOCITY: f64 = 50.0;

/// Default point-to-point acceleration (percent of maximum).
pub const DEFAULT_ACCELERATION: f64 = 50.0;

fn default_velocity() -> f64 {
    DEFAULT_VELOCITY
}

fn default_acceleration() -> f64 {
    DEFAULT_ACCELERATION
}

/// One taught position with its motion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Waypoint {
    /// Target pose.
    pub pose: Pose,
    /// Per-point velocity; absent or zero uses the program default.
    #[serde(default)]
    pub velocity: Option<f64>,
    /// Per-point acceleration; absent or zero uses the program default.
    #[serde(default)]
    pub acceleration: Option<f64>,
    /// End-effector state applied before the move.
    #[serde(default)]
    pub effector: EffectorState,
    /// Firmware-side wait after arriving.
    #[serde(default)]
    pub dwell_ms: u64,
}

impl Waypoint {
    /// Waypoint at `pose` using program defaults and no effector change.
    pub fn at(pose: Pose) -> Self {
        Self {
            pose,
            velocity: None,
            acceleration: None,
            effector: EffectorState::Hold,
            dwell_ms: 0,
        }
    }

    /// Dwell as a duration.
    #[inline]
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

/// Ordered list of waypoints with program-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaypointProgram {
    /// Program name used in logs.
    pub name: String,
    /// Tool driven by `effector` states.
    #[serde(default)]
    pub tool: EffectorTool,
    /// Interpolation used for every move.
    #[serde(default)]
    pub move_mode: MoveMode,
    /// Velocity applied where a waypoint has none.
    #[serde(default = "default_velocity")]
    pub velocity: f64,
    /// Acceleration applied where a waypoint has none.
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    /// Waypoints in execution order.
    pub waypoints: Vec<Waypoint>,
}

impl WaypointProgram {
    /// Program with default parameters.
    pub fn new(name: impl Into<String>, waypoints: Vec<Waypoint>) -> Self {
        Self {
            name: name.into(),
            tool: EffectorTool::default(),
            move_mode: MoveMode::default(),
            velocity: DEFAULT_VELOCITY,
            acceleration: DEFAULT_ACCELERATION,
            waypoints,
        }
    }

    /// Effective `(velocity, acceleration)` for a waypoint.
    ///
    /// Zero on the firmware means "no motion", so zero falls back to the
    /// program default exactly like an absent value.
    pub fn params_for(&self, waypoint: &Waypoint) -> (f64, f64) {
        let pick = |value: Option<f64>, fallback: f64| match value {
            Some(v) if v > 0.0 => v,
            _ => fallback,
        };
        (
            pick(waypoint.velocity, self.velocity),
            pick(waypoint.acceleration, self.acceleration),
        )
    }

    /// Validate the program.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the name is empty or there are no waypoints
    /// - a default velocity/acceleration is not a positive finite number
    /// - a pose coordinate is not finite
    /// - a per-point velocity/acceleration is negative or not finite
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("program name cannot be empty"));
        }
        if self.waypoints.is_empty() {
            return Err(ConfigError::invalid(format!(
                "program {:?} has no waypoints",
                self.name
            )));
        }
        for (label, value) in [("velocity", self.velocity), ("acceleration", self.acceleration)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(format!(
                    "program {:?}: default {label} must be > 0 (got {value})",
                    self.name
                )));
            }
        }

        for (idx, wp) in self.waypoints.iter().enumerate() {
            if !wp.pose.is_finite() {
                return Err(ConfigError::invalid(format!(
                    "program {:?}: waypoint {} has a non-finite coordinate",
                    self.name,
                    idx + 1
                )));
            }
            for (label, value) in [("velocity", wp.velocity), ("acceleration", wp.acceleration)] {
                if let Some(v) = value {
                    if !v.is_finite() || v < 0.0 {
                        return Err(ConfigError::invalid(format!(
                            "program {:?}: waypoint {} {label} must be >= 0 (got {v})",
                            self.name,
                            idx + 1
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Restartable supplier of a waypoint program.
pub trait WaypointSource: Send {
    /// Name used in logs.
    fn describe(&self) -> String;

    /// Produce the program from the beginning. May be called once per cycle.
    fn load(&self) -> Result<WaypointProgram, ConfigError>;
}

impl WaypointSource for WaypointProgram {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn load(&self) -> Result<WaypointProgram, ConfigError> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Program stored in a TOML file, re-read on every load.
#[derive(Debug, Clone)]
pub struct WaypointFile {
    path: PathBuf,
}

impl WaypointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WaypointSource for WaypointFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<WaypointProgram, ConfigError> {
        let program = <WaypointProgram as ConfigLoader>::load(&self.path)?;
        program.validate()?;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(waypoints: Vec<Waypoint>) -> WaypointProgram {
        WaypointProgram::new("test", waypoints)
    }

    #[test]
    fn params_fall_back_on_absent_or_zero() {
        let prog = program(vec![]);
        let mut wp = Waypoint::at(Pose::default());
        assert_eq!(prog.params_for(&wp), (50.0, 50.0));

        wp.velocity = Some(0.0);
        wp.acceleration = Some(12.0);
        assert_eq!(prog.params_for(&wp), (50.0, 12.0));
    }

    #[test]
    fn validate_rejects_empty_program() {
        assert!(matches!(
            program(vec![]).validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn validate_rejects_negative_velocity() {
        let mut wp = Waypoint::at(Pose::default());
        wp.velocity = Some(-1.0);
        assert!(program(vec![wp]).validate().is_err());
    }

    #[test]
    fn validate_rejects_nan_pose() {
        let wp = Waypoint::at(Pose::new(f64::NAN, 0.0, 0.0, 0.0));
        assert!(program(vec![wp]).validate().is_err());
    }

    #[test]
    fn parses_toml_program() {
        let text = r#"
name = "pick"
tool = "gripper"

[[waypoints]]
pose = { x = 166.5, y = -8.7, z = -50.4, r = 37.9 }
velocity = 15.0
acceleration = 15.0
dwell_ms = 300

[[waypoints]]
pose = { x = 140.8, y = 99.2, z = 11.3, r = 76.1 }
effector = "on"
"#;
        let prog = WaypointProgram::from_toml_str(text).unwrap();
        prog.validate().unwrap();
        assert_eq!(prog.tool, EffectorTool::Gripper);
        assert_eq!(prog.waypoints.len(), 2);
        assert_eq!(prog.waypoints[0].effector, EffectorState::Off);
        assert_eq!(prog.waypoints[0].dwell(), Duration::from_millis(300));
        assert_eq!(prog.waypoints[1].effector, EffectorState::On);
        assert_eq!(prog.params_for(&prog.waypoints[1]), (50.0, 50.0));
    }

    #[test]
    fn source_is_restartable() {
        let prog = program(vec![Waypoint::at(Pose::new(1.0, 2.0, 3.0, 4.0))]);
        let first = prog.load().unwrap();
        let second = prog.load().unwrap();
        assert_eq!(first, second);
    }
}
