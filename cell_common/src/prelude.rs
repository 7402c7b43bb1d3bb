//! Prelude module for common re-exports.
//!
//! ```rust
//! use cell_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── Line Controller ────────────────────────────────────────────────
pub use crate::address::{DeviceCode, SignalAddress};
pub use crate::line::{Endpoint, LineTransport, TransportError};

// ─── Manipulator ────────────────────────────────────────────────────
pub use crate::motion::{
    EffectorState, EffectorTool, MotionCommand, MotionDriver, MotionError, MoveMode, Pose,
    QueueIndex,
};
pub use crate::waypoint::{Waypoint, WaypointFile, WaypointProgram, WaypointSource};
