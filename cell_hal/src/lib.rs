//! # Cell HAL Library
//!
//! Driver side of the cell: a registry of line controller transports and
//! manipulator drivers, plus the built-in simulation drivers.
//!
//! Drivers implement `LineTransport` and `MotionDriver` from `cell_common`.
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Driver implementations

pub mod driver_registry;
pub mod drivers;

pub use crate::driver_registry::{DriverError, DriverRegistry};
