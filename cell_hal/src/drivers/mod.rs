//! Driver implementations.
//!
//! - [`simulation`] - In-memory line controller and manipulator for development and testing
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `LineTransport` and/or `MotionDriver` from `cell_common`
//! 3. Register the factories in [`register_all_drivers`]

pub mod simulation;

use crate::driver_registry::DriverRegistry;

/// Register all built-in drivers.
pub fn register_all_drivers(registry: &mut DriverRegistry) {
    registry.register_line("simulation", simulation::create_line_driver);
    registry.register_motion("simulation", simulation::create_motion_driver);
}
