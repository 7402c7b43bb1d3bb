//! Simulation driver module.
//!
//! Software stand-ins for the line controller and the manipulator, used in
//! `--simulate` mode and by tests. Each driver hands out a cloneable handle
//! so a test can script inputs and inspect outputs while the cell owns the
//! driver itself.

mod line;
mod manipulator;

pub use line::{InspectionReaction, LineEvent, SimLineController, SimLineHandle};
pub use manipulator::{CompletionModel, SimManipulator, SimManipulatorHandle};

use cell_common::line::LineTransport;
use cell_common::motion::MotionDriver;

/// Factory function to create a simulated line controller.
pub fn create_line_driver() -> Box<dyn LineTransport> {
    Box::new(SimLineController::new())
}

/// Factory function to create a simulated manipulator.
pub fn create_motion_driver() -> Box<dyn MotionDriver> {
    Box::new(SimManipulator::new())
}
