//! Driver registry for line controller transports and manipulator drivers.
//!
//! Provides a `DriverRegistry` struct for registering and retrieving driver
//! factories. This uses constructor-injection rather than global state.

use cell_common::line::LineTransport;
use cell_common::motion::MotionDriver;
use std::collections::HashMap;
use thiserror::Error;

/// Factory function type for creating line transport instances.
pub type LineDriverFactory = fn() -> Box<dyn LineTransport>;

/// Factory function type for creating manipulator driver instances.
pub type MotionDriverFactory = fn() -> Box<dyn MotionDriver>;

/// Error types for driver lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// No line transport registered under this name.
    #[error("Line driver not found: {0}")]
    LineDriverNotFound(String),

    /// No manipulator driver registered under this name.
    #[error("Motion driver not found: {0}")]
    MotionDriverNotFound(String),
}

/// Registry of available drivers.
///
/// Constructed at startup, populated via `register_*()`, and consulted
/// once per station when the cell is built.
pub struct DriverRegistry {
    line: HashMap<&'static str, LineDriverFactory>,
    motion: HashMap<&'static str, MotionDriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            line: HashMap::new(),
            motion: HashMap::new(),
        }
    }

    /// Create a registry holding every built-in driver.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        crate::drivers::register_all_drivers(&mut reg);
        reg
    }

    /// Register a line transport factory.
    ///
    /// # Panics
    /// Panics if a line driver with the same name is already registered.
    pub fn register_line(&mut self, name: &'static str, factory: LineDriverFactory) {
        if self.line.insert(name, factory).is_some() {
            panic!("Line driver '{name}' is already registered");
        }
    }

    /// Register a manipulator driver factory.
    ///
    /// # Panics
    /// Panics if a motion driver with the same name is already registered.
    pub fn register_motion(&mut self, name: &'static str, factory: MotionDriverFactory) {
        if self.motion.insert(name, factory).is_some() {
            panic!("Motion driver '{name}' is already registered");
        }
    }

    /// Create a line transport by name.
    ///
    /// # Errors
    /// Returns `DriverError::LineDriverNotFound` if no such driver is registered.
    pub fn create_line(&self, name: &str) -> Result<Box<dyn LineTransport>, DriverError> {
        let factory = self
            .line
            .get(name)
            .ok_or_else(|| DriverError::LineDriverNotFound(name.to_string()))?;
        Ok(factory())
    }

    /// Create a manipulator driver by name.
    ///
    /// # Errors
    /// Returns `DriverError::MotionDriverNotFound` if no such driver is registered.
    pub fn create_motion(&self, name: &str) -> Result<Box<dyn MotionDriver>, DriverError> {
        let factory = self
            .motion
            .get(name)
            .ok_or_else(|| DriverError::MotionDriverNotFound(name.to_string()))?;
        Ok(factory())
    }

    /// List registered line transport names, sorted.
    pub fn line_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.line.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// List registered manipulator driver names, sorted.
    pub fn motion_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.motion.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::{SimLineController, SimManipulator};

    fn line_factory() -> Box<dyn LineTransport> {
        Box::new(SimLineController::new())
    }

    fn motion_factory() -> Box<dyn MotionDriver> {
        Box::new(SimManipulator::new())
    }

    #[test]
    fn registry_register_and_create() {
        let mut reg = DriverRegistry::new();
        reg.register_line("test_line", line_factory);
        reg.register_motion("test_motion", motion_factory);

        assert_eq!(reg.create_line("test_line").unwrap().name(), "simulation");
        assert_eq!(reg.create_motion("test_motion").unwrap().name(), "simulation");
    }

    #[test]
    fn registry_driver_not_found() {
        let reg = DriverRegistry::new();
        assert!(matches!(
            reg.create_line("mc3e"),
            Err(DriverError::LineDriverNotFound(_))
        ));
        assert!(matches!(
            reg.create_motion("dobot"),
            Err(DriverError::MotionDriverNotFound(_))
        ));
    }

    #[test]
    fn builtin_registry_has_simulation() {
        let reg = DriverRegistry::with_builtin();
        assert_eq!(reg.line_drivers(), vec!["simulation"]);
        assert_eq!(reg.motion_drivers(), vec!["simulation"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = DriverRegistry::new();
        reg.register_line("dup", line_factory);
        reg.register_line("dup", line_factory);
    }
}
