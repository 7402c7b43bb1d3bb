//! Cell Common Library
//!
//! Shared types for the cell workspace: line controller addresses, the two
//! collaborator driver traits, waypoint programs and configuration loading.
//!
//! # Module Structure
//!
//! - [`address`] - Line controller device addresses
//! - [`line`] - Line controller transport trait and errors
//! - [`motion`] - Manipulator driver trait, queued commands and errors
//! - [`waypoint`] - Waypoint programs and sources
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience

pub mod address;
pub mod config;
pub mod line;
pub mod motion;
pub mod prelude;
pub mod waypoint;
