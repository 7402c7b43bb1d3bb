//! Cell Control Library
//!
//! Synchronizes a line controller with one or more queued-motion
//! manipulators: start detection, job routing over a request/read
//! handshake, program execution with bounded completion waits, and done
//! signaling.
//!
//! # Module Structure
//!
//! - [`signal`] - Shared line link and typed bit/word channels
//! - [`handshake`] - Request line priming, settle and release
//! - [`router`] - Job table walk and outcome flags
//! - [`motion_queue`] - Firmware queue submission and completion waits
//! - [`coordinator`] - Per-station cycle state machine
//! - [`cell`] - Supervisor owning the link and every station
//! - [`config`] - `cell.toml` schema and validation
//! - [`error`] - Routing, cycle and supervisor errors
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Cell                                  │
//! │  ┌──────────────────┐     ┌──────────────────────────────┐    │
//! │  │ CycleCoordinator │ ... │ CycleCoordinator             │    │
//! │  │  JobRouter       │     │  MotionQueue + programs      │    │
//! │  └────────┬─────────┘     └──────────────┬───────────────┘    │
//! │           └────────────┬─────────────────┘                    │
//! │                        ▼                                      │
//! │                 LineLink (shared)                             │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod cell;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handshake;
pub mod motion_queue;
pub mod router;
pub mod signal;

pub use crate::cell::Cell;
pub use crate::config::CellConfig;
pub use crate::coordinator::{CycleCoordinator, CyclePhase, TickReport};
pub use crate::error::{CellError, CycleError, RouterError};
pub use crate::router::JobRouter;
pub use crate::router::table::CycleOutcome;
pub use crate::signal::{BitChannel, LineLink, WordChannel};
