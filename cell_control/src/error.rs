//! Error types for routing, cycles and the cell supervisor.
//!
//! Transport faults are carried through unchanged so the supervisor can
//! tell a lost connection (reconnect, then retry) from a local failure
//! (log, retry on the next start signal).

use crate::handshake::HandshakeError;
use cell_common::address::SignalAddress;
use cell_common::config::ConfigError;
use cell_common::line::TransportError;
use cell_common::motion::MotionError;
use cell_hal::DriverError;
use thiserror::Error;

/// Job routing failed; no outcome flag was written.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("Router signal {address} failed: {source}")]
    Signal {
        address: SignalAddress,
        #[source]
        source: TransportError,
    },

    #[error("Job table walk ended without an outcome")]
    Unterminated,
}

impl RouterError {
    pub fn signal(address: SignalAddress, source: TransportError) -> Self {
        Self::Signal { address, source }
    }

    /// Underlying transport failure, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Handshake(e) => Some(&e.source),
            Self::Signal { source, .. } => Some(source),
            Self::Unterminated => None,
        }
    }
}

/// A station cycle was aborted.
#[derive(Debug, Clone, Error)]
pub enum CycleError {
    #[error("Routing failed: {0}")]
    Routing(#[from] RouterError),

    #[error("Motion failed: {0}")]
    Motion(#[from] MotionError),

    #[error("Program {program} unavailable: {source}")]
    Program {
        program: String,
        #[source]
        source: ConfigError,
    },

    #[error("Station signal {address} failed: {source}")]
    Signal {
        address: SignalAddress,
        #[source]
        source: TransportError,
    },
}

impl CycleError {
    pub fn signal(address: SignalAddress, source: TransportError) -> Self {
        Self::Signal { address, source }
    }

    /// True if the line connection is gone and must be re-established
    /// before the station can continue.
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Self::Routing(e) => e.transport().is_some_and(TransportError::is_connection_fault),
            Self::Signal { source, .. } => source.is_connection_fault(),
            Self::Motion(_) | Self::Program { .. } => false,
        }
    }
}

/// Cell construction or supervision failed.
#[derive(Debug, Error)]
pub enum CellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Manipulator for station {station}: {source}")]
    Motion {
        station: String,
        #[source]
        source: MotionError,
    },

    #[error("Line controller: {0}")]
    Transport(#[from] TransportError),

    #[error("Shutdown requested before the line controller connected")]
    Interrupted,
}
