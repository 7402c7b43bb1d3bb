//! Line controller transport trait and error types.
//!
//! This module defines:
//! - `LineTransport` trait - Interface for pluggable line controller transports
//! - `TransportError` enum - Error types for transport operations
//! - `Endpoint` - Network location of the line controller
//!
//! The wire encoding of the industrial protocol lives entirely behind the
//! trait. The cell only ever reads and writes bits and words by address.

use crate::address::SignalAddress;
use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for line controller transport operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// An operation was attempted before `connect()` succeeded.
    #[error("Not connected to line controller")]
    NotConnected,

    /// Connection establishment failed.
    #[error("Connect to {endpoint} failed: {reason}")]
    ConnectFailed {
        /// Endpoint that refused the connection.
        endpoint: String,
        /// Transport-specific reason.
        reason: String,
    },

    /// The connection dropped while in use.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A single read or write was rejected.
    #[error("I/O error at {address}: {reason}")]
    Io {
        /// Address of the failed operation.
        address: SignalAddress,
        /// Transport-specific reason.
        reason: String,
    },

    /// Bit access to a word device or word access to a bit device.
    #[error("Address {0} does not support this access width")]
    WrongDeviceKind(SignalAddress),
}

impl TransportError {
    /// Whether recovery requires closing and re-establishing the connection.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectFailed { .. } | Self::ConnectionLost(_)
        )
    }
}

/// Network location of a line controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Trait defining the interface for line controller transports.
///
/// # Lifecycle
///
/// 1. `connect()` - Called once at startup and again after a connection fault
/// 2. `read_bits()` / `write_bits()` / `read_word()` / `write_word()` - Any number of times
/// 3. `close()` - Called on shutdown and before a reconnect
///
/// Every read and write may block for the transport's round-trip time.
pub trait LineTransport: Send {
    /// Returns the transport's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Open the connection to the line controller.
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Whether the transport currently holds a usable connection.
    fn is_connected(&self) -> bool;

    /// Read `count` consecutive bits starting at `address`.
    fn read_bits(
        &mut self,
        address: SignalAddress,
        count: usize,
    ) -> Result<Vec<bool>, TransportError>;

    /// Write consecutive bits starting at `address`.
    fn write_bits(&mut self, address: SignalAddress, values: &[bool]) -> Result<(), TransportError>;

    /// Read one word register.
    fn read_word(&mut self, address: SignalAddress) -> Result<u16, TransportError>;

    /// Write one word register.
    fn write_word(&mut self, address: SignalAddress, value: u16) -> Result<(), TransportError>;

    /// Close the connection. Closing an already broken connection is not an error.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_faults_are_classified() {
        assert!(TransportError::NotConnected.is_connection_fault());
        assert!(TransportError::ConnectionLost("reset".into()).is_connection_fault());
        let io = TransportError::Io {
            address: SignalAddress::parse("X0E").unwrap(),
            reason: "nak".into(),
        };
        assert!(!io.is_connection_fault());
        assert!(io.to_string().contains("X0E"));
    }

    #[test]
    fn endpoint_display() {
        let ep = Endpoint {
            host: "192.168.10.100".into(),
            port: 5052,
        };
        assert_eq!(ep.to_string(), "192.168.10.100:5052");
    }
}
