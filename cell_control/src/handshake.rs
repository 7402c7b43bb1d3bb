//! Request/read/release exchange with the line controller's inspection
//! routine.
//!
//! The line controller only latches a fresh result while the request line
//! is high, so every exchange is: (optionally) a priming pulse, request ON,
//! settle, read the result bit, request OFF. The request line is released
//! on every exit path through [`RequestLine`].

use crate::signal::BitChannel;
use cell_common::address::SignalAddress;
use cell_common::line::TransportError;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

// ─── Configuration ──────────────────────────────────────────────────

/// Handshake timing as written in `[handshake]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandshakeConfig {
    /// Request line.
    #[serde(default = "default_request")]
    pub request: SignalAddress,
    /// Priming pulses before the measured request (0 or 1).
    #[serde(default = "default_prime_pulses")]
    pub prime_pulses: u8,
    /// Time the request line stays ON before the result is read.
    #[serde(default = "default_settle_ms")]
    pub settle_on_ms: u64,
    /// Time the request line stays OFF after a priming pulse.
    #[serde(default = "default_settle_ms")]
    pub settle_off_ms: u64,
}

fn default_request() -> SignalAddress {
    SignalAddress::new(cell_common::address::DeviceCode::Y, 0x1E)
}

fn default_prime_pulses() -> u8 {
    1
}

fn default_settle_ms() -> u64 {
    500
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            request: default_request(),
            prime_pulses: default_prime_pulses(),
            settle_on_ms: default_settle_ms(),
            settle_off_ms: default_settle_ms(),
        }
    }
}

/// Shortest settle time the inspection routine latches reliably within.
pub const MIN_SETTLE_MS: u64 = 100;

impl HandshakeConfig {
    pub fn settle_on(&self) -> Duration {
        Duration::from_millis(self.settle_on_ms)
    }

    pub fn settle_off(&self) -> Duration {
        Duration::from_millis(self.settle_off_ms)
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Step of the exchange that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Prime,
    Request,
    Read,
    Release,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prime => "prime",
            Self::Request => "request",
            Self::Read => "read",
            Self::Release => "release",
        };
        f.write_str(name)
    }
}

/// A handshake exchange failed.
#[derive(Debug, Clone, Error)]
#[error("Handshake {phase} failed at {address}: {source}")]
pub struct HandshakeError {
    pub phase: HandshakePhase,
    pub address: SignalAddress,
    #[source]
    pub source: TransportError,
}

impl HandshakeError {
    fn new(phase: HandshakePhase, address: SignalAddress, source: TransportError) -> Self {
        Self {
            phase,
            address,
            source,
        }
    }
}

// ─── Results ────────────────────────────────────────────────────────

/// Outcome of one exchange, tied to the job that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub job: String,
    pub address: SignalAddress,
    pub value: bool,
}

// ─── Request line guard ─────────────────────────────────────────────

/// Request line held ON. Dropping it without [`RequestLine::release`]
/// writes OFF best effort.
struct RequestLine<'a> {
    channel: &'a BitChannel,
    armed: bool,
}

impl<'a> RequestLine<'a> {
    fn assert(channel: &'a BitChannel, phase: HandshakePhase) -> Result<Self, HandshakeError> {
        // Armed before the write: a failed ON write may still have landed.
        let line = Self {
            channel,
            armed: true,
        };
        channel
            .write(true)
            .map_err(|e| HandshakeError::new(phase, channel.address(), e))?;
        Ok(line)
    }

    fn release(mut self) -> Result<(), HandshakeError> {
        self.channel
            .write(false)
            .map_err(|e| HandshakeError::new(HandshakePhase::Release, self.channel.address(), e))?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for RequestLine<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.channel.write(false) {
                warn!(address = %self.channel.address(), "Failed to release request line: {e}");
            }
        }
    }
}

// ─── Protocol ───────────────────────────────────────────────────────

/// Two-phase request/read/release exchange over one request line.
pub struct HandshakeProtocol {
    request: BitChannel,
    prime_pulses: u8,
    settle_on: Duration,
    settle_off: Duration,
}

impl HandshakeProtocol {
    pub fn new(request: BitChannel, config: &HandshakeConfig) -> Self {
        Self {
            request,
            prime_pulses: config.prime_pulses,
            settle_on: config.settle_on(),
            settle_off: config.settle_off(),
        }
    }

    /// Request line this protocol drives.
    pub fn request_address(&self) -> SignalAddress {
        self.request.address()
    }

    /// Run one exchange for `job` and read `result`.
    ///
    /// # Errors
    ///
    /// Any read or write failure, tagged with the phase and address. The
    /// request line has been released (best effort) when this returns.
    pub fn request_and_read(
        &self,
        job: &str,
        result: &BitChannel,
    ) -> Result<ClassificationResult, HandshakeError> {
        for _ in 0..self.prime_pulses {
            let line = RequestLine::assert(&self.request, HandshakePhase::Prime)?;
            std::thread::sleep(self.settle_on);
            line.release()?;
            std::thread::sleep(self.settle_off);
        }

        let line = RequestLine::assert(&self.request, HandshakePhase::Request)?;
        std::thread::sleep(self.settle_on);
        let value = result
            .read()
            .map_err(|e| HandshakeError::new(HandshakePhase::Read, result.address(), e))?;
        line.release()?;

        debug!(job, address = %result.address(), value, "Handshake result");
        Ok(ClassificationResult {
            job: job.to_string(),
            address: result.address(),
            value,
        })
    }

    /// Force the request line OFF.
    pub fn release(&self) -> Result<(), HandshakeError> {
        self.request.write(false).map_err(|e| {
            HandshakeError::new(HandshakePhase::Release, self.request.address(), e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::LineLink;
    use cell_common::line::Endpoint;
    use cell_hal::drivers::simulation::{InspectionReaction, SimLineController, SimLineHandle};

    fn addr(s: &str) -> SignalAddress {
        SignalAddress::parse(s).unwrap()
    }

    fn setup(prime_pulses: u8) -> (HandshakeProtocol, BitChannel, SimLineHandle) {
        let sim = SimLineController::new();
        let handle = sim.handle();
        let link = LineLink::new(
            Box::new(sim),
            Endpoint {
                host: "sim".into(),
                port: 5052,
            },
        );
        link.connect().unwrap();
        let config = HandshakeConfig {
            prime_pulses,
            settle_on_ms: 0,
            settle_off_ms: 0,
            ..HandshakeConfig::default()
        };
        let request = BitChannel::new(&link, config.request).unwrap();
        let result = BitChannel::new(&link, addr("X0E")).unwrap();
        (HandshakeProtocol::new(request, &config), result, handle)
    }

    #[test]
    fn defaults_match_inspection_routine() {
        let config = HandshakeConfig::default();
        assert_eq!(config.request, addr("Y1E"));
        assert_eq!(config.prime_pulses, 1);
        assert_eq!(config.settle_on(), Duration::from_millis(500));
        assert_eq!(config.settle_off(), Duration::from_millis(500));
    }

    #[test]
    fn reads_latched_result_and_releases() {
        let (protocol, result, handle) = setup(1);
        handle.add_reaction(
            InspectionReaction::new(addr("Y1E"), vec![]).respond(&[], &[(addr("X0E"), true)]),
        );

        let outcome = protocol.request_and_read("check_tray", &result).unwrap();
        assert!(outcome.value);
        assert_eq!(outcome.job, "check_tray");
        assert_eq!(outcome.address, addr("X0E"));
        assert_eq!(handle.writes_to(addr("Y1E")), vec![true, false, true, false]);
        assert!(!handle.bit(addr("Y1E")));
    }

    #[test]
    fn priming_can_be_disabled() {
        let (protocol, result, handle) = setup(0);
        protocol.request_and_read("check_tray", &result).unwrap();
        assert_eq!(handle.writes_to(addr("Y1E")), vec![true, false]);
    }

    #[test]
    fn failed_read_still_releases_request_line() {
        let (protocol, result, handle) = setup(1);
        handle.fail_read(addr("X0E"), 0);

        let err = protocol.request_and_read("check_tray", &result).unwrap_err();
        assert_eq!(err.phase, HandshakePhase::Read);
        assert_eq!(err.address, addr("X0E"));
        assert!(!handle.bit(addr("Y1E")));
        assert_eq!(handle.writes_to(addr("Y1E")).last(), Some(&false));
    }

    #[test]
    fn failed_release_is_retried_on_drop() {
        let (protocol, result, handle) = setup(0);
        // Second write to Y1E is the release.
        handle.fail_write(addr("Y1E"), 1);

        let err = protocol.request_and_read("check_tray", &result).unwrap_err();
        assert_eq!(err.phase, HandshakePhase::Release);
        assert!(!handle.bit(addr("Y1E")));
    }

    #[test]
    fn explicit_release_clears_line() {
        let (protocol, _, handle) = setup(0);
        handle.set_bit(addr("Y1E"), true);
        protocol.release().unwrap();
        assert!(!handle.bit(addr("Y1E")));
    }
}
