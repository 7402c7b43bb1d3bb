//! Signal access over the shared line controller connection.
//!
//! [`LineLink`] owns the one transport connection and serializes access to
//! it: every bit or word operation takes the lock for exactly one transport
//! call, so stations sharing a link interleave at operation granularity.
//! [`BitChannel`] and [`WordChannel`] bind a link to one validated address.

use cell_common::address::SignalAddress;
use cell_common::config::ConfigError;
use cell_common::line::{Endpoint, LineTransport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

struct LinkState {
    transport: Box<dyn LineTransport>,
    endpoint: Endpoint,
}

/// Shared, cloneable handle to the line controller connection.
#[derive(Clone)]
pub struct LineLink {
    inner: Arc<Mutex<LinkState>>,
}

impl LineLink {
    pub fn new(transport: Box<dyn LineTransport>, endpoint: Endpoint) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LinkState {
                transport,
                endpoint,
            })),
        }
    }

    /// Endpoint this link connects to.
    pub fn endpoint(&self) -> Endpoint {
        self.inner.lock().endpoint.clone()
    }

    /// Single connection attempt.
    pub fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        let endpoint = state.endpoint.clone();
        state.transport.connect(&endpoint)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().transport.is_connected()
    }

    /// Close and re-open the connection, retrying with a fixed backoff.
    ///
    /// Returns `true` once connected, `false` if `running` dropped first.
    /// If another holder of the link already reconnected, returns at once.
    pub fn reconnect(&self, backoff: Duration, running: &AtomicBool) -> bool {
        loop {
            {
                let mut state = self.inner.lock();
                if state.transport.is_connected() {
                    return true;
                }
                state.transport.close();
                let endpoint = state.endpoint.clone();
                match state.transport.connect(&endpoint) {
                    Ok(()) => {
                        info!(endpoint = %endpoint, "Line controller connected");
                        return true;
                    }
                    Err(e) => {
                        warn!(
                            endpoint = %endpoint,
                            "Line controller connect error: {e}; retrying in {backoff:?}"
                        );
                    }
                }
            }

            if !running.load(Ordering::SeqCst) {
                return false;
            }
            std::thread::sleep(backoff);
            if !running.load(Ordering::SeqCst) {
                return false;
            }
        }
    }

    /// Close the connection. Errors are not reported.
    pub fn close(&self) {
        self.inner.lock().transport.close();
    }

    pub fn read_bit(&self, address: SignalAddress) -> Result<bool, TransportError> {
        let values = self.inner.lock().transport.read_bits(address, 1)?;
        let value = values.first().copied().ok_or_else(|| TransportError::Io {
            address,
            reason: "empty bit read".to_string(),
        })?;
        trace!(%address, value, "read bit");
        Ok(value)
    }

    pub fn write_bit(&self, address: SignalAddress, value: bool) -> Result<(), TransportError> {
        trace!(%address, value, "write bit");
        self.inner.lock().transport.write_bits(address, &[value])
    }

    pub fn read_word(&self, address: SignalAddress) -> Result<u16, TransportError> {
        let value = self.inner.lock().transport.read_word(address)?;
        trace!(%address, value, "read word");
        Ok(value)
    }

    pub fn write_word(&self, address: SignalAddress, value: u16) -> Result<(), TransportError> {
        trace!(%address, value, "write word");
        self.inner.lock().transport.write_word(address, value)
    }
}

/// Typed accessor over one binary signal.
#[derive(Clone)]
pub struct BitChannel {
    link: LineLink,
    address: SignalAddress,
}

impl BitChannel {
    /// Bind `address` on `link`.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if `address` is a word device.
    pub fn new(link: &LineLink, address: SignalAddress) -> Result<Self, ConfigError> {
        if !address.is_bit() {
            return Err(ConfigError::invalid(format!(
                "{address} is a word device, expected a bit"
            )));
        }
        Ok(Self {
            link: link.clone(),
            address,
        })
    }

    #[inline]
    pub fn address(&self) -> SignalAddress {
        self.address
    }

    pub fn read(&self) -> Result<bool, TransportError> {
        self.link.read_bit(self.address)
    }

    pub fn write(&self, value: bool) -> Result<(), TransportError> {
        self.link.write_bit(self.address, value)
    }

    /// Momentary pulse: ON for `on`, then OFF and hold for `off`.
    pub fn pulse(&self, on: Duration, off: Duration) -> Result<(), TransportError> {
        self.write(true)?;
        debug!(address = %self.address, "pulse ON for {on:?}");
        std::thread::sleep(on);
        if let Err(e) = self.write(false) {
            warn!(address = %self.address, "pulse OFF failed: {e}; retrying once");
            if let Err(retry) = self.write(false) {
                warn!(address = %self.address, "pulse OFF retry failed: {retry}");
            }
            return Err(e);
        }
        if !off.is_zero() {
            std::thread::sleep(off);
        }
        Ok(())
    }

    /// Pulse only if the bit currently reads OFF. Returns whether it pulsed.
    pub fn pulse_if_clear(&self, on: Duration, off: Duration) -> Result<bool, TransportError> {
        if self.read()? {
            return Ok(false);
        }
        self.pulse(on, off)?;
        Ok(true)
    }
}

/// Typed accessor over one word register.
#[derive(Clone)]
pub struct WordChannel {
    link: LineLink,
    address: SignalAddress,
}

impl WordChannel {
    /// Bind `address` on `link`.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if `address` is a bit device.
    pub fn new(link: &LineLink, address: SignalAddress) -> Result<Self, ConfigError> {
        if !address.is_word() {
            return Err(ConfigError::invalid(format!(
                "{address} is a bit device, expected a word register"
            )));
        }
        Ok(Self {
            link: link.clone(),
            address,
        })
    }

    #[inline]
    pub fn address(&self) -> SignalAddress {
        self.address
    }

    pub fn read(&self) -> Result<u16, TransportError> {
        self.link.read_word(self.address)
    }

    pub fn write(&self, value: u16) -> Result<(), TransportError> {
        self.link.write_word(self.address, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_hal::drivers::simulation::{SimLineController, SimLineHandle};

    fn addr(s: &str) -> SignalAddress {
        SignalAddress::parse(s).unwrap()
    }

    fn link() -> (LineLink, SimLineHandle) {
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
        (link, handle)
    }

    #[test]
    fn channel_kinds_are_checked() {
        let (link, _) = link();
        assert!(BitChannel::new(&link, addr("D100")).is_err());
        assert!(WordChannel::new(&link, addr("M100")).is_err());
        assert!(BitChannel::new(&link, addr("M100")).is_ok());
        assert!(WordChannel::new(&link, addr("D100")).is_ok());
    }

    #[test]
    fn bit_channel_reads_and_writes() {
        let (link, handle) = link();
        let ch = BitChannel::new(&link, addr("M101")).unwrap();
        ch.write(true).unwrap();
        assert!(handle.bit(addr("M101")));
        assert!(ch.read().unwrap());
    }

    #[test]
    fn pulse_ends_off() {
        let (link, handle) = link();
        let ch = BitChannel::new(&link, addr("M102")).unwrap();
        ch.pulse(Duration::ZERO, Duration::ZERO).unwrap();
        assert_eq!(handle.writes_to(addr("M102")), vec![true, false]);
        assert!(!handle.bit(addr("M102")));
    }

    #[test]
    fn failed_pulse_release_is_retried() {
        let (link, handle) = link();
        let ch = BitChannel::new(&link, addr("Y11")).unwrap();
        handle.fail_write(addr("Y11"), 1);

        let err = ch.pulse(Duration::ZERO, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
        assert!(!handle.bit(addr("Y11")), "coil left ON");
        assert_eq!(handle.writes_to(addr("Y11")), vec![true, false]);
    }

    #[test]
    fn pulse_if_clear_skips_held_bit() {
        let (link, handle) = link();
        let ch = BitChannel::new(&link, addr("M100")).unwrap();
        handle.set_bit(addr("M100"), true);
        assert!(!ch.pulse_if_clear(Duration::ZERO, Duration::ZERO).unwrap());
        assert!(handle.writes_to(addr("M100")).is_empty());

        handle.set_bit(addr("M100"), false);
        assert!(ch.pulse_if_clear(Duration::ZERO, Duration::ZERO).unwrap());
        assert_eq!(handle.writes_to(addr("M100")), vec![true, false]);
    }

    #[test]
    fn word_channel_reads_and_writes() {
        let (link, handle) = link();
        let ch = WordChannel::new(&link, addr("D101")).unwrap();
        handle.set_word(addr("D101"), 7);
        assert_eq!(ch.read().unwrap(), 7);
        ch.write(1).unwrap();
        assert_eq!(handle.word(addr("D101")), 1);
    }

    #[test]
    fn reconnect_retries_until_accepted() {
        let (link, handle) = link();
        handle.drop_connection();
        handle.refuse_connects(2);
        let running = AtomicBool::new(true);

        assert!(link.reconnect(Duration::from_millis(1), &running));
        assert!(link.is_connected());
        assert_eq!(handle.connect_count(), 2);
    }

    #[test]
    fn reconnect_gives_up_on_shutdown() {
        let (link, handle) = link();
        handle.drop_connection();
        handle.refuse_connects(usize::MAX);
        let running = AtomicBool::new(false);
        assert!(!link.reconnect(Duration::from_millis(1), &running));
    }

    #[test]
    fn reconnect_is_noop_when_connected() {
        let (link, handle) = link();
        let running = AtomicBool::new(true);
        assert!(link.reconnect(Duration::from_millis(1), &running));
        assert_eq!(handle.connect_count(), 1);
    }
}
