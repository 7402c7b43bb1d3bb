//! Simulated line controller.
//!
//! The `SimLineController` keeps an in-memory image of bit and word
//! devices and manages:
//! - Inspection reactions (a rising edge on a request line latches result
//!   bits chosen by the current job-select pattern)
//! - Fault injection (failing reads/writes, dropped connections, refused connects)
//! - A journal of every read and write for test assertions

use cell_common::address::SignalAddress;
use cell_common::line::{Endpoint, LineTransport, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// One journaled transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    ReadBit { address: SignalAddress, value: bool },
    WriteBit { address: SignalAddress, value: bool },
    ReadWord { address: SignalAddress, value: u16 },
    WriteWord { address: SignalAddress, value: u16 },
}

/// Inspection routine emulation.
///
/// On a rising edge of `trigger`, the current values of `selects` form a
/// pattern; the first matching response has its bits latched.
#[derive(Debug, Clone)]
pub struct InspectionReaction {
    /// Request line that starts an inspection.
    pub trigger: SignalAddress,
    /// Job-select lines read to decide the result.
    pub selects: Vec<SignalAddress>,
    /// `(select pattern, result bits)` pairs.
    pub responses: Vec<(Vec<bool>, Vec<(SignalAddress, bool)>)>,
}

impl InspectionReaction {
    pub fn new(trigger: SignalAddress, selects: Vec<SignalAddress>) -> Self {
        Self {
            trigger,
            selects,
            responses: Vec::new(),
        }
    }

    /// Latch `results` when the select lines read `pattern`.
    pub fn respond(mut self, pattern: &[bool], results: &[(SignalAddress, bool)]) -> Self {
        self.responses.push((pattern.to_vec(), results.to_vec()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    Io,
    Disconnect,
}

/// One-shot fault armed on an address.
#[derive(Debug, Clone)]
struct ArmedFault {
    address: SignalAddress,
    /// Successful accesses still allowed before the fault fires.
    skip: usize,
    kind: FaultKind,
    on_write: bool,
}

#[derive(Debug, Default)]
struct SimLineState {
    connected: bool,
    refuse_connects: usize,
    connect_count: usize,
    bits: HashMap<SignalAddress, bool>,
    words: HashMap<SignalAddress, u16>,
    reactions: Vec<InspectionReaction>,
    faults: Vec<ArmedFault>,
    journal: Vec<LineEvent>,
}

impl SimLineState {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    /// Fire an armed fault for this access, if any.
    fn check_fault(
        &mut self,
        address: SignalAddress,
        on_write: bool,
    ) -> Result<(), TransportError> {
        let Some(pos) = self
            .faults
            .iter()
            .position(|f| f.address == address && f.on_write == on_write)
        else {
            return Ok(());
        };

        if self.faults[pos].skip > 0 {
            self.faults[pos].skip -= 1;
            return Ok(());
        }

        let fault = self.faults.remove(pos);
        match fault.kind {
            FaultKind::Io => Err(TransportError::Io {
                address,
                reason: "injected fault".to_string(),
            }),
            FaultKind::Disconnect => {
                self.connected = false;
                Err(TransportError::ConnectionLost(format!(
                    "injected disconnect at {address}"
                )))
            }
        }
    }

    fn set_bit(&mut self, address: SignalAddress, value: bool) {
        let prev = self.bits.insert(address, value).unwrap_or(false);
        if value && !prev {
            self.handle_rising_edge(address);
        }
    }

    fn handle_rising_edge(&mut self, address: SignalAddress) {
        let mut latched = Vec::new();
        for reaction in self.reactions.iter().filter(|r| r.trigger == address) {
            let pattern: Vec<bool> = reaction
                .selects
                .iter()
                .map(|a| self.bits.get(a).copied().unwrap_or(false))
                .collect();
            if let Some((_, results)) = reaction.responses.iter().find(|(p, _)| *p == pattern) {
                trace!("{} rising edge, select pattern {:?} matched", address, pattern);
                latched.extend(results.iter().copied());
            }
        }
        for (addr, value) in latched {
            self.bits.insert(addr, value);
            debug!("Inspection latched {} = {}", addr, value);
        }
    }
}

/// Cloneable handle for scripting and inspecting a [`SimLineController`].
#[derive(Debug, Clone, Default)]
pub struct SimLineHandle {
    state: Arc<Mutex<SimLineState>>,
}

impl SimLineHandle {
    /// Force a bit (as the PLC program would), triggering reactions.
    pub fn set_bit(&self, address: SignalAddress, value: bool) {
        self.state.lock().set_bit(address, value);
    }

    /// Current bit value (unset bits read as OFF).
    pub fn bit(&self, address: SignalAddress) -> bool {
        self.state.lock().bits.get(&address).copied().unwrap_or(false)
    }

    /// Force a word register.
    pub fn set_word(&self, address: SignalAddress, value: u16) {
        self.state.lock().words.insert(address, value);
    }

    /// Current word value (unset words read as 0).
    pub fn word(&self, address: SignalAddress) -> u16 {
        self.state.lock().words.get(&address).copied().unwrap_or(0)
    }

    /// Install an inspection reaction.
    pub fn add_reaction(&self, reaction: InspectionReaction) {
        self.state.lock().reactions.push(reaction);
    }

    /// Fail one read of `address` after `skip` successful reads.
    pub fn fail_read(&self, address: SignalAddress, skip: usize) {
        self.arm(address, skip, FaultKind::Io, false);
    }

    /// Fail one write to `address` after `skip` successful writes.
    pub fn fail_write(&self, address: SignalAddress, skip: usize) {
        self.arm(address, skip, FaultKind::Io, true);
    }

    /// Drop the connection on a read of `address` after `skip` successful reads.
    pub fn disconnect_on_read(&self, address: SignalAddress, skip: usize) {
        self.arm(address, skip, FaultKind::Disconnect, false);
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connects(&self, count: usize) {
        self.state.lock().refuse_connects = count;
    }

    /// Drop the connection immediately.
    pub fn drop_connection(&self) {
        self.state.lock().connected = false;
    }

    /// Whether the simulated connection is up.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    /// Snapshot of every journaled operation.
    pub fn journal(&self) -> Vec<LineEvent> {
        self.state.lock().journal.clone()
    }

    /// Forget journaled operations.
    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Number of journaled bit reads of `address`.
    pub fn reads_of(&self, address: SignalAddress) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|e| matches!(e, LineEvent::ReadBit { address: a, .. } if *a == address))
            .count()
    }

    /// Values written to `address`, in order.
    pub fn writes_to(&self, address: SignalAddress) -> Vec<bool> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                LineEvent::WriteBit { address: a, value } if *a == address => Some(*value),
                _ => None,
            })
            .collect()
    }

    fn arm(&self, address: SignalAddress, skip: usize, kind: FaultKind, on_write: bool) {
        self.state.lock().faults.push(ArmedFault {
            address,
            skip,
            kind,
            on_write,
        });
    }
}

/// Simulated line controller implementing [`LineTransport`].
#[derive(Debug, Default)]
pub struct SimLineController {
    handle: SimLineHandle,
}

impl SimLineController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle sharing this controller's state.
    pub fn handle(&self) -> SimLineHandle {
        self.handle.clone()
    }
}

impl LineTransport for SimLineController {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(TransportError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: "simulated refusal".to_string(),
            });
        }
        state.connected = true;
        state.connect_count += 1;
        info!("Simulated line controller connected at {}", endpoint);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.state.lock().connected
    }

    fn read_bits(
        &mut self,
        address: SignalAddress,
        count: usize,
    ) -> Result<Vec<bool>, TransportError> {
        if !address.is_bit() {
            return Err(TransportError::WrongDeviceKind(address));
        }
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;

        let mut values = Vec::with_capacity(count);
        for offset in 0..count as u32 {
            let addr = SignalAddress::new(address.device(), address.number() + offset);
            state.check_fault(addr, false)?;
            let value = state.bits.get(&addr).copied().unwrap_or(false);
            state.journal.push(LineEvent::ReadBit {
                address: addr,
                value,
            });
            values.push(value);
        }
        Ok(values)
    }

    fn write_bits(
        &mut self,
        address: SignalAddress,
        values: &[bool],
    ) -> Result<(), TransportError> {
        if !address.is_bit() {
            return Err(TransportError::WrongDeviceKind(address));
        }
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;

        for (offset, &value) in values.iter().enumerate() {
            let addr = SignalAddress::new(address.device(), address.number() + offset as u32);
            state.check_fault(addr, true)?;
            state.journal.push(LineEvent::WriteBit {
                address: addr,
                value,
            });
            state.set_bit(addr, value);
        }
        Ok(())
    }

    fn read_word(&mut self, address: SignalAddress) -> Result<u16, TransportError> {
        if !address.is_word() {
            return Err(TransportError::WrongDeviceKind(address));
        }
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;
        state.check_fault(address, false)?;
        let value = state.words.get(&address).copied().unwrap_or(0);
        state.journal.push(LineEvent::ReadWord { address, value });
        Ok(value)
    }

    fn write_word(&mut self, address: SignalAddress, value: u16) -> Result<(), TransportError> {
        if !address.is_word() {
            return Err(TransportError::WrongDeviceKind(address));
        }
        let mut state = self.handle.state.lock();
        state.ensure_connected()?;
        state.check_fault(address, true)?;
        state.journal.push(LineEvent::WriteWord { address, value });
        state.words.insert(address, value);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.handle.state.lock();
        if state.connected {
            debug!("Simulated line controller closed");
        }
        state.connected = false;
    }
}
