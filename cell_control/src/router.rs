//! Job routing: walk the job table over handshake results.
//!
//! A cycle starts from the entry job with all outcome flags and result
//! stores cleared. Each job clears the select lines, asserts its own
//! selector, runs one handshake exchange and follows the transition for
//! the value read. A terminal transition writes exactly one outcome flag
//! and pulses the matching signal light.
//!
//! A failed exchange aborts the cycle: no outcome flag is written and the
//! next cycle starts again from the entry job.

pub mod table;

use crate::error::RouterError;
use crate::handshake::{ClassificationResult, HandshakeConfig, HandshakeProtocol};
use crate::signal::{BitChannel, LineLink};
use cell_common::address::{DeviceCode, SignalAddress};
use cell_common::config::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use table::{
    CycleOutcome, Indicator, Indicators, JobSelector, JobState, JobTable, OutcomeFlags,
    SELECT_LINES, Transition,
};
use tracing::{debug, info, warn};

// ─── Configuration ──────────────────────────────────────────────────

/// `[router]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Job-select lines, in selector order.
    #[serde(default = "default_select")]
    pub select: Vec<SignalAddress>,
    #[serde(default = "default_entry")]
    pub entry: String,
    /// Empty means the built-in sorting table.
    #[serde(default)]
    pub jobs: Vec<JobState>,
    #[serde(default)]
    pub flags: OutcomeFlags,
    #[serde(default)]
    pub indicators: Indicators,
    /// Signal light ON time.
    #[serde(default = "default_pulse_on_ms")]
    pub pulse_on_ms: u64,
    /// Signal light OFF hold after the pulse.
    #[serde(default)]
    pub pulse_off_ms: u64,
}

fn default_select() -> Vec<SignalAddress> {
    [0x1A, 0x1C, 0x18]
        .into_iter()
        .map(|n| SignalAddress::new(DeviceCode::Y, n))
        .collect()
}

fn default_entry() -> String {
    JobTable::default().entry
}

fn default_pulse_on_ms() -> u64 {
    1000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            select: default_select(),
            entry: default_entry(),
            jobs: Vec::new(),
            flags: OutcomeFlags::default(),
            indicators: Indicators::default(),
            pulse_on_ms: default_pulse_on_ms(),
            pulse_off_ms: 0,
        }
    }
}

impl RouterConfig {
    /// Job table in effect.
    pub fn table(&self) -> JobTable {
        if self.jobs.is_empty() {
            JobTable::default()
        } else {
            JobTable {
                entry: self.entry.clone(),
                states: self.jobs.clone(),
            }
        }
    }

    /// Validate select lines, output addresses and the job table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.select.len() != SELECT_LINES {
            return Err(ConfigError::invalid(format!(
                "router.select needs {SELECT_LINES} addresses, got {}",
                self.select.len()
            )));
        }
        let flags = CycleOutcome::ALL.map(|o| self.flags.get(o));
        let lights = Indicator::ALL.map(|i| self.indicators.get(i));
        for address in self.select.iter().chain(&flags).chain(&lights) {
            if !address.is_bit() {
                return Err(ConfigError::invalid(format!(
                    "router address {address} is not a bit device"
                )));
            }
        }
        if self.pulse_on_ms == 0 {
            return Err(ConfigError::invalid("router.pulse_on_ms must be > 0"));
        }
        self.table().validate()
    }
}

// ─── Runtime ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Step {
    Goto(usize),
    Finish(CycleOutcome),
}

struct RouterJob {
    name: String,
    selector: JobSelector,
    read: BitChannel,
    store: Option<BitChannel>,
    on_true: Step,
    on_false: Step,
}

/// Decision tree over classification results.
pub struct JobRouter {
    handshake: HandshakeProtocol,
    select: Vec<BitChannel>,
    jobs: Vec<RouterJob>,
    entry: usize,
    /// Indexed by [`CycleOutcome::index`].
    flags: [BitChannel; 5],
    /// Indexed by [`Indicator::index`].
    indicators: [BitChannel; 3],
    pulse_on: Duration,
    pulse_off: Duration,
    trail: Vec<ClassificationResult>,
}

impl JobRouter {
    /// Bind the router's signals on `link`.
    ///
    /// # Errors
    /// Any validation failure of `config`. No I/O happens here.
    pub fn new(
        link: &LineLink,
        handshake: &HandshakeConfig,
        config: &RouterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let table = config.table();

        let resolve = |t: &Transition| -> Result<Step, ConfigError> {
            match t {
                Transition::Outcome(o) => Ok(Step::Finish(*o)),
                Transition::Next(name) => table
                    .position(name)
                    .map(Step::Goto)
                    .ok_or_else(|| ConfigError::invalid(format!("unknown job {name:?}"))),
            }
        };

        let mut jobs = Vec::with_capacity(table.states.len());
        for state in &table.states {
            jobs.push(RouterJob {
                name: state.name.clone(),
                selector: state.selector,
                read: BitChannel::new(link, state.read)?,
                store: state.store.map(|a| BitChannel::new(link, a)).transpose()?,
                on_true: resolve(&state.on_true)?,
                on_false: resolve(&state.on_false)?,
            });
        }
        let entry = table
            .position(&table.entry)
            .ok_or_else(|| ConfigError::invalid(format!("unknown entry job {:?}", table.entry)))?;

        let select = config
            .select
            .iter()
            .map(|a| BitChannel::new(link, *a))
            .collect::<Result<Vec<_>, _>>()?;
        let [tray_empty, orange_pass, orange_fail, brown_pass, brown_fail] =
            CycleOutcome::ALL.map(|o| BitChannel::new(link, config.flags.get(o)));
        let flags = [tray_empty?, orange_pass?, orange_fail?, brown_pass?, brown_fail?];
        let [alarm, pass, fail] =
            Indicator::ALL.map(|i| BitChannel::new(link, config.indicators.get(i)));
        let indicators = [alarm?, pass?, fail?];

        let request = BitChannel::new(link, handshake.request)?;

        Ok(Self {
            handshake: HandshakeProtocol::new(request, handshake),
            select,
            jobs,
            entry,
            flags,
            indicators,
            pulse_on: Duration::from_millis(config.pulse_on_ms),
            pulse_off: Duration::from_millis(config.pulse_off_ms),
            trail: Vec::new(),
        })
    }

    /// Results read during the last cycle, in order.
    pub fn trail(&self) -> &[ClassificationResult] {
        &self.trail
    }

    /// Run one routed cycle from the entry job.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, RouterError> {
        self.trail.clear();
        self.clear_results()?;

        let outcome = match self.walk() {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(clear) = self.clear_selector() {
                    warn!("Failed to clear job select lines after abort: {clear}");
                }
                return Err(e);
            }
        };

        self.clear_selector()?;
        let flag = self.flag(outcome);
        flag.write(true).map_err(|e| RouterError::signal(flag.address(), e))?;
        info!(%outcome, flag = %flag.address(), "Cycle routed");

        let light = self.indicator(outcome.indicator());
        light
            .pulse(self.pulse_on, self.pulse_off)
            .map_err(|e| RouterError::signal(light.address(), e))?;
        Ok(outcome)
    }

    /// Clear outcome flags, result stores and select lines, and release
    /// the request line.
    pub fn reset(&self) -> Result<(), RouterError> {
        self.clear_results()?;
        self.clear_selector()?;
        self.handshake.release()?;
        Ok(())
    }

    fn walk(&mut self) -> Result<CycleOutcome, RouterError> {
        let mut current = self.entry;
        // Table validation rules out cycles; the bound only guards the loop.
        for _ in 0..self.jobs.len() {
            let job = &self.jobs[current];
            debug!(job = %job.name, selector = %job.selector, "Selecting job");
            self.clear_selector()?;
            for (channel, on) in self.select.iter().zip(job.selector.lines()) {
                if on {
                    channel
                        .write(true)
                        .map_err(|e| RouterError::signal(channel.address(), e))?;
                }
            }

            let result = self.handshake.request_and_read(&job.name, &job.read)?;
            if let Some(store) = &job.store {
                store
                    .write(result.value)
                    .map_err(|e| RouterError::signal(store.address(), e))?;
            }
            let step = if result.value { job.on_true } else { job.on_false };
            info!(job = %job.name, address = %result.address, value = result.value, "Job result");
            self.trail.push(result);

            match step {
                Step::Finish(outcome) => return Ok(outcome),
                Step::Goto(next) => current = next,
            }
        }
        Err(RouterError::Unterminated)
    }

    fn clear_selector(&self) -> Result<(), RouterError> {
        for channel in &self.select {
            channel
                .write(false)
                .map_err(|e| RouterError::signal(channel.address(), e))?;
        }
        Ok(())
    }

    fn clear_results(&self) -> Result<(), RouterError> {
        let stores = self.jobs.iter().filter_map(|j| j.store.as_ref());
        for channel in self.flags.iter().chain(stores) {
            channel
                .write(false)
                .map_err(|e| RouterError::signal(channel.address(), e))?;
        }
        Ok(())
    }

    fn flag(&self, outcome: CycleOutcome) -> &BitChannel {
        &self.flags[outcome.index()]
    }

    fn indicator(&self, indicator: Indicator) -> &BitChannel {
        &self.indicators[indicator.index()]
    }
}
