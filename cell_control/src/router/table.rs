//! Job table: the inspection decision tree as data.
//!
//! Each [`JobState`] selects an inspection job, reads one result bit and
//! follows a [`Transition`] for each value. Terminal transitions name a
//! [`CycleOutcome`]. The default table reproduces the sorting line:
//! tray check, then color, then the color-specific pass/fail job.

use cell_common::address::{DeviceCode, SignalAddress};
use cell_common::config::ConfigError;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Number of job-select lines.
pub const SELECT_LINES: usize = 3;

// ─── CycleOutcome ───────────────────────────────────────────────────

/// Result of one routed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    TrayEmpty,
    OrangePass,
    OrangeFail,
    BrownPass,
    BrownFail,
}

impl CycleOutcome {
    pub const ALL: [Self; 5] = [
        Self::TrayEmpty,
        Self::OrangePass,
        Self::OrangeFail,
        Self::BrownPass,
        Self::BrownFail,
    ];

    /// Position of this outcome in [`Self::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::TrayEmpty => 0,
            Self::OrangePass => 1,
            Self::OrangeFail => 2,
            Self::BrownPass => 3,
            Self::BrownFail => 4,
        }
    }

    /// Signal light pulsed for this outcome.
    pub const fn indicator(self) -> Indicator {
        match self {
            Self::TrayEmpty => Indicator::Alarm,
            Self::OrangePass | Self::BrownPass => Indicator::Pass,
            Self::OrangeFail | Self::BrownFail => Indicator::Fail,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrayEmpty => "tray_empty",
            Self::OrangePass => "orange_pass",
            Self::OrangeFail => "orange_fail",
            Self::BrownPass => "brown_pass",
            Self::BrownFail => "brown_fail",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleOutcome {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| format!("unknown outcome: {s:?}"))
    }
}

/// Signal light driven at the end of a routed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    Alarm,
    Pass,
    Fail,
}

impl Indicator {
    pub const ALL: [Self; 3] = [Self::Alarm, Self::Pass, Self::Fail];

    /// Position of this light in [`Self::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::Alarm => 0,
            Self::Pass => 1,
            Self::Fail => 2,
        }
    }
}

// ─── JobSelector ────────────────────────────────────────────────────

/// Pattern written to the job-select lines, e.g. `[1, 0, 0]` in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "Vec<u8>")]
pub struct JobSelector([bool; SELECT_LINES]);

impl JobSelector {
    pub const fn new(lines: [bool; SELECT_LINES]) -> Self {
        Self(lines)
    }

    #[inline]
    pub fn lines(&self) -> [bool; SELECT_LINES] {
        self.0
    }

    /// True if no line is asserted.
    pub fn is_clear(&self) -> bool {
        self.0.iter().all(|l| !l)
    }
}

impl TryFrom<Vec<u8>> for JobSelector {
    type Error = String;
    fn try_from(values: Vec<u8>) -> Result<Self, Self::Error> {
        if values.len() != SELECT_LINES {
            return Err(format!(
                "job selector needs {SELECT_LINES} values, got {}",
                values.len()
            ));
        }
        let mut lines = [false; SELECT_LINES];
        for (line, value) in lines.iter_mut().zip(values) {
            *line = match value {
                0 => false,
                1 => true,
                other => return Err(format!("job selector values are 0 or 1, got {other}")),
            };
        }
        Ok(Self(lines))
    }
}

impl fmt::Display for JobSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0.map(u8::from);
        write!(f, "[{a},{b},{c}]")
    }
}

// ─── States ─────────────────────────────────────────────────────────

/// Where a job result leads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Continue with another job.
    Next(String),
    /// Finish the cycle.
    Outcome(CycleOutcome),
}

/// One inspection job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobState {
    pub name: String,
    pub selector: JobSelector,
    /// Result bit read after the handshake.
    pub read: SignalAddress,
    /// Coil that mirrors the result.
    #[serde(default)]
    pub store: Option<SignalAddress>,
    pub on_true: Transition,
    pub on_false: Transition,
}

/// Decision tree over inspection jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTable {
    pub entry: String,
    pub states: Vec<JobState>,
}

const fn x(n: u32) -> SignalAddress {
    SignalAddress::new(DeviceCode::X, n)
}

const fn m(n: u32) -> SignalAddress {
    SignalAddress::new(DeviceCode::M, n)
}

fn state(
    name: &str,
    selector: [bool; SELECT_LINES],
    read: SignalAddress,
    store: u32,
    on_true: Transition,
    on_false: Transition,
) -> JobState {
    JobState {
        name: name.to_string(),
        selector: JobSelector::new(selector),
        read,
        store: Some(m(store)),
        on_true,
        on_false,
    }
}

fn next(name: &str) -> Transition {
    Transition::Next(name.to_string())
}

impl Default for JobTable {
    /// Tray → color → orange/brown pass-fail.
    fn default() -> Self {
        use CycleOutcome::*;
        use Transition::Outcome;
        Self {
            entry: "check_tray".to_string(),
            states: vec![
                state(
                    "check_tray",
                    [true, false, false],
                    x(0x0E),
                    210,
                    Outcome(TrayEmpty),
                    next("check_color"),
                ),
                state(
                    "check_color",
                    [false, true, false],
                    x(0x06),
                    211,
                    next("check_orange"),
                    next("check_brown"),
                ),
                state(
                    "check_orange",
                    [false, true, true],
                    x(0x0E),
                    212,
                    Outcome(OrangePass),
                    Outcome(OrangeFail),
                ),
                state(
                    "check_brown",
                    [true, false, false],
                    x(0x06),
                    213,
                    Outcome(BrownPass),
                    Outcome(BrownFail),
                ),
            ],
        }
    }
}

impl JobTable {
    pub fn state(&self, name: &str) -> Option<&JobState> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == name)
    }

    /// Outcomes reachable through some transition.
    pub fn outcomes(&self) -> HashSet<CycleOutcome> {
        self.states
            .iter()
            .flat_map(|s| [&s.on_true, &s.on_false])
            .filter_map(|t| match t {
                Transition::Outcome(o) => Some(*o),
                Transition::Next(_) => None,
            })
            .collect()
    }

    /// Validate the table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the table is empty or a state name is empty or duplicated
    /// - the entry state or a `next` target does not exist
    /// - a read or store address is not a bit device
    /// - the transitions form a cycle
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.states.is_empty() {
            return Err(ConfigError::invalid("job table has no states"));
        }

        let mut index = HashMap::with_capacity(self.states.len());
        for (i, s) in self.states.iter().enumerate() {
            if s.name.trim().is_empty() {
                return Err(ConfigError::invalid("job state name cannot be empty"));
            }
            if index.insert(s.name.as_str(), i).is_some() {
                return Err(ConfigError::invalid(format!(
                    "duplicate job state {:?}",
                    s.name
                )));
            }
            if !s.read.is_bit() {
                return Err(ConfigError::invalid(format!(
                    "job {:?}: read address {} is not a bit device",
                    s.name, s.read
                )));
            }
            if let Some(store) = s.store {
                if !store.is_bit() {
                    return Err(ConfigError::invalid(format!(
                        "job {:?}: store address {store} is not a bit device",
                        s.name
                    )));
                }
            }
        }

        if !index.contains_key(self.entry.as_str()) {
            return Err(ConfigError::invalid(format!(
                "entry job {:?} does not exist",
                self.entry
            )));
        }

        // Successor lists by index.
        let mut edges = vec![Vec::new(); self.states.len()];
        for (i, s) in self.states.iter().enumerate() {
            for t in [&s.on_true, &s.on_false] {
                if let Transition::Next(target) = t {
                    let Some(&j) = index.get(target.as_str()) else {
                        return Err(ConfigError::invalid(format!(
                            "job {:?} transitions to unknown job {target:?}",
                            s.name
                        )));
                    };
                    edges[i].push(j);
                }
            }
        }

        // 0 = unvisited, 1 = on stack, 2 = done
        let mut mark = vec![0u8; self.states.len()];
        for root in 0..self.states.len() {
            if mark[root] != 0 {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            mark[root] = 1;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if let Some(&succ) = edges[node].get(top.1) {
                    top.1 += 1;
                    match mark[succ] {
                        0 => {
                            mark[succ] = 1;
                            stack.push((succ, 0));
                        }
                        1 => {
                            return Err(ConfigError::invalid(format!(
                                "job table has a cycle through {:?}",
                                self.states[succ].name
                            )));
                        }
                        _ => {}
                    }
                } else {
                    mark[node] = 2;
                    stack.pop();
                }
            }
        }

        Ok(())
    }
}

// ─── Output addresses ───────────────────────────────────────────────

/// Flag coil written ON for each outcome.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutcomeFlags {
    pub tray_empty: SignalAddress,
    pub orange_pass: SignalAddress,
    pub orange_fail: SignalAddress,
    pub brown_pass: SignalAddress,
    pub brown_fail: SignalAddress,
}

impl Default for OutcomeFlags {
    fn default() -> Self {
        Self {
            tray_empty: m(200),
            orange_pass: m(300),
            orange_fail: m(400),
            brown_pass: m(301),
            brown_fail: m(401),
        }
    }
}

impl OutcomeFlags {
    pub fn get(&self, outcome: CycleOutcome) -> SignalAddress {
        match outcome {
            CycleOutcome::TrayEmpty => self.tray_empty,
            CycleOutcome::OrangePass => self.orange_pass,
            CycleOutcome::OrangeFail => self.orange_fail,
            CycleOutcome::BrownPass => self.brown_pass,
            CycleOutcome::BrownFail => self.brown_fail,
        }
    }
}

/// Signal light outputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Indicators {
    pub alarm: SignalAddress,
    pub pass: SignalAddress,
    pub fail: SignalAddress,
}

impl Default for Indicators {
    fn default() -> Self {
        Self {
            alarm: SignalAddress::new(DeviceCode::Y, 0x12),
            pass: SignalAddress::new(DeviceCode::Y, 0x11),
            fail: SignalAddress::new(DeviceCode::Y, 0x10),
        }
    }
}

impl Indicators {
    pub fn get(&self, indicator: Indicator) -> SignalAddress {
        match indicator {
            Indicator::Alarm => self.alarm,
            Indicator::Pass => self.pass,
            Indicator::Fail => self.fail,
        }
    }
}
