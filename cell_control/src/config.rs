//! Cell configuration (`cell.toml`).
//!
//! Everything is parsed and validated before the first device access:
//! addresses, access widths, the job table and the station wiring.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "sorting-cell"
//!
//! [line]
//! endpoint = { host = "192.168.10.100", port = 5052 }
//!
//! [[stations]]
//! name = "inspection"
//! start = { bit = "M100" }
//! done = { mode = "latch", address = "M101" }
//! routing = true
//! ```

use crate::coordinator::CycleTiming;
use crate::handshake::{HandshakeConfig, MIN_SETTLE_MS};
use crate::router::RouterConfig;
use crate::router::table::CycleOutcome;
use cell_common::address::SignalAddress;
use cell_common::config::{ConfigError, ConfigLoader, SharedConfig};
use cell_common::line::Endpoint;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_driver() -> String {
    "simulation".to_string()
}

// ─── Top level ──────────────────────────────────────────────────────

/// Complete cell configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellConfig {
    pub shared: SharedConfig,
    pub line: LineConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub scheduling: Scheduling,
    pub stations: Vec<StationConfig>,
}

/// How stations share the line controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// One loop ticks every station in turn.
    #[default]
    RoundRobin,
    /// One thread per station.
    Threaded,
}

/// `[line]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    pub endpoint: Endpoint,
    /// Wait between reconnect attempts.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

fn default_reconnect_backoff_ms() -> u64 {
    2000
}

impl LineConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

// ─── Stations ───────────────────────────────────────────────────────

/// Start request signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartConfig {
    Bit(SignalAddress),
    Word(SignalAddress),
}

impl StartConfig {
    pub fn address(&self) -> SignalAddress {
        match self {
            Self::Bit(a) | Self::Word(a) => *a,
        }
    }
}

/// Done reporting, selected by `mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DoneConfig {
    /// Pulse a done coil.
    Pulse {
        address: SignalAddress,
        #[serde(default = "default_done_pulse_ms")]
        on_ms: u64,
        #[serde(default = "default_done_pulse_ms")]
        off_ms: u64,
    },
    /// Reset the start coil and latch a done coil.
    Latch { address: SignalAddress },
    /// Set the done word to 1 and reset the start word.
    Word { address: SignalAddress },
}

fn default_done_pulse_ms() -> u64 {
    200
}

/// `[[stations]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StationConfig {
    pub name: String,
    pub start: StartConfig,
    /// Coil held ON while a cycle runs.
    #[serde(default)]
    pub busy: Option<SignalAddress>,
    pub done: DoneConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_interval_ms")]
    pub debounce_interval_ms: u64,
    /// Run the job router every cycle.
    #[serde(default)]
    pub routing: bool,
    /// Clear outcome flags and stores once the cycle is signaled.
    #[serde(default = "default_true")]
    pub clear_flags_after_cycle: bool,
    #[serde(default)]
    pub manipulator: Option<ManipulatorConfig>,
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_debounce_interval_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

/// Manipulator attached to a station.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManipulatorConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_motion_poll_ms")]
    pub poll_interval_ms: u64,
    /// Completion wait bound; absent waits until shutdown.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Program run when no outcome-specific program applies.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Programs keyed by outcome name, e.g. `orange_pass = "programs/orange.toml"`.
    #[serde(default)]
    pub programs: BTreeMap<String, PathBuf>,
}

fn default_baud() -> u32 {
    115_200
}

fn default_motion_poll_ms() -> u64 {
    100
}

impl ManipulatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Outcome programs with their keys parsed.
    pub fn outcome_programs(&self) -> Result<Vec<(CycleOutcome, PathBuf)>, ConfigError> {
        self.programs
            .iter()
            .map(|(key, path)| {
                key.parse::<CycleOutcome>()
                    .map(|o| (o, path.clone()))
                    .map_err(ConfigError::invalid)
            })
            .collect()
    }

    fn validate(&self, station: &str, routing: bool) -> Result<(), ConfigError> {
        let err = |msg: String| Err(ConfigError::invalid(format!("station {station:?}: {msg}")));
        if self.driver.trim().is_empty() {
            return err("manipulator driver cannot be empty".into());
        }
        if self.port.trim().is_empty() {
            return err("manipulator port cannot be empty".into());
        }
        if self.baud == 0 {
            return err("manipulator baud must be > 0".into());
        }
        if self.poll_interval_ms == 0 {
            return err("manipulator poll_interval_ms must be > 0".into());
        }
        if self.timeout_ms == Some(0) {
            return err("manipulator timeout_ms must be > 0 when set".into());
        }
        let programs = self.outcome_programs()?;
        if !programs.is_empty() && !routing {
            return err("outcome programs need routing = true".into());
        }
        if programs.is_empty() && self.program.is_none() {
            return err("manipulator has no program".into());
        }
        Ok(())
    }
}

impl StationConfig {
    pub fn timing(&self) -> CycleTiming {
        CycleTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            debounce_interval: Duration::from_millis(self.debounce_interval_ms),
        }
    }

    /// Validate signal kinds and wiring.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the name is empty or an interval is zero
    /// - a start/busy/done address has the wrong access width
    /// - latch done is paired with a word start, or word done with a bit start
    /// - the station neither routes nor moves
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.name;
        let err = |msg: String| Err(ConfigError::invalid(format!("station {name:?}: {msg}")));

        if name.trim().is_empty() {
            return Err(ConfigError::invalid("station name cannot be empty"));
        }
        if self.poll_interval_ms == 0 || self.debounce_interval_ms == 0 {
            return err("poll and debounce intervals must be > 0".into());
        }

        match self.start {
            StartConfig::Bit(a) if !a.is_bit() => {
                return err(format!("start {a} is not a bit device"));
            }
            StartConfig::Word(a) if !a.is_word() => {
                return err(format!("start {a} is not a word device"));
            }
            _ => {}
        }
        if let Some(busy) = self.busy {
            if !busy.is_bit() {
                return err(format!("busy {busy} is not a bit device"));
            }
        }
        match (self.done, self.start) {
            (DoneConfig::Pulse { address, on_ms, .. }, _) => {
                if !address.is_bit() {
                    return err(format!("done {address} is not a bit device"));
                }
                if on_ms == 0 {
                    return err("done pulse on_ms must be > 0".into());
                }
            }
            (DoneConfig::Latch { address }, StartConfig::Bit(_)) => {
                if !address.is_bit() {
                    return err(format!("done {address} is not a bit device"));
                }
            }
            (DoneConfig::Word { address }, StartConfig::Word(_)) => {
                if !address.is_word() {
                    return err(format!("done {address} is not a word device"));
                }
            }
            (DoneConfig::Latch { .. }, StartConfig::Word(_)) => {
                return err("latch done needs a bit start".into());
            }
            (DoneConfig::Word { .. }, StartConfig::Bit(_)) => {
                return err("word done needs a word start".into());
            }
        }

        match &self.manipulator {
            Some(m) => m.validate(name, self.routing)?,
            None if !self.routing => return err("station neither routes nor moves".into()),
            None => {}
        }
        Ok(())
    }
}

impl CellConfig {
    /// Load and validate `path`.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading cell configuration from {}", path.display());
        let config = <Self as ConfigLoader>::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for the first problem found,
    /// including anything rejected by [`StationConfig::validate`] and
    /// [`RouterConfig::validate`]. At most one station may route, since the
    /// select and request lines are shared.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.line.driver.trim().is_empty() {
            return Err(ConfigError::invalid("line.driver cannot be empty"));
        }
        if self.line.endpoint.host.trim().is_empty() || self.line.endpoint.port == 0 {
            return Err(ConfigError::invalid(format!(
                "line.endpoint {} is not usable",
                self.line.endpoint
            )));
        }
        if self.line.reconnect_backoff_ms == 0 {
            return Err(ConfigError::invalid("line.reconnect_backoff_ms must be > 0"));
        }

        if self.handshake.prime_pulses > 1 {
            return Err(ConfigError::invalid("handshake.prime_pulses must be 0 or 1"));
        }
        if !self.handshake.request.is_bit() {
            return Err(ConfigError::invalid(format!(
                "handshake.request {} is not a bit device",
                self.handshake.request
            )));
        }
        for (label, ms) in [
            ("settle_on_ms", self.handshake.settle_on_ms),
            ("settle_off_ms", self.handshake.settle_off_ms),
        ] {
            if ms < MIN_SETTLE_MS {
                return Err(ConfigError::invalid(format!(
                    "handshake.{label} = {ms} is below {MIN_SETTLE_MS} ms"
                )));
            }
        }
        self.router.validate()?;

        if self.stations.is_empty() {
            return Err(ConfigError::invalid("at least one station is required"));
        }
        let mut names = HashSet::new();
        for station in &self.stations {
            station.validate()?;
            if !names.insert(station.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate station {:?}",
                    station.name
                )));
            }
        }
        if self.stations.iter().filter(|s| s.routing).count() > 1 {
            return Err(ConfigError::invalid("only one station may route"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [shared]
        service_name = "cell"

        [line]
        endpoint = { host = "127.0.0.1", port = 5052 }

        [[stations]]
        name = "inspection"
        start = { bit = "M100" }
        done = { mode = "latch", address = "M101" }
        routing = true
    "#;

    fn parse(text: &str) -> Result<CellConfig, ConfigError> {
        let config = CellConfig::from_toml_str(text)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.line.driver, "simulation");
        assert_eq!(config.line.reconnect_backoff(), Duration::from_secs(2));
        assert_eq!(config.handshake.prime_pulses, 1);
        assert_eq!(config.router.pulse_on_ms, 1000);
        assert_eq!(config.scheduling, Scheduling::RoundRobin);
        let station = &config.stations[0];
        assert!(station.clear_flags_after_cycle);
        assert_eq!(station.timing().poll_interval, Duration::from_millis(200));
        assert_eq!(station.timing().debounce_interval, Duration::from_millis(500));
    }

    #[test]
    fn word_station_with_manipulator() {
        let text = r#"
            scheduling = "threaded"

            [shared]
            service_name = "cell"

            [line]
            endpoint = { host = "127.0.0.1", port = 5052 }

            [[stations]]
            name = "robot1"
            start = { word = "D100" }
            done = { mode = "word", address = "D101" }
            poll_interval_ms = 50

            [stations.manipulator]
            port = "COM3"
            timeout_ms = 30000
            program = "programs/robot1.toml"
        "#;
        let config = parse(text).unwrap();
        assert_eq!(config.scheduling, Scheduling::Threaded);
        let m = config.stations[0].manipulator.as_ref().unwrap();
        assert_eq!(m.baud, 115_200);
        assert_eq!(m.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(m.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn rejects_mismatched_done_mode() {
        let text = MINIMAL.replace(r#"start = { bit = "M100" }"#, r#"start = { word = "D100" }"#);
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_word_start_on_bit_channel() {
        let text = MINIMAL.replace(r#"start = { bit = "M100" }"#, r#"start = { bit = "D100" }"#);
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_malformed_address() {
        let text = MINIMAL.replace("M100", "Q100");
        assert!(matches!(parse(&text), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn rejects_station_without_work() {
        let text = MINIMAL.replace("routing = true", "routing = false");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_two_priming_pulses() {
        let text = format!("{MINIMAL}\n[handshake]\nprime_pulses = 2\n");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_short_settle() {
        let text = format!("{MINIMAL}\n[handshake]\nsettle_on_ms = 50\n");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("settle_on_ms"));

        let text = format!("{MINIMAL}\n[handshake]\nsettle_off_ms = 0\n");
        assert!(parse(&text).is_err());

        let text = format!("{MINIMAL}\n[handshake]\nsettle_on_ms = 100\nsettle_off_ms = 100\n");
        assert!(parse(&text).is_ok());
    }

    #[test]
    fn rejects_unknown_outcome_program() {
        let text = format!(
            "{MINIMAL}\n[stations.manipulator]\nport = \"COM3\"\n\
             programs = {{ purple_pass = \"p.toml\" }}\n"
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("purple_pass"));
    }

    #[test]
    fn rejects_duplicate_stations() {
        let second = r#"
            [[stations]]
            name = "inspection"
            start = { bit = "M110" }
            done = { mode = "pulse", address = "M112" }
            [stations.manipulator]
            port = "COM4"
            program = "p.toml"
        "#;
        let text = format!("{MINIMAL}{second}");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn custom_job_table_is_validated() {
        let text = format!(
            "{MINIMAL}{}",
            r#"
            [router]
            entry = "only"

            [[router.jobs]]
            name = "only"
            selector = [1, 0, 0]
            read = "X0E"
            on_true = { outcome = "tray_empty" }
            on_false = { next = "missing" }
            "#
        );
        assert!(parse(&text).is_err());
    }
}
