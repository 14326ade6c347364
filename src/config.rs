//! Bench Configuration using Figment
//!
//! Strongly-typed configuration for the bench. Loaded from, in increasing precedence:
//! 1. Built-in defaults (the four-supply reference bench, no instrument addresses)
//! 2. A TOML file (`config/rf_bench.toml` by default)
//! 3. Environment variables prefixed with `RF_BENCH_`, nested keys separated by `__`
//!    (e.g. `RF_BENCH_APPLICATION__LOG_LEVEL=debug`)
//!
//! Arrays in the file (`[[supplies]]`, `[[assignments]]`) replace the defaults wholesale.
//!
//! # Example
//! ```no_run
//! use rf_bench::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), rf_bench::error::BenchError>(())
//! ```

use crate::bench::output::{parse_output_name, Assignment, Role};
use crate::error::{BenchError, BenchResult};
use crate::sequence::step::{SequenceStep, ShutdownMode, StepDelays};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/rf_bench.toml";

/// Top-level bench configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Declared power supplies
    #[serde(default)]
    pub supplies: Vec<SupplyDefinition>,
    /// Output role assignments seeding the pairing pools
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    /// RF signal generator
    #[serde(default)]
    pub signal_generator: InstrumentEndpoint,
    /// Spectrum analyzer
    #[serde(default)]
    pub spectrum_analyzer: InstrumentEndpoint,
    /// Test sequence settings
    #[serde(default)]
    pub sequence: SequenceConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "RF Bench".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// A power supply on the bench
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyDefinition {
    /// Unique supply name (e.g. "PS1")
    pub name: String,
    /// Instrument address: `tcp://host:port` or `serial://path[@baud]`
    #[serde(default)]
    pub address: Option<String>,
}

/// Address of a single instrument
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstrumentEndpoint {
    /// Instrument address; `None` leaves it disconnected
    #[serde(default)]
    pub address: Option<String>,
}

/// Sequence runner configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// What the RF OFF / Bias OFF steps do
    #[serde(default)]
    pub shutdown: ShutdownMode,
    /// Delay after each step
    #[serde(default)]
    pub delays: StepDelays,
}

impl Default for BenchConfig {
    /// The four-supply reference bench.
    fn default() -> Self {
        let supplies = ["PS1", "PS2", "PS3", "PS4"]
            .into_iter()
            .map(|name| SupplyDefinition {
                name: name.to_string(),
                address: None,
            })
            .collect();
        let assignments = [
            ("PS1", "Output1", Role::Gate),
            ("PS1", "Output2", Role::Gate),
            ("PS2", "Output1", Role::Gate),
            ("PS2", "Output2", Role::Drain),
            ("PS3", "Output1", Role::Gate),
            ("PS3", "Output2", Role::Gate),
            ("PS4", "Output1", Role::Drain),
            ("PS4", "Output2", Role::Drain),
        ]
        .into_iter()
        .map(|(supply, output, role)| Assignment {
            supply: supply.to_string(),
            output: output.to_string(),
            role,
        })
        .collect();

        Self {
            application: ApplicationConfig::default(),
            supplies,
            assignments,
            signal_generator: InstrumentEndpoint::default(),
            spectrum_analyzer: InstrumentEndpoint::default(),
            sequence: SequenceConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Load configuration from the default path and environment variables
    pub fn load() -> BenchResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path (a missing file yields the defaults)
    pub fn load_from<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack used by [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(BenchConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RF_BENCH_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> BenchResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(BenchError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut names = HashSet::new();
        for supply in &self.supplies {
            if supply.name.trim().is_empty() {
                return Err(BenchError::Validation("Supply name must not be empty".into()));
            }
            // output keys are "<supply> OutputN" and role lines split on '_'
            if supply.name.contains(|c: char| c.is_whitespace() || c == '_') {
                return Err(BenchError::Validation(format!(
                    "Supply name '{}' must not contain whitespace or '_'",
                    supply.name
                )));
            }
            if !names.insert(supply.name.as_str()) {
                return Err(BenchError::Validation(format!(
                    "Duplicate supply name: {}",
                    supply.name
                )));
            }
        }

        let mut assigned = HashSet::new();
        for assignment in &self.assignments {
            if !names.contains(assignment.supply.as_str()) {
                return Err(BenchError::Validation(format!(
                    "Assignment refers to undeclared supply '{}'",
                    assignment.supply
                )));
            }
            let Some(channel) = parse_output_name(&assignment.output) else {
                return Err(BenchError::Validation(format!(
                    "Assignment output '{}' on {} must be Output1 or Output2",
                    assignment.output, assignment.supply
                )));
            };
            if !assigned.insert((assignment.supply.as_str(), channel)) {
                return Err(BenchError::Validation(format!(
                    "{} {} is assigned more than once",
                    assignment.supply, assignment.output
                )));
            }
        }

        for step in SequenceStep::ALL {
            if !self.sequence.delays.get(step).is_valid() {
                return Err(BenchError::Validation(format!(
                    "Delay for step {step} must be finite and non-negative"
                )));
            }
        }

        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> BenchResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BenchError::Validation(format!("Cannot serialize configuration: {e}")))
    }
}
