//! Output model and the shared settings table.

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Identity of one controllable supply output: `(supply name, channel)`.
///
/// Displays as `"{supply} Output{channel}"`, which is also the settings-table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId {
    /// Supply name, e.g. `PS1`
    pub supply: String,
    /// 1-based channel index
    pub channel: u8,
}

impl OutputId {
    /// Build an output identity.
    pub fn new(supply: impl Into<String>, channel: u8) -> Self {
        Self {
            supply: supply.into(),
            channel,
        }
    }

    /// Output name as used in keys and files (`Output1`, `Output2`).
    pub fn output_name(&self) -> String {
        format!("Output{}", self.channel)
    }

    /// Settings-table key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Output{}", self.supply, self.channel)
    }
}

/// Parse `Output1` / `output2` / `Output 2` (case-insensitive) into a channel index.
pub fn parse_output_name(name: &str) -> Option<u8> {
    let compact: String = name.split_whitespace().collect::<String>().to_lowercase();
    match compact.as_str() {
        "output1" => Some(1),
        "output2" => Some(2),
        _ => None,
    }
}

impl FromStr for OutputId {
    type Err = BenchError;

    /// Parses a settings-table key such as `PS1 Output1`.
    fn from_str(key: &str) -> BenchResult<Self> {
        let (supply, output) = key
            .trim()
            .split_once(' ')
            .ok_or_else(|| BenchError::UnknownOutput(key.to_string()))?;
        let channel =
            parse_output_name(output).ok_or_else(|| BenchError::UnknownOutput(key.to_string()))?;
        Ok(OutputId::new(supply, channel))
    }
}

/// Role an output plays in the bias network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    /// Transistor gate bias
    Gate,
    /// Transistor drain bias
    Drain,
    /// Not part of the bias network
    #[default]
    #[serde(alias = "None")]
    Unassigned,
}

impl FromStr for Role {
    type Err = BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "gate" => Ok(Role::Gate),
            "drain" => Ok(Role::Drain),
            "none" | "unassigned" | "" => Ok(Role::Unassigned),
            other => Err(BenchError::InvalidSelection(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Gate => write!(f, "Gate"),
            Role::Drain => write!(f, "Drain"),
            Role::Unassigned => write!(f, "None"),
        }
    }
}

/// Static declaration seeding the pairing pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Supply name
    pub supply: String,
    /// Output name (`Output1` / `Output2`)
    pub output: String,
    /// Declared role
    pub role: Role,
}

impl Assignment {
    /// Resolve the output identity this assignment refers to.
    pub fn output_id(&self) -> BenchResult<OutputId> {
        let channel = parse_output_name(&self.output)
            .ok_or_else(|| BenchError::UnknownOutput(format!("{} {}", self.supply, self.output)))?;
        Ok(OutputId::new(&self.supply, channel))
    }
}

/// Target voltage (V) and current (A) for one output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Volts
    pub voltage: f64,
    /// Amps
    pub current: f64,
}

impl OutputSettings {
    /// Settings from amps.
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }

    /// Settings from a milliamp entry, as typed on the bench.
    pub fn from_milliamps(voltage: f64, milliamps: f64) -> Self {
        Self::new(voltage, milliamps / 1000.0)
    }
}

/// Single source of truth for per-output targets, keyed by `"{supply} {output}"`.
///
/// Cheap to clone; all clones share the same table. Readers that need a stable view for the
/// duration of a ramp or step take a [`snapshot`](Self::snapshot) or copy out the entries
/// they need up front.
#[derive(Debug, Clone, Default)]
pub struct OutputSettingsTable {
    inner: Arc<RwLock<HashMap<String, OutputSettings>>>,
}

impl OutputSettingsTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets for `output`, if any were ever recorded.
    pub async fn get(&self, output: &OutputId) -> Option<OutputSettings> {
        self.inner.read().await.get(&output.key()).copied()
    }

    /// Record targets for `output`.
    pub async fn set(&self, output: &OutputId, settings: OutputSettings) {
        self.inner.write().await.insert(output.key(), settings);
    }

    /// Forget targets for `output`.
    pub async fn remove(&self, output: &OutputId) -> Option<OutputSettings> {
        self.inner.write().await.remove(&output.key())
    }

    /// Consistent copy of the whole table.
    pub async fn snapshot(&self) -> HashMap<String, OutputSettings> {
        self.inner.read().await.clone()
    }

    /// Number of outputs with targets.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no targets are recorded.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_id_key_and_parse() {
        let id = OutputId::new("PS1", 2);
        assert_eq!(id.key(), "PS1 Output2");
        assert_eq!("PS1 Output2".parse::<OutputId>().unwrap(), id);
        assert_eq!("PS1 output2".parse::<OutputId>().unwrap(), id);
        assert!("PS1".parse::<OutputId>().is_err());
        assert!("PS1 Output3".parse::<OutputId>().is_err());
    }

    #[test]
    fn output_names_are_case_insensitive() {
        assert_eq!(parse_output_name("OUTPUT1"), Some(1));
        assert_eq!(parse_output_name("Output 2"), Some(2));
        assert_eq!(parse_output_name("ch1"), None);
    }

    #[test]
    fn roles_parse_loosely() {
        assert_eq!("gate".parse::<Role>().unwrap(), Role::Gate);
        assert_eq!("DRAIN".parse::<Role>().unwrap(), Role::Drain);
        assert_eq!("None".parse::<Role>().unwrap(), Role::Unassigned);
        assert!("source".parse::<Role>().is_err());
    }

    #[test]
    fn milliamps_are_normalised() {
        let s = OutputSettings::from_milliamps(12.0, 50.0);
        assert_eq!(s.current, 0.05);
        assert_eq!(s.voltage, 12.0);
    }

    #[tokio::test]
    async fn table_clones_share_state() {
        let table = OutputSettingsTable::new();
        let other = table.clone();
        let id = OutputId::new("PS2", 1);

        assert!(table.get(&id).await.is_none());
        other.set(&id, OutputSettings::new(-2.0, 0.01)).await;
        assert_eq!(table.get(&id).await, Some(OutputSettings::new(-2.0, 0.01)));

        let snapshot = table.snapshot().await;
        other.remove(&id).await;
        assert!(snapshot.contains_key("PS2 Output1"));
        assert!(table.is_empty().await);
    }
}
