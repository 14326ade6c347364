//! Setup and role files.
//!
//! Two flat text formats are read from disk:
//!
//! - **Setup file**: one `KEY=VALUE` per line, value parsed as `f64`. Later duplicates
//!   overwrite earlier ones. Blank lines and lines starting with `#` are skipped.
//! - **Role file**: one `SUPPLY_OUTPUT_ROLE` triple per line, e.g. `PS2_Output2_Drain`.
//!   Lines that do not form a valid triple are ignored.

use crate::bench::output::{parse_output_name, OutputId, Role};
use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Gate bias voltage (V)
pub const KEY_GATE_VOLTAGE: &str = "VGDRV";
/// Drain bias voltage (V)
pub const KEY_DRAIN_VOLTAGE: &str = "VDDRV";
/// Bias current limit shared by gate and drain (A)
pub const KEY_BIAS_CURRENT: &str = "IDDRV";
/// Low sweep frequency (MHz)
pub const KEY_LOW_FREQ_MHZ: &str = "LOSWPFREQMZ";
/// High sweep frequency (MHz)
pub const KEY_HIGH_FREQ_MHZ: &str = "HISWPFREQMZ";
/// Low sweep power (dBm)
pub const KEY_LOW_POWER_DBM: &str = "LOSWPPWR";

/// Numeric test parameters loaded from a setup file.
///
/// Immutable once handed to a sequence run; the runner keeps its own copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestConfig {
    values: BTreeMap<String, f64>,
}

impl TestConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse setup file text.
    pub fn parse(text: &str) -> BenchResult<Self> {
        let mut values = BTreeMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_error = |reason: &str| BenchError::ConfigParse {
                line: index + 1,
                content: line.to_string(),
                reason: reason.to_string(),
            };
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| parse_error("expected KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_error("empty key"));
            }
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|e: std::num::ParseFloatError| parse_error(&e.to_string()))?;
            values.insert(key.to_string(), value);
        }
        Ok(Self { values })
    }

    /// Read and parse a setup file.
    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        debug!(path = %path.display(), keys = config.len(), "Loaded setup file");
        Ok(config)
    }

    /// Value for `key`.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Value for `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }

    /// Set `key`, overwriting any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys were loaded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, f64)> for TestConfig {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One parsed line of a role file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleLine {
    /// Output the line refers to
    pub output: OutputId,
    /// Role to assign
    pub role: Role,
}

impl RoleLine {
    /// Parse one `SUPPLY_OUTPUT_ROLE` line. `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split('_').collect();
        let [supply, output, role] = parts.as_slice() else {
            return None;
        };
        let channel = parse_output_name(output)?;
        let role = role.parse::<Role>().ok()?;
        Some(Self {
            output: OutputId::new(*supply, channel),
            role,
        })
    }
}

/// Parse a role file, ignoring lines that are not valid triples.
pub fn parse_role_file(text: &str) -> Vec<RoleLine> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parsed = RoleLine::parse(line);
            if parsed.is_none() {
                debug!(line, "Ignoring role file line");
            }
            parsed
        })
        .collect()
}

/// Read and parse a role file.
pub fn load_role_file(path: impl AsRef<Path>) -> BenchResult<Vec<RoleLine>> {
    Ok(parse_role_file(&fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_setup_text() {
        let cfg = TestConfig::parse("VGDRV=-2.5\n\n# comment\nIDDRV = 0.05\r\nVDDRV=12.0\n").unwrap();
        assert_eq!(cfg.get(KEY_GATE_VOLTAGE), Some(-2.5));
        assert_eq!(cfg.get(KEY_BIAS_CURRENT), Some(0.05));
        assert_eq!(cfg.get(KEY_DRAIN_VOLTAGE), Some(12.0));
        assert_eq!(cfg.len(), 3);
        assert_eq!(cfg.get_or(KEY_LOW_FREQ_MHZ, 1000.0), 1000.0);
    }

    #[test]
    fn later_duplicates_win() {
        let cfg = TestConfig::parse("VGDRV=-2\nVGDRV=-3").unwrap();
        assert_eq!(cfg.get("VGDRV"), Some(-3.0));
    }

    #[test]
    fn malformed_lines_report_position() {
        match TestConfig::parse("VGDRV=-2\nVDDRV=twelve") {
            Err(BenchError::ConfigParse { line, content, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(content, "VDDRV=twelve");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            TestConfig::parse("JUSTAKEY"),
            Err(BenchError::ConfigParse { line: 1, .. })
        ));
        assert!(TestConfig::parse("=5").is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LOSWPFREQMZ=2400").unwrap();
        writeln!(file, "LOSWPPWR=-10").unwrap();
        let cfg = TestConfig::load(file.path()).unwrap();
        assert_eq!(cfg.get(KEY_LOW_FREQ_MHZ), Some(2400.0));
        assert_eq!(cfg.get(KEY_LOW_POWER_DBM), Some(-10.0));

        assert!(matches!(
            TestConfig::load("/definitely/not/here.txt"),
            Err(BenchError::Io(_))
        ));
    }

    #[test]
    fn role_lines() {
        assert_eq!(
            RoleLine::parse("PS2_output2_Drain"),
            Some(RoleLine {
                output: OutputId::new("PS2", 2),
                role: Role::Drain
            })
        );
        assert_eq!(
            RoleLine::parse("PS1_OUTPUT1_None").map(|l| l.role),
            Some(Role::Unassigned)
        );
        assert!(RoleLine::parse("PS1_Output1").is_none());
        assert!(RoleLine::parse("PS1_Output3_Gate").is_none());
        assert!(RoleLine::parse("PS_1_Output1_Gate").is_none());

        let lines = parse_role_file("PS1_Output1_Gate\ngarbage\n\nPS4_Output2_Drain\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].output, OutputId::new("PS4", 2));
    }
}
