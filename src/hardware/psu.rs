//! Power Supply Driver Registry
//!
//! Maps an instrument identification string (`*IDN?` reply) onto one of a fixed set of
//! command dialects, and exposes a uniform channel-level control surface over them.
//!
//! # Supported Models
//!
//! | IDN token | Dialect | Addressing |
//! |-----------|---------|------------|
//! | `E36484`, `E3648A` | `AgilentE3648A` | `INST:SEL OUT{ch}` before every command |
//! | `U2044XA` | `KeysightU2044XA` | whole instrument, `SOUR:` prefixed |
//! | `E36312A` | `KeysightE36312A` | `INST:SEL CH{ch}` before every command |
//! | `E36232A` | `KeysightE36232A` | whole instrument, `APPL` + `OUTP 1/0` |
//! | `E36234A` | `KeysightE36234A` | `INST:SEL CH{ch}` before every command |
//!
//! Resolution is first-match over the table in that order. No token is a substring of
//! another today; if one ever is, the earlier entry wins.

use crate::error::{BenchError, BenchResult};
use crate::hardware::transport::ScpiTransport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Command dialect of a bench power supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PsuDialect {
    /// Agilent E3648A dual-output supply
    AgilentE3648A,
    /// Keysight U2044XA (single channel)
    KeysightU2044XA,
    /// Keysight E36312A triple-output supply
    KeysightE36312A,
    /// Keysight E36232A (whole-instrument APPL dialect)
    KeysightE36232A,
    /// Keysight E36234A dual-output supply
    KeysightE36234A,
}

/// Ordered model token table. Order matters: first match wins.
pub const MODEL_TABLE: &[(&str, PsuDialect)] = &[
    ("E36484", PsuDialect::AgilentE3648A),
    ("E3648A", PsuDialect::AgilentE3648A),
    ("U2044XA", PsuDialect::KeysightU2044XA),
    ("E36312A", PsuDialect::KeysightE36312A),
    ("E36232A", PsuDialect::KeysightE36232A),
    ("E36234A", PsuDialect::KeysightE36234A),
];

/// Select the dialect for an identification string.
pub fn resolve(idn: &str) -> BenchResult<PsuDialect> {
    MODEL_TABLE
        .iter()
        .find(|(token, _)| idn.contains(token))
        .map(|(_, dialect)| *dialect)
        .ok_or_else(|| BenchError::UnrecognizedModel {
            idn: idn.trim().to_string(),
        })
}

impl PsuDialect {
    /// Whether this dialect addresses individual channels (vs. the whole instrument).
    pub fn selects_channel(self) -> bool {
        self.select_command(1).is_some()
    }

    fn select_command(self, ch: u8) -> Option<String> {
        match self {
            PsuDialect::AgilentE3648A => Some(format!("INST:SEL OUT{ch}")),
            PsuDialect::KeysightE36312A | PsuDialect::KeysightE36234A => {
                Some(format!("INST:SEL CH{ch}"))
            }
            PsuDialect::KeysightU2044XA | PsuDialect::KeysightE36232A => None,
        }
    }

    fn voltage_command(self, voltage: f64) -> String {
        match self {
            PsuDialect::KeysightU2044XA => format!("SOUR:VOLT {voltage}"),
            // the APPL form also programs current; this dialect pins it to 0
            PsuDialect::KeysightE36232A => format!("APPL {voltage}, 0"),
            _ => format!("VOLT {voltage}"),
        }
    }

    fn current_command(self, current: f64) -> Option<String> {
        match self {
            PsuDialect::KeysightU2044XA => Some(format!("SOUR:CURR {current}")),
            PsuDialect::KeysightE36232A => None,
            _ => Some(format!("CURR {current}")),
        }
    }

    fn output_command(self, on: bool) -> &'static str {
        match (self, on) {
            (PsuDialect::KeysightE36232A, true) => "OUTP 1",
            (PsuDialect::KeysightE36232A, false) => "OUTP 0",
            (_, true) => "OUTP ON",
            (_, false) => "OUTP OFF",
        }
    }
}

impl fmt::Display for PsuDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A connected supply bound to its dialect.
///
/// Created once per successful connection and never mutated; reconnecting builds a new one.
pub struct SupplyAdapter {
    dialect: PsuDialect,
    transport: Arc<dyn ScpiTransport>,
}

impl SupplyAdapter {
    /// Bind a transport to a dialect.
    pub fn new(dialect: PsuDialect, transport: Arc<dyn ScpiTransport>) -> Self {
        Self { dialect, transport }
    }

    /// Query `*IDN?` over the transport and build the matching adapter.
    pub async fn identify(transport: Arc<dyn ScpiTransport>) -> BenchResult<Self> {
        let idn = transport
            .query("*IDN?")
            .await
            .map_err(|e| BenchError::Transport(format!("*IDN? on {}: {e:#}", transport.describe())))?;
        let dialect = resolve(&idn)?;
        debug!(%dialect, idn = %idn.trim(), "Resolved supply dialect");
        Ok(Self::new(dialect, transport))
    }

    /// The dialect this adapter speaks.
    pub fn dialect(&self) -> PsuDialect {
        self.dialect
    }

    /// Description of the underlying connection.
    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    async fn send(&self, ch: u8, command: &str) -> BenchResult<()> {
        self.transport
            .write(command)
            .await
            .map_err(|e| BenchError::instrument(self.dialect, ch, &e))
    }

    /// Route subsequent commands to `ch`. No-op on whole-instrument dialects.
    pub async fn select_channel(&self, ch: u8) -> BenchResult<()> {
        match self.dialect.select_command(ch) {
            Some(command) => self.send(ch, &command).await,
            None => Ok(()),
        }
    }

    /// Program the output voltage of `ch`.
    pub async fn set_voltage(&self, ch: u8, voltage: f64) -> BenchResult<()> {
        self.select_channel(ch).await?;
        self.send(ch, &self.dialect.voltage_command(voltage)).await
    }

    /// Program the current limit of `ch`. No-op where the dialect has no separate current set.
    pub async fn set_current(&self, ch: u8, current: f64) -> BenchResult<()> {
        match self.dialect.current_command(current) {
            Some(command) => {
                self.select_channel(ch).await?;
                self.send(ch, &command).await
            }
            None => Ok(()),
        }
    }

    /// Energise `ch`.
    pub async fn enable_output(&self, ch: u8) -> BenchResult<()> {
        self.select_channel(ch).await?;
        self.send(ch, self.dialect.output_command(true)).await
    }

    /// De-energise `ch`.
    pub async fn disable_output(&self, ch: u8) -> BenchResult<()> {
        self.select_channel(ch).await?;
        self.send(ch, self.dialect.output_command(false)).await
    }

    /// Program voltage, then current, then energise. Never energises before programming.
    pub async fn apply_output(&self, ch: u8, voltage: f64, current: f64) -> BenchResult<()> {
        self.set_voltage(ch, voltage).await?;
        self.set_current(ch, current).await?;
        self.enable_output(ch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTransport;

    fn adapter(dialect: PsuDialect) -> (SupplyAdapter, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new("PS"));
        (SupplyAdapter::new(dialect, mock.clone()), mock)
    }

    #[test]
    fn resolves_every_known_token() {
        let cases = [
            ("Agilent Technologies,E3648A,0,1.7", PsuDialect::AgilentE3648A),
            ("Agilent Technologies,E36484,0,1.7", PsuDialect::AgilentE3648A),
            ("Keysight Technologies,U2044XA,MY1,A.01", PsuDialect::KeysightU2044XA),
            ("Keysight Technologies,E36312A,MY1,2.1", PsuDialect::KeysightE36312A),
            ("Keysight Technologies,E36232A,MY1,1.0", PsuDialect::KeysightE36232A),
            ("Keysight Technologies,E36234A,MY1,1.0", PsuDialect::KeysightE36234A),
        ];
        for (idn, expected) in cases {
            assert_eq!(resolve(idn).unwrap(), expected, "{idn}");
        }
    }

    #[test]
    fn first_listed_token_wins() {
        // both tokens present, the earlier table entry decides
        assert_eq!(
            resolve("E36484 E36312A").unwrap(),
            PsuDialect::AgilentE3648A
        );
        assert_eq!(
            resolve("E36234A,U2044XA").unwrap(),
            PsuDialect::KeysightU2044XA
        );
        for &(token, _) in MODEL_TABLE {
            for &(other, _) in MODEL_TABLE {
                if other != token {
                    assert!(!other.contains(token), "{token} is a substring of {other}");
                }
            }
        }
    }

    #[test]
    fn unknown_model_is_rejected() {
        match resolve("Rohde&Schwarz,HMP4040,123,1.0\n") {
            Err(BenchError::UnrecognizedModel { idn }) => {
                assert_eq!(idn, "Rohde&Schwarz,HMP4040,123,1.0")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn channel_selection_flags() {
        assert!(PsuDialect::AgilentE3648A.selects_channel());
        assert!(PsuDialect::KeysightE36312A.selects_channel());
        assert!(PsuDialect::KeysightE36234A.selects_channel());
        assert!(!PsuDialect::KeysightU2044XA.selects_channel());
        assert!(!PsuDialect::KeysightE36232A.selects_channel());
    }

    #[tokio::test]
    async fn agilent_selects_before_every_command() {
        let (psu, mock) = adapter(PsuDialect::AgilentE3648A);
        psu.apply_output(2, 5.0, 0.1).await.unwrap();
        psu.disable_output(2).await.unwrap();
        assert_eq!(
            mock.commands(),
            vec![
                "INST:SEL OUT2",
                "VOLT 5",
                "INST:SEL OUT2",
                "CURR 0.1",
                "INST:SEL OUT2",
                "OUTP ON",
                "INST:SEL OUT2",
                "OUTP OFF",
            ]
        );
    }

    #[tokio::test]
    async fn e36312a_uses_ch_addressing() {
        let (psu, mock) = adapter(PsuDialect::KeysightE36312A);
        psu.apply_output(1, -2.5, 0.05).await.unwrap();
        assert_eq!(
            mock.commands(),
            vec![
                "INST:SEL CH1",
                "VOLT -2.5",
                "INST:SEL CH1",
                "CURR 0.05",
                "INST:SEL CH1",
                "OUTP ON",
            ]
        );
    }

    #[tokio::test]
    async fn u2044xa_is_channel_less() {
        let (psu, mock) = adapter(PsuDialect::KeysightU2044XA);
        psu.apply_output(2, 3.3, 0.2).await.unwrap();
        psu.disable_output(2).await.unwrap();
        assert_eq!(
            mock.commands(),
            vec!["SOUR:VOLT 3.3", "SOUR:CURR 0.2", "OUTP ON", "OUTP OFF"]
        );
    }

    #[tokio::test]
    async fn e36232a_uses_appl_and_numeric_output() {
        let (psu, mock) = adapter(PsuDialect::KeysightE36232A);
        psu.apply_output(1, 12.0, 0.5).await.unwrap();
        psu.disable_output(1).await.unwrap();
        assert_eq!(mock.commands(), vec!["APPL 12, 0", "OUTP 1", "OUTP 0"]);
    }

    #[tokio::test]
    async fn transport_failure_carries_kind_and_channel() {
        let (psu, mock) = adapter(PsuDialect::KeysightE36234A);
        mock.fail_on("CURR");
        let err = psu.apply_output(2, 1.0, 0.1).await.unwrap_err();
        match err {
            BenchError::InstrumentCommand { kind, channel, message } => {
                assert_eq!(kind, PsuDialect::KeysightE36234A);
                assert_eq!(channel, 2);
                assert!(message.contains("CURR 0.1"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // output never energised after the failed current programming
        assert!(!mock.commands().iter().any(|c| c == "OUTP ON"));
    }

    #[tokio::test]
    async fn identify_builds_matching_adapter() {
        let mock = Arc::new(
            MockTransport::new("PS4").with_identity("Keysight Technologies,E36234A,MY6100,1.0.4"),
        );
        let psu = SupplyAdapter::identify(mock).await.unwrap();
        assert_eq!(psu.dialect(), PsuDialect::KeysightE36234A);

        let unknown = Arc::new(MockTransport::new("PS5").with_identity("ACME,PSU-9000,1,1"));
        assert!(matches!(
            SupplyAdapter::identify(unknown).await,
            Err(BenchError::UnrecognizedModel { .. })
        ));
    }
}
