//! RF Signal Generator
//!
//! Holds the desired frequency, power, waveform and RF output state, and pushes them to a
//! SCPI signal generator on `apply_settings`. The held settings can be edited while
//! disconnected; commands require a connection.

use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::RfSource;
use crate::hardware::transport::ScpiTransport;
use crate::setup::{TestConfig, KEY_LOW_FREQ_MHZ, KEY_LOW_POWER_DBM};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Directory holding user ARB waveforms on the instrument.
pub const WAVEFORM_DIR: &str = "/var/user/Waveforms";

const ARB_EXTENSIONS: [&str; 3] = [".wv", ".csv", ".txt"];

/// Frequency unit accepted from the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyUnit {
    /// Hertz
    Hz,
    /// Kilohertz
    KHz,
    /// Megahertz
    MHz,
    /// Gigahertz
    GHz,
}

impl FrequencyUnit {
    /// Convert `value` in this unit to Hz.
    pub fn to_hz(self, value: f64) -> f64 {
        match self {
            FrequencyUnit::Hz => value,
            FrequencyUnit::KHz => value * 1e3,
            FrequencyUnit::MHz => value * 1e6,
            FrequencyUnit::GHz => value * 1e9,
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "hz" => Ok(FrequencyUnit::Hz),
            "khz" => Ok(FrequencyUnit::KHz),
            "mhz" => Ok(FrequencyUnit::MHz),
            "ghz" => Ok(FrequencyUnit::GHz),
            other => Err(BenchError::InvalidSelection(format!(
                "unknown frequency unit '{other}'"
            ))),
        }
    }
}

/// Output waveform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Waveform {
    /// Continuous wave
    #[default]
    Sine,
    /// Square
    Square,
    /// Pulse
    Pulse,
    /// Ramp
    Ramp,
    /// Noise
    Noise,
    /// Named ARB waveform stored on the instrument
    Arb {
        /// File name in the waveform directory
        name: String,
        /// Loop playback (otherwise play once)
        repeat: bool,
    },
}

/// Settings pushed by `apply_settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSettings {
    /// Carrier frequency (Hz)
    pub frequency_hz: f64,
    /// Output power (dBm)
    pub power_dbm: f64,
    /// Waveform
    pub waveform: Waveform,
    /// RF output enabled
    pub rf_on: bool,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            frequency_hz: 0.0,
            power_dbm: 0.0,
            waveform: Waveform::Sine,
            rf_on: false,
        }
    }
}

/// SCPI signal generator.
#[derive(Default)]
pub struct SignalGenerator {
    transport: RwLock<Option<Arc<dyn ScpiTransport>>>,
    settings: RwLock<SignalSettings>,
}

impl SignalGenerator {
    /// Disconnected generator with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a transport; returns the instrument identification.
    pub async fn connect(&self, transport: Arc<dyn ScpiTransport>) -> BenchResult<String> {
        let idn = transport
            .query("*IDN?")
            .await
            .map_err(|e| BenchError::Transport(format!("signal generator *IDN?: {e:#}")))?;
        info!(idn = %idn, via = %transport.describe(), "Signal generator connected");
        *self.transport.write().await = Some(transport);
        Ok(idn)
    }

    /// Whether a transport is bound.
    pub async fn is_connected(&self) -> bool {
        self.transport.read().await.is_some()
    }

    /// Current held settings.
    pub async fn settings(&self) -> SignalSettings {
        self.settings.read().await.clone()
    }

    /// Replace the held settings (no I/O).
    pub async fn set_settings(&self, settings: SignalSettings) {
        *self.settings.write().await = settings;
    }

    /// Set the held frequency from a value and unit (no I/O).
    pub async fn set_frequency(&self, value: f64, unit: FrequencyUnit) {
        self.settings.write().await.frequency_hz = unit.to_hz(value);
    }

    /// Set the held power (no I/O).
    pub async fn set_power(&self, dbm: f64) {
        self.settings.write().await.power_dbm = dbm;
    }

    async fn transport(&self) -> BenchResult<Arc<dyn ScpiTransport>> {
        self.transport
            .read()
            .await
            .clone()
            .ok_or_else(|| BenchError::NotConnected("signal generator".into()))
    }

    async fn write(&self, transport: &Arc<dyn ScpiTransport>, command: &str) -> BenchResult<()> {
        debug!(command, "Signal generator write");
        transport
            .write(command)
            .await
            .map_err(|e| BenchError::Transport(format!("signal generator '{command}': {e:#}")))
    }

    async fn select_arb(
        &self,
        transport: &Arc<dyn ScpiTransport>,
        name: &str,
        repeat: bool,
    ) -> BenchResult<()> {
        self.write(transport, &format!("SOUR:ARB:WAV '{name}'")).await?;
        self.write(transport, "SOUR:FUNC ARB").await?;
        self.write(
            transport,
            if repeat { "SOUR:ARB:REP ON" } else { "SOUR:ARB:REP OFF" },
        )
        .await
    }

    /// Select a stored ARB waveform and make it the held waveform.
    pub async fn load_arb_waveform(&self, name: &str, repeat: bool) -> BenchResult<()> {
        let transport = self.transport().await?;
        self.select_arb(&transport, name, repeat).await?;
        self.settings.write().await.waveform = Waveform::Arb {
            name: name.to_string(),
            repeat,
        };
        Ok(())
    }

    /// List ARB waveform files stored on the instrument.
    pub async fn list_arb_waveforms(&self) -> BenchResult<Vec<String>> {
        let transport = self.transport().await?;
        self.write(&transport, &format!("MMEM:CD '{WAVEFORM_DIR}'")).await?;
        let query = format!("MMEM:CAT? \"{WAVEFORM_DIR}\"");
        let catalog = transport
            .query(&query)
            .await
            .map_err(|e| BenchError::Transport(format!("signal generator '{query}': {e:#}")))?;
        Ok(parse_catalog(&catalog))
    }
}

/// Pick waveform file names out of a `MMEM:CAT?` reply.
///
/// The reply alternates name and size fields; only names with a waveform extension are kept.
pub fn parse_catalog(reply: &str) -> Vec<String> {
    reply
        .trim()
        .split(',')
        .step_by(2)
        .map(|entry| entry.trim().trim_matches('"').to_string())
        .filter(|name| {
            let lower = name.to_lowercase();
            ARB_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        })
        .collect()
}

#[async_trait]
impl RfSource for SignalGenerator {
    async fn configure_from_setup(&self, config: &TestConfig) -> BenchResult<()> {
        let mut settings = self.settings.write().await;
        settings.frequency_hz = FrequencyUnit::MHz.to_hz(config.get_or(KEY_LOW_FREQ_MHZ, 1000.0));
        settings.power_dbm = config.get_or(KEY_LOW_POWER_DBM, 10.0);
        settings.rf_on = true;
        debug!(
            frequency_hz = settings.frequency_hz,
            power_dbm = settings.power_dbm,
            "Signal generator configured from setup"
        );
        Ok(())
    }

    async fn apply_settings(&self) -> BenchResult<()> {
        let transport = self.transport().await?;
        let settings = self.settings().await;

        self.write(&transport, &format!("FREQ {}", settings.frequency_hz))
            .await?;
        self.write(&transport, &format!("POW {}", settings.power_dbm))
            .await?;
        match &settings.waveform {
            Waveform::Arb { name, repeat } => self.select_arb(&transport, name, *repeat).await?,
            standard => {
                let function = match standard {
                    Waveform::Square => "SQU",
                    Waveform::Pulse => "PULS",
                    Waveform::Ramp => "RAMP",
                    Waveform::Noise => "NOIS",
                    _ => "SIN",
                };
                self.write(&transport, &format!("FUNC {function}")).await?;
            }
        }
        self.write(&transport, if settings.rf_on { "OUTP ON" } else { "OUTP OFF" })
            .await?;
        info!(
            frequency_hz = settings.frequency_hz,
            power_dbm = settings.power_dbm,
            rf_on = settings.rf_on,
            "Signal generator settings applied"
        );
        Ok(())
    }

    async fn rf_off(&self) -> BenchResult<()> {
        let transport = self.transport().await?;
        self.write(&transport, "OUTP OFF").await?;
        self.settings.write().await.rf_on = false;
        info!("RF output off");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTransport;

    async fn generator() -> (SignalGenerator, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new("SG").with_identity("Keysight Technologies,N5182B,MY1,1.0"));
        let sg = SignalGenerator::new();
        sg.connect(mock.clone()).await.unwrap();
        (sg, mock)
    }

    #[test]
    fn frequency_units() {
        assert_eq!(FrequencyUnit::KHz.to_hz(2.5), 2500.0);
        assert_eq!(FrequencyUnit::GHz.to_hz(1.0), 1e9);
        assert_eq!("mhz".parse::<FrequencyUnit>().unwrap(), FrequencyUnit::MHz);
        assert!("THz".parse::<FrequencyUnit>().is_err());
    }

    #[tokio::test]
    async fn configure_from_setup_then_apply() {
        let (sg, mock) = generator().await;
        let cfg = TestConfig::parse("LOSWPFREQMZ=2400\nLOSWPPWR=-5").unwrap();
        sg.configure_from_setup(&cfg).await.unwrap();
        sg.apply_settings().await.unwrap();

        assert_eq!(
            mock.commands(),
            vec!["*IDN?", "FREQ 2400000000", "POW -5", "FUNC SIN", "OUTP ON"]
        );
    }

    #[tokio::test]
    async fn setup_defaults() {
        let sg = SignalGenerator::new();
        sg.configure_from_setup(&TestConfig::new()).await.unwrap();
        let settings = sg.settings().await;
        assert_eq!(settings.frequency_hz, 1e9);
        assert_eq!(settings.power_dbm, 10.0);
        assert!(settings.rf_on);
    }

    #[tokio::test]
    async fn arb_waveform_and_rf_off() {
        let (sg, mock) = generator().await;
        sg.load_arb_waveform("PULSE_10US.wv", false).await.unwrap();
        sg.set_frequency(3.0, FrequencyUnit::GHz).await;
        sg.apply_settings().await.unwrap();
        sg.rf_off().await.unwrap();

        assert_eq!(
            mock.commands()[1..],
            [
                "SOUR:ARB:WAV 'PULSE_10US.wv'",
                "SOUR:FUNC ARB",
                "SOUR:ARB:REP OFF",
                "FREQ 3000000000",
                "POW 0",
                "SOUR:ARB:WAV 'PULSE_10US.wv'",
                "SOUR:FUNC ARB",
                "SOUR:ARB:REP OFF",
                "OUTP OFF",
                "OUTP OFF",
            ]
        );
        assert!(!sg.settings().await.rf_on);
    }

    #[tokio::test]
    async fn lists_waveforms_from_catalog() {
        let mock = Arc::new(
            MockTransport::new("SG")
                .with_identity("Keysight Technologies,N5182B,MY1,1.0")
                .with_response(
                    "MMEM:CAT? \"/var/user/Waveforms\"",
                    "\"CW.wv\",1024,\"notes.doc\",12,\"chirp.CSV\",2048",
                ),
        );
        let sg = SignalGenerator::new();
        sg.connect(mock.clone()).await.unwrap();

        let files = sg.list_arb_waveforms().await.unwrap();
        assert_eq!(files, vec!["CW.wv", "chirp.CSV"]);
        assert!(mock
            .commands()
            .contains(&"MMEM:CD '/var/user/Waveforms'".to_string()));
    }

    #[tokio::test]
    async fn commands_need_a_connection() {
        let sg = SignalGenerator::new();
        assert!(matches!(
            sg.apply_settings().await,
            Err(BenchError::NotConnected(_))
        ));
    }
}
