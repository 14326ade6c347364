//! Spectrum analyzer sweep control.

use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::SweptAnalyzer;
use crate::hardware::transport::ScpiTransport;
use crate::setup::{TestConfig, KEY_HIGH_FREQ_MHZ, KEY_LOW_FREQ_MHZ};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Trigger source for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerMode {
    /// Free run (`IMM`)
    #[default]
    FreeRun,
    /// Video trigger (`VID`)
    Video,
    /// External trigger input (`EXT`)
    External,
}

impl TriggerMode {
    fn scpi(self) -> &'static str {
        match self {
            TriggerMode::FreeRun => "IMM",
            TriggerMode::Video => "VID",
            TriggerMode::External => "EXT",
        }
    }
}

/// Sweep parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Start frequency (Hz)
    pub start_hz: f64,
    /// Stop frequency (Hz)
    pub stop_hz: f64,
    /// Reference level (dBm)
    pub reference_level_dbm: f64,
    /// Resolution bandwidth (Hz)
    pub rbw_hz: f64,
    /// Trigger source
    pub trigger: TriggerMode,
    /// Arm and wait for the trigger instead of sweeping immediately
    pub arm_and_wait: bool,
}

/// Analyzer sweep state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SweepState {
    /// No sweep in progress
    #[default]
    Idle,
    /// Armed, waiting for a trigger
    Armed,
    /// Sweeping
    Sweeping,
}

/// SCPI spectrum analyzer.
#[derive(Default)]
pub struct SpectrumAnalyzer {
    transport: RwLock<Option<Arc<dyn ScpiTransport>>>,
    settings: RwLock<SweepSettings>,
    state: RwLock<SweepState>,
}

impl SpectrumAnalyzer {
    /// Disconnected analyzer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a transport; returns the instrument identification.
    pub async fn connect(&self, transport: Arc<dyn ScpiTransport>) -> BenchResult<String> {
        let idn = transport
            .query("*IDN?")
            .await
            .map_err(|e| BenchError::Transport(format!("spectrum analyzer *IDN?: {e:#}")))?;
        info!(idn = %idn, via = %transport.describe(), "Spectrum analyzer connected");
        *self.transport.write().await = Some(transport);
        Ok(idn)
    }

    /// Whether a transport is bound.
    pub async fn is_connected(&self) -> bool {
        self.transport.read().await.is_some()
    }

    /// Held sweep settings.
    pub async fn settings(&self) -> SweepSettings {
        self.settings.read().await.clone()
    }

    /// Replace the held sweep settings (no I/O).
    pub async fn set_settings(&self, settings: SweepSettings) {
        *self.settings.write().await = settings;
    }

    /// Current sweep state.
    pub async fn state(&self) -> SweepState {
        *self.state.read().await
    }

    async fn writer(&self) -> BenchResult<Arc<dyn ScpiTransport>> {
        self.transport
            .read()
            .await
            .clone()
            .ok_or_else(|| BenchError::NotConnected("spectrum analyzer".into()))
    }

    async fn write(transport: &Arc<dyn ScpiTransport>, command: &str) -> BenchResult<()> {
        debug!(command, "Spectrum analyzer write");
        transport
            .write(command)
            .await
            .map_err(|e| BenchError::Transport(format!("spectrum analyzer '{command}': {e:#}")))
    }

    /// Abort any sweep and return to idle.
    pub async fn stop_sweep(&self) -> BenchResult<()> {
        let transport = self.writer().await?;
        Self::write(&transport, "ABOR").await?;
        *self.state.write().await = SweepState::Idle;
        Ok(())
    }
}

#[async_trait]
impl SweptAnalyzer for SpectrumAnalyzer {
    async fn configure_from_setup(&self, config: &TestConfig) -> BenchResult<()> {
        let mut settings = self.settings.write().await;
        if let Some(low) = config.get(KEY_LOW_FREQ_MHZ) {
            settings.start_hz = low * 1e6;
        }
        if let Some(high) = config.get(KEY_HIGH_FREQ_MHZ) {
            settings.stop_hz = high * 1e6;
        }
        Ok(())
    }

    async fn start_sweep(&self) -> BenchResult<()> {
        let transport = self.writer().await?;
        let settings = self.settings().await;

        Self::write(&transport, &format!("FREQ:STAR {}", settings.start_hz)).await?;
        Self::write(&transport, &format!("FREQ:STOP {}", settings.stop_hz)).await?;
        Self::write(
            &transport,
            &format!("DISP:TRAC:Y:RLEV {}", settings.reference_level_dbm),
        )
        .await?;
        Self::write(&transport, &format!("BAND:RES {}", settings.rbw_hz)).await?;
        Self::write(&transport, &format!("TRIG:SOUR {}", settings.trigger.scpi())).await?;

        let state = if settings.arm_and_wait {
            Self::write(&transport, "INIT").await?;
            SweepState::Armed
        } else {
            Self::write(&transport, "INIT:IMM").await?;
            SweepState::Sweeping
        };
        *self.state.write().await = state;
        info!(?state, start_hz = settings.start_hz, stop_hz = settings.stop_hz, "Sweep started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTransport;

    async fn analyzer() -> (SpectrumAnalyzer, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new("SA").with_identity("Keysight Technologies,N9020A,MY1,A.1"));
        let sa = SpectrumAnalyzer::new();
        sa.connect(mock.clone()).await.unwrap();
        (sa, mock)
    }

    #[tokio::test]
    async fn free_run_sweep() {
        let (sa, mock) = analyzer().await;
        let cfg = TestConfig::parse("LOSWPFREQMZ=1000\nHISWPFREQMZ=2000").unwrap();
        sa.configure_from_setup(&cfg).await.unwrap();
        sa.set_settings(SweepSettings {
            reference_level_dbm: -10.0,
            rbw_hz: 1e6,
            ..sa.settings().await
        })
        .await;
        sa.start_sweep().await.unwrap();

        assert_eq!(
            mock.commands()[1..],
            [
                "FREQ:STAR 1000000000",
                "FREQ:STOP 2000000000",
                "DISP:TRAC:Y:RLEV -10",
                "BAND:RES 1000000",
                "TRIG:SOUR IMM",
                "INIT:IMM",
            ]
        );
        assert_eq!(sa.state().await, SweepState::Sweeping);

        sa.stop_sweep().await.unwrap();
        assert_eq!(sa.state().await, SweepState::Idle);
        assert_eq!(mock.commands().last().map(String::as_str), Some("ABOR"));
    }

    #[tokio::test]
    async fn arm_and_wait_on_external_trigger() {
        let (sa, mock) = analyzer().await;
        sa.set_settings(SweepSettings {
            trigger: TriggerMode::External,
            arm_and_wait: true,
            ..Default::default()
        })
        .await;
        sa.start_sweep().await.unwrap();

        let commands = mock.commands();
        assert!(commands.contains(&"TRIG:SOUR EXT".to_string()));
        assert_eq!(commands.last().map(String::as_str), Some("INIT"));
        assert_eq!(sa.state().await, SweepState::Armed);
    }

    #[tokio::test]
    async fn failed_sweep_keeps_state() {
        let (sa, mock) = analyzer().await;
        mock.fail_on("INIT");
        assert!(sa.start_sweep().await.is_err());
        assert_eq!(sa.state().await, SweepState::Idle);
    }
}
