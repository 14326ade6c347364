//! Workbench
//!
//! The bench context object. A `Workbench` is built from a [`BenchConfig`] and owns every
//! piece of bench state: the output settings table, the supply bank, the pairing engine, the
//! RF instruments and the sequence runner. Nothing lives at module level; two workbenches in
//! one process are fully independent.
//!
//! The methods here are the control surface a front end (CLI, GUI, remote API) drives.

use crate::bench::output::{OutputId, OutputSettingsTable};
use crate::bench::pairing::{Pairing, PairingEngine, PairingPool, PairingStatus};
use crate::bench::supplies::SupplyBank;
use crate::config::BenchConfig;
use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::{BiasSupply, RfSource, SweptAnalyzer};
use crate::hardware::mock::{command_log, CommandLog, MockTransport};
use crate::hardware::psu::PsuDialect;
use crate::hardware::signal_generator::SignalGenerator;
use crate::hardware::spectrum_analyzer::SpectrumAnalyzer;
use crate::hardware::transport::{open_transport, ScpiTransport};
use crate::report::{BatchReport, OperationOutcome};
use crate::sequence::runner::{RunReport, SequenceRunner};
use crate::setup::{load_role_file, TestConfig};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Identification returned by simulated supplies.
pub const SIMULATED_SUPPLY_IDN: &str = "Keysight Technologies,E36312A,SIM0001,1.0.0";
/// Identification returned by the simulated signal generator.
pub const SIMULATED_GENERATOR_IDN: &str = "Keysight Technologies,N5182B,SIM0002,1.0.0";
/// Identification returned by the simulated spectrum analyzer.
pub const SIMULATED_ANALYZER_IDN: &str = "Keysight Technologies,N9020A,SIM0003,1.0.0";

const GENERATOR: &str = "signal generator";
const ANALYZER: &str = "spectrum analyzer";

/// Bias side of the sequence: table writes and bulk apply go to the supply bank, power-down
/// ramps active pairings before switching every output off.
struct BiasController {
    supplies: Arc<SupplyBank>,
    pairing: Arc<PairingEngine>,
}

#[async_trait]
impl BiasSupply for BiasController {
    async fn apply_bias_targets(&self, config: &TestConfig) -> BenchResult<()> {
        self.supplies.apply_bias_targets(config).await
    }

    async fn apply_all(&self) -> BatchReport {
        self.supplies.apply_all().await
    }

    async fn bias_off(&self) -> BatchReport {
        let mut report = BatchReport::new("bias_off");
        for status in self.pairing.pairings().await {
            if !status.active {
                continue;
            }
            let result = self.pairing.deactivate(&status.pairing).await;
            if let Err(e) = &result {
                warn!(pairing = %status.pairing, error = %e, "Ramp down failed");
            }
            report.push(OperationOutcome::from_result(status.pairing.to_string(), &result));
        }
        report.extend(self.supplies.disable_all().await);
        report
    }
}

/// Mock transports attached by [`Workbench::connect_simulated`].
pub struct SimulatedBench {
    /// Log shared by every simulated instrument
    pub log: CommandLog,
    /// Supply transports by supply name
    pub supplies: BTreeMap<String, Arc<MockTransport>>,
    /// Signal generator transport
    pub signal_generator: Arc<MockTransport>,
    /// Spectrum analyzer transport
    pub spectrum_analyzer: Arc<MockTransport>,
}

impl SimulatedBench {
    /// Transport of supply `name`.
    pub fn supply(&self, name: &str) -> Option<&Arc<MockTransport>> {
        self.supplies.get(name)
    }
}

/// The bench context object.
pub struct Workbench {
    config: BenchConfig,
    settings: OutputSettingsTable,
    supplies: Arc<SupplyBank>,
    pairing: Arc<PairingEngine>,
    signal_generator: Arc<SignalGenerator>,
    spectrum_analyzer: Arc<SpectrumAnalyzer>,
    runner: SequenceRunner,
}

impl Workbench {
    /// Build a disconnected workbench from a validated configuration.
    pub fn new(config: BenchConfig) -> BenchResult<Self> {
        config.validate()?;

        let settings = OutputSettingsTable::new();
        let supplies = Arc::new(SupplyBank::new(
            &config.supplies,
            &config.assignments,
            settings.clone(),
        )?);
        let pool = PairingPool::from_assignments(&config.assignments)?;
        let pairing = Arc::new(PairingEngine::new(
            pool,
            settings.clone(),
            supplies.clone(),
        ));
        let signal_generator = Arc::new(SignalGenerator::new());
        let spectrum_analyzer = Arc::new(SpectrumAnalyzer::new());

        let bias: Arc<dyn BiasSupply> = Arc::new(BiasController {
            supplies: supplies.clone(),
            pairing: pairing.clone(),
        });
        let rf: Arc<dyn RfSource> = signal_generator.clone();
        let analyzer: Arc<dyn SweptAnalyzer> = spectrum_analyzer.clone();
        let runner = SequenceRunner::new(bias, rf, analyzer)
            .with_delays(config.sequence.delays)
            .with_shutdown_mode(config.sequence.shutdown);

        info!(
            name = %config.application.name,
            supplies = config.supplies.len(),
            assignments = config.assignments.len(),
            "Workbench created"
        );

        Ok(Self {
            config,
            settings,
            supplies,
            pairing,
            signal_generator,
            spectrum_analyzer,
            runner,
        })
    }

    /// Configuration the workbench was built from.
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Shared output settings table.
    pub fn settings(&self) -> &OutputSettingsTable {
        &self.settings
    }

    /// Supply bank.
    pub fn supplies(&self) -> &Arc<SupplyBank> {
        &self.supplies
    }

    /// Pairing engine.
    pub fn pairing(&self) -> &Arc<PairingEngine> {
        &self.pairing
    }

    /// Signal generator.
    pub fn signal_generator(&self) -> &Arc<SignalGenerator> {
        &self.signal_generator
    }

    /// Spectrum analyzer.
    pub fn spectrum_analyzer(&self) -> &Arc<SpectrumAnalyzer> {
        &self.spectrum_analyzer
    }

    /// Sequence runner.
    pub fn runner(&self) -> &SequenceRunner {
        &self.runner
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Open and identify every instrument that has an address.
    ///
    /// Instruments without an address are reported as skipped. One failure never blocks the
    /// others.
    pub async fn connect_all(&self) -> BatchReport {
        let mut report = BatchReport::new("connect_all");

        for supply in &self.config.supplies {
            let Some(address) = &supply.address else {
                report.push(OperationOutcome::skipped(&supply.name, "no address"));
                continue;
            };
            let result = match Self::open(address).await {
                Ok(transport) => self.supplies.connect(&supply.name, transport).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!(supply = %supply.name, %address, error = %e, "Supply connection failed");
            }
            report.push(OperationOutcome::from_result(&supply.name, &result));
        }

        match &self.config.signal_generator.address {
            Some(address) => {
                let result = match Self::open(address).await {
                    Ok(transport) => self.signal_generator.connect(transport).await,
                    Err(e) => Err(e),
                };
                report.push(OperationOutcome::from_result(GENERATOR, &result));
            }
            None => report.push(OperationOutcome::skipped(GENERATOR, "no address")),
        }

        match &self.config.spectrum_analyzer.address {
            Some(address) => {
                let result = match Self::open(address).await {
                    Ok(transport) => self.spectrum_analyzer.connect(transport).await,
                    Err(e) => Err(e),
                };
                report.push(OperationOutcome::from_result(ANALYZER, &result));
            }
            None => report.push(OperationOutcome::skipped(ANALYZER, "no address")),
        }

        info!(summary = %report.summary(), "Connection pass finished");
        report
    }

    async fn open(address: &str) -> BenchResult<Arc<dyn ScpiTransport>> {
        open_transport(address)
            .await
            .map_err(|e| BenchError::Transport(format!("{address}: {e:#}")))
    }

    /// Connect supply `name` over an already opened transport.
    pub async fn connect_supply(
        &self,
        name: &str,
        transport: Arc<dyn ScpiTransport>,
    ) -> BenchResult<PsuDialect> {
        self.supplies.connect(name, transport).await
    }

    /// Attach mock instruments to every declared supply and both RF instruments.
    ///
    /// All mocks share one command log, which is returned along with the individual
    /// transports for inspection and failure injection.
    pub async fn connect_simulated(&self) -> BenchResult<SimulatedBench> {
        let log = command_log();
        let mut supplies = BTreeMap::new();
        for name in self.supplies.supply_names() {
            let mock = Arc::new(
                MockTransport::sharing(&name, log.clone()).with_identity(SIMULATED_SUPPLY_IDN),
            );
            self.supplies.connect(&name, mock.clone()).await?;
            supplies.insert(name, mock);
        }

        let signal_generator = Arc::new(
            MockTransport::sharing("SG", log.clone()).with_identity(SIMULATED_GENERATOR_IDN),
        );
        self.signal_generator
            .connect(signal_generator.clone())
            .await?;

        let spectrum_analyzer = Arc::new(
            MockTransport::sharing("SA", log.clone()).with_identity(SIMULATED_ANALYZER_IDN),
        );
        self.spectrum_analyzer
            .connect(spectrum_analyzer.clone())
            .await?;

        info!(supplies = supplies.len(), "Simulated instruments attached");
        Ok(SimulatedBench {
            log,
            supplies,
            signal_generator,
            spectrum_analyzer,
        })
    }

    // =========================================================================
    // Supplies
    // =========================================================================

    /// Program an output (current in mA) without energising it.
    pub async fn set_output(&self, output: &OutputId, volts: f64, milliamps: f64) -> BenchResult<()> {
        self.supplies.set_output(output, volts, milliamps).await
    }

    /// Energise an output at its recorded settings.
    pub async fn enable_output(&self, output: &OutputId) -> BenchResult<()> {
        self.supplies.enable_output(output).await
    }

    /// De-energise an output.
    pub async fn disable_output(&self, output: &OutputId) -> BenchResult<()> {
        self.supplies.disable_output(output).await
    }

    /// Apply every recorded output setting.
    pub async fn apply_all(&self) -> BatchReport {
        self.supplies.apply_all().await
    }

    /// Switch every output off, drains first.
    pub async fn disable_all(&self) -> BatchReport {
        self.supplies.disable_all().await
    }

    /// Write role-based bias targets from a setup file into the settings table.
    pub async fn apply_bias_targets(&self, setup: &TestConfig) -> BenchResult<()> {
        self.supplies.apply_bias_targets(setup).await
    }

    /// Load a role file and apply it to the supply outputs. Returns how many lines applied.
    pub async fn load_roles(&self, path: impl AsRef<Path>) -> BenchResult<usize> {
        let lines = load_role_file(path)?;
        Ok(self.supplies.apply_roles(&lines).await)
    }

    // =========================================================================
    // Pairings
    // =========================================================================

    /// Pair a gate with a drain.
    pub async fn pair(&self, gate: &OutputId, drain: &OutputId) -> BenchResult<Pairing> {
        self.pairing.pair(gate, drain).await
    }

    /// Dissolve a pairing.
    pub async fn unpair(&self, pairing: &Pairing) -> BenchResult<()> {
        self.pairing.unpair(pairing).await
    }

    /// Current pairings with their activation flags.
    pub async fn pairings(&self) -> Vec<PairingStatus> {
        self.pairing.pairings().await
    }

    /// Gates not in any pairing.
    pub async fn available_gates(&self) -> Vec<OutputId> {
        self.pairing.available_gates().await
    }

    /// Drains not in any pairing.
    pub async fn available_drains(&self) -> Vec<OutputId> {
        self.pairing.available_drains().await
    }

    /// Ramp one pairing up.
    pub async fn activate(&self, pairing: &Pairing) -> BenchResult<()> {
        self.pairing.activate(pairing).await
    }

    /// Ramp one pairing down.
    pub async fn deactivate(&self, pairing: &Pairing) -> BenchResult<()> {
        self.pairing.deactivate(pairing).await
    }

    /// Ramp every pairing up.
    pub async fn activate_all(&self) -> BatchReport {
        self.pairing.activate_all().await
    }

    /// Ramp every pairing down.
    pub async fn deactivate_all(&self) -> BatchReport {
        self.pairing.deactivate_all().await
    }

    // =========================================================================
    // Sequence
    // =========================================================================

    /// Start a test run. `None` if one is already running.
    pub fn run(&self, setup: Option<TestConfig>) -> Option<Uuid> {
        self.runner.run(setup)
    }

    /// Request the running test to stop at the next step boundary.
    pub fn stop(&self) -> bool {
        self.runner.stop()
    }

    /// Wait for the current run to finish.
    pub async fn wait(&self) -> Option<RunReport> {
        self.runner.wait().await
    }
}
