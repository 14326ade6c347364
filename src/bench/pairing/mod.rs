//! Pairing Engine
//!
//! Holds the gate/drain pools and executes the bias ramp protocol over pairings.
//!
//! A ramp never yields to cancellation: once `activate` or `deactivate` starts on a pairing it
//! runs every step to completion or stops at its first instrument error. Targets are read
//! from the settings table once, before the first command, so an edit made mid-ramp does not
//! leak into the remaining steps.

pub mod pool;
pub mod ramp;

pub use pool::{Pairing, PairingPool, PairingStatus};
pub use ramp::{RampStep, RampVoltage, Terminal};

use crate::bench::output::{OutputId, OutputSettings, OutputSettingsTable};
use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::BiasOutputs;
use crate::report::{BatchReport, OperationOutcome};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Gate/drain pairing and ramp executor.
pub struct PairingEngine {
    pool: RwLock<PairingPool>,
    settings: OutputSettingsTable,
    outputs: Arc<dyn BiasOutputs>,
}

impl PairingEngine {
    /// Create an engine over a seeded pool.
    pub fn new(
        pool: PairingPool,
        settings: OutputSettingsTable,
        outputs: Arc<dyn BiasOutputs>,
    ) -> Self {
        Self {
            pool: RwLock::new(pool),
            settings,
            outputs,
        }
    }

    /// Pair an available gate with an available drain.
    pub async fn pair(&self, gate: &OutputId, drain: &OutputId) -> BenchResult<Pairing> {
        let pairing = self.pool.write().await.pair(gate, drain)?;
        info!(%pairing, "Paired");
        Ok(pairing)
    }

    /// Dissolve a pairing. Does not touch the instruments.
    pub async fn unpair(&self, pairing: &Pairing) -> BenchResult<()> {
        self.pool.write().await.unpair(pairing)?;
        info!(%pairing, "Unpaired");
        Ok(())
    }

    /// Pairings in creation order.
    pub async fn pairings(&self) -> Vec<PairingStatus> {
        self.pool.read().await.pairings().to_vec()
    }

    /// Unpaired gates.
    pub async fn available_gates(&self) -> Vec<OutputId> {
        self.pool.read().await.available_gates().to_vec()
    }

    /// Unpaired drains.
    pub async fn available_drains(&self) -> Vec<OutputId> {
        self.pool.read().await.available_drains().to_vec()
    }

    /// Ramp a pairing up to its targets.
    pub async fn activate(&self, pairing: &Pairing) -> BenchResult<()> {
        self.ramp(pairing, &ramp::ACTIVATE).await?;
        self.pool.write().await.set_active(pairing, true);
        info!(%pairing, "Pairing activated");
        Ok(())
    }

    /// Ramp a pairing down to pinch-off / 0 V.
    pub async fn deactivate(&self, pairing: &Pairing) -> BenchResult<()> {
        self.ramp(pairing, &ramp::DEACTIVATE).await?;
        self.pool.write().await.set_active(pairing, false);
        info!(%pairing, "Pairing deactivated");
        Ok(())
    }

    /// Activate every pairing in creation order; failures do not stop the batch.
    pub async fn activate_all(&self) -> BatchReport {
        let mut report = BatchReport::new("activate_all");
        for status in self.pairings().await {
            let result = self.activate(&status.pairing).await;
            if let Err(e) = &result {
                warn!(pairing = %status.pairing, error = %e, "Activation failed");
            }
            report.push(OperationOutcome::from_result(status.pairing.to_string(), &result));
        }
        report
    }

    /// Deactivate every pairing in creation order; failures do not stop the batch.
    pub async fn deactivate_all(&self) -> BatchReport {
        let mut report = BatchReport::new("deactivate_all");
        for status in self.pairings().await {
            let result = self.deactivate(&status.pairing).await;
            if let Err(e) = &result {
                warn!(pairing = %status.pairing, error = %e, "Deactivation failed");
            }
            report.push(OperationOutcome::from_result(status.pairing.to_string(), &result));
        }
        report
    }

    async fn targets(&self, output: &OutputId) -> BenchResult<OutputSettings> {
        self.settings
            .get(output)
            .await
            .ok_or_else(|| BenchError::MissingSettings {
                output: output.to_string(),
            })
    }

    async fn ramp(&self, pairing: &Pairing, steps: &[RampStep]) -> BenchResult<()> {
        if !self.pool.read().await.contains(pairing) {
            return Err(BenchError::NotFound(format!("pairing {pairing}")));
        }
        let gate = self.targets(&pairing.gate).await?;
        let drain = self.targets(&pairing.drain).await?;

        for step in steps {
            let (output, settings) = match step.terminal {
                Terminal::Gate => (&pairing.gate, gate),
                Terminal::Drain => (&pairing.drain, drain),
            };
            let voltage = step.voltage.resolve(settings.voltage);
            debug!(
                %output,
                voltage,
                current = settings.current,
                settle_ms = step.settle.as_millis() as u64,
                "Ramp step"
            );
            self.outputs
                .apply_output(output, voltage, settings.current)
                .await?;
            if !step.settle.is_zero() {
                tokio::time::sleep(step.settle).await;
            }
        }
        Ok(())
    }
}
