//! Supply Bank
//!
//! Owns every declared power supply, its connection (if any) and the role of each of its
//! outputs. This is the manual control surface for the supplies: per-output set / enable /
//! disable, the bulk apply and power-down passes, and role-based bias target application.
//!
//! Each supply exposes two outputs, `Output1` and `Output2`. Outputs without an explicit
//! assignment have role `Unassigned`.

use crate::bench::output::{Assignment, OutputId, OutputSettings, OutputSettingsTable, Role};
use crate::config::SupplyDefinition;
use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::BiasOutputs;
use crate::hardware::psu::{PsuDialect, SupplyAdapter};
use crate::hardware::transport::ScpiTransport;
use crate::report::{BatchReport, OperationOutcome};
use crate::setup::{RoleLine, TestConfig, KEY_BIAS_CURRENT, KEY_DRAIN_VOLTAGE, KEY_GATE_VOLTAGE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Outputs per supply.
pub const OUTPUTS_PER_SUPPLY: u8 = 2;

struct SupplySlot {
    name: String,
    address: Option<String>,
    adapter: RwLock<Option<Arc<SupplyAdapter>>>,
}

/// All declared supplies and their outputs.
pub struct SupplyBank {
    supplies: Vec<SupplySlot>,
    roles: RwLock<HashMap<OutputId, Role>>,
    settings: OutputSettingsTable,
}

impl SupplyBank {
    /// Declare supplies and seed output roles from the assignments.
    pub fn new(
        supplies: &[SupplyDefinition],
        assignments: &[Assignment],
        settings: OutputSettingsTable,
    ) -> BenchResult<Self> {
        let mut roles = HashMap::new();
        for supply in supplies {
            for channel in 1..=OUTPUTS_PER_SUPPLY {
                roles.insert(OutputId::new(&supply.name, channel), Role::Unassigned);
            }
        }
        for assignment in assignments {
            let id = assignment.output_id()?;
            match roles.get_mut(&id) {
                Some(role) => *role = assignment.role,
                None => return Err(BenchError::UnknownOutput(id.to_string())),
            }
        }

        Ok(Self {
            supplies: supplies
                .iter()
                .map(|s| SupplySlot {
                    name: s.name.clone(),
                    address: s.address.clone(),
                    adapter: RwLock::new(None),
                })
                .collect(),
            roles: RwLock::new(roles),
            settings,
        })
    }

    /// Supply names in declaration order.
    pub fn supply_names(&self) -> Vec<String> {
        self.supplies.iter().map(|s| s.name.clone()).collect()
    }

    /// Configured address of a supply.
    pub fn address(&self, name: &str) -> BenchResult<Option<String>> {
        Ok(self.slot(name)?.address.clone())
    }

    /// Every output in declaration order (supply order, then channel).
    pub fn outputs(&self) -> Vec<OutputId> {
        self.supplies
            .iter()
            .flat_map(|s| (1..=OUTPUTS_PER_SUPPLY).map(move |ch| OutputId::new(&s.name, ch)))
            .collect()
    }

    /// The shared settings table.
    pub fn settings(&self) -> &OutputSettingsTable {
        &self.settings
    }

    fn slot(&self, name: &str) -> BenchResult<&SupplySlot> {
        self.supplies
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| BenchError::NotFound(format!("supply {name}")))
    }

    fn check_output(&self, output: &OutputId) -> BenchResult<()> {
        self.slot(&output.supply)?;
        if output.channel == 0 || output.channel > OUTPUTS_PER_SUPPLY {
            return Err(BenchError::UnknownOutput(output.to_string()));
        }
        Ok(())
    }

    /// Identify the instrument behind `transport` and bind it to supply `name`.
    ///
    /// Any previous adapter is dropped first; if identification fails the supply is left
    /// disconnected.
    pub async fn connect(
        &self,
        name: &str,
        transport: Arc<dyn ScpiTransport>,
    ) -> BenchResult<PsuDialect> {
        let slot = self.slot(name)?;
        let mut adapter = slot.adapter.write().await;
        *adapter = None;
        let connected = SupplyAdapter::identify(transport).await?;
        let dialect = connected.dialect();
        info!(supply = name, %dialect, via = %connected.describe(), "Supply connected");
        *adapter = Some(Arc::new(connected));
        Ok(dialect)
    }

    /// Drop the connection of supply `name`.
    pub async fn disconnect(&self, name: &str) -> BenchResult<()> {
        *self.slot(name)?.adapter.write().await = None;
        Ok(())
    }

    /// Dialect of a connected supply.
    pub async fn dialect(&self, name: &str) -> Option<PsuDialect> {
        let slot = self.slot(name).ok()?;
        let adapter = slot.adapter.read().await;
        adapter.as_ref().map(|a| a.dialect())
    }

    /// Whether supply `name` has an adapter.
    pub async fn is_connected(&self, name: &str) -> bool {
        self.dialect(name).await.is_some()
    }

    async fn adapter(&self, name: &str) -> BenchResult<Arc<SupplyAdapter>> {
        self.slot(name)?
            .adapter
            .read()
            .await
            .clone()
            .ok_or_else(|| BenchError::NotConnected(name.to_string()))
    }

    /// Role of an output.
    pub async fn role(&self, output: &OutputId) -> BenchResult<Role> {
        self.roles
            .read()
            .await
            .get(output)
            .copied()
            .ok_or_else(|| BenchError::UnknownOutput(output.to_string()))
    }

    /// Change the role of an output.
    pub async fn set_role(&self, output: &OutputId, role: Role) -> BenchResult<()> {
        match self.roles.write().await.get_mut(output) {
            Some(current) => {
                *current = role;
                Ok(())
            }
            None => Err(BenchError::UnknownOutput(output.to_string())),
        }
    }

    /// Outputs currently holding `role`, in declaration order.
    pub async fn outputs_with_role(&self, role: Role) -> Vec<OutputId> {
        let roles = self.roles.read().await;
        self.outputs()
            .into_iter()
            .filter(|o| roles.get(o) == Some(&role))
            .collect()
    }

    /// Apply role-file lines. Lines naming unknown outputs are ignored. Returns how many applied.
    pub async fn apply_roles(&self, lines: &[RoleLine]) -> usize {
        let mut applied = 0;
        for line in lines {
            if self.set_role(&line.output, line.role).await.is_ok() {
                applied += 1;
            }
        }
        info!(applied, total = lines.len(), "Applied role file");
        applied
    }

    /// Program voltage and current (entered in mA) without energising, then record them.
    pub async fn set_output(&self, output: &OutputId, volts: f64, milliamps: f64) -> BenchResult<()> {
        self.check_output(output)?;
        let settings = OutputSettings::from_milliamps(volts, milliamps);
        let adapter = self.adapter(&output.supply).await?;
        adapter.set_voltage(output.channel, settings.voltage).await?;
        adapter.set_current(output.channel, settings.current).await?;
        self.settings.set(output, settings).await;
        Ok(())
    }

    /// Apply the recorded settings of `output` and energise it.
    pub async fn enable_output(&self, output: &OutputId) -> BenchResult<()> {
        self.check_output(output)?;
        let settings = self
            .settings
            .get(output)
            .await
            .ok_or_else(|| BenchError::MissingSettings {
                output: output.to_string(),
            })?;
        self.apply_output(output, settings.voltage, settings.current).await
    }

    /// De-energise `output`.
    pub async fn disable_output(&self, output: &OutputId) -> BenchResult<()> {
        self.check_output(output)?;
        self.adapter(&output.supply)
            .await?
            .disable_output(output.channel)
            .await
    }

    /// Apply and energise every output that has settings, in declaration order.
    pub async fn apply_all(&self) -> BatchReport {
        let snapshot = self.settings.snapshot().await;
        let mut report = BatchReport::new("apply_all");
        for output in self.outputs() {
            let key = output.key();
            let Some(settings) = snapshot.get(&key) else {
                report.push(OperationOutcome::skipped(key, "no settings"));
                continue;
            };
            if !self.is_connected(&output.supply).await {
                report.push(OperationOutcome::skipped(key, "not connected"));
                continue;
            }
            let result = self
                .apply_output(&output, settings.voltage, settings.current)
                .await;
            if let Err(e) = &result {
                warn!(%output, error = %e, "Apply failed");
            }
            report.push(OperationOutcome::from_result(key, &result));
        }
        report
    }

    /// De-energise every connected output: drains first, then gates, then the rest.
    pub async fn disable_all(&self) -> BatchReport {
        let mut report = BatchReport::new("disable_all");
        for role in [Role::Drain, Role::Gate, Role::Unassigned] {
            for output in self.outputs_with_role(role).await {
                if !self.is_connected(&output.supply).await {
                    report.push(OperationOutcome::skipped(output.key(), "not connected"));
                    continue;
                }
                let result = self.disable_output(&output).await;
                if let Err(e) = &result {
                    warn!(%output, error = %e, "Disable failed");
                }
                report.push(OperationOutcome::from_result(output.key(), &result));
            }
        }
        report
    }

    /// Write role-based targets from a setup file into the settings table.
    ///
    /// Gates get `(VGDRV, IDDRV)`, drains `(VDDRV, IDDRV)`; missing keys read as 0.
    /// Unassigned outputs are left untouched. No instrument I/O.
    pub async fn apply_bias_targets(&self, config: &TestConfig) -> BenchResult<()> {
        let current = config.get_or(KEY_BIAS_CURRENT, 0.0);
        let gate = OutputSettings::new(config.get_or(KEY_GATE_VOLTAGE, 0.0), current);
        let drain = OutputSettings::new(config.get_or(KEY_DRAIN_VOLTAGE, 0.0), current);

        for output in self.outputs_with_role(Role::Gate).await {
            self.settings.set(&output, gate).await;
        }
        for output in self.outputs_with_role(Role::Drain).await {
            self.settings.set(&output, drain).await;
        }
        info!(
            gate_v = gate.voltage,
            drain_v = drain.voltage,
            current,
            "Bias targets applied from setup"
        );
        Ok(())
    }
}

#[async_trait]
impl BiasOutputs for SupplyBank {
    async fn apply_output(&self, output: &OutputId, voltage: f64, current: f64) -> BenchResult<()> {
        self.check_output(output)?;
        self.adapter(&output.supply)
            .await?
            .apply_output(output.channel, voltage, current)
            .await
    }
}
