//! Bench Capabilities
//!
//! Small capability traits that sit at the seams between the sequencing logic and the
//! instruments. The pairing engine only needs to energise an output at a given bias; the
//! sequence runner only needs "bias on/off", "RF on/off" and "start a sweep". Each side
//! depends on the trait, not on a concrete driver, so both can be exercised against mocks.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Returns `BenchResult` (or a `BatchReport` for bulk operations that must not stop early)
//! - Focuses on ONE thing

use crate::bench::output::OutputId;
use crate::error::BenchResult;
use crate::report::BatchReport;
use crate::setup::TestConfig;
use async_trait::async_trait;

/// Capability: per-output bias control
///
/// Programs voltage and current on one supply output and energises it, in that order.
#[async_trait]
pub trait BiasOutputs: Send + Sync {
    /// Program `voltage` (V) and `current` (A) on `output`, then enable it.
    async fn apply_output(&self, output: &OutputId, voltage: f64, current: f64)
        -> BenchResult<()>;
}

/// Capability: bench-wide bias control used by the automated sequence
#[async_trait]
pub trait BiasSupply: Send + Sync {
    /// Write role-based bias targets from a setup file into the settings table.
    async fn apply_bias_targets(&self, config: &TestConfig) -> BenchResult<()>;

    /// Apply and enable every output that has settings.
    async fn apply_all(&self) -> BatchReport;

    /// Bring every output down safely.
    async fn bias_off(&self) -> BatchReport;
}

/// Capability: RF signal source
#[async_trait]
pub trait RfSource: Send + Sync {
    /// Derive frequency/power from a setup file into the held settings.
    async fn configure_from_setup(&self, config: &TestConfig) -> BenchResult<()>;

    /// Push the held settings to the instrument.
    async fn apply_settings(&self) -> BenchResult<()>;

    /// Turn the RF output off.
    async fn rf_off(&self) -> BenchResult<()>;
}

/// Capability: swept spectrum measurement
#[async_trait]
pub trait SweptAnalyzer: Send + Sync {
    /// Derive the sweep span from a setup file into the held settings.
    async fn configure_from_setup(&self, config: &TestConfig) -> BenchResult<()>;

    /// Program the held settings and start (or arm) a sweep.
    async fn start_sweep(&self) -> BenchResult<()>;
}
