//! Sequence steps, per-step delays and run states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The six fixed steps of a test run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceStep {
    /// Apply bias targets and energise supplies
    BiasOn,
    /// Configure and enable the signal generator
    RfOn,
    /// Start a spectrum analyzer sweep
    Sweep,
    /// Data logging (no instrument action yet)
    Log,
    /// Turn RF off
    RfOff,
    /// Bring bias down
    BiasOff,
}

impl SequenceStep {
    /// All steps in execution order.
    pub const ALL: [SequenceStep; 6] = [
        SequenceStep::BiasOn,
        SequenceStep::RfOn,
        SequenceStep::Sweep,
        SequenceStep::Log,
        SequenceStep::RfOff,
        SequenceStep::BiasOff,
    ];

    /// 1-based position in the run.
    pub fn number(self) -> usize {
        match self {
            SequenceStep::BiasOn => 1,
            SequenceStep::RfOn => 2,
            SequenceStep::Sweep => 3,
            SequenceStep::Log => 4,
            SequenceStep::RfOff => 5,
            SequenceStep::BiasOff => 6,
        }
    }

    /// Log line emitted when the step starts.
    pub fn log_line(self) -> String {
        let what = match self {
            SequenceStep::BiasOn => "Bias ON",
            SequenceStep::RfOn => "RF ON",
            SequenceStep::Sweep => "Triggering Spectrum Analyzer Sweep",
            SequenceStep::Log => "Logging Data",
            SequenceStep::RfOff => "RF OFF",
            SequenceStep::BiasOff => "Bias OFF",
        };
        format!("Step {}: {what}", self.number())
    }

    /// Short status label shown while the step runs.
    pub fn status_label(self) -> &'static str {
        match self {
            SequenceStep::BiasOn => "Biasing...",
            SequenceStep::RfOn => "Enabling RF...",
            SequenceStep::Sweep => "Triggering Sweep...",
            SequenceStep::Log => "Logging...",
            SequenceStep::RfOff => "Disabling RF...",
            SequenceStep::BiasOff => "Powering Down...",
        }
    }

    /// Run state while this step executes.
    pub fn state(self) -> SequenceState {
        match self {
            SequenceStep::BiasOn => SequenceState::BiasOn,
            SequenceStep::RfOn => SequenceState::RfOn,
            SequenceStep::Sweep => SequenceState::Sweep,
            SequenceStep::Log => SequenceState::Log,
            SequenceStep::RfOff => SequenceState::RfOff,
            SequenceStep::BiasOff => SequenceState::BiasOff,
        }
    }
}

impl fmt::Display for SequenceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle state of the sequence runner.
///
/// ```text
/// Idle ─run─> BiasOn ─> RfOn ─> Sweep ─> Log ─> RfOff ─> BiasOff ─> Complete
///               │  any step fails ──────────────────────────────────> Error
///               │  stop() ─> Cancelling ─(next step boundary)─> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SequenceState {
    /// No run in progress
    #[default]
    Idle,
    /// Step 1
    BiasOn,
    /// Step 2
    RfOn,
    /// Step 3
    Sweep,
    /// Step 4
    Log,
    /// Step 5
    RfOff,
    /// Step 6
    BiasOff,
    /// All steps done
    Complete,
    /// A step failed; the run was abandoned
    Error,
    /// Stop requested; the run halts at the next step boundary
    Cancelling,
}

impl SequenceState {
    /// Whether a run is executing (including while cancelling).
    pub fn is_running(self) -> bool {
        !matches!(
            self,
            SequenceState::Idle | SequenceState::Complete | SequenceState::Error
        )
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Unit of a step delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DelayUnit {
    /// Seconds
    #[default]
    #[serde(rename = "s")]
    Seconds,
    /// Milliseconds
    #[serde(rename = "ms")]
    Millis,
}

/// Delay after a step, as entered by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepDelay {
    /// Magnitude
    pub value: f64,
    /// Unit of `value`
    #[serde(default)]
    pub unit: DelayUnit,
}

impl StepDelay {
    /// Delay in seconds.
    pub fn seconds(value: f64) -> Self {
        Self {
            value,
            unit: DelayUnit::Seconds,
        }
    }

    /// Delay in milliseconds.
    pub fn millis(value: f64) -> Self {
        Self {
            value,
            unit: DelayUnit::Millis,
        }
    }

    /// Value normalised to seconds.
    pub fn as_secs_f64(&self) -> f64 {
        match self.unit {
            DelayUnit::Seconds => self.value,
            DelayUnit::Millis => self.value / 1000.0,
        }
    }

    /// Whether the delay can be slept (finite, non-negative).
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value >= 0.0
    }

    /// Sleep duration. Invalid values collapse to zero.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.as_secs_f64()).unwrap_or(Duration::ZERO)
    }
}

impl Default for StepDelay {
    fn default() -> Self {
        Self::seconds(1.0)
    }
}

/// Per-step delays, 1 s each by default.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDelays {
    /// After Bias ON
    pub bias_on: StepDelay,
    /// After RF ON
    pub rf_on: StepDelay,
    /// After the sweep trigger
    pub sweep: StepDelay,
    /// After logging
    pub log: StepDelay,
    /// After RF OFF
    pub rf_off: StepDelay,
    /// After Bias OFF
    pub bias_off: StepDelay,
}

impl StepDelays {
    /// Same delay after every step.
    pub fn uniform(delay: StepDelay) -> Self {
        Self {
            bias_on: delay,
            rf_on: delay,
            sweep: delay,
            log: delay,
            rf_off: delay,
            bias_off: delay,
        }
    }

    /// Delay configured for `step`.
    pub fn get(&self, step: SequenceStep) -> StepDelay {
        match step {
            SequenceStep::BiasOn => self.bias_on,
            SequenceStep::RfOn => self.rf_on,
            SequenceStep::Sweep => self.sweep,
            SequenceStep::Log => self.log,
            SequenceStep::RfOff => self.rf_off,
            SequenceStep::BiasOff => self.bias_off,
        }
    }

    /// Change the delay for `step`.
    pub fn set(&mut self, step: SequenceStep, delay: StepDelay) {
        let slot = match step {
            SequenceStep::BiasOn => &mut self.bias_on,
            SequenceStep::RfOn => &mut self.rf_on,
            SequenceStep::Sweep => &mut self.sweep,
            SequenceStep::Log => &mut self.log,
            SequenceStep::RfOff => &mut self.rf_off,
            SequenceStep::BiasOff => &mut self.bias_off,
        };
        *slot = delay;
    }

    /// Sum of all delays.
    pub fn total(&self) -> Duration {
        SequenceStep::ALL.iter().map(|s| self.get(*s).duration()).sum()
    }
}

/// What the RF OFF and Bias OFF steps do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Explicit RF off; bias ramps active pairings down and disables every output
    #[default]
    Disable,
    /// Re-apply the held generator settings and the bulk supply apply
    Reapply,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(SequenceStep::BiasOn.log_line(), "Step 1: Bias ON");
        assert_eq!(
            SequenceStep::Sweep.log_line(),
            "Step 3: Triggering Spectrum Analyzer Sweep"
        );
        assert_eq!(SequenceStep::BiasOff.status_label(), "Powering Down...");
        assert_eq!(
            SequenceStep::ALL.map(SequenceStep::number),
            [1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn delay_units_normalise() {
        assert_eq!(StepDelay::millis(250.0).duration(), Duration::from_millis(250));
        assert_eq!(StepDelay::seconds(2.0).as_secs_f64(), 2.0);
        assert_eq!(StepDelay::seconds(-1.0).duration(), Duration::ZERO);
        assert!(!StepDelay::seconds(f64::NAN).is_valid());
    }

    #[test]
    fn default_delays_are_one_second() {
        let delays = StepDelays::default();
        assert_eq!(delays.total(), Duration::from_secs(6));

        let mut delays = StepDelays::uniform(StepDelay::millis(0.0));
        delays.set(SequenceStep::Sweep, StepDelay::seconds(3.0));
        assert_eq!(delays.get(SequenceStep::Sweep).duration(), Duration::from_secs(3));
        assert_eq!(delays.total(), Duration::from_secs(3));
    }

    #[test]
    fn delays_deserialize_with_units() {
        let delays: StepDelays = toml::from_str(
            r#"
            [bias_on]
            value = 500
            unit = "ms"

            [sweep]
            value = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(delays.bias_on, StepDelay::millis(500.0));
        assert_eq!(delays.sweep, StepDelay::seconds(2.5));
        assert_eq!(delays.rf_on, StepDelay::seconds(1.0));
    }

    #[test]
    fn running_states() {
        assert!(SequenceState::Cancelling.is_running());
        assert!(SequenceState::Log.is_running());
        assert!(!SequenceState::Complete.is_running());
        assert!(!SequenceState::Idle.is_running());
    }
}
