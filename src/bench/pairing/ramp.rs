//! Bias ramp tables.
//!
//! The step lists below are a hardware safety contract: the gate is pinched off (-6 V)
//! before any drain voltage is applied and is only relaxed toward its operating point once
//! the drain is up. Power-down runs the mirror image. Do not reorder.

use std::time::Duration;

/// Which half of a pairing a ramp step drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// Gate output
    Gate,
    /// Drain output
    Drain,
}

/// Voltage programmed by a ramp step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampVoltage {
    /// Fixed intermediate voltage
    Fixed(f64),
    /// The output's configured target voltage
    Target,
}

impl RampVoltage {
    /// Concrete voltage given the output's target.
    pub fn resolve(self, target: f64) -> f64 {
        match self {
            RampVoltage::Fixed(v) => v,
            RampVoltage::Target => target,
        }
    }
}

/// One apply-and-settle step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampStep {
    /// Output driven
    pub terminal: Terminal,
    /// Voltage to program
    pub voltage: RampVoltage,
    /// Wait after the output has been energised
    pub settle: Duration,
}

const SETTLE: Duration = Duration::from_millis(500);

const fn step(terminal: Terminal, voltage: RampVoltage, settle: Duration) -> RampStep {
    RampStep {
        terminal,
        voltage,
        settle,
    }
}

/// Gate pinch-off voltage.
pub const GATE_PINCH_OFF: f64 = -6.0;
/// Intermediate gate voltage.
pub const GATE_INTERMEDIATE: f64 = -3.0;
/// Intermediate drain voltage.
pub const DRAIN_INTERMEDIATE: f64 = 10.0;

/// Power-up: gate -6 V, drain 0 V / 10 V / Vd, gate -3 V / Vg.
pub const ACTIVATE: [RampStep; 6] = [
    step(Terminal::Gate, RampVoltage::Fixed(GATE_PINCH_OFF), SETTLE),
    step(Terminal::Drain, RampVoltage::Fixed(0.0), SETTLE),
    step(Terminal::Drain, RampVoltage::Fixed(DRAIN_INTERMEDIATE), SETTLE),
    step(Terminal::Drain, RampVoltage::Target, SETTLE),
    step(Terminal::Gate, RampVoltage::Fixed(GATE_INTERMEDIATE), SETTLE),
    step(Terminal::Gate, RampVoltage::Target, Duration::ZERO),
];

/// Power-down: gate -3 V / -6 V, drain 10 V / 0 V.
pub const DEACTIVATE: [RampStep; 4] = [
    step(Terminal::Gate, RampVoltage::Fixed(GATE_INTERMEDIATE), SETTLE),
    step(Terminal::Gate, RampVoltage::Fixed(GATE_PINCH_OFF), SETTLE),
    step(Terminal::Drain, RampVoltage::Fixed(DRAIN_INTERMEDIATE), SETTLE),
    step(Terminal::Drain, RampVoltage::Fixed(0.0), Duration::ZERO),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_is_pinched_off_before_drain_moves() {
        assert_eq!(ACTIVATE[0].terminal, Terminal::Gate);
        assert_eq!(ACTIVATE[0].voltage.resolve(-2.0), GATE_PINCH_OFF);
        let first_drain = ACTIVATE
            .iter()
            .position(|s| s.terminal == Terminal::Drain)
            .unwrap();
        let gate_relaxed = ACTIVATE
            .iter()
            .position(|s| s.terminal == Terminal::Gate && s.voltage != RampVoltage::Fixed(GATE_PINCH_OFF))
            .unwrap();
        assert!(first_drain < gate_relaxed);
    }

    #[test]
    fn power_down_pinches_gate_before_dropping_drain() {
        let voltages: Vec<(Terminal, f64)> = DEACTIVATE
            .iter()
            .map(|s| (s.terminal, s.voltage.resolve(f64::NAN)))
            .collect();
        assert_eq!(
            voltages,
            vec![
                (Terminal::Gate, -3.0),
                (Terminal::Gate, -6.0),
                (Terminal::Drain, 10.0),
                (Terminal::Drain, 0.0),
            ]
        );
    }

    #[test]
    fn total_settle_times() {
        let up: Duration = ACTIVATE.iter().map(|s| s.settle).sum();
        let down: Duration = DEACTIVATE.iter().map(|s| s.settle).sum();
        assert_eq!(up, Duration::from_millis(2500));
        assert_eq!(down, Duration::from_millis(1500));
    }
}
