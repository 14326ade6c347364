//! Automated test sequence.
//!
//! A run walks the six fixed steps in order, each followed by its configured delay:
//!
//! 1. Bias ON
//! 2. RF ON
//! 3. Sweep
//! 4. Log
//! 5. RF OFF
//! 6. Bias OFF

pub mod runner;
pub mod step;

pub use runner::{RunReport, SequenceEvent, SequenceEventKind, SequenceRunner};
pub use step::{DelayUnit, SequenceState, SequenceStep, ShutdownMode, StepDelay, StepDelays};
