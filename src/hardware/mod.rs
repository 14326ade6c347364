//! Bench Hardware
//!
//! Instrument-facing layer: the SCPI transports, the power supply driver registry, the RF
//! instruments, and the capability traits the rest of the crate programs against.
//!
//! # Modules
//!
//! - `transport`: `ScpiTransport` trait plus TCP and (feature `instrument_serial`) serial pipes
//! - `mock`: recording transport used by tests and `--simulate`
//! - `psu`: dialect resolution and the per-channel supply adapter
//! - `signal_generator` / `spectrum_analyzer`: RF instruments
//! - `capabilities`: async seams between sequencing logic and instruments

pub mod capabilities;
pub mod mock;
pub mod psu;
pub mod signal_generator;
pub mod spectrum_analyzer;
pub mod transport;

pub use capabilities::{BiasOutputs, BiasSupply, RfSource, SweptAnalyzer};
pub use psu::{resolve, PsuDialect, SupplyAdapter};
pub use signal_generator::SignalGenerator;
pub use spectrum_analyzer::SpectrumAnalyzer;
pub use transport::{open_transport, ScpiTransport};
