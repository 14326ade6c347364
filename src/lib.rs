//! # RF Bench Core Library
//!
//! This crate is the core of the `rf-bench` application: bias pairing and test sequencing for
//! RF amplifier characterization benches. It drives bench power supplies (gate and drain bias),
//! an RF signal generator and a spectrum analyzer over SCPI. Keeping it a library lets the CLI
//! (`main.rs`) and any other front end share the same control surface.
//!
//! ## Crate Structure
//!
//! - **`bench`**: the bias side of the bench. Output model and settings table, the supply
//!   bank, the pairing engine with its ramp protocol, and the `Workbench` context object that
//!   ties everything together.
//! - **`config`**: `BenchConfig`, loaded with figment from TOML and `RF_BENCH_` environment
//!   variables.
//! - **`error`**: the `BenchError` enum used across the crate.
//! - **`hardware`**: SCPI transports, the power supply driver registry, the RF instruments,
//!   the capability traits and a recording mock transport.
//! - **`logging`**: tracing-subscriber setup.
//! - **`report`**: per-target outcomes for bulk operations.
//! - **`sequence`**: the six-step automated test sequence and its runner.
//! - **`setup`**: setup (`KEY=value`) and role file parsing.

pub mod bench;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod report;
pub mod sequence;
pub mod setup;

pub use bench::Workbench;
pub use config::BenchConfig;
pub use error::{BenchError, BenchResult};
