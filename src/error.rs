//! Custom error types for the bench.
//!
//! `BenchError` is the single error type surfaced by the control surface. Built on
//! `thiserror`, it carries enough context (instrument, output, operation) for a user to
//! diagnose a failure without opening the logs.
//!
//! ## Error Hierarchy
//!
//! - **`UnrecognizedModel`**: no known model token in an instrument identification string.
//!   The caller must not build an adapter.
//! - **`InstrumentCommand`**: a transport or command failure while talking to a supply,
//!   tagged with the dialect and channel that issued it.
//! - **`InvalidSelection`** / **`DuplicatePairing`** / **`NotFound`**: pairing pool misuse.
//! - **`MissingSettings`**: an output has never been given voltage/current targets.
//! - **`ConfigParse`**: a malformed line in a setup or role file.
//! - **`Config`** / **`Validation`** / **`Io`**: application configuration and file access.
//!
//! Transport code works in `anyhow::Result` like the rest of the hardware layer; the
//! adapters convert those into `InstrumentCommand` at the boundary.

use crate::hardware::psu::PsuDialect;
use thiserror::Error;

/// Convenience alias for results using the bench error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Unrecognized PSU model in IDN string: {idn}")]
    UnrecognizedModel { idn: String },

    #[error("{kind} command failed on channel {channel}: {message}")]
    InstrumentCommand {
        kind: PsuDialect,
        channel: u8,
        message: String,
    },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Pairing {gate} -> {drain} already exists")]
    DuplicatePairing { gate: String, drain: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing settings for {output}")]
    MissingSettings { output: String },

    #[error("Line {line}: cannot parse '{content}': {reason}")]
    ConfigParse {
        line: usize,
        content: String,
        reason: String,
    },

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("Unknown output: {0}")]
    UnknownOutput(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Wrap a transport failure with the adapter context that issued the command.
    pub fn instrument(kind: PsuDialect, channel: u8, err: &anyhow::Error) -> Self {
        BenchError::InstrumentCommand {
            kind,
            channel,
            message: format!("{err:#}"),
        }
    }

    /// Whether the error came from the instrument itself rather than from caller input.
    pub fn is_instrument_failure(&self) -> bool {
        matches!(
            self,
            BenchError::InstrumentCommand { .. }
                | BenchError::NotConnected(_)
                | BenchError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_error_carries_context() {
        let err = BenchError::instrument(
            PsuDialect::KeysightE36312A,
            2,
            &anyhow::anyhow!("socket closed").context("write 'VOLT 5'"),
        );
        let text = err.to_string();
        assert!(text.contains("KeysightE36312A"));
        assert!(text.contains("channel 2"));
        assert!(text.contains("socket closed"));
        assert!(err.is_instrument_failure());
    }

    #[test]
    fn selection_errors_are_not_instrument_failures() {
        let err = BenchError::InvalidSelection("PS1 Output1 is not an available gate".into());
        assert!(!err.is_instrument_failure());
        assert!(err.to_string().contains("PS1 Output1"));
    }
}
