//! Operation Reports
//!
//! Success/failure records returned by the control surface. Bulk operations (apply all,
//! activate all, connect all) never stop at the first failure; they return a `BatchReport`
//! listing one `OperationOutcome` per target instead.

use crate::error::BenchError;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// OperationOutcome
// =============================================================================

/// Status of a single operation within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// Operation completed
    Ok,
    /// Operation failed; see message
    Failed,
    /// Operation not attempted (e.g. no settings recorded for the output)
    Skipped,
}

/// Result of one operation on one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// What was operated on (output key, pairing label, instrument name)
    pub target: String,

    /// Outcome
    pub status: OutcomeStatus,

    /// Error or skip reason
    #[serde(default)]
    pub message: Option<String>,
}

impl OperationOutcome {
    /// Successful outcome
    pub fn ok(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: OutcomeStatus::Ok,
            message: None,
        }
    }

    /// Failed outcome
    pub fn failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: OutcomeStatus::Failed,
            message: Some(message.into()),
        }
    }

    /// Skipped outcome
    pub fn skipped(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: OutcomeStatus::Skipped,
            message: Some(reason.into()),
        }
    }

    /// Outcome from a result
    pub fn from_result<T>(target: impl Into<String>, result: &Result<T, BenchError>) -> Self {
        match result {
            Ok(_) => Self::ok(target),
            Err(e) => Self::failed(target, e.to_string()),
        }
    }

    /// Whether the operation failed
    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.message) {
            (OutcomeStatus::Ok, _) => write!(f, "{}: ok", self.target),
            (OutcomeStatus::Failed, Some(msg)) => write!(f, "{}: FAILED ({msg})", self.target),
            (OutcomeStatus::Failed, None) => write!(f, "{}: FAILED", self.target),
            (OutcomeStatus::Skipped, Some(msg)) => write!(f, "{}: skipped ({msg})", self.target),
            (OutcomeStatus::Skipped, None) => write!(f, "{}: skipped", self.target),
        }
    }
}

// =============================================================================
// BatchReport
// =============================================================================

/// Per-target outcomes of a bulk operation, in the order they were attempted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Name of the bulk operation (e.g. "activate_all")
    pub operation: String,

    /// One outcome per target
    pub outcomes: Vec<OperationOutcome>,
}

impl BatchReport {
    /// Empty report for `operation`
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            outcomes: Vec::new(),
        }
    }

    /// Append an outcome
    pub fn push(&mut self, outcome: OperationOutcome) {
        self.outcomes.push(outcome);
    }

    /// Append every outcome of another report
    pub fn extend(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
    }

    /// Successful outcomes
    pub fn successes(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Ok)
    }

    /// Failed outcomes
    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Whether nothing failed (skips are not failures)
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(OperationOutcome::is_failure)
    }

    /// One-line summary, e.g. `activate_all: 1 ok, 1 failed, 0 skipped`
    pub fn summary(&self) -> String {
        let skipped = self
            .outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Skipped)
            .count();
        format!(
            "{}: {} ok, {} failed, {} skipped",
            self.operation,
            self.successes().count(),
            self.failures().count(),
            skipped
        )
    }

    /// Collapse into an error naming every failed target, for callers that must fail hard.
    pub fn into_result(self) -> Result<Self, String> {
        if self.is_success() {
            return Ok(self);
        }
        let failed: Vec<String> = self.failures().map(ToString::to_string).collect();
        Err(format!("{} failed: {}", self.operation, failed.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_summary() {
        let mut report = BatchReport::new("activate_all");
        report.push(OperationOutcome::failed(
            "PS1 Output1 -> PS2 Output2",
            "Missing settings for PS1 Output1",
        ));
        report.push(OperationOutcome::ok("PS2 Output1 -> PS4 Output1"));
        report.push(OperationOutcome::skipped("PS3 Output2", "no settings"));

        assert_eq!(report.successes().count(), 1);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.is_success());
        assert_eq!(report.summary(), "activate_all: 1 ok, 1 failed, 1 skipped");

        let err = report.into_result().unwrap_err();
        assert!(err.contains("PS1 Output1 -> PS2 Output2: FAILED (Missing settings"));
    }

    #[test]
    fn skips_do_not_fail_the_batch() {
        let mut report = BatchReport::new("apply_all");
        report.push(OperationOutcome::skipped("PS1 Output2", "no settings"));
        assert!(report.is_success());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn serializes_status_names() {
        let outcome = OperationOutcome::from_result::<()>(
            "PS1",
            &Err(BenchError::NotConnected("PS1".into())),
        );
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"Failed\""));
        assert!(json.contains("PS1 is not connected"));
    }
}
