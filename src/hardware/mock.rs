//! Mock Hardware Implementations
//!
//! Provides a simulated SCPI transport for testing and for running the bench without
//! physical instruments.
//!
//! `MockTransport` records every command it receives, together with the
//! `tokio::time::Instant` it arrived at. Several transports can share one command log so
//! that the interleaving of commands across instruments (gate supply vs. drain supply) can
//! be checked. Under `#[tokio::test(start_paused = true)]` the timestamps are virtual and
//! exact, which makes settle delays directly assertable.

use crate::hardware::transport::ScpiTransport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// One command seen by a mock transport.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedCommand {
    /// Label of the transport that received the command (e.g. the supply name)
    pub target: String,
    /// Command text as written
    pub command: String,
    /// When the command arrived
    pub at: Instant,
}

/// Shared, append-only command log.
pub type CommandLog = Arc<Mutex<Vec<LoggedCommand>>>;

/// Create an empty command log to share between mock transports.
pub fn command_log() -> CommandLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock SCPI transport
///
/// # Example
///
/// ```
/// use rf_bench::hardware::mock::MockTransport;
/// use rf_bench::hardware::transport::ScpiTransport;
///
/// # tokio_test_block_on(async {
/// let psu = MockTransport::new("PS1").with_identity("Keysight Technologies,E36312A,MY1,1.0");
/// assert!(psu.query("*IDN?").await.unwrap().contains("E36312A"));
/// psu.write("OUTP ON").await.unwrap();
/// assert_eq!(psu.commands(), vec!["*IDN?", "OUTP ON"]);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct MockTransport {
    label: String,
    log: CommandLog,
    responses: Mutex<HashMap<String, String>>,
    fail_on: Mutex<Option<String>>,
    fail_once: Mutex<bool>,
}

impl MockTransport {
    /// Create a mock with its own command log.
    pub fn new(label: impl Into<String>) -> Self {
        Self::sharing(label, command_log())
    }

    /// Create a mock that appends to an existing shared log.
    pub fn sharing(label: impl Into<String>, log: CommandLog) -> Self {
        Self {
            label: label.into(),
            log,
            responses: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(None),
            fail_once: Mutex::new(false),
        }
    }

    /// Answer `*IDN?` with the given identification string.
    pub fn with_identity(self, idn: impl Into<String>) -> Self {
        self.with_response("*IDN?", idn)
    }

    /// Answer `query` with a fixed response.
    pub fn with_response(self, query: impl Into<String>, response: impl Into<String>) -> Self {
        lock(&self.responses).insert(query.into(), response.into());
        self
    }

    /// Fail every command containing `fragment` (the command is still logged).
    pub fn fail_on(&self, fragment: impl Into<String>) {
        *lock(&self.fail_on) = Some(fragment.into());
    }

    /// Fail the next command only.
    pub fn trigger_failure(&self) {
        *lock(&self.fail_once) = true;
    }

    /// Clear any failure injection.
    pub fn clear_failures(&self) {
        *lock(&self.fail_on) = None;
        *lock(&self.fail_once) = false;
    }

    /// Commands received by this transport, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.log)
            .iter()
            .filter(|entry| entry.target == self.label)
            .map(|entry| entry.command.clone())
            .collect()
    }

    /// The shared command log (all transports writing to it).
    pub fn log(&self) -> CommandLog {
        Arc::clone(&self.log)
    }

    fn record(&self, command: &str) -> Result<()> {
        lock(&self.log).push(LoggedCommand {
            target: self.label.clone(),
            command: command.to_string(),
            at: Instant::now(),
        });

        let fail_now = std::mem::take(&mut *lock(&self.fail_once))
            || lock(&self.fail_on)
                .as_deref()
                .is_some_and(|fragment| command.contains(fragment));
        if fail_now {
            return Err(anyhow!("{}: simulated failure on '{}'", self.label, command));
        }
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for MockTransport {
    async fn write(&self, command: &str) -> Result<()> {
        self.record(command)
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.record(command)?;
        lock(&self.responses)
            .get(command)
            .cloned()
            .ok_or_else(|| anyhow!("{}: no response scripted for '{}'", self.label, command))
    }

    fn describe(&self) -> String {
        format!("mock://{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_commands_in_order() {
        let mock = MockTransport::new("PS1");
        mock.write("INST:SEL CH1").await.unwrap();
        mock.write("VOLT 5").await.unwrap();
        assert_eq!(mock.commands(), vec!["INST:SEL CH1", "VOLT 5"]);
    }

    #[tokio::test]
    async fn shared_log_interleaves_targets() {
        let log = command_log();
        let gate = MockTransport::sharing("PS1", log.clone());
        let drain = MockTransport::sharing("PS2", log.clone());

        gate.write("VOLT -6").await.unwrap();
        drain.write("VOLT 0").await.unwrap();
        gate.write("VOLT -3").await.unwrap();

        let targets: Vec<_> = log.lock().unwrap().iter().map(|c| c.target.clone()).collect();
        assert_eq!(targets, vec!["PS1", "PS2", "PS1"]);
        assert_eq!(gate.commands(), vec!["VOLT -6", "VOLT -3"]);
    }

    #[tokio::test]
    async fn failure_injection() {
        let mock = MockTransport::new("PS1");
        mock.trigger_failure();
        assert!(mock.write("OUTP ON").await.is_err());
        assert!(mock.write("OUTP ON").await.is_ok());

        mock.fail_on("CURR");
        assert!(mock.write("CURR 0.1").await.is_err());
        assert!(mock.write("VOLT 1").await.is_ok());
        mock.clear_failures();
        assert!(mock.write("CURR 0.1").await.is_ok());

        // failed commands are still logged
        assert_eq!(mock.commands().len(), 5);
    }

    #[tokio::test]
    async fn unscripted_query_fails() {
        let mock = MockTransport::new("SG").with_response("FREQ?", "1E9");
        assert_eq!(mock.query("FREQ?").await.unwrap(), "1E9");
        assert!(mock.query("*IDN?").await.is_err());
    }
}
