//! Sequence runner.
//!
//! Drives one test cycle (bias → RF → sweep → log → RF off → bias off) on a spawned task so
//! the caller stays free to request a stop. Progress is published two ways:
//!
//! - a `watch` channel carrying the current [`SequenceState`]
//! - a `broadcast` channel of timestamped [`SequenceEvent`]s (status labels and log lines)
//!
//! Both are observation-only; nothing the runner does depends on whether anyone listens.
//!
//! A stop request is honoured only between steps. Whatever step is executing (including any
//! ramp inside it) and its trailing delay run to completion first.

use super::step::{SequenceState, SequenceStep, ShutdownMode, StepDelays};
use crate::hardware::capabilities::{BiasSupply, RfSource, SweptAnalyzer};
use crate::setup::TestConfig;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Payload of a [`SequenceEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SequenceEventKind {
    /// Short status label, e.g. `"Biasing..."`
    Status(String),
    /// Human-readable log line
    Log(String),
    /// A step is about to execute
    StepStarted(SequenceStep),
    /// The run ended in this state
    Finished(SequenceState),
}

/// Timestamped runner event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceEvent {
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// Run that emitted it
    pub run_id: Uuid,
    /// What happened
    pub kind: SequenceEventKind,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: Uuid,
    /// `Complete`, `Error`, or `Idle` when stopped
    pub final_state: SequenceState,
    /// Steps that executed successfully, in order
    pub completed_steps: Vec<SequenceStep>,
    /// Failure message when `final_state` is `Error`
    pub error: Option<String>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
}

struct Shared {
    bias: Arc<dyn BiasSupply>,
    rf: Arc<dyn RfSource>,
    analyzer: Arc<dyn SweptAnalyzer>,
    delays: RwLock<StepDelays>,
    shutdown: RwLock<ShutdownMode>,
    running: AtomicBool,
    cancel: AtomicBool,
    current_run: Mutex<Uuid>,
    state: watch::Sender<SequenceState>,
    events: broadcast::Sender<SequenceEvent>,
}

impl Shared {
    fn emit(&self, run_id: Uuid, kind: SequenceEventKind) {
        match &kind {
            SequenceEventKind::Log(line) => info!(%run_id, "{line}"),
            SequenceEventKind::Status(label) => debug!(%run_id, status = %label),
            _ => {}
        }
        // no subscribers is fine
        let _ = self.events.send(SequenceEvent {
            timestamp: Utc::now(),
            run_id,
            kind,
        });
    }

    fn set_state(&self, state: SequenceState) {
        self.state.send_replace(state);
    }
}

/// Single-flight test sequence executor.
pub struct SequenceRunner {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<RunReport>>>,
}

impl SequenceRunner {
    /// Create a runner over the bench capabilities.
    pub fn new(
        bias: Arc<dyn BiasSupply>,
        rf: Arc<dyn RfSource>,
        analyzer: Arc<dyn SweptAnalyzer>,
    ) -> Self {
        let (state, _) = watch::channel(SequenceState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                bias,
                rf,
                analyzer,
                delays: RwLock::new(StepDelays::default()),
                shutdown: RwLock::new(ShutdownMode::default()),
                running: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                current_run: Mutex::new(Uuid::nil()),
                state,
                events,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Builder: initial step delays.
    pub fn with_delays(self, delays: StepDelays) -> Self {
        self.set_delays(delays);
        self
    }

    /// Builder: initial shutdown mode.
    pub fn with_shutdown_mode(self, mode: ShutdownMode) -> Self {
        self.set_shutdown_mode(mode);
        self
    }

    /// Replace the step delays. Takes effect from the next run.
    pub fn set_delays(&self, delays: StepDelays) {
        *self
            .shared
            .delays
            .write()
            .unwrap_or_else(PoisonError::into_inner) = delays;
    }

    /// Current step delays.
    pub fn delays(&self) -> StepDelays {
        *self
            .shared
            .delays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the shutdown mode. Takes effect from the next run.
    pub fn set_shutdown_mode(&self, mode: ShutdownMode) {
        *self
            .shared
            .shutdown
            .write()
            .unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Current shutdown mode.
    pub fn shutdown_mode(&self) -> ShutdownMode {
        *self
            .shared
            .shutdown
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> SequenceState {
        *self.shared.state.borrow()
    }

    /// State updates.
    pub fn watch_state(&self) -> watch::Receiver<SequenceState> {
        self.shared.state.subscribe()
    }

    /// Event stream. Only events emitted after subscribing are received.
    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.shared.events.subscribe()
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start a run on a background task.
    ///
    /// Returns the run id, or `None` (and does nothing) if a run is already in progress.
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, config: Option<TestConfig>) -> Option<Uuid> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Sequence already running; run request ignored");
            return None;
        }
        self.shared.cancel.store(false, Ordering::SeqCst);

        let run_id = Uuid::new_v4();
        *self
            .shared
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = run_id;
        let delays = self.delays();
        let shutdown = self.shutdown_mode();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(execute(shared, run_id, config, delays, shutdown));
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Some(run_id)
    }

    /// Request cancellation at the next step boundary.
    ///
    /// Returns `false` (and does nothing) when no run is active.
    pub fn stop(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.shared.cancel.store(true, Ordering::SeqCst);
        // `running` is cleared before the final state is published; check it under the watch lock
        let running = &self.shared.running;
        self.shared.state.send_if_modified(|state| {
            if running.load(Ordering::SeqCst) {
                *state = SequenceState::Cancelling;
                true
            } else {
                false
            }
        });
        let run_id = *self
            .shared
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared
            .emit(run_id, SequenceEventKind::Status("Stopping...".into()));
        info!(%run_id, "Sequence stop requested");
        true
    }

    /// Wait for the current (or last started) run to finish.
    ///
    /// Returns `None` if no run was started since the last `wait`.
    pub async fn wait(&self) -> Option<RunReport> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Sequence task failed");
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_state(SequenceState::Error);
                None
            }
        }
    }
}

async fn execute(
    shared: Arc<Shared>,
    run_id: Uuid,
    config: Option<TestConfig>,
    delays: StepDelays,
    shutdown: ShutdownMode,
) -> RunReport {
    let started_at = Utc::now();
    info!(%run_id, ?shutdown, with_setup = config.is_some(), "Sequence run started");
    shared.emit(run_id, SequenceEventKind::Status("Running...".into()));

    let mut completed = Vec::new();
    let mut failure = None;
    let mut final_state = SequenceState::Complete;

    for step in SequenceStep::ALL {
        if shared.cancel.load(Ordering::SeqCst) {
            shared.emit(
                run_id,
                SequenceEventKind::Log(format!("Stopped before step {}", step.number())),
            );
            final_state = SequenceState::Idle;
            break;
        }

        shared.set_state(step.state());
        shared.emit(run_id, SequenceEventKind::StepStarted(step));
        shared.emit(run_id, SequenceEventKind::Log(step.log_line()));
        shared.emit(run_id, SequenceEventKind::Status(step.status_label().into()));

        if let Err(e) = perform(&shared, step, config.as_ref(), shutdown).await {
            let message = format!("{e:#}");
            error!(%run_id, %step, error = %message, "Sequence step failed");
            shared.emit(run_id, SequenceEventKind::Status("Error".into()));
            shared.emit(run_id, SequenceEventKind::Log(format!("Error: {message}")));
            failure = Some(message);
            final_state = SequenceState::Error;
            break;
        }
        completed.push(step);
        sleep(delays.get(step).duration()).await;
    }

    if final_state == SequenceState::Complete {
        shared.emit(run_id, SequenceEventKind::Status("Complete".into()));
        shared.emit(run_id, SequenceEventKind::Log("Test Complete".into()));
    }

    shared.running.store(false, Ordering::SeqCst);
    shared.set_state(final_state);
    shared.emit(run_id, SequenceEventKind::Finished(final_state));
    info!(%run_id, state = %final_state, steps = completed.len(), "Sequence run finished");

    RunReport {
        run_id,
        final_state,
        completed_steps: completed,
        error: failure,
        started_at,
        finished_at: Utc::now(),
    }
}

async fn perform(
    shared: &Shared,
    step: SequenceStep,
    config: Option<&TestConfig>,
    shutdown: ShutdownMode,
) -> Result<()> {
    match step {
        SequenceStep::BiasOn => {
            if let Some(cfg) = config {
                shared.bias.apply_bias_targets(cfg).await?;
            }
            shared.bias.apply_all().await.into_result().map_err(|e| anyhow!(e))?;
        }
        SequenceStep::RfOn => {
            if let Some(cfg) = config {
                shared.rf.configure_from_setup(cfg).await?;
            }
            shared.rf.apply_settings().await?;
        }
        SequenceStep::Sweep => {
            if let Some(cfg) = config {
                shared.analyzer.configure_from_setup(cfg).await?;
            }
            shared.analyzer.start_sweep().await?;
        }
        SequenceStep::Log => {
            // no acquisition backend yet; the step only holds its delay
            debug!("Log step");
        }
        SequenceStep::RfOff => match shutdown {
            ShutdownMode::Disable => shared.rf.rf_off().await?,
            ShutdownMode::Reapply => shared.rf.apply_settings().await?,
        },
        SequenceStep::BiasOff => {
            let report = match shutdown {
                ShutdownMode::Disable => shared.bias.bias_off().await,
                ShutdownMode::Reapply => shared.bias.apply_all().await,
            };
            report.into_result().map_err(|e| anyhow!(e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BenchError, BenchResult};
    use crate::report::{BatchReport, OperationOutcome};
    use crate::sequence::step::StepDelay;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records every capability call by name.
    #[derive(Default)]
    struct Bench {
        calls: Mutex<Vec<&'static str>>,
        fail: Mutex<Option<&'static str>>,
    }

    impl Bench {
        fn call(&self, name: &'static str) -> BenchResult<()> {
            self.calls.lock().unwrap().push(name);
            if *self.fail.lock().unwrap() == Some(name) {
                return Err(BenchError::NotConnected(name.into()));
            }
            Ok(())
        }

        fn batch(&self, name: &'static str) -> BatchReport {
            let mut report = BatchReport::new(name);
            report.push(OperationOutcome::from_result(name, &self.call(name)));
            report
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BiasSupply for Bench {
        async fn apply_bias_targets(&self, _config: &TestConfig) -> BenchResult<()> {
            self.call("bias_targets")
        }
        async fn apply_all(&self) -> BatchReport {
            self.batch("apply_all")
        }
        async fn bias_off(&self) -> BatchReport {
            self.batch("bias_off")
        }
    }

    #[async_trait]
    impl RfSource for Bench {
        async fn configure_from_setup(&self, _config: &TestConfig) -> BenchResult<()> {
            self.call("rf_configure")
        }
        async fn apply_settings(&self) -> BenchResult<()> {
            self.call("rf_apply")
        }
        async fn rf_off(&self) -> BenchResult<()> {
            self.call("rf_off")
        }
    }

    #[async_trait]
    impl SweptAnalyzer for Bench {
        async fn configure_from_setup(&self, _config: &TestConfig) -> BenchResult<()> {
            self.call("sa_configure")
        }
        async fn start_sweep(&self) -> BenchResult<()> {
            self.call("sweep")
        }
    }

    fn runner(bench: &Arc<Bench>) -> SequenceRunner {
        SequenceRunner::new(bench.clone(), bench.clone(), bench.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn full_run_without_setup() {
        let bench = Arc::new(Bench::default());
        let runner = runner(&bench);
        let start = tokio::time::Instant::now();

        assert!(runner.run(None).is_some());
        let report = runner.wait().await.unwrap();

        assert_eq!(report.final_state, SequenceState::Complete);
        assert_eq!(report.completed_steps, SequenceStep::ALL.to_vec());
        assert_eq!(
            bench.calls(),
            vec!["apply_all", "rf_apply", "sweep", "rf_off", "bias_off"]
        );
        assert_eq!(runner.state(), SequenceState::Complete);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn setup_snapshot_feeds_every_step() {
        let bench = Arc::new(Bench::default());
        let runner = runner(&bench).with_delays(StepDelays::uniform(StepDelay::millis(10.0)));

        runner.run(Some(TestConfig::parse("VGDRV=-2").unwrap()));
        runner.wait().await.unwrap();
        assert_eq!(
            bench.calls(),
            vec![
                "bias_targets",
                "apply_all",
                "rf_configure",
                "rf_apply",
                "sa_configure",
                "sweep",
                "rf_off",
                "bias_off"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reapply_mode_reproduces_legacy_shutdown() {
        let bench = Arc::new(Bench::default());
        let runner = runner(&bench).with_shutdown_mode(ShutdownMode::Reapply);
        runner.run(None);
        runner.wait().await.unwrap();
        assert_eq!(
            bench.calls(),
            vec!["apply_all", "rf_apply", "sweep", "rf_apply", "apply_all"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_rejected_while_running() {
        let bench = Arc::new(Bench::default());
        let runner = runner(&bench);
        assert!(runner.run(None).is_some());
        assert!(runner.run(None).is_none());
        runner.wait().await.unwrap();
        assert!(!runner.is_running());
        assert!(runner.run(None).is_some());
        runner.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_at_next_boundary() {
        let bench = Arc::new(Bench::default());
        let runner = runner(&bench);
        let mut state = runner.watch_state();

        runner.run(None);
        state
            .wait_for(|s| *s == SequenceState::RfOn)
            .await
            .unwrap();
        assert!(runner.stop());
        assert_eq!(runner.state(), SequenceState::Cancelling);

        let report = runner.wait().await.unwrap();
        assert_eq!(report.final_state, SequenceState::Idle);
        assert_eq!(
            report.completed_steps,
            vec![SequenceStep::BiasOn, SequenceStep::RfOn]
        );
        assert_eq!(bench.calls(), vec!["apply_all", "rf_apply"]);
        assert_eq!(runner.state(), SequenceState::Idle);
    }

    #[tokio::test]
    async fn stop_without_run_is_a_no_op() {
        let bench = Arc::new(Bench::default());
        let runner = runner(&bench);
        assert!(!runner.stop());
        assert_eq!(runner.state(), SequenceState::Idle);
        assert!(runner.wait().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn late_stop_never_overwrites_final_state() {
        let bench = Arc::new(Bench::default());
        let runner =
            runner(&bench).with_delays(StepDelays::uniform(StepDelay::seconds(0.0)));

        for _ in 0..500 {
            runner.run(None).unwrap();
            while runner.is_running() {
                runner.stop();
            }
            let report = runner.wait().await.unwrap();
            assert!(matches!(
                report.final_state,
                SequenceState::Idle | SequenceState::Complete
            ));
            assert_eq!(runner.state(), report.final_state);
            assert!(!runner.stop());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_step_ends_in_error() {
        let bench = Arc::new(Bench::default());
        *bench.fail.lock().unwrap() = Some("sweep");
        let runner = runner(&bench);
        let mut events = runner.subscribe();

        runner.run(None);
        let report = runner.wait().await.unwrap();

        assert_eq!(report.final_state, SequenceState::Error);
        assert_eq!(
            report.completed_steps,
            vec![SequenceStep::BiasOn, SequenceStep::RfOn]
        );
        assert!(report.error.unwrap().contains("sweep"));
        assert_eq!(bench.calls(), vec!["apply_all", "rf_apply", "sweep"]);

        let mut logs = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SequenceEventKind::Log(line) = event.kind {
                logs.push(line);
            }
        }
        assert_eq!(logs[0], "Step 1: Bias ON");
        assert!(logs.last().unwrap().starts_with("Error: "));
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_failure_fails_bias_on() {
        let bench = Arc::new(Bench::default());
        *bench.fail.lock().unwrap() = Some("apply_all");
        let runner = runner(&bench);
        runner.run(None);
        let report = runner.wait().await.unwrap();
        assert_eq!(report.final_state, SequenceState::Error);
        assert!(report.completed_steps.is_empty());
        assert_eq!(bench.calls(), vec!["apply_all"]);
    }
}
