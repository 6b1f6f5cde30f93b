// Execution Scheduler
// Runs planned stages with a bounded worker pool, retries and failure cascading

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::inputs::render_inputs;
use crate::execution::mock::resolve_dependencies;
use crate::execution::plan::ExecutionPlan;
use crate::execution::report::RunReport;
use crate::execution::retry::RetryPolicy;
use crate::execution::state::{StateSnapshot, StateTracker, UnitRunResult};
use crate::graph::ModuleGraph;
use crate::models::{Command, FailMode, UnitPath, UnitStatus};
use crate::provisioner::{ProvisionError, ProvisionRequest, Provisioner};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};

/// Default size of the worker pool
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum units provisioning at once
    pub concurrency: usize,
    pub fail_mode: FailMode,
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fail_mode: FailMode::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Run-level cancellation signal, shareable across tasks
#[derive(Debug, Clone)]
pub struct RunControl {
    cancelled: Arc<watch::Sender<bool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
        }
    }

    /// Stop starting new stages and queued units; running units finish
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Why a unit cannot start
enum Blocked {
    /// An upstream unit failed; holds the unit that failed
    Failed(UnitPath),
    Cancelled,
}

fn blocked_by(plan: &ExecutionPlan, unit: &UnitPath, snapshot: &StateSnapshot) -> Option<Blocked> {
    let mut cancelled = false;
    for upstream in plan.upstream_of(unit) {
        let Some(result) = snapshot.get(upstream) else {
            continue;
        };
        match result.status {
            UnitStatus::Failed => return Some(Blocked::Failed(upstream.clone())),
            UnitStatus::Skipped => {
                let root = result
                    .skipped_because
                    .clone()
                    .unwrap_or_else(|| upstream.clone());
                return Some(Blocked::Failed(root));
            }
            UnitStatus::Cancelled => cancelled = true,
            _ => {}
        }
    }
    cancelled.then_some(Blocked::Cancelled)
}

/// Dependency-ordered executor for one plan
pub struct Scheduler {
    graph: Arc<ModuleGraph>,
    provisioner: Arc<dyn Provisioner>,
    config: RunConfig,
    /// Progress event sender
    event_tx: Option<ProgressSender>,
    control: RunControl,
}

impl Scheduler {
    pub fn new(graph: Arc<ModuleGraph>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            graph,
            provisioner,
            config: RunConfig::default(),
            event_tx: None,
            control: RunControl::new(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Use an externally owned cancellation signal
    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Execute every stage of the plan and report each unit's terminal status
    pub async fn run(&self, plan: &ExecutionPlan) -> RunReport {
        let start = Instant::now();
        let command = plan.command;
        let state = StateTracker::for_plan(plan);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        tracing::info!(
            command = %command,
            units = plan.len(),
            stages = plan.stages.len(),
            concurrency = self.config.concurrency,
            fail_mode = %self.config.fail_mode,
            "starting run"
        );
        self.event_tx.send_event(ExecutionEvent::run_started(
            command,
            plan.len(),
            plan.stages.len(),
        ));

        for (index, stage) in plan.stages.iter().enumerate() {
            if self.control.is_cancelled() {
                tracing::warn!(stage = index, "run cancelled, not starting remaining stages");
                break;
            }
            if self.config.fail_mode == FailMode::FailFast && state.has_failures().await {
                tracing::warn!(stage = index, "a unit failed, not starting remaining stages");
                break;
            }

            let stage_start = Instant::now();
            self.event_tx
                .send_event(ExecutionEvent::stage_started(index, stage.clone()));

            // Earlier stages are all terminal here
            let snapshot = state.snapshot().await;
            let mut handles = Vec::with_capacity(stage.len());

            for unit in stage {
                match blocked_by(plan, unit, &snapshot) {
                    Some(Blocked::Failed(root)) => {
                        self.skip(&state, unit, root).await;
                        continue;
                    }
                    Some(Blocked::Cancelled) => {
                        self.cancel(&state, unit).await;
                        continue;
                    }
                    None => {}
                }

                state
                    .update(unit, |r| r.status = UnitStatus::Ready)
                    .await;

                let worker = Worker {
                    unit: unit.clone(),
                    command,
                    graph: Arc::clone(&self.graph),
                    provisioner: Arc::clone(&self.provisioner),
                    state: state.clone(),
                    semaphore: Arc::clone(&semaphore),
                    control: self.control.clone(),
                    retry: self.config.retry.clone(),
                    fail_mode: self.config.fail_mode,
                    event_tx: self.event_tx.clone(),
                };
                handles.push((unit.clone(), tokio::spawn(worker.run())));
            }

            // Explicit join: the next stage waits for every unit of this one
            for (unit, handle) in handles {
                if let Err(e) = handle.await {
                    let message = format!("worker task failed: {}", e);
                    tracing::error!(unit = %unit, error = %e, "worker task failed");
                    state
                        .update(&unit, |r| {
                            r.status = UnitStatus::Failed;
                            r.last_error = Some(message.clone());
                        })
                        .await;
                    self.event_tx.send_event(ExecutionEvent::unit_completed(
                        unit,
                        UnitStatus::Failed,
                        Duration::ZERO,
                        0,
                        Some(message),
                    ));
                }
            }

            self.event_tx.send_event(ExecutionEvent::stage_completed(
                index,
                stage_start.elapsed(),
            ));
        }

        self.finalize(plan, &state).await;

        let snapshot = state.snapshot().await;
        let report = RunReport::from_snapshot(plan, &snapshot, start.elapsed());

        tracing::info!(
            command = %command,
            success = report.success,
            failed = report.summary.failed,
            skipped = report.summary.skipped,
            cancelled = report.summary.cancelled,
            duration_ms = report.duration_ms,
            "run finished"
        );
        self.event_tx.send_event(ExecutionEvent::run_completed(
            command,
            report.success,
            start.elapsed(),
        ));

        report
    }

    async fn skip(&self, state: &StateTracker, unit: &UnitPath, because: UnitPath) {
        tracing::info!(unit = %unit, upstream = %because, "skipping unit, upstream failed");
        state
            .record_result(unit, UnitRunResult::skipped(unit.clone(), because.clone()))
            .await;
        self.event_tx
            .send_event(ExecutionEvent::unit_skipped(unit.clone(), because));
    }

    async fn cancel(&self, state: &StateTracker, unit: &UnitPath) {
        tracing::info!(unit = %unit, "cancelling unit");
        state
            .record_result(unit, UnitRunResult::cancelled(unit.clone()))
            .await;
        self.event_tx
            .send_event(ExecutionEvent::unit_cancelled(unit.clone()));
    }

    /// Give every unit that never started its terminal status
    async fn finalize(&self, plan: &ExecutionPlan, state: &StateTracker) {
        let mut snapshot = state.snapshot().await;

        for unit in plan.units() {
            if snapshot.status(unit).map_or(true, |s| s.is_terminal()) {
                continue;
            }

            let result = match blocked_by(plan, unit, &snapshot) {
                Some(Blocked::Failed(root)) => {
                    self.skip(state, unit, root.clone()).await;
                    UnitRunResult::skipped(unit.clone(), root)
                }
                _ => {
                    self.cancel(state, unit).await;
                    UnitRunResult::cancelled(unit.clone())
                }
            };
            snapshot.insert(result);
        }
    }
}

/// One unit's preparation and provisioning, run as its own task
struct Worker {
    unit: UnitPath,
    command: Command,
    graph: Arc<ModuleGraph>,
    provisioner: Arc<dyn Provisioner>,
    state: StateTracker,
    semaphore: Arc<Semaphore>,
    control: RunControl,
    retry: RetryPolicy,
    fail_mode: FailMode,
    event_tx: Option<ProgressSender>,
}

impl Worker {
    async fn run(self) {
        // Held for the whole provisioning call, retries included
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            self.finish(UnitStatus::Cancelled, 0, None, Duration::ZERO).await;
            return;
        };

        if self.halted().await {
            self.finish(UnitStatus::Cancelled, 0, None, Duration::ZERO).await;
            return;
        }

        let start = Instant::now();
        let Some(node) = self.graph.node(&self.unit) else {
            let message = format!("unit '{}' is not part of the module graph", self.unit);
            self.finish(UnitStatus::Failed, 0, Some(message), start.elapsed())
                .await;
            return;
        };

        let snapshot = self.state.snapshot().await;
        let dependencies = match resolve_dependencies(node, self.command, &snapshot) {
            Ok(dependencies) => dependencies,
            Err(violation) => {
                tracing::warn!(unit = %self.unit, error = %violation, "policy violation");
                self.finish(
                    UnitStatus::Failed,
                    0,
                    Some(violation.to_string()),
                    start.elapsed(),
                )
                .await;
                return;
            }
        };

        for (name, outputs) in &dependencies {
            if !outputs.is_mock() {
                continue;
            }
            if let Some(edge) = node.dependency(name) {
                tracing::info!(
                    unit = %self.unit,
                    dependency = %name,
                    target = %edge.target,
                    "using mock outputs"
                );
                self.event_tx.send_event(ExecutionEvent::mock_substituted(
                    self.unit.clone(),
                    name.clone(),
                    edge.target.clone(),
                ));
            }
        }

        let inputs = match render_inputs(&node.config, &dependencies) {
            Ok(inputs) => inputs,
            Err(e) => {
                tracing::warn!(unit = %self.unit, error = %e, "could not render inputs");
                self.finish(UnitStatus::Failed, 0, Some(e.to_string()), start.elapsed())
                    .await;
                return;
            }
        };

        let request = ProvisionRequest {
            unit: self.unit.clone(),
            working_dir: node.working_dir.clone(),
            inputs,
            command: self.command,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.state
                .update(&self.unit, |r| {
                    r.status = UnitStatus::Running;
                    r.attempt_count = attempt;
                })
                .await;
            self.event_tx
                .send_event(ExecutionEvent::unit_started(self.unit.clone(), attempt));
            tracing::debug!(unit = %self.unit, attempt, command = %self.command, "provisioning");

            match self.provisioner.execute(&request).await {
                Ok(outcome) => {
                    let status = self.command.success_status();
                    let duration = start.elapsed();
                    let outputs = (self.command == Command::Apply).then_some(outcome.outputs);
                    self.state
                        .update(&self.unit, |r| {
                            r.status = status;
                            r.outputs = outputs;
                            r.last_error = None;
                            r.duration = duration;
                        })
                        .await;

                    tracing::info!(unit = %self.unit, status = %status, attempts = attempt, "unit finished");
                    self.event_tx.send_event(ExecutionEvent::unit_completed(
                        self.unit.clone(),
                        status,
                        duration,
                        attempt,
                        None,
                    ));
                    return;
                }
                Err(ProvisionError::Transient(message)) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        unit = %self.unit,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient error, retrying"
                    );
                    self.state
                        .update(&self.unit, |r| r.last_error = Some(message.clone()))
                        .await;
                    self.event_tx.send_event(ExecutionEvent::unit_retrying(
                        self.unit.clone(),
                        attempt,
                        delay,
                        message.clone(),
                    ));

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.control.cancelled() => {
                            self.finish(UnitStatus::Cancelled, attempt, Some(message), start.elapsed())
                                .await;
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(unit = %self.unit, attempts = attempt, error = %e, "unit failed");
                    self.finish(UnitStatus::Failed, attempt, Some(e.to_string()), start.elapsed())
                        .await;
                    return;
                }
            }
        }
    }

    /// Queued units stop here once the run is cancelled or, in fail-fast, once anything failed
    async fn halted(&self) -> bool {
        self.control.is_cancelled()
            || (self.fail_mode == FailMode::FailFast && self.state.has_failures().await)
    }

    async fn finish(
        &self,
        status: UnitStatus,
        attempts: u32,
        error: Option<String>,
        duration: Duration,
    ) {
        let recorded_error = error.clone();
        self.state
            .update(&self.unit, |r| {
                r.status = status;
                r.attempt_count = attempts;
                r.last_error = recorded_error;
                r.duration = duration;
            })
            .await;

        let event = if status == UnitStatus::Cancelled {
            ExecutionEvent::unit_cancelled(self.unit.clone())
        } else {
            ExecutionEvent::unit_completed(self.unit.clone(), status, duration, attempts, error)
        };
        self.event_tx.send_event(event);
    }
}
