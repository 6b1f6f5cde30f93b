// Execution Events
// Progress reporting for a run, consumed by the CLI while the scheduler works

use crate::models::{Command, UnitPath, UnitStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        command: Command,
        total_units: usize,
        total_stages: usize,
    },

    RunCompleted {
        command: Command,
        success: bool,
        duration: Duration,
    },

    StageStarted { index: usize, units: Vec<UnitPath> },

    StageCompleted { index: usize, duration: Duration },

    /// A provisioning attempt began
    UnitStarted { unit: UnitPath, attempt: u32 },

    /// A transient error will be retried after `delay`
    UnitRetrying {
        unit: UnitPath,
        attempt: u32,
        delay: Duration,
        error: String,
    },

    /// The unit reached a terminal status after running (or failing to prepare)
    UnitCompleted {
        unit: UnitPath,
        status: UnitStatus,
        duration: Duration,
        attempts: u32,
        error: Option<String>,
    },

    /// An upstream unit failed, so this one never ran
    UnitSkipped { unit: UnitPath, because: UnitPath },

    UnitCancelled { unit: UnitPath },

    /// Placeholder outputs substituted for a dependency
    MockSubstituted {
        unit: UnitPath,
        dependency: String,
        target: UnitPath,
    },
}

impl ExecutionEvent {
    pub fn run_started(command: Command, total_units: usize, total_stages: usize) -> Self {
        Self::RunStarted {
            command,
            total_units,
            total_stages,
        }
    }

    pub fn run_completed(command: Command, success: bool, duration: Duration) -> Self {
        Self::RunCompleted {
            command,
            success,
            duration,
        }
    }

    pub fn stage_started(index: usize, units: Vec<UnitPath>) -> Self {
        Self::StageStarted { index, units }
    }

    pub fn stage_completed(index: usize, duration: Duration) -> Self {
        Self::StageCompleted { index, duration }
    }

    pub fn unit_started(unit: UnitPath, attempt: u32) -> Self {
        Self::UnitStarted { unit, attempt }
    }

    pub fn unit_retrying(
        unit: UnitPath,
        attempt: u32,
        delay: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self::UnitRetrying {
            unit,
            attempt,
            delay,
            error: error.into(),
        }
    }

    pub fn unit_completed(
        unit: UnitPath,
        status: UnitStatus,
        duration: Duration,
        attempts: u32,
        error: Option<String>,
    ) -> Self {
        Self::UnitCompleted {
            unit,
            status,
            duration,
            attempts,
            error,
        }
    }

    pub fn unit_skipped(unit: UnitPath, because: UnitPath) -> Self {
        Self::UnitSkipped { unit, because }
    }

    pub fn unit_cancelled(unit: UnitPath) -> Self {
        Self::UnitCancelled { unit }
    }

    pub fn mock_substituted(unit: UnitPath, dependency: impl Into<String>, target: UnitPath) -> Self {
        Self::MockSubstituted {
            unit,
            dependency: dependency.into(),
            target,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
