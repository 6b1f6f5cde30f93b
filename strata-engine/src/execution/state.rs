// State Tracker
// Per-run bookkeeping of unit statuses and recorded outputs

use crate::execution::plan::ExecutionPlan;
use crate::models::{UnitPath, UnitStatus};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Status, outputs and error history of one unit in the current run
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRunResult {
    pub unit_path: UnitPath,
    pub status: UnitStatus,
    /// Real outputs, only present once the unit is applied
    pub outputs: Option<Map<String, Value>>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Upstream failed unit that caused this unit to be skipped
    pub skipped_because: Option<UnitPath>,
    pub duration: Duration,
}

impl UnitRunResult {
    pub fn pending(unit_path: UnitPath) -> Self {
        Self {
            unit_path,
            status: UnitStatus::Pending,
            outputs: None,
            attempt_count: 0,
            last_error: None,
            skipped_because: None,
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(unit_path: UnitPath, because: UnitPath) -> Self {
        Self {
            status: UnitStatus::Skipped,
            skipped_because: Some(because),
            ..Self::pending(unit_path)
        }
    }

    pub fn cancelled(unit_path: UnitPath) -> Self {
        Self {
            status: UnitStatus::Cancelled,
            ..Self::pending(unit_path)
        }
    }

    pub fn failed(unit_path: UnitPath, attempt_count: u32, error: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failed,
            attempt_count,
            last_error: Some(error.into()),
            ..Self::pending(unit_path)
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Counts of unit statuses at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub applied: usize,
    pub succeeded: usize,
    pub destroyed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Units that never reached a terminal status
    pub unfinished: usize,
}

impl RunSummary {
    fn from_results<'a>(results: impl Iterator<Item = &'a UnitRunResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            match result.status {
                UnitStatus::Applied => summary.applied += 1,
                UnitStatus::Succeeded => summary.succeeded += 1,
                UnitStatus::Destroyed => summary.destroyed += 1,
                UnitStatus::Failed => summary.failed += 1,
                UnitStatus::Skipped => summary.skipped += 1,
                UnitStatus::Cancelled => summary.cancelled += 1,
                UnitStatus::Pending | UnitStatus::Ready | UnitStatus::Running => {
                    summary.unfinished += 1
                }
            }
        }
        summary
    }

    /// Every unit reached a terminal success status
    pub fn all_succeeded(&self) -> bool {
        self.applied + self.succeeded + self.destroyed == self.total
    }
}

/// Consistent point-in-time copy of every unit's result
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    results: BTreeMap<UnitPath, UnitRunResult>,
}

impl StateSnapshot {
    pub fn get(&self, path: &UnitPath) -> Option<&UnitRunResult> {
        self.results.get(path)
    }

    pub fn status(&self, path: &UnitPath) -> Option<UnitStatus> {
        self.results.get(path).map(|r| r.status)
    }

    /// Outputs recorded by a unit applied in this run
    pub fn real_outputs(&self, path: &UnitPath) -> Option<&Map<String, Value>> {
        self.results
            .get(path)
            .filter(|r| r.status == UnitStatus::Applied)
            .and_then(|r| r.outputs.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnitRunResult> {
        self.results.values()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(self.results.values())
    }

    pub(crate) fn insert(&mut self, result: UnitRunResult) {
        self.results.insert(result.unit_path.clone(), result);
    }
}

/// Shared, serialized store of unit results for one run
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    results: Arc<RwLock<BTreeMap<UnitPath, UnitRunResult>>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker with every planned unit in `Pending`
    pub fn for_plan(plan: &ExecutionPlan) -> Self {
        let results = plan
            .units()
            .map(|unit| (unit.clone(), UnitRunResult::pending(unit.clone())))
            .collect();
        Self {
            results: Arc::new(RwLock::new(results)),
        }
    }

    /// Replace the result for a unit
    pub async fn record_result(&self, path: &UnitPath, mut result: UnitRunResult) {
        result.unit_path = path.clone();
        tracing::trace!(unit = %path, status = %result.status, "recorded result");
        self.results.write().await.insert(path.clone(), result);
    }

    /// Mutate a unit's result in place; returns false for unknown units
    pub async fn update<F>(&self, path: &UnitPath, f: F) -> bool
    where
        F: FnOnce(&mut UnitRunResult),
    {
        match self.results.write().await.get_mut(path) {
            Some(result) => {
                f(result);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, path: &UnitPath) -> Option<UnitRunResult> {
        self.results.read().await.get(path).cloned()
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            results: self.results.read().await.clone(),
        }
    }

    pub async fn has_failures(&self) -> bool {
        self.results
            .read()
            .await
            .values()
            .any(|r| r.status == UnitStatus::Failed)
    }

    pub async fn summary(&self) -> RunSummary {
        RunSummary::from_results(self.results.read().await.values())
    }
}
