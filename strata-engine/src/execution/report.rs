// Run Report
// Final per-unit record of a run, as JSON or human-readable text

use crate::execution::plan::ExecutionPlan;
use crate::execution::state::{RunSummary, StateSnapshot};
use crate::models::{Command, UnitPath, UnitStatus};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

/// Output format for run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "terminal" | "console" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: text, json",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit_path: UnitPath,
    pub status: UnitStatus,
    pub duration_ms: u64,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_because: Option<UnitPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub command: Command,
    pub success: bool,
    pub duration_ms: u64,
    pub summary: RunSummary,
    /// One record per planned unit, in stage order
    pub units: Vec<UnitReport>,
}

impl RunReport {
    pub fn from_snapshot(
        plan: &ExecutionPlan,
        snapshot: &StateSnapshot,
        duration: Duration,
    ) -> Self {
        let units: Vec<UnitReport> = plan
            .units()
            .filter_map(|path| snapshot.get(path))
            .map(|result| UnitReport {
                unit_path: result.unit_path.clone(),
                status: result.status,
                duration_ms: result.duration.as_millis() as u64,
                attempt_count: result.attempt_count,
                error: result.last_error.clone(),
                skipped_because: result.skipped_because.clone(),
            })
            .collect();

        let summary = snapshot.summary();
        Self {
            command: plan.command,
            success: summary.all_succeeded(),
            duration_ms: duration.as_millis() as u64,
            summary,
            units,
        }
    }

    pub fn unit(&self, path: &UnitPath) -> Option<&UnitReport> {
        self.units.iter().find(|u| &u.unit_path == path)
    }

    /// 0 when every unit reached a terminal success status, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} in {:.2}s",
            self.command,
            if self.success { "succeeded" } else { "failed" },
            self.duration_ms as f64 / 1000.0
        );

        for unit in &self.units {
            let _ = write!(
                out,
                "  {:<10} {} ({}ms, {} attempt{})",
                unit.status.as_str(),
                unit.unit_path,
                unit.duration_ms,
                unit.attempt_count,
                if unit.attempt_count == 1 { "" } else { "s" }
            );
            if let Some(because) = &unit.skipped_because {
                let _ = write!(out, " because {} failed", because);
            }
            if let Some(error) = &unit.error {
                let _ = write!(out, ": {}", error);
            }
            out.push('\n');
        }

        let s = &self.summary;
        let _ = writeln!(
            out,
            "{} units: {} applied, {} succeeded, {} destroyed, {} failed, {} skipped, {} cancelled",
            s.total, s.applied, s.succeeded, s.destroyed, s.failed, s.skipped, s.cancelled
        );
        out
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, serde_json::Error> {
        match format {
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Json => self.to_json(),
        }
    }
}
