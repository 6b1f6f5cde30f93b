// Execution Engine Module
// Staging, mock resolution, state tracking and concurrent unit execution

pub mod events;
pub mod inputs;
pub mod mock;
pub mod plan;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod state;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressSender};
pub use inputs::render_inputs;
pub use mock::{resolve_dependencies, resolve_dependency_output, DependencyOutputs, PolicyViolation};
pub use plan::{ExecutionPlan, UnitSelection};
pub use report::{ReportFormat, RunReport, UnitReport};
pub use retry::RetryPolicy;
pub use scheduler::{RunConfig, RunControl, Scheduler, DEFAULT_CONCURRENCY};
pub use state::{RunSummary, StateSnapshot, StateTracker, UnitRunResult};
