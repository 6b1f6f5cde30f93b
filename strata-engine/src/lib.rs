// Strata Engine Library
// Hierarchical configuration composition and dependency-ordered execution of infrastructure units

pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod models;
pub mod provisioner;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};
pub use models::{Command, FailMode, UnitPath, UnitStatus};

// Re-export config types
pub use config::{ConfigError, ConfigTree, ResolvedConfig};

// Re-export graph types
pub use graph::{GraphError, GraphFormat, MockPrecedence, ModuleGraph};

// Re-export execution types
pub use execution::{
    ExecutionEvent, ExecutionPlan, ProgressSender, RunConfig, RunControl, RunReport, Scheduler,
    UnitSelection,
};

// Re-export provisioner types
pub use provisioner::{Provisioner, TerraformConfig, TerraformProvisioner};

pub use settings::Settings;
