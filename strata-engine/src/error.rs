// Engine Errors
// Failures that abort a run before any unit executes

use crate::config::ConfigError;
use crate::graph::GraphError;

use thiserror::Error;

/// Exit code for configuration and graph errors
pub const SETUP_ERROR_EXIT_CODE: i32 = 2;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl EngineError {
    pub fn exit_code(&self) -> i32 {
        SETUP_ERROR_EXIT_CODE
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
