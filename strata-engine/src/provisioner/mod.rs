// Provisioner Module
// The external collaborator that actually runs init/validate/plan/apply/destroy for a unit

pub mod terraform;

pub use terraform::{TerraformConfig, TerraformProvisioner};

use crate::models::{Command, UnitPath};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

/// Error messages that usually clear up on their own
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "rate limit exceeded",
    "quota exceeded",
    "service unavailable",
    "deadline exceeded",
    "resource exhausted",
    "temporary failure",
    "connection refused",
    "connection reset",
    "timeout",
    "too many requests",
    "throttled",
    "backoff",
];

/// Error messages that never clear up, even when they also match a retryable pattern
pub const DEFAULT_NON_RETRYABLE_ERRORS: &[&str] = &[
    "invalid credentials",
    "permission denied",
    "not found",
    "already exists",
    "invalid argument",
    "failed precondition",
];

/// Everything a provisioner needs to run one command for one unit
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    pub unit: UnitPath,
    pub working_dir: PathBuf,
    /// Rendered inputs
    pub inputs: Map<String, Value>,
    pub command: Command,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionOutcome {
    /// Outputs after the command; only meaningful for apply
    pub outputs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    /// Worth retrying after a backoff
    #[error("transient error: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl ProvisionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProvisionError::Transient(message) | ProvisionError::Permanent(message) => message,
        }
    }
}

/// Classify an error message as transient when it contains a retryable pattern and no
/// non-retryable one (both case-insensitive)
pub fn classify_error<S: AsRef<str>, N: AsRef<str>>(
    message: impl Into<String>,
    retryable: &[S],
    non_retryable: &[N],
) -> ProvisionError {
    let message = message.into();
    let lower = message.to_lowercase();
    let matches = |pattern: &str| !pattern.is_empty() && lower.contains(&pattern.to_lowercase());

    if non_retryable.iter().any(|p| matches(p.as_ref())) {
        return ProvisionError::Permanent(message);
    }
    if retryable.iter().any(|p| matches(p.as_ref())) {
        ProvisionError::Transient(message)
    } else {
        ProvisionError::Permanent(message)
    }
}

/// Runs provisioning commands for units
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn execute(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error() {
        let none: &[&str] = &[];
        let err = classify_error("Error 429: Too Many Requests", DEFAULT_RETRYABLE_ERRORS, none);
        assert!(err.is_transient());

        let err = classify_error("invalid value for machine_type", DEFAULT_RETRYABLE_ERRORS, none);
        assert_eq!(
            err,
            ProvisionError::Permanent("invalid value for machine_type".to_string())
        );

        let custom = vec!["flaky backend".to_string()];
        assert!(classify_error("the Flaky Backend hiccuped", &custom, none).is_transient());
        assert!(!classify_error("anything", &Vec::<String>::new(), none).is_transient());
    }

    #[test]
    fn test_non_retryable_patterns_win() {
        let err = classify_error(
            "timeout waiting for instance: Permission denied on project",
            DEFAULT_RETRYABLE_ERRORS,
            DEFAULT_NON_RETRYABLE_ERRORS,
        );
        assert!(!err.is_transient());

        let err = classify_error(
            "timeout waiting for instance",
            DEFAULT_RETRYABLE_ERRORS,
            DEFAULT_NON_RETRYABLE_ERRORS,
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_message() {
        let err = ProvisionError::Transient("timeout".to_string());
        assert_eq!(err.message(), "timeout");
        assert_eq!(err.to_string(), "transient error: timeout");
    }
}
