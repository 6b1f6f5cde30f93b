// Engine Settings
// Layered run settings: user file, then the configuration root, then command-line overrides

use crate::config::ConfigError;
use crate::execution::{RetryPolicy, RunConfig, UnitSelection, DEFAULT_CONCURRENCY};
use crate::graph::MockPrecedence;
use crate::models::FailMode;
use crate::provisioner::TerraformConfig;

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file looked up at the configuration root
pub const FILE_NAME: &str = "strata.yaml";

/// One settings layer; unset fields fall through to lower layers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub concurrency: Option<usize>,
    pub fail_mode: Option<FailMode>,
    pub retry: RetrySettings,
    /// Replaces the built-in transient error patterns
    pub retryable_errors: Option<Vec<String>>,
    /// Replaces the built-in permanent error patterns
    pub non_retryable_errors: Option<Vec<String>>,
    pub mock_policy: Option<MockPrecedence>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub terraform: TerraformSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerraformSettings {
    pub binary: Option<String>,
    pub auto_init: Option<bool>,
}

/// `~/.strata/settings.yaml`, when a home directory is known
pub fn user_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".strata").join("settings.yaml"))
}

impl Settings {
    /// Parse a settings file; a missing file is `None`
    pub fn load_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Some(Self::default()));
        }

        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
    }

    /// User settings overlaid with the root's `strata.yaml`
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(path) = user_settings_path() {
            if let Some(user) = Self::load_file(&path)? {
                tracing::debug!(path = %path.display(), "loaded user settings");
                settings = settings.layer(user);
            }
        }

        let project_path = root.join(FILE_NAME);
        if let Some(project) = Self::load_file(&project_path)? {
            tracing::debug!(path = %project_path.display(), "loaded project settings");
            settings = settings.layer(project);
        }

        Ok(settings)
    }

    /// Overlay `other`; fields set in `other` win
    pub fn layer(self, other: Settings) -> Settings {
        Settings {
            concurrency: other.concurrency.or(self.concurrency),
            fail_mode: other.fail_mode.or(self.fail_mode),
            retry: RetrySettings {
                max_attempts: other.retry.max_attempts.or(self.retry.max_attempts),
                initial_backoff_ms: other
                    .retry
                    .initial_backoff_ms
                    .or(self.retry.initial_backoff_ms),
                max_backoff_ms: other.retry.max_backoff_ms.or(self.retry.max_backoff_ms),
                multiplier: other.retry.multiplier.or(self.retry.multiplier),
                jitter: other.retry.jitter.or(self.retry.jitter),
            },
            retryable_errors: other.retryable_errors.or(self.retryable_errors),
            non_retryable_errors: other.non_retryable_errors.or(self.non_retryable_errors),
            mock_policy: other.mock_policy.or(self.mock_policy),
            include: other.include.or(self.include),
            exclude: other.exclude.or(self.exclude),
            terraform: TerraformSettings {
                binary: other.terraform.binary.or(self.terraform.binary),
                auto_init: other.terraform.auto_init.or(self.terraform.auto_init),
            },
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self
                .retry
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: self
                .retry
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            multiplier: self.retry.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.retry.jitter.unwrap_or(defaults.jitter),
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            concurrency: self.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            fail_mode: self.fail_mode.unwrap_or_default(),
            retry: self.retry_policy(),
        }
    }

    pub fn mock_precedence(&self) -> MockPrecedence {
        self.mock_policy.unwrap_or_default()
    }

    pub fn selection(&self) -> UnitSelection {
        UnitSelection::from_patterns(
            self.include.as_deref().unwrap_or_default(),
            self.exclude.as_deref().unwrap_or_default(),
        )
    }

    pub fn terraform_config(&self) -> TerraformConfig {
        let defaults = TerraformConfig::default();
        TerraformConfig {
            binary: self.terraform.binary.clone().unwrap_or(defaults.binary),
            auto_init: self.terraform.auto_init.unwrap_or(defaults.auto_init),
            retryable_errors: self
                .retryable_errors
                .clone()
                .unwrap_or(defaults.retryable_errors),
            non_retryable_errors: self
                .non_retryable_errors
                .clone()
                .unwrap_or(defaults.non_retryable_errors),
            extra_env: defaults.extra_env,
        }
    }
}
