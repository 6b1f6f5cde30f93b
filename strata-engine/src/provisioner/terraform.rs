// Terraform Provisioner
// Drives the terraform CLI in a unit's working directory

use crate::models::Command;
use crate::provisioner::{
    classify_error, ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner,
    DEFAULT_NON_RETRYABLE_ERRORS, DEFAULT_RETRYABLE_ERRORS,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as Process;

/// Configuration for the terraform driver
#[derive(Debug, Clone)]
pub struct TerraformConfig {
    /// Binary name or path
    pub binary: String,
    /// Run `init` first when the working directory has no `.terraform`
    pub auto_init: bool,
    /// Error message fragments treated as transient
    pub retryable_errors: Vec<String>,
    /// Fragments that make an error permanent, checked before the retryable ones
    pub non_retryable_errors: Vec<String>,
    /// Extra environment passed to every invocation
    pub extra_env: HashMap<String, String>,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            auto_init: true,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            non_retryable_errors: DEFAULT_NON_RETRYABLE_ERRORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extra_env: HashMap::new(),
        }
    }
}

/// Provisioner backed by the terraform CLI
#[derive(Debug, Clone, Default)]
pub struct TerraformProvisioner {
    config: TerraformConfig,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl TerraformProvisioner {
    pub fn new(config: TerraformConfig) -> Self {
        Self { config }
    }

    /// Locate the configured binary on PATH
    pub fn resolve_binary(&self) -> Result<PathBuf, ProvisionError> {
        which::which(&self.config.binary).map_err(|e| {
            ProvisionError::Permanent(format!(
                "terraform binary '{}' not found: {}",
                self.config.binary, e
            ))
        })
    }

    fn args_for(command: Command) -> &'static [&'static str] {
        match command {
            Command::Init => &["init", "-input=false", "-no-color"],
            Command::Validate => &["validate", "-no-color"],
            Command::Plan => &["plan", "-input=false", "-no-color"],
            Command::Apply => &["apply", "-input=false", "-auto-approve", "-no-color"],
            Command::Destroy => &["destroy", "-input=false", "-auto-approve", "-no-color"],
        }
    }

    /// Inputs as `TF_VAR_` variables; strings pass through, everything else as JSON
    fn input_env(inputs: &Map<String, Value>) -> HashMap<String, String> {
        inputs
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (format!("TF_VAR_{}", key), rendered)
            })
            .collect()
    }

    async fn invoke(
        &self,
        binary: &Path,
        args: &[&str],
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, ProvisionError> {
        tracing::debug!(dir = %working_dir.display(), ?args, "invoking terraform");

        let output = Process::new(binary)
            .args(args)
            .current_dir(working_dir)
            .envs(&self.config.extra_env)
            .envs(env)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ProvisionError::Permanent(format!(
                    "failed to spawn '{}': {}",
                    binary.display(),
                    e
                ))
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_checked(
        &self,
        binary: &Path,
        args: &[&str],
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<String, ProvisionError> {
        let output = self.invoke(binary, args, working_dir, env).await?;
        if output.success {
            return Ok(output.stdout);
        }

        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        let subcommand = args.first().copied().unwrap_or("terraform");
        Err(classify_error(
            format!("terraform {} failed: {}", subcommand, detail),
            &self.config.retryable_errors,
            &self.config.non_retryable_errors,
        ))
    }

    async fn read_outputs(
        &self,
        binary: &Path,
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<Map<String, Value>, ProvisionError> {
        let stdout = self
            .run_checked(binary, &["output", "-json", "-no-color"], working_dir, env)
            .await?;
        parse_outputs(&stdout)
    }
}

/// Parse `terraform output -json`, which maps each name to `{ "value": ... }`
pub fn parse_outputs(stdout: &str) -> Result<Map<String, Value>, ProvisionError> {
    if stdout.trim().is_empty() {
        return Ok(Map::new());
    }

    let parsed: Map<String, Value> = serde_json::from_str(stdout).map_err(|e| {
        ProvisionError::Permanent(format!("could not parse terraform outputs: {}", e))
    })?;

    Ok(parsed
        .into_iter()
        .map(|(name, entry)| {
            let value = match entry {
                Value::Object(mut fields) => fields.remove("value").unwrap_or(Value::Null),
                other => other,
            };
            (name, value)
        })
        .collect())
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn execute(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError> {
        let binary = self.resolve_binary()?;
        let dir = &request.working_dir;
        let env = Self::input_env(&request.inputs);

        if self.config.auto_init
            && request.command != Command::Init
            && !dir.join(".terraform").exists()
        {
            tracing::info!(unit = %request.unit, "working directory not initialized, running init");
            self.run_checked(&binary, Self::args_for(Command::Init), dir, &env)
                .await?;
        }

        self.run_checked(&binary, Self::args_for(request.command), dir, &env)
            .await?;

        let outputs = if request.command == Command::Apply {
            self.read_outputs(&binary, dir, &env).await?
        } else {
            Map::new()
        };

        Ok(ProvisionOutcome { outputs })
    }
}
