use crate::commands::{discover_settings, resolve_root, setup_failure};
use crate::output;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use strata_engine::execution::events::progress_channel;
use strata_engine::execution::ReportFormat;
use strata_engine::settings::{RetrySettings, TerraformSettings};
use strata_engine::{
    Command, ConfigTree, ExecutionEvent, ExecutionPlan, FailMode, MockPrecedence, ModuleGraph,
    RunControl, Scheduler, Settings, TerraformProvisioner, UnitStatus,
};

/// Run a command over every unit in dependency order
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Command to run: init, validate, plan, apply, destroy
    #[arg(long, short = 'm', value_name = "COMMAND", value_parser = Command::from_str)]
    pub mode: Command,

    /// Configuration root (default: current directory)
    #[arg(long, short = 'r', value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Maximum units running at once
    #[arg(long, short = 'j', value_name = "N")]
    pub concurrency: Option<usize>,

    /// Failure handling: fail-fast, best-effort
    #[arg(long, value_name = "MODE", value_parser = FailMode::from_str)]
    pub fail_mode: Option<FailMode>,

    /// Attempts per unit for transient errors
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Only run units under this path (can be repeated)
    #[arg(long, value_name = "PATH")]
    pub include: Vec<String>,

    /// Never run units under this path (can be repeated)
    #[arg(long, value_name = "PATH")]
    pub exclude: Vec<String>,

    /// Write the JSON run report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Summary format on stdout: text, json
    #[arg(long, short = 'o', default_value = "text", value_parser = ReportFormat::from_str)]
    pub format: ReportFormat,

    /// Terraform-compatible binary to invoke
    #[arg(long, value_name = "PATH")]
    pub terraform_bin: Option<String>,

    /// How mock policies combine on shared dependencies: per-edge, strictest, permissive
    #[arg(long, value_name = "POLICY", value_parser = MockPrecedence::from_str)]
    pub mock_policy: Option<MockPrecedence>,
}

impl RunArgs {
    /// The settings layer these flags describe; unset flags fall through
    fn settings(&self) -> Settings {
        Settings {
            concurrency: self.concurrency,
            fail_mode: self.fail_mode,
            retry: RetrySettings {
                max_attempts: self.max_attempts,
                ..RetrySettings::default()
            },
            mock_policy: self.mock_policy,
            include: (!self.include.is_empty()).then(|| self.include.clone()),
            exclude: (!self.exclude.is_empty()).then(|| self.exclude.clone()),
            terraform: TerraformSettings {
                binary: self.terraform_bin.clone(),
                ..TerraformSettings::default()
            },
            ..Settings::default()
        }
    }
}

pub async fn execute(args: RunArgs) -> Result<i32> {
    let command = args.mode;
    let format = args.format;
    let flags = args.settings();
    let root = resolve_root(args.root.clone());

    let settings = discover_settings(&root).layer(flags);
    let run_config = settings.run_config();

    // Load, merge and link the configuration tree
    output::status("Loading", &format!("{}", root.display()));
    let tree = ConfigTree::load(&root).unwrap_or_else(|e| setup_failure(e.into()));
    let graph = ModuleGraph::build_with(&tree, settings.mock_precedence())
        .unwrap_or_else(|e| setup_failure(e));

    let plan = ExecutionPlan::build(&graph, command, &settings.selection());
    output::info(&format!(
        "{}: {} of {} units in {} stages (concurrency {}, {})",
        command,
        plan.len(),
        graph.len(),
        plan.stages.len(),
        run_config.concurrency,
        run_config.fail_mode
    ));

    let provisioner = TerraformProvisioner::new(settings.terraform_config());
    let control = RunControl::new();
    let (tx, mut rx) = progress_channel();

    let scheduler = Scheduler::new(Arc::new(graph), Arc::new(provisioner))
        .with_config(run_config)
        .with_progress(tx)
        .with_control(control.clone());

    // Ctrl-C stops new work; running units are interrupted at their next retry wait
    let signal_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            signal_control.cancel();
        }
    });

    // Spawn execution in background
    let exec_handle = tokio::spawn(async move { scheduler.run(&plan).await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        match &event {
            ExecutionEvent::RunStarted {
                command,
                total_units,
                total_stages,
            } => {
                println!();
                output::header(&format!(
                    "{} ({} units, {} stages)",
                    command, total_units, total_stages
                ));
            }

            ExecutionEvent::RunCompleted {
                command,
                success,
                duration,
            } => {
                println!();
                if *success {
                    output::success(&format!(
                        "{} completed successfully in {:.2}s",
                        command,
                        duration.as_secs_f64()
                    ));
                } else {
                    output::failure(&format!(
                        "{} failed after {:.2}s",
                        command,
                        duration.as_secs_f64()
                    ));
                }
            }

            ExecutionEvent::StageStarted { index, units } => {
                output::stage_header(*index, units.len());
            }

            ExecutionEvent::StageCompleted { index, duration } => {
                output::dim(&format!(
                    "  Stage {} done ({:.2}s)",
                    index + 1,
                    duration.as_secs_f64()
                ));
            }

            ExecutionEvent::UnitStarted { unit, attempt } => {
                if *attempt > 1 {
                    println!("    {} (attempt {})", unit, attempt);
                } else {
                    println!("    {}", unit);
                }
            }

            ExecutionEvent::UnitRetrying {
                unit,
                attempt,
                delay,
                error,
            } => {
                output::warning(&format!(
                    "    {} attempt {} failed, retrying in {:.1}s: {}",
                    unit,
                    attempt,
                    delay.as_secs_f64(),
                    error
                ));
            }

            ExecutionEvent::UnitCompleted {
                unit,
                status,
                duration,
                error,
                ..
            } => {
                output::unit_result(unit, *status, *duration, error.as_deref());
            }

            ExecutionEvent::UnitSkipped { unit, because } => {
                output::warning(&format!("    {} skipped: {} failed", unit, because));
            }

            ExecutionEvent::UnitCancelled { unit } => {
                output::unit_result(unit, UnitStatus::Cancelled, Default::default(), None);
            }

            ExecutionEvent::MockSubstituted {
                unit,
                dependency,
                target,
            } => {
                output::dim(&format!(
                    "    [mock] {} uses placeholder outputs for '{}' ({})",
                    unit, dependency, target
                ));
            }
        }
    }

    // Wait for the scheduler to finish
    let report = exec_handle.await?;

    if let Some(path) = &args.report {
        std::fs::write(path, report.to_json()?)?;
        output::status("Wrote", &format!("report to {}", path.display()));
    }

    println!();
    print!("{}", report.render(format)?);
    if format == ReportFormat::Json {
        println!();
    }

    Ok(report.exit_code())
}
