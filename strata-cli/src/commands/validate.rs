use crate::commands::{discover_settings, resolve_root, setup_failure};
use crate::output;

use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use color_eyre::Result;

use strata_engine::{
    Command, ConfigTree, EngineError, ExecutionPlan, MockPrecedence, ModuleGraph, Settings,
};

/// Check that a configuration tree loads, merges and forms an acyclic graph
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration root (default: current directory)
    #[arg(long, short = 'r', value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Command to stage the plan for: init, validate, plan, apply, destroy
    #[arg(long, short = 'm', default_value = "plan", value_parser = Command::from_str)]
    pub mode: Command,

    /// How mock policies combine on shared dependencies: per-edge, strictest, permissive
    #[arg(long, value_name = "POLICY", value_parser = MockPrecedence::from_str)]
    pub mock_policy: Option<MockPrecedence>,
}

pub fn execute(args: ValidateArgs) -> Result<i32> {
    let command = args.mode;
    let flags = Settings {
        mock_policy: args.mock_policy,
        ..Settings::default()
    };
    let root = resolve_root(args.root);

    output::status("Validating", &format!("{}", root.display()));
    let settings = discover_settings(&root).layer(flags);
    output::check("Settings valid");

    // Step 1: Load documents and include chains
    let tree = ConfigTree::load(&root).unwrap_or_else(|e| setup_failure(e.into()));
    output::check(&format!("Loaded {} units", tree.len()));

    // Step 2: Merge every unit so conflicts surface here instead of mid-run
    for unit in tree.units() {
        if let Err(e) = tree.resolve(&unit.path) {
            setup_failure(EngineError::from(e));
        }
    }
    output::check("Merged configuration");

    // Step 3: Link dependencies and reject cycles
    let graph = ModuleGraph::build_with(&tree, settings.mock_precedence())
        .unwrap_or_else(|e| setup_failure(e));
    let edges = graph.edges().count();
    output::check(&format!(
        "Dependency graph: {} units, {} edge{}",
        graph.len(),
        edges,
        if edges == 1 { "" } else { "s" }
    ));

    let plan = ExecutionPlan::build(&graph, command, &settings.selection());
    for (index, stage) in plan.stages.iter().enumerate() {
        output::dim(&format!(
            "  Stage {}: {}",
            index + 1,
            stage
                .iter()
                .map(|unit| unit.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    output::success(&format!(
        "{} ready: {} units in {} stages",
        command,
        plan.len(),
        plan.stages.len()
    ));
    Ok(0)
}
