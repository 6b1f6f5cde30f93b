use crate::commands::{discover_settings, resolve_root, setup_failure};

use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use color_eyre::Result;

use strata_engine::graph::render;
use strata_engine::{ConfigTree, GraphFormat, MockPrecedence, ModuleGraph, Settings};

/// Print the dependency graph of a configuration tree
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Configuration root (default: current directory)
    #[arg(long, short = 'r', value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Output format: dot, mermaid, json
    #[arg(long, short = 'o', default_value = "dot", value_parser = GraphFormat::from_str)]
    pub format: GraphFormat,

    /// How mock policies combine on shared dependencies: per-edge, strictest, permissive
    #[arg(long, value_name = "POLICY", value_parser = MockPrecedence::from_str)]
    pub mock_policy: Option<MockPrecedence>,
}

pub fn execute(args: GraphArgs) -> Result<i32> {
    let format = args.format;
    let flags = Settings {
        mock_policy: args.mock_policy,
        ..Settings::default()
    };
    let root = resolve_root(args.root);
    let settings = discover_settings(&root).layer(flags);

    let tree = ConfigTree::load(&root).unwrap_or_else(|e| setup_failure(e.into()));
    let graph = ModuleGraph::build_with(&tree, settings.mock_precedence())
        .unwrap_or_else(|e| setup_failure(e));

    print!("{}", render(&graph, format)?);
    if format == GraphFormat::Json {
        println!();
    }
    Ok(0)
}
