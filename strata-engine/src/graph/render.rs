// Graph Rendering
// DOT, Mermaid and JSON views of the module graph

use crate::graph::module_graph::ModuleGraph;

use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

/// Output format for graph renderings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphFormat {
    /// Graphviz DOT
    #[default]
    Dot,
    /// Mermaid flowchart
    Mermaid,
    /// Machine-readable JSON
    Json,
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphFormat::Dot => write!(f, "dot"),
            GraphFormat::Mermaid => write!(f, "mermaid"),
            GraphFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dot" | "graphviz" => Ok(GraphFormat::Dot),
            "mermaid" => Ok(GraphFormat::Mermaid),
            "json" => Ok(GraphFormat::Json),
            _ => Err(format!(
                "Unknown graph format '{}'. Valid formats: dot, mermaid, json",
                s
            )),
        }
    }
}

/// Render the graph, nodes in path order and edges labelled by dependency name
pub fn render(graph: &ModuleGraph, format: GraphFormat) -> Result<String, serde_json::Error> {
    match format {
        GraphFormat::Dot => Ok(to_dot(graph)),
        GraphFormat::Mermaid => Ok(to_mermaid(graph)),
        GraphFormat::Json => to_json(graph),
    }
}

fn to_dot(graph: &ModuleGraph) -> String {
    let mut out = String::from("digraph strata {\n  rankdir=LR;\n  node [shape=box];\n");

    for node in graph.nodes() {
        let _ = writeln!(out, "  \"{}\";", dot_escape(&node.path.to_string()));
    }
    for (from, edge) in graph.edges() {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            dot_escape(&from.to_string()),
            dot_escape(&edge.target.to_string()),
            dot_escape(&edge.name)
        );
    }

    out.push_str("}\n");
    out
}

fn to_mermaid(graph: &ModuleGraph) -> String {
    let mut out = String::from("graph LR\n");
    let ids: HashMap<_, _> = graph
        .nodes()
        .iter()
        .enumerate()
        .map(|(i, node)| (&node.path, format!("n{}", i)))
        .collect();

    for (i, node) in graph.nodes().iter().enumerate() {
        let _ = writeln!(out, "  n{}[\"{}\"]", i, node.path.to_string().replace('"', "#quot;"));
    }
    for (from, edge) in graph.edges() {
        if let (Some(from_id), Some(to_id)) = (ids.get(from), ids.get(&edge.target)) {
            let _ = writeln!(out, "  {} -->|{}| {}", from_id, edge.name, to_id);
        }
    }

    out
}

fn to_json(graph: &ModuleGraph) -> Result<String, serde_json::Error> {
    let units: Vec<_> = graph
        .nodes()
        .iter()
        .map(|node| {
            let dependencies: Vec<_> = node
                .dependencies
                .iter()
                .map(|edge| {
                    json!({
                        "name": edge.name,
                        "target": edge.target,
                        "skip_outputs": edge.skip_outputs,
                        "mock_outputs": edge.mock.outputs,
                        "mock_outputs_allowed_commands": edge.mock.allowed_commands,
                    })
                })
                .collect();

            json!({
                "unit_path": node.path,
                "working_dir": node.working_dir,
                "dependencies": dependencies,
            })
        })
        .collect();

    serde_json::to_string_pretty(&json!({ "units": units }))
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
