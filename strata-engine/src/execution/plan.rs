// Execution Plan
// Selects units for a run and levels them into stages with Kahn's algorithm

use crate::graph::ModuleGraph;
use crate::models::{Command, UnitPath};

use std::collections::{BTreeMap, BTreeSet};

/// Path-prefix filters choosing which units take part in a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitSelection {
    pub include: Vec<UnitPath>,
    pub exclude: Vec<UnitPath>,
}

impl UnitSelection {
    /// Select every unit
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from raw path prefixes; prefixes escaping the root are ignored
    pub fn from_patterns(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include.iter().filter_map(UnitPath::new).collect(),
            exclude: exclude.iter().filter_map(UnitPath::new).collect(),
        }
    }

    pub fn selects(&self, path: &UnitPath) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|prefix| path.starts_with(prefix));
        included && !self.exclude.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Ordered stages of units for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub command: Command,
    /// Units in each stage, sorted by path; no edges within a stage
    pub stages: Vec<Vec<UnitPath>>,
    /// For each planned unit, the planned units that must finish before it
    upstream: BTreeMap<UnitPath, Vec<UnitPath>>,
}

impl ExecutionPlan {
    /// Plan a command over the selected units
    ///
    /// Destroy runs reverse the edges so dependents go first. Edges to unselected units
    /// impose no ordering.
    pub fn build(graph: &ModuleGraph, command: Command, selection: &UnitSelection) -> Self {
        let selected: BTreeSet<&UnitPath> = graph
            .nodes()
            .iter()
            .map(|node| &node.path)
            .filter(|path| selection.selects(path))
            .collect();

        let upstream: BTreeMap<UnitPath, Vec<UnitPath>> = selected
            .iter()
            .map(|&path| {
                let before = if command.is_reverse_order() {
                    graph.dependents_of(path)
                } else {
                    graph.dependencies_of(path)
                };
                let before = before
                    .into_iter()
                    .filter(|p| selected.contains(p))
                    .cloned()
                    .collect();
                (path.clone(), before)
            })
            .collect();

        // Kahn leveling: each round takes every unit whose upstream is fully placed
        let mut in_degree: BTreeMap<&UnitPath, usize> = upstream
            .iter()
            .map(|(path, before)| (path, before.len()))
            .collect();
        let mut downstream: BTreeMap<&UnitPath, Vec<&UnitPath>> = BTreeMap::new();
        for (path, before) in &upstream {
            for dep in before {
                downstream.entry(dep).or_default().push(path);
            }
        }

        let mut stages = Vec::new();
        while !in_degree.is_empty() {
            let stage: Vec<&UnitPath> = in_degree
                .iter()
                .filter(|(_, &deg)| deg == 0)
                .map(|(&path, _)| path)
                .collect();

            if stage.is_empty() {
                // Unreachable for a graph that passed cycle detection
                tracing::error!(remaining = in_degree.len(), "planning stalled on a cycle");
                break;
            }

            for path in &stage {
                in_degree.remove(path);
                for next in downstream.get(path).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(next) {
                        *deg -= 1;
                    }
                }
            }

            stages.push(stage.into_iter().cloned().collect());
        }

        tracing::debug!(
            command = %command,
            units = upstream.len(),
            stages = stages.len(),
            "built execution plan"
        );

        Self {
            command,
            stages,
            upstream,
        }
    }

    /// Planned units in stage order
    pub fn units(&self) -> impl Iterator<Item = &UnitPath> {
        self.stages.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.upstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }

    pub fn contains(&self, path: &UnitPath) -> bool {
        self.upstream.contains_key(path)
    }

    pub fn stage_index(&self, path: &UnitPath) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(path))
    }

    /// Planned units that run before `path` in this command's direction
    pub fn upstream_of(&self, path: &UnitPath) -> &[UnitPath] {
        self.upstream.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigTree, MemorySource};
    use crate::testing::chain_tree;

    fn path(p: &str) -> UnitPath {
        UnitPath::new(p).unwrap()
    }

    fn diamond() -> ModuleGraph {
        let source = MemorySource::new("/live")
            .with_yaml("base/unit.yaml", "")
            .unwrap()
            .with_yaml("left/unit.yaml", "dependencies:\n  base:\n    config_path: base\n")
            .unwrap()
            .with_yaml("right/unit.yaml", "dependencies:\n  base:\n    config_path: base\n")
            .unwrap()
            .with_yaml(
                "top/unit.yaml",
                "dependencies:\n  left:\n    config_path: left\n  right:\n    config_path: right\n",
            )
            .unwrap()
            .with_yaml("solo/unit.yaml", "")
            .unwrap();
        ModuleGraph::build(&ConfigTree::from_source(&source).unwrap()).unwrap()
    }

    #[test]
    fn test_stages_follow_dependencies() {
        let graph = diamond();
        let plan = ExecutionPlan::build(&graph, Command::Apply, &UnitSelection::all());

        assert_eq!(
            plan.stages,
            vec![
                vec![path("base"), path("solo")],
                vec![path("left"), path("right")],
                vec![path("top")],
            ]
        );

        for (dependent, edge) in graph.edges() {
            assert!(plan.stage_index(&edge.target) < plan.stage_index(dependent));
        }
    }

    #[test]
    fn test_destroy_reverses_order() {
        let graph = ModuleGraph::build(&chain_tree()).unwrap();
        let plan = ExecutionPlan::build(&graph, Command::Destroy, &UnitSelection::all());

        assert_eq!(
            plan.stages,
            vec![
                vec![path("dev/app")],
                vec![path("dev/compute")],
                vec![path("dev/network")],
            ]
        );
        assert_eq!(plan.upstream_of(&path("dev/network")), &[path("dev/compute")]);
    }

    #[test]
    fn test_planning_is_deterministic() {
        let graph = diamond();
        let first = ExecutionPlan::build(&graph, Command::Plan, &UnitSelection::all());
        let second = ExecutionPlan::build(&graph, Command::Plan, &UnitSelection::all());
        assert_eq!(first, second);
    }

    #[test]
    fn test_selection_filters_and_drops_edges() {
        let graph = ModuleGraph::build(&chain_tree()).unwrap();
        let selection = UnitSelection::from_patterns(&[], &["dev/network".to_string()]);
        let plan = ExecutionPlan::build(&graph, Command::Plan, &selection);

        assert!(!plan.contains(&path("dev/network")));
        assert_eq!(
            plan.stages,
            vec![vec![path("dev/compute")], vec![path("dev/app")]]
        );
        assert!(plan.upstream_of(&path("dev/compute")).is_empty());
    }

    #[test]
    fn test_selection_prefixes_are_component_aware() {
        let selection = UnitSelection::from_patterns(&["dev".to_string()], &[]);
        assert!(selection.selects(&path("dev/network")));
        assert!(!selection.selects(&path("devops/network")));
        assert!(UnitSelection::all().selects(&path("anything")));
    }
}
