// Module Graph Builder
// Builds the dependency DAG between units and rejects cycles before anything runs

use crate::config::{ConfigTree, ResolvedConfig, UNIT_FILE};
use crate::error::EngineError;
use crate::graph::policy::{DependencySpec, MockPolicy, MockPrecedence};
use crate::models::UnitPath;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
    /// Units forming the cycle, first unit repeated at the end
    pub cycle: Vec<UnitPath>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Dependency on a unit that does not exist in the tree
    UnresolvedDependency,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(cycle: Vec<UnitPath>) -> Self {
        let path = cycle
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        Self {
            message: format!("circular dependency detected: {}", path),
            kind: GraphErrorKind::CyclicDependency,
            cycle,
        }
    }

    pub fn unresolved(unit: &UnitPath, name: &str, config_path: &str) -> Self {
        Self {
            message: format!(
                "unit '{}' depends on '{}' via '{}', which is not a unit in this tree",
                unit, name, config_path
            ),
            kind: GraphErrorKind::UnresolvedDependency,
            cycle: Vec::new(),
        }
    }
}

/// Edge from a dependent unit to one of its dependencies
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    /// Name the dependent uses to reference the target's outputs
    pub name: String,
    pub target: UnitPath,
    pub mock: MockPolicy,
    pub skip_outputs: bool,
}

/// A unit with its effective configuration and outgoing edges
#[derive(Debug, Clone)]
pub struct UnitNode {
    pub path: UnitPath,
    pub working_dir: PathBuf,
    pub config: ResolvedConfig,
    pub dependencies: Vec<DependencyEdge>,
}

impl UnitNode {
    pub fn dependency(&self, name: &str) -> Option<&DependencyEdge> {
        self.dependencies.iter().find(|edge| edge.name == name)
    }
}

/// Index-addressed DAG of units; edges point from dependent to dependency
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    nodes: Vec<UnitNode>,
    indices: HashMap<UnitPath, usize>,
    /// node -> the nodes it depends on
    adjacency: Vec<Vec<usize>>,
    /// node -> the nodes depending on it
    reverse: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl ModuleGraph {
    /// Build from a loaded tree with per-edge mock precedence
    pub fn build(tree: &ConfigTree) -> Result<Self, EngineError> {
        Self::build_with(tree, MockPrecedence::default())
    }

    /// Load a tree from disk and build its graph
    pub fn load(root: impl AsRef<Path>, precedence: MockPrecedence) -> Result<Self, EngineError> {
        let tree = ConfigTree::load(root)?;
        Self::build_with(&tree, precedence)
    }

    pub fn build_with(tree: &ConfigTree, precedence: MockPrecedence) -> Result<Self, EngineError> {
        let mut nodes = Vec::with_capacity(tree.len());
        let mut indices = HashMap::new();

        for (i, unit) in tree.units().enumerate() {
            let config = tree.resolve(&unit.path)?;
            let mut dependencies = Vec::new();

            for (name, spec) in DependencySpec::parse_all(&config)? {
                if !spec.enabled {
                    tracing::debug!(unit = %unit.path, dependency = %name, "dependency disabled");
                    continue;
                }

                let target = resolve_target(&unit.path, &spec.config_path)
                    .filter(|target| tree.contains(target))
                    .ok_or_else(|| GraphError::unresolved(&unit.path, &name, &spec.config_path))?;

                dependencies.push(DependencyEdge {
                    name,
                    mock: spec.mock_policy(),
                    skip_outputs: spec.skip_outputs,
                    target,
                });
            }

            indices.insert(unit.path.clone(), i);
            nodes.push(UnitNode {
                path: unit.path.clone(),
                working_dir: unit.path.on_disk(tree.root()),
                config,
                dependencies,
            });
        }

        apply_precedence(&mut nodes, precedence);

        let mut adjacency = vec![Vec::new(); nodes.len()];
        let mut reverse = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for edge in &node.dependencies {
                let Some(&target) = indices.get(&edge.target) else {
                    continue;
                };
                if !adjacency[i].contains(&target) {
                    adjacency[i].push(target);
                    reverse[target].push(i);
                }
            }
        }

        let graph = Self {
            nodes,
            indices,
            adjacency,
            reverse,
        };

        graph.detect_cycles()?;

        tracing::debug!(
            units = graph.len(),
            edges = graph.adjacency.iter().map(Vec::len).sum::<usize>(),
            "built module graph"
        );

        Ok(graph)
    }

    /// Iterative depth-first search with three-color marking
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut color = vec![Color::White; self.nodes.len()];

        for start in 0..self.nodes.len() {
            if color[start] != Color::White {
                continue;
            }

            // (node, index of the next edge to explore)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            color[start] = Color::Gray;

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if top.1 < self.adjacency[node].len() {
                    let next = self.adjacency[node][top.1];
                    top.1 += 1;

                    match color[next] {
                        Color::White => {
                            color[next] = Color::Gray;
                            stack.push((next, 0));
                        }
                        Color::Gray => {
                            let from = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                            let mut cycle: Vec<UnitPath> = stack[from..]
                                .iter()
                                .map(|&(n, _)| self.nodes[n].path.clone())
                                .collect();
                            cycle.push(self.nodes[next].path.clone());
                            return Err(GraphError::cyclic(cycle));
                        }
                        Color::Black => {}
                    }
                } else {
                    color[node] = Color::Black;
                    stack.pop();
                }
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in path order
    pub fn nodes(&self) -> &[UnitNode] {
        &self.nodes
    }

    pub fn node(&self, path: &UnitPath) -> Option<&UnitNode> {
        self.indices.get(path).map(|&idx| &self.nodes[idx])
    }

    pub fn contains(&self, path: &UnitPath) -> bool {
        self.indices.contains_key(path)
    }

    /// Units `path` depends on directly
    pub fn dependencies_of(&self, path: &UnitPath) -> Vec<&UnitPath> {
        self.neighbors(path, &self.adjacency)
    }

    /// Units depending on `path` directly
    pub fn dependents_of(&self, path: &UnitPath) -> Vec<&UnitPath> {
        self.neighbors(path, &self.reverse)
    }

    /// Every unit that depends on `path`, directly or through other units
    pub fn transitive_dependents(&self, path: &UnitPath) -> BTreeSet<UnitPath> {
        self.reachable(path, &self.reverse)
    }

    /// Every unit `path` depends on, directly or through other units
    pub fn transitive_dependencies(&self, path: &UnitPath) -> BTreeSet<UnitPath> {
        self.reachable(path, &self.adjacency)
    }

    /// All edges as (dependent, edge) pairs, in dependent path order
    pub fn edges(&self) -> impl Iterator<Item = (&UnitPath, &DependencyEdge)> {
        self.nodes
            .iter()
            .flat_map(|node| node.dependencies.iter().map(move |edge| (&node.path, edge)))
    }

    fn neighbors<'a>(&'a self, path: &UnitPath, lists: &'a [Vec<usize>]) -> Vec<&'a UnitPath> {
        let Some(&idx) = self.indices.get(path) else {
            return Vec::new();
        };
        let mut out: Vec<&UnitPath> = lists[idx].iter().map(|&n| &self.nodes[n].path).collect();
        out.sort();
        out
    }

    fn reachable(&self, path: &UnitPath, lists: &[Vec<usize>]) -> BTreeSet<UnitPath> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.indices.get(path) else {
            return seen;
        };

        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for &next in &lists[idx] {
                if seen.insert(self.nodes[next].path.clone()) {
                    stack.push(next);
                }
            }
        }
        seen
    }
}

/// Resolve a `config_path`, accepting a path to the unit file itself
fn resolve_target(unit: &UnitPath, config_path: &str) -> Option<UnitPath> {
    let target = unit.resolve(config_path)?;
    if target.components().last() == Some(UNIT_FILE) {
        return target.parent();
    }
    Some(target)
}

fn apply_precedence(nodes: &mut [UnitNode], precedence: MockPrecedence) {
    if precedence == MockPrecedence::PerEdge {
        return;
    }

    let mut by_target: BTreeMap<UnitPath, Vec<&MockPolicy>> = BTreeMap::new();
    for edge in nodes.iter().flat_map(|n| n.dependencies.iter()) {
        by_target.entry(edge.target.clone()).or_default().push(&edge.mock);
    }

    let combined: BTreeMap<UnitPath, _> = by_target
        .into_iter()
        .filter_map(|(target, policies)| {
            precedence.combine(policies).map(|commands| (target, commands))
        })
        .collect();

    for edge in nodes.iter_mut().flat_map(|n| n.dependencies.iter_mut()) {
        if let Some(commands) = combined.get(&edge.target) {
            edge.mock.allowed_commands = commands.clone();
        }
    }
}
