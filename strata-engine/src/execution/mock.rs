// Mock Output Resolver
// Chooses real or placeholder outputs for each dependency edge of a unit about to run

use crate::execution::state::StateSnapshot;
use crate::graph::{DependencyEdge, UnitNode};
use crate::models::{Command, UnitPath};

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Outputs a unit sees for one of its dependencies
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyOutputs {
    /// Recorded by the dependency's apply in this run
    Real(Map<String, Value>),
    /// Declared placeholders, valid for this resolution only
    Mock(Map<String, Value>),
    /// The edge orders execution but never reads outputs
    Skipped,
}

impl DependencyOutputs {
    pub fn outputs(&self) -> Option<&Map<String, Value>> {
        match self {
            DependencyOutputs::Real(outputs) | DependencyOutputs::Mock(outputs) => Some(outputs),
            DependencyOutputs::Skipped => None,
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, DependencyOutputs::Mock(_))
    }
}

/// A dependency has no real outputs and its policy forbids mocking them
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unit '{consumer}' cannot read outputs of dependency '{dependency}' ({target}) during {command}: {reason}")]
pub struct PolicyViolation {
    pub consumer: UnitPath,
    pub dependency: String,
    pub target: UnitPath,
    pub command: Command,
    pub reason: String,
}

/// Resolve one edge: real outputs first, then mocks if the command allows them
pub fn resolve_dependency_output(
    consumer: &UnitPath,
    edge: &DependencyEdge,
    command: Command,
    state: &StateSnapshot,
) -> Result<DependencyOutputs, PolicyViolation> {
    if edge.skip_outputs {
        return Ok(DependencyOutputs::Skipped);
    }

    if let Some(outputs) = state.real_outputs(&edge.target) {
        return Ok(DependencyOutputs::Real(outputs.clone()));
    }

    let violation = |reason: String| PolicyViolation {
        consumer: consumer.clone(),
        dependency: edge.name.clone(),
        target: edge.target.clone(),
        command,
        reason,
    };

    if command == Command::Apply {
        return Err(violation(
            "dependency has not been applied in this run and mock outputs never substitute for apply"
                .to_string(),
        ));
    }

    if !edge.mock.permits(command) {
        return Err(violation(format!(
            "dependency has no real outputs and mock outputs are not allowed for {}",
            command
        )));
    }

    if !edge.mock.has_outputs() {
        return Err(violation(
            "dependency has no real outputs and declares no mock_outputs".to_string(),
        ));
    }

    Ok(DependencyOutputs::Mock(edge.mock.outputs.clone()))
}

/// Resolve every edge of a unit, keyed by dependency name
pub fn resolve_dependencies(
    node: &UnitNode,
    command: Command,
    state: &StateSnapshot,
) -> Result<BTreeMap<String, DependencyOutputs>, PolicyViolation> {
    node.dependencies
        .iter()
        .map(|edge| {
            resolve_dependency_output(&node.path, edge, command, state)
                .map(|outputs| (edge.name.clone(), outputs))
        })
        .collect()
}
