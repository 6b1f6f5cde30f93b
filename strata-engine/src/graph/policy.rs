// Dependency Declarations
// Parses `dependencies:` entries and the command-scoped mock policy each one carries

use crate::config::{ConfigError, ResolvedConfig};
use crate::models::Command;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Key of the dependency map in a merged configuration
pub const DEPENDENCIES_KEY: &str = "dependencies";

/// One declared dependency, as written in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
    /// Target unit, relative to the consuming unit or canonical from the root
    pub config_path: String,
    #[serde(default)]
    pub mock_outputs: Map<String, Value>,
    /// Commands allowed to fall back to mocks; absent means init, validate and plan
    #[serde(default)]
    pub mock_outputs_allowed_commands: Option<BTreeSet<Command>>,
    /// Order only; the target's outputs are never read
    #[serde(default)]
    pub skip_outputs: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DependencySpec {
    /// Parse every declaration of a unit, in name order
    ///
    /// A `null` entry clears a declaration inherited from an outer layer.
    pub fn parse_all(config: &ResolvedConfig) -> Result<Vec<(String, DependencySpec)>, ConfigError> {
        let declarations = match config.get(DEPENDENCIES_KEY) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ConfigError::invalid_document(
                    config.unit.to_string(),
                    "dependencies must be a map keyed by dependency name",
                ))
            }
        };

        declarations
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| {
                serde_json::from_value::<DependencySpec>(value.clone())
                    .map(|spec| (name.clone(), spec))
                    .map_err(|e| ConfigError::InvalidDependency {
                        unit: config.unit.to_string(),
                        name: name.clone(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn mock_policy(&self) -> MockPolicy {
        MockPolicy {
            outputs: self.mock_outputs.clone(),
            allowed_commands: self
                .mock_outputs_allowed_commands
                .clone()
                .unwrap_or_else(MockPolicy::default_commands),
        }
    }
}

/// Placeholder outputs and the commands allowed to use them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MockPolicy {
    pub outputs: Map<String, Value>,
    pub allowed_commands: BTreeSet<Command>,
}

impl MockPolicy {
    pub fn default_commands() -> BTreeSet<Command> {
        [Command::Init, Command::Validate, Command::Plan]
            .into_iter()
            .collect()
    }

    /// Whether `command` may substitute mocks; never true for apply
    pub fn permits(&self, command: Command) -> bool {
        command != Command::Apply && self.allowed_commands.contains(&command)
    }

    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// How allowed-command sets combine across declarations that target the same unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MockPrecedence {
    /// Each declaration keeps its own set
    #[default]
    PerEdge,
    /// Every declaration gets the intersection of all sets
    Strictest,
    /// Every declaration gets the union of all sets
    Permissive,
}

impl MockPrecedence {
    /// Combine the allowed-command sets of sibling declarations
    pub fn combine<'a>(
        &self,
        policies: impl IntoIterator<Item = &'a MockPolicy>,
    ) -> Option<BTreeSet<Command>> {
        let mut sets = policies.into_iter().map(|p| &p.allowed_commands);
        match self {
            MockPrecedence::PerEdge => None,
            MockPrecedence::Strictest => {
                let first = sets.next()?.clone();
                Some(sets.fold(first, |acc, set| acc.intersection(set).copied().collect()))
            }
            MockPrecedence::Permissive => {
                Some(sets.fold(BTreeSet::new(), |acc, set| acc.union(set).copied().collect()))
            }
        }
    }
}

impl fmt::Display for MockPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockPrecedence::PerEdge => write!(f, "per-edge"),
            MockPrecedence::Strictest => write!(f, "strictest"),
            MockPrecedence::Permissive => write!(f, "permissive"),
        }
    }
}

impl FromStr for MockPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-edge" | "edge" => Ok(MockPrecedence::PerEdge),
            "strictest" | "intersection" => Ok(MockPrecedence::Strictest),
            "permissive" | "union" => Ok(MockPrecedence::Permissive),
            _ => Err(format!(
                "Unknown mock policy '{}'. Valid policies: per-edge, strictest, permissive",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitPath;
    use serde_json::json;

    fn config(dependencies: Value) -> ResolvedConfig {
        let mut values = Map::new();
        values.insert(DEPENDENCIES_KEY.to_string(), dependencies);
        ResolvedConfig {
            unit: UnitPath::new("dev/compute").unwrap(),
            values,
        }
    }

    #[test]
    fn test_parse_declarations_with_defaults() {
        let specs = DependencySpec::parse_all(&config(json!({
            "network": {
                "config_path": "../network",
                "mock_outputs": {"vpc_id": "mock-vpc"}
            }
        })))
        .unwrap();

        assert_eq!(specs.len(), 1);
        let (name, spec) = &specs[0];
        assert_eq!(name, "network");
        assert!(spec.enabled);
        assert!(!spec.skip_outputs);

        let policy = spec.mock_policy();
        assert_eq!(policy.allowed_commands, MockPolicy::default_commands());
        assert!(policy.permits(Command::Plan));
        assert!(!policy.permits(Command::Apply));
        assert!(!policy.permits(Command::Destroy));
    }

    #[test]
    fn test_apply_is_never_permitted() {
        let specs = DependencySpec::parse_all(&config(json!({
            "network": {
                "config_path": "../network",
                "mock_outputs": {"vpc_id": "mock-vpc"},
                "mock_outputs_allowed_commands": ["plan", "apply", "destroy"]
            }
        })))
        .unwrap();

        let policy = specs[0].1.mock_policy();
        assert!(!policy.permits(Command::Apply));
        assert!(policy.permits(Command::Destroy));
        assert!(!policy.permits(Command::Init));
    }

    #[test]
    fn test_invalid_declarations() {
        let err = DependencySpec::parse_all(&config(json!({
            "network": {"mock_outputs": {}}
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDependency { .. }));

        let err = DependencySpec::parse_all(&config(json!({
            "network": {"config_path": "../network", "mock_outputs_allowed_commands": ["deploy"]}
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDependency { .. }));

        let err = DependencySpec::parse_all(&config(json!(["../network"]))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDocument { .. }));
    }

    #[test]
    fn test_precedence_combination() {
        let plan_only = MockPolicy {
            outputs: Map::new(),
            allowed_commands: [Command::Plan].into_iter().collect(),
        };
        let defaults = MockPolicy {
            outputs: Map::new(),
            allowed_commands: MockPolicy::default_commands(),
        };

        assert_eq!(MockPrecedence::PerEdge.combine([&plan_only, &defaults]), None);
        assert_eq!(
            MockPrecedence::Strictest.combine([&plan_only, &defaults]),
            Some([Command::Plan].into_iter().collect())
        );
        assert_eq!(
            MockPrecedence::Permissive.combine([&plan_only, &defaults]),
            Some(MockPolicy::default_commands())
        );
        assert_eq!(
            "strictest".parse::<MockPrecedence>().unwrap(),
            MockPrecedence::Strictest
        );
    }
}
