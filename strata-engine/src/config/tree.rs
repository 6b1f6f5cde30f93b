// Configuration Tree
// Loads every unit with its linearized include chain and resolves effective configurations

use crate::config::error::ConfigError;
use crate::config::merge::{merge_into, MergeContext};
use crate::config::source::{unit_document, ConfigSource, FsSource};
use crate::models::UnitPath;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Key under which a document lists its parent layers
pub const INCLUDE_KEY: &str = "include";

/// One parsed YAML document, with its include references resolved
#[derive(Debug, Clone)]
pub struct Document {
    pub path: UnitPath,
    pub includes: Vec<UnitPath>,
    pub body: Map<String, Value>,
}

impl Document {
    fn parse(path: &UnitPath, value: Value) -> Result<Self, ConfigError> {
        let mut body = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(ConfigError::invalid_document(
                    path.as_str(),
                    "top level must be a map",
                ))
            }
        };

        let directory = path.parent().unwrap_or_else(UnitPath::root);
        let references = match body.remove(INCLUDE_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(reference)) => vec![reference],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(reference) => Ok(reference),
                    _ => Err(ConfigError::invalid_document(
                        path.as_str(),
                        "include entries must be strings",
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(ConfigError::invalid_document(
                    path.as_str(),
                    "include must be a string or a list of strings",
                ))
            }
        };

        let includes = references
            .iter()
            .map(|reference| {
                directory
                    .resolve(reference)
                    .ok_or_else(|| ConfigError::MissingInclude {
                        document: path.to_string(),
                        include: reference.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: path.clone(),
            includes,
            body,
        })
    }
}

/// A deployable unit and the ordered layers it inherits from
#[derive(Debug, Clone)]
pub struct ConfigUnit {
    pub path: UnitPath,
    /// The unit's own document
    pub document: UnitPath,
    /// Ancestor layers, root first
    pub ancestors: Vec<UnitPath>,
}

impl ConfigUnit {
    /// Every layer merged for this unit, root first and the unit's own document last
    pub fn layers(&self) -> impl Iterator<Item = &UnitPath> {
        self.ancestors.iter().chain(std::iter::once(&self.document))
    }
}

/// Effective configuration of one unit after all layers are merged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub unit: UnitPath,
    pub values: Map<String, Value>,
}

impl ResolvedConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Merged `locals`, empty when none are declared
    pub fn locals(&self) -> Map<String, Value> {
        self.section("locals")
    }

    /// Merged `inputs`, before reference rendering
    pub fn inputs(&self) -> Map<String, Value> {
        self.section("inputs")
    }

    fn section(&self, key: &str) -> Map<String, Value> {
        self.values
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// All units of a configuration root, immutable once loaded
#[derive(Debug, Clone)]
pub struct ConfigTree {
    root: PathBuf,
    documents: BTreeMap<UnitPath, Document>,
    units: BTreeMap<UnitPath, ConfigUnit>,
}

impl ConfigTree {
    /// Load the tree rooted at a directory
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_source(&FsSource::new(root))
    }

    /// Load from any configuration source
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let mut loader = Loader {
            source,
            documents: BTreeMap::new(),
            chains: HashMap::new(),
            stack: Vec::new(),
        };

        let mut units = BTreeMap::new();
        for path in source.discover_units()? {
            let document = unit_document(&path);
            let mut chain = loader.linearize(&document, None)?;
            chain.pop();

            tracing::debug!(unit = %path, layers = chain.len() + 1, "loaded unit");
            units.insert(
                path.clone(),
                ConfigUnit {
                    path,
                    document,
                    ancestors: chain,
                },
            );
        }

        Ok(Self {
            root: source.root().to_path_buf(),
            documents: loader.documents,
            units,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Units in path order
    pub fn units(&self) -> impl Iterator<Item = &ConfigUnit> {
        self.units.values()
    }

    pub fn unit(&self, path: &UnitPath) -> Option<&ConfigUnit> {
        self.units.get(path)
    }

    pub fn contains(&self, path: &UnitPath) -> bool {
        self.units.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn document(&self, path: &UnitPath) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Merge a unit's layers from the root down to the unit itself
    pub fn resolve(&self, path: &UnitPath) -> Result<ResolvedConfig, ConfigError> {
        let unit = self
            .units
            .get(path)
            .ok_or_else(|| ConfigError::UnknownUnit(path.to_string()))?;

        let unit_name = path.to_string();
        let mut values = Map::new();
        for layer in unit.layers() {
            let document = self
                .documents
                .get(layer)
                .ok_or_else(|| ConfigError::UnknownUnit(layer.to_string()))?;
            let ctx = MergeContext {
                unit: &unit_name,
                layer: layer.as_str(),
            };
            merge_into(&mut values, &document.body, ctx)?;
        }

        Ok(ResolvedConfig {
            unit: path.clone(),
            values,
        })
    }
}

struct Loader<'a> {
    source: &'a dyn ConfigSource,
    documents: BTreeMap<UnitPath, Document>,
    /// Memoized linearizations, each ending with the document itself
    chains: HashMap<UnitPath, Vec<UnitPath>>,
    stack: Vec<UnitPath>,
}

impl Loader<'_> {
    /// Layers for `path`, outermost first and `path` itself last
    ///
    /// Includes contribute their own chains in list order, so a later entry overrides an earlier
    /// one. A layer reached twice keeps its first position: with `include: [b.yaml, a.yaml]` where
    /// `b.yaml` itself includes `a.yaml`, `a.yaml` is already placed ahead of `b.yaml` and `b.yaml`
    /// wins.
    fn linearize(
        &mut self,
        path: &UnitPath,
        included_by: Option<&UnitPath>,
    ) -> Result<Vec<UnitPath>, ConfigError> {
        if let Some(start) = self.stack.iter().position(|p| p == path) {
            let mut chain: Vec<String> = self.stack[start..].iter().map(|p| p.to_string()).collect();
            chain.push(path.to_string());
            return Err(ConfigError::CyclicInclude { chain });
        }

        if let Some(chain) = self.chains.get(path) {
            return Ok(chain.clone());
        }

        let value = self.source.read_document(path)?.ok_or_else(|| match included_by {
            Some(parent) => ConfigError::MissingInclude {
                document: parent.to_string(),
                include: path.to_string(),
            },
            None => ConfigError::UnknownUnit(path.to_string()),
        })?;
        let document = Document::parse(path, value)?;

        self.stack.push(path.clone());
        let mut chain: Vec<UnitPath> = Vec::new();
        for include in &document.includes {
            for layer in self.linearize(include, Some(path))? {
                if !chain.contains(&layer) {
                    chain.push(layer);
                }
            }
        }
        self.stack.pop();

        chain.push(path.clone());
        self.documents.insert(path.clone(), document);
        self.chains.insert(path.clone(), chain.clone());
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::source::MemorySource;
    use serde_json::json;

    fn layered_source() -> MemorySource {
        MemorySource::new("/live")
            .with_yaml(
                "root.yaml",
                "locals:\n  project: demo\ninputs:\n  machine_type: e2-medium\n  labels:\n    env: dev\n",
            )
            .unwrap()
            .with_yaml(
                "dev/env.yaml",
                "include: ../root.yaml\ninputs:\n  labels:\n    team: platform\n",
            )
            .unwrap()
            .with_yaml(
                "dev/region.yaml",
                "include: root.yaml\ninputs:\n  region: us-central1\n",
            )
            .unwrap()
            .with_yaml(
                "dev/compute/unit.yaml",
                "include:\n  - ../env.yaml\n  - ../region.yaml\ninputs:\n  machine_type: e2-standard-4\n",
            )
            .unwrap()
    }

    #[test]
    fn test_linearizes_includes_root_first() {
        let tree = ConfigTree::from_source(&layered_source()).unwrap();
        let unit = tree.unit(&UnitPath::new("dev/compute").unwrap()).unwrap();

        let layers: Vec<&str> = unit.layers().map(|l| l.as_str()).collect();
        assert_eq!(
            layers,
            vec![
                "root.yaml",
                "dev/env.yaml",
                "dev/region.yaml",
                "dev/compute/unit.yaml"
            ]
        );
    }

    #[test]
    fn test_shared_include_keeps_first_position() {
        let source = MemorySource::new("/live")
            .with_yaml("a.yaml", "inputs:\n  size: small\n")
            .unwrap()
            .with_yaml("b.yaml", "include: a.yaml\ninputs:\n  size: large\n")
            .unwrap()
            .with_yaml("app/unit.yaml", "include:\n  - b.yaml\n  - a.yaml\n")
            .unwrap();
        let tree = ConfigTree::from_source(&source).unwrap();
        let app = UnitPath::new("app").unwrap();

        let layers: Vec<&str> = tree.unit(&app).unwrap().layers().map(|l| l.as_str()).collect();
        assert_eq!(layers, vec!["a.yaml", "b.yaml", "app/unit.yaml"]);

        let resolved = tree.resolve(&app).unwrap();
        assert_eq!(resolved.inputs()["size"], "large");
    }

    #[test]
    fn test_resolve_applies_override_semantics() {
        let tree = ConfigTree::from_source(&layered_source()).unwrap();
        let resolved = tree.resolve(&UnitPath::new("dev/compute").unwrap()).unwrap();

        let inputs = resolved.inputs();
        assert_eq!(inputs["machine_type"], "e2-standard-4");
        assert_eq!(inputs["labels"], json!({"env": "dev", "team": "platform"}));
        assert_eq!(inputs["region"], "us-central1");
        assert_eq!(resolved.locals()["project"], "demo");
        assert!(resolved.get(INCLUDE_KEY).is_none());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let tree = ConfigTree::from_source(&layered_source()).unwrap();
        let path = UnitPath::new("dev/compute").unwrap();
        assert_eq!(tree.resolve(&path).unwrap(), tree.resolve(&path).unwrap());
    }

    #[test]
    fn test_missing_include() {
        let source = MemorySource::new("/live")
            .with_yaml("app/unit.yaml", "include: ../nowhere.yaml\n")
            .unwrap();

        match ConfigTree::from_source(&source).unwrap_err() {
            ConfigError::MissingInclude { document, include } => {
                assert_eq!(document, "app/unit.yaml");
                assert_eq!(include, "nowhere.yaml");
            }
            other => panic!("expected missing include, got {other:?}"),
        }
    }

    #[test]
    fn test_include_escaping_root_is_missing() {
        let source = MemorySource::new("/live")
            .with_yaml("unit.yaml", "include: ../../outside.yaml\n")
            .unwrap();

        assert!(matches!(
            ConfigTree::from_source(&source),
            Err(ConfigError::MissingInclude { .. })
        ));
    }

    #[test]
    fn test_cyclic_include() {
        let source = MemorySource::new("/live")
            .with_yaml("a.yaml", "include: b.yaml\n")
            .unwrap()
            .with_yaml("b.yaml", "include: a.yaml\n")
            .unwrap()
            .with_yaml("app/unit.yaml", "include: ../a.yaml\n")
            .unwrap();

        match ConfigTree::from_source(&source).unwrap_err() {
            ConfigError::CyclicInclude { chain } => {
                assert_eq!(chain, vec!["a.yaml", "b.yaml", "a.yaml"]);
            }
            other => panic!("expected cyclic include, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_include_shape() {
        let source = MemorySource::new("/live")
            .with_yaml("app/unit.yaml", "include:\n  nested: true\n")
            .unwrap();

        assert!(matches!(
            ConfigTree::from_source(&source),
            Err(ConfigError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn test_merge_conflict_names_unit() {
        let source = MemorySource::new("/live")
            .with_yaml("root.yaml", "inputs:\n  labels:\n    env: dev\n")
            .unwrap()
            .with_yaml("app/unit.yaml", "include: root.yaml\ninputs:\n  labels: oops\n")
            .unwrap();

        let tree = ConfigTree::from_source(&source).unwrap();
        match tree.resolve(&UnitPath::new("app").unwrap()).unwrap_err() {
            ConfigError::MergeConflict { unit, key, .. } => {
                assert_eq!(unit, "app");
                assert_eq!(key, "inputs.labels");
            }
            other => panic!("expected merge conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("dev/network")).unwrap();
        std::fs::write(root.join("root.yaml"), "inputs:\n  project: demo\n").unwrap();
        std::fs::write(
            root.join("dev/network/unit.yaml"),
            "include: root.yaml\ninputs:\n  cidr: 10.0.0.0/16\n",
        )
        .unwrap();

        let tree = ConfigTree::load(root).unwrap();
        assert_eq!(tree.len(), 1);

        let resolved = tree.resolve(&UnitPath::new("dev/network").unwrap()).unwrap();
        assert_eq!(resolved.inputs()["project"], "demo");
        assert_eq!(resolved.inputs()["cidr"], "10.0.0.0/16");
    }

    #[test]
    fn test_unknown_unit() {
        let tree = ConfigTree::from_source(&layered_source()).unwrap();
        assert!(matches!(
            tree.resolve(&UnitPath::new("prod/compute").unwrap()),
            Err(ConfigError::UnknownUnit(_))
        ));
    }
}
