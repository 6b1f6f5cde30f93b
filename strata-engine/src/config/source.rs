// Configuration Sources
// Discover unit directories and hand back already-parsed documents as generic value trees

use crate::config::error::ConfigError;
use crate::models::UnitPath;

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File marking a directory as a deployable unit
pub const UNIT_FILE: &str = "unit.yaml";

/// Supplies parsed configuration documents keyed by root-relative path
pub trait ConfigSource {
    /// On-disk root the unit paths are relative to
    fn root(&self) -> &Path;

    /// Every unit directory under the root, in unit-path order
    fn discover_units(&self) -> Result<Vec<UnitPath>, ConfigError>;

    /// Parsed document at `path`, or `None` when nothing exists there
    fn read_document(&self, path: &UnitPath) -> Result<Option<Value>, ConfigError>;
}

/// Path of the document that defines a unit
pub fn unit_document(unit: &UnitPath) -> UnitPath {
    unit.join(UNIT_FILE)
}

/// Reads YAML documents from a directory tree
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ConfigSource for FsSource {
    fn root(&self) -> &Path {
        &self.root
    }

    fn discover_units(&self) -> Result<Vec<UnitPath>, ConfigError> {
        if !self.root.is_dir() {
            return Err(ConfigError::Io {
                path: self.root.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "configuration root not found"),
            });
        }

        let mut units = BTreeSet::new();
        // Hidden directories hold provider caches (.terraform) and VCS metadata
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            });

        for entry in walker {
            let entry = entry.map_err(|e| ConfigError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone()),
                source: e.into(),
            })?;

            if !entry.file_type().is_file() || entry.file_name() != UNIT_FILE {
                continue;
            }

            let dir = entry.path().parent().unwrap_or(&self.root);
            let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            if let Some(unit) = UnitPath::new(&relative) {
                units.insert(unit);
            }
        }

        Ok(units.into_iter().collect())
    }

    fn read_document(&self, path: &UnitPath) -> Result<Option<Value>, ConfigError> {
        let full = path.on_disk(&self.root);
        if !full.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&full).map_err(|source| ConfigError::Io {
            path: full.clone(),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(Some(Value::Object(Map::new())));
        }

        serde_yaml::from_str::<Value>(&content)
            .map(Some)
            .map_err(|source| ConfigError::Yaml { path: full, source })
    }
}

/// Holds documents in memory, for programmatic trees and tests
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    root: PathBuf,
    documents: BTreeMap<UnitPath, Value>,
}

impl MemorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            documents: BTreeMap::new(),
        }
    }

    /// Add a document; paths that escape the root are ignored
    pub fn with_document(mut self, path: &str, document: Value) -> Self {
        if let Some(path) = UnitPath::new(path) {
            self.documents.insert(path, document);
        }
        self
    }

    /// Parse a YAML string and add it as a document
    pub fn with_yaml(self, path: &str, yaml: &str) -> Result<Self, ConfigError> {
        let document = if yaml.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_yaml::from_str::<Value>(yaml).map_err(|source| ConfigError::Yaml {
                path: PathBuf::from(path),
                source,
            })?
        };
        Ok(self.with_document(path, document))
    }
}

impl ConfigSource for MemorySource {
    fn root(&self) -> &Path {
        &self.root
    }

    fn discover_units(&self) -> Result<Vec<UnitPath>, ConfigError> {
        let units: BTreeSet<UnitPath> = self
            .documents
            .keys()
            .filter(|path| path.components().last() == Some(UNIT_FILE))
            .filter_map(|path| path.parent())
            .collect();
        Ok(units.into_iter().collect())
    }

    fn read_document(&self, path: &UnitPath) -> Result<Option<Value>, ConfigError> {
        Ok(self.documents.get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_discovery_skips_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("dev/network")).unwrap();
        fs::create_dir_all(root.join("dev/network/.terraform/modules")).unwrap();
        fs::create_dir_all(root.join("prod/app")).unwrap();
        fs::write(root.join("dev/network/unit.yaml"), "inputs: {}\n").unwrap();
        fs::write(root.join("dev/network/.terraform/modules/unit.yaml"), "").unwrap();
        fs::write(root.join("prod/app/unit.yaml"), "").unwrap();
        fs::write(root.join("prod/env.yaml"), "locals: {}\n").unwrap();
        fs::write(root.join("unit.yaml"), "").unwrap();

        let source = FsSource::new(root);
        let units = source.discover_units().unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.as_str()).collect();

        // Unit-path order: the root unit sorts first
        assert_eq!(names, vec!["", "dev/network", "prod/app"]);
    }

    #[test]
    fn test_fs_read_document() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("root.yaml"), "locals:\n  project: demo\n").unwrap();
        fs::write(dir.path().join("empty.yaml"), "\n").unwrap();

        let source = FsSource::new(dir.path());

        let doc = source
            .read_document(&UnitPath::new("root.yaml").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(doc["locals"]["project"], "demo");

        let empty = source
            .read_document(&UnitPath::new("empty.yaml").unwrap())
            .unwrap()
            .unwrap();
        assert!(empty.as_object().unwrap().is_empty());

        assert!(source
            .read_document(&UnitPath::new("missing.yaml").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_fs_reports_yaml_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.yaml"), "inputs: [unclosed\n").unwrap();

        let source = FsSource::new(dir.path());
        let err = source
            .read_document(&UnitPath::new("bad.yaml").unwrap())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let source = FsSource::new("/definitely/not/a/real/root");
        assert!(matches!(
            source.discover_units(),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_memory_source_discovery() {
        let source = MemorySource::new("/live")
            .with_yaml("root.yaml", "locals: {}")
            .unwrap()
            .with_yaml("unit.yaml", "")
            .unwrap()
            .with_yaml("dev/network/unit.yaml", "inputs: {}")
            .unwrap();

        let units = source.discover_units().unwrap();
        assert_eq!(units.len(), 2);
        assert!(units[0].is_root());
        assert_eq!(units[1].as_str(), "dev/network");
    }
}
