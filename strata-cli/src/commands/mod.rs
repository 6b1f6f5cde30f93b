pub mod graph;
pub mod run;
pub mod validate;

use crate::output;

use std::io;
use std::path::{Path, PathBuf};

use strata_engine::{ConfigError, EngineError, Settings};

/// Configuration root: the given directory, or the current one
pub fn find_root(root: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    let root = match root {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?,
    };

    if !root.is_dir() {
        return Err(ConfigError::Io {
            source: io::Error::new(io::ErrorKind::NotFound, "configuration root not found"),
            path: root,
        });
    }
    Ok(root)
}

/// A missing root exits like any other configuration error
pub fn resolve_root(root: Option<PathBuf>) -> PathBuf {
    find_root(root).unwrap_or_else(|e| setup_failure(e.into()))
}

/// Settings discovered for `root`, exiting with the setup error code when a file is invalid
pub fn discover_settings(root: &Path) -> Settings {
    match Settings::discover(root) {
        Ok(settings) => settings,
        Err(e) => setup_failure(EngineError::from(e)),
    }
}

/// Report a configuration or graph error and exit before anything runs
pub fn setup_failure(err: EngineError) -> ! {
    output::error(&err.to_string());
    std::process::exit(err.exit_code());
}
