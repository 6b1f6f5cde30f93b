// Configuration errors
// Raised while loading documents, linearizing include chains and merging layers

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{document}' includes '{include}', which does not exist")]
    MissingInclude { document: String, include: String },

    #[error("include cycle detected: {}", .chain.join(" -> "))]
    CyclicInclude { chain: Vec<String> },

    #[error(
        "cannot merge '{key}' for unit '{unit}' (layer '{layer}'): inherited {existing} value overridden by {incoming} value"
    )]
    MergeConflict {
        unit: String,
        layer: String,
        key: String,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("invalid document '{document}': {message}")]
    InvalidDocument { document: String, message: String },

    #[error("unit '{unit}' declares invalid dependency '{name}': {message}")]
    InvalidDependency {
        unit: String,
        name: String,
        message: String,
    },

    #[error("unresolved reference '${{{reference}}}' in unit '{unit}'")]
    UnresolvedReference { unit: String, reference: String },

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse '{}': {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub fn invalid_document(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            document: document.into(),
            message: message.into(),
        }
    }
}
