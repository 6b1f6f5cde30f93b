pub mod error;
pub mod merge;
pub mod source;
pub mod tree;

pub use error::ConfigError;
pub use merge::{merge_into, MergeContext};
pub use source::{ConfigSource, FsSource, MemorySource, UNIT_FILE};
pub use tree::{ConfigTree, ConfigUnit, Document, ResolvedConfig};
