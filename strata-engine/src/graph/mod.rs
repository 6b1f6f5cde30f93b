// Dependency Graph Module
// Declarations, mock policy, graph construction and rendering

pub mod module_graph;
pub mod policy;
pub mod render;

pub use module_graph::{DependencyEdge, GraphError, GraphErrorKind, ModuleGraph, UnitNode};
pub use policy::{DependencySpec, MockPolicy, MockPrecedence};
pub use render::{render, GraphFormat};
