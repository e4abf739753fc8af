//! Declarative relationships: descriptors, graph-pattern resolution, pivot
//! diffs and association writes.

pub mod descriptor;
pub mod pivot;
pub mod registry;
pub mod resolver;
pub mod writer;

pub use descriptor::{
    EdgeSpec, Keys, PivotSpec, RelationBuilder, RelationDescriptor, RelationKind, Scope, Strategy,
    StrategyKind, Through, DEFAULT_KEY,
};
pub use pivot::SyncChanges;
pub use registry::RelationRegistry;
pub use resolver::{exists_for, resolve, GraphPattern, PARENT_KEY_COLUMN, PIVOT_COLUMN, RELATED_COLUMN};
