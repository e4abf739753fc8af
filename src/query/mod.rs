//! Fluent query layer: condition trees, the Cypher compiler, label-scoped
//! builders and aggregate translation.

pub mod aggregate;
pub mod builder;
pub mod compiler;
pub mod condition;
pub mod value;

pub use aggregate::Aggregate;
pub use builder::{QueryBuilder, AGGREGATE_COLUMN};
pub use compiler::{compile, CypherCompiler, OrderBy, SortDirection, DEFAULT_ALIAS};
pub use condition::{
    Boolean, Clause, ClauseKind, ConditionTree, Correlation, Direction, ExistsQuery, Operand,
    Operator, Predicate, RawFragment,
};
pub use value::{escape_identifier, key_repr, property_ref, CompiledQuery, Params, Row};
