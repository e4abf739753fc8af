//! Relationship descriptor → graph pattern
//!
//! Every resolved query yields one row per (parent, related) pair with the
//! columns `__parent_key`, `related` (property map) and, for many-to-many,
//! `pivot` (pivot node or edge properties).

use super::descriptor::{EdgeSpec, RelationDescriptor, RelationKind, Strategy};
use crate::error::Result;
use crate::query::{
    escape_identifier, key_repr, property_ref, CompiledQuery, ConditionTree, Correlation,
    CypherCompiler, Direction, ExistsQuery, OrderBy, QueryBuilder,
};
use serde_json::Value;
use std::collections::HashSet;

pub const PARENT_KEY_COLUMN: &str = "__parent_key";
pub const RELATED_COLUMN: &str = "related";
pub const PIVOT_COLUMN: &str = "pivot";

pub(crate) const PARENT_ALIAS: &str = "parent";
pub(crate) const RELATED_ALIAS: &str = "related";
pub(crate) const PIVOT_ALIAS: &str = "pivot";

/// A resolved relationship query and how to read its rows back
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPattern {
    pub query: CompiledQuery,
    /// Column on parent records whose values were bound as keys
    pub parent_column: String,
    pub single: bool,
    pub with_pivot: bool,
}

/// `(pattern, conditions)` for one MATCH clause
type Segment = (String, Vec<String>);

/// Render `(left)-[variable:TYPE]->(right)` for an edge spec.
///
/// Undirected edges cannot be created, so `creating` renders them outgoing.
pub(crate) fn edge_between(
    left: &str,
    right: &str,
    edge: &EdgeSpec,
    variable: &str,
    creating: bool,
) -> String {
    let direction = match edge.direction {
        Direction::Both if creating => Direction::Outgoing,
        other => other,
    };
    let body = format!("{}:{}", variable, escape_identifier(&edge.edge_type));
    format!("({left}){}({right})", direction.wrap(&body))
}

pub(crate) fn labelled(alias: &str, label: &str) -> String {
    format!("{}:{}", alias, escape_identifier(label))
}

/// Parenthesized node pattern for a MATCH segment
fn node(alias: &str, label: &str) -> String {
    format!("({})", labelled(alias, label))
}

/// Deduplicate keys, preserving first occurrence; nulls are dropped.
pub(crate) fn distinct_keys(keys: &[Value]) -> Vec<Value> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|k| !k.is_null())
        .filter(|k| seen.insert(key_repr(k)))
        .cloned()
        .collect()
}

/// MATCH segments linking the already bound `from` node to `to:Related`.
fn hop_segments(desc: &RelationDescriptor, from: &str, to: &str, pivot: &str) -> Vec<Segment> {
    let related = labelled(to, &desc.related_label);

    if let Some(edge) = desc.strategy.edge() {
        let variable = if desc.kind == RelationKind::BelongsToMany {
            pivot
        } else {
            ""
        };
        return vec![(edge_between(from, &related, edge, variable, false), Vec::new())];
    }
    let related = format!("({related})");

    let Strategy::ForeignKey(keys) = &desc.strategy else {
        return Vec::new();
    };
    match desc.kind {
        RelationKind::BelongsTo => vec![(
            related,
            vec![format!(
                "{} = {}",
                property_ref(to, &keys.local_key),
                property_ref(from, &keys.foreign_key)
            )],
        )],
        RelationKind::BelongsToMany => {
            let Some(spec) = &desc.pivot else {
                return Vec::new();
            };
            vec![
                (
                    node(pivot, &spec.label),
                    vec![format!(
                        "{} = {}",
                        property_ref(pivot, &spec.foreign_pivot_key),
                        property_ref(from, &keys.local_key)
                    )],
                ),
                (
                    related,
                    vec![format!(
                        "{} = {}",
                        property_ref(to, &keys.foreign_key),
                        property_ref(pivot, &spec.related_pivot_key)
                    )],
                ),
            ]
        }
        _ => vec![(
            related,
            vec![format!(
                "{} = {}",
                property_ref(to, &keys.foreign_key),
                property_ref(from, &keys.local_key)
            )],
        )],
    }
}

/// Foreign-key single hop: match related nodes directly on the key list.
fn direct_segments(desc: &RelationDescriptor, keys_param: &str) -> Option<(Vec<Segment>, String)> {
    let Strategy::ForeignKey(keys) = &desc.strategy else {
        return None;
    };
    let related = node(RELATED_ALIAS, &desc.related_label);
    match desc.kind {
        RelationKind::BelongsTo => {
            let key = property_ref(RELATED_ALIAS, &keys.local_key);
            Some((vec![(related, vec![format!("{key} IN {keys_param}")])], key))
        }
        RelationKind::BelongsToMany => {
            let spec = desc.pivot.as_ref()?;
            let key = property_ref(PIVOT_ALIAS, &spec.foreign_pivot_key);
            Some((
                vec![
                    (
                        node(PIVOT_ALIAS, &spec.label),
                        vec![format!("{key} IN {keys_param}")],
                    ),
                    (
                        related,
                        vec![format!(
                            "{} = {}",
                            property_ref(RELATED_ALIAS, &keys.foreign_key),
                            property_ref(PIVOT_ALIAS, &spec.related_pivot_key)
                        )],
                    ),
                ],
                key,
            ))
        }
        _ => {
            let key = property_ref(RELATED_ALIAS, &keys.foreign_key);
            Some((vec![(related, vec![format!("{key} IN {keys_param}")])], key))
        }
    }
}

fn render_segments(segments: Vec<Segment>) -> Vec<String> {
    segments
        .into_iter()
        .map(|(pattern, conditions)| {
            if conditions.is_empty() {
                format!("MATCH {pattern}")
            } else {
                format!("MATCH {pattern} WHERE {}", conditions.join(" AND "))
            }
        })
        .collect()
}

/// Constraints for the related side; through relations use the final hop's.
fn final_scope(desc: &RelationDescriptor) -> (ConditionTree, Vec<OrderBy>) {
    let mut conditions = ConditionTree::new();
    let mut orders = Vec::new();
    if let Some(through) = &desc.through {
        conditions = conditions.merge(through.second.scope.conditions.clone());
        orders.extend(through.second.scope.orders.iter().cloned());
    }
    conditions = conditions.merge(desc.scope.conditions.clone());
    orders.extend(desc.scope.orders.iter().cloned());
    (conditions, orders)
}

/// Compile the query that fetches related rows for every key in `parent_keys`.
pub fn resolve(desc: &RelationDescriptor, parent_keys: &[Value]) -> Result<GraphPattern> {
    let mut compiler = CypherCompiler::new();
    let keys_param = compiler.bind(Value::Array(distinct_keys(parent_keys)));
    let parent_column = desc.parent_key_column().to_string();

    let direct = if desc.through.is_none() {
        direct_segments(desc, &keys_param)
    } else {
        None
    };
    let (mut segments, key_expr) = match direct {
        Some(found) => found,
        None => {
            let key = property_ref(PARENT_ALIAS, &parent_column);
            let mut segments = vec![(
                node(PARENT_ALIAS, &desc.parent_label),
                vec![format!("{key} IN {keys_param}")],
            )];
            match &desc.through {
                Some(through) => {
                    segments.extend(hop_segments(&through.first, PARENT_ALIAS, "mid0", "pivot0"));
                    segments.extend(hop_segments(&through.second, "mid0", RELATED_ALIAS, PIVOT_ALIAS));
                }
                None => segments.extend(hop_segments(desc, PARENT_ALIAS, RELATED_ALIAS, PIVOT_ALIAS)),
            }
            (segments, key)
        }
    };

    let (conditions, orders) = final_scope(desc);
    let scoped = compiler.compile_conditions(&conditions, RELATED_ALIAS)?;
    if !scoped.is_empty() {
        if let Some(last) = segments.last_mut() {
            last.1.push(format!("({scoped})"));
        }
    }

    let with_pivot = desc.kind == RelationKind::BelongsToMany;
    let mut parts = render_segments(segments);
    let mut columns = vec![PARENT_KEY_COLUMN, RELATED_COLUMN];
    let mut projection = format!(
        "RETURN {key_expr} AS {PARENT_KEY_COLUMN}, {RELATED_ALIAS} {{.*}} AS {RELATED_COLUMN}"
    );
    if with_pivot {
        projection.push_str(&format!(", {PIVOT_ALIAS} {{.*}} AS {PIVOT_COLUMN}"));
        columns.push(PIVOT_COLUMN);
    }
    parts.push(projection);
    let order = compiler.order_clause(&orders, RELATED_ALIAS);
    if !order.is_empty() {
        parts.push(order);
    }

    let query = CompiledQuery::with_params(parts.join(" "), compiler.into_params()).returning(columns);
    tracing::debug!(
        relation = %desc.name,
        kind = %desc.kind,
        keys = parent_keys.len(),
        cypher = %query.text,
        "Resolved relationship"
    );
    Ok(GraphPattern {
        query,
        parent_column,
        single: desc.is_single(),
        with_pivot,
    })
}

fn correlation(desc: &RelationDescriptor) -> Correlation {
    if let Some(through) = &desc.through {
        return Correlation::Through {
            first: Box::new(correlation(&through.first)),
            intermediate_label: through.first.related_label.clone(),
            second: Box::new(correlation(&through.second)),
        };
    }
    match &desc.strategy {
        Strategy::NativeEdge { edge, .. } | Strategy::Hybrid { edge, .. } => Correlation::Edge {
            edge_type: edge.edge_type.clone(),
            direction: edge.direction,
        },
        Strategy::ForeignKey(keys) => match (desc.kind, &desc.pivot) {
            (RelationKind::BelongsTo, _) => Correlation::Column {
                outer_column: keys.foreign_key.clone(),
                inner_column: keys.local_key.clone(),
            },
            (RelationKind::BelongsToMany, Some(spec)) => Correlation::Through {
                first: Box::new(Correlation::Column {
                    outer_column: keys.local_key.clone(),
                    inner_column: spec.foreign_pivot_key.clone(),
                }),
                intermediate_label: spec.label.clone(),
                second: Box::new(Correlation::Column {
                    outer_column: spec.related_pivot_key.clone(),
                    inner_column: keys.foreign_key.clone(),
                }),
            },
            _ => Correlation::Column {
                outer_column: keys.local_key.clone(),
                inner_column: keys.foreign_key.clone(),
            },
        },
    }
}

/// Existence subquery matching parents that have at least one related node
/// satisfying the relation scope and `constraints`.
pub fn exists_for(desc: &RelationDescriptor, constraints: ConditionTree) -> ExistsQuery {
    let (scope, _) = final_scope(desc);
    ExistsQuery {
        label: desc.related_label.clone(),
        correlation: correlation(desc),
        conditions: scope.merge(constraints),
    }
}

impl QueryBuilder {
    /// Keep rows with at least one related node matching `constraints`
    pub fn where_has(self, relation: &RelationDescriptor, constraints: ConditionTree) -> Self {
        self.where_exists(exists_for(relation, constraints))
    }

    /// Keep rows with no related node matching `constraints`
    pub fn where_doesnt_have(self, relation: &RelationDescriptor, constraints: ConditionTree) -> Self {
        self.where_not_exists(exists_for(relation, constraints))
    }
}
