//! Many-to-many pivot diffs and write statements
//!
//! Foreign-key descriptors keep one pivot node per pair, native-edge
//! descriptors keep the attributes on the edge, hybrid descriptors write both.

use super::descriptor::{PivotSpec, RelationDescriptor, RelationKind, Strategy};
use super::resolver::{edge_between, labelled, PARENT_ALIAS, PIVOT_ALIAS, RELATED_ALIAS};
use crate::error::{GraphError, Result};
use crate::query::{key_repr, property_ref, CompiledQuery, CypherCompiler, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Column carrying the related key in [`current_ids_query`] rows
pub const RELATED_KEY_COLUMN: &str = "related_key";

/// Outcome of a sync or toggle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
    pub updated: Vec<Value>,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty() && self.updated.is_empty()
    }
}

fn key_set(values: &[Value]) -> HashSet<String> {
    values.iter().map(key_repr).collect()
}

fn unique(values: &[Value]) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|v| seen.insert(key_repr(v)))
        .cloned()
        .collect()
}

/// `attached = desired − current`, `detached = current − desired`,
/// `updated = desired ∩ current` when pivot data was supplied.
pub fn diff(desired: &[Value], current: &[Value], has_pivot_data: bool) -> SyncChanges {
    let desired = unique(desired);
    let current = unique(current);
    let desired_keys = key_set(&desired);
    let current_keys = key_set(&current);

    let attached = desired
        .iter()
        .filter(|v| !current_keys.contains(&key_repr(v)))
        .cloned()
        .collect();
    let detached = current
        .iter()
        .filter(|v| !desired_keys.contains(&key_repr(v)))
        .cloned()
        .collect();
    let updated = if has_pivot_data {
        desired
            .iter()
            .filter(|v| current_keys.contains(&key_repr(v)))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    SyncChanges {
        attached,
        detached,
        updated,
    }
}

/// Toggle: attach the ids that are absent, detach the ones present.
pub fn toggle_diff(ids: &[Value], current: &[Value]) -> SyncChanges {
    let current_keys = key_set(current);
    let (detached, attached): (Vec<Value>, Vec<Value>) = unique(ids)
        .into_iter()
        .partition(|v| current_keys.contains(&key_repr(v)));
    SyncChanges {
        attached,
        detached,
        updated: Vec::new(),
    }
}

fn require_many_to_many(desc: &RelationDescriptor, operation: &str) -> Result<()> {
    desc.expect_kind(&[RelationKind::BelongsToMany], operation)
}

pub(crate) fn parent_value(desc: &RelationDescriptor, parent: &Row, column: &str) -> Result<Value> {
    parent
        .get(column)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| GraphError::InvalidRelation {
            relation: desc.name.clone(),
            reason: format!("parent record has no `{column}` value"),
        })
}

fn timestamped(desc: &RelationDescriptor, mut attributes: Row, creating: bool) -> Row {
    if desc.pivot.as_ref().is_some_and(|p| p.timestamps) {
        let now = Value::String(chrono::Utc::now().to_rfc3339());
        if creating {
            attributes.insert("created_at".into(), now.clone());
        }
        attributes.insert("updated_at".into(), now);
    }
    attributes
}

/// Related keys currently attached to `parent`
pub fn current_ids_query(desc: &RelationDescriptor, parent: &Row) -> Result<CompiledQuery> {
    require_many_to_many(desc, "sync")?;
    let mut compiler = CypherCompiler::new();

    let text = match &desc.strategy {
        Strategy::ForeignKey(keys) => {
            let spec = pivot_spec(desc)?;
            let key = compiler.bind(parent_value(desc, parent, &keys.local_key)?);
            format!(
                "MATCH ({}) WHERE {} = {key} RETURN {} AS {RELATED_KEY_COLUMN}",
                labelled(PIVOT_ALIAS, &spec.label),
                property_ref(PIVOT_ALIAS, &spec.foreign_pivot_key),
                property_ref(PIVOT_ALIAS, &spec.related_pivot_key),
            )
        }
        Strategy::NativeEdge {
            edge,
            parent_key,
            related_key,
        }
        | Strategy::Hybrid {
            edge,
            parent_key,
            related_key,
            ..
        } => {
            let key = compiler.bind(parent_value(desc, parent, parent_key)?);
            format!(
                "MATCH {} WHERE {} = {key} RETURN {} AS {RELATED_KEY_COLUMN}",
                edge_between(
                    &labelled(PARENT_ALIAS, &desc.parent_label),
                    &labelled(RELATED_ALIAS, &desc.related_label),
                    edge,
                    PIVOT_ALIAS,
                    false
                ),
                property_ref(PARENT_ALIAS, parent_key),
                property_ref(RELATED_ALIAS, related_key),
            )
        }
    };
    Ok(CompiledQuery::with_params(text, compiler.into_params()).returning([RELATED_KEY_COLUMN]))
}

fn pivot_spec(desc: &RelationDescriptor) -> Result<&PivotSpec> {
    desc.pivot.as_ref().ok_or_else(|| GraphError::InvalidRelation {
        relation: desc.name.clone(),
        reason: "no pivot label configured".into(),
    })
}

/// Statements creating one pivot per related key.
pub fn attach_queries(
    desc: &RelationDescriptor,
    parent: &Row,
    related_keys: &[Value],
    attributes: &Row,
) -> Result<Vec<CompiledQuery>> {
    require_many_to_many(desc, "attach")?;
    let related_keys = unique(related_keys);
    if related_keys.is_empty() {
        return Ok(Vec::new());
    }
    let attributes = timestamped(desc, attributes.clone(), true);
    let mut queries = Vec::new();

    if let Some(keys) = desc.strategy.keys() {
        let spec = pivot_spec(desc)?;
        let mut properties = attributes.clone();
        properties.insert(
            spec.foreign_pivot_key.clone(),
            parent_value(desc, parent, &keys.local_key)?,
        );
        let mut compiler = CypherCompiler::new();
        let ids = compiler.bind(Value::Array(related_keys.clone()));
        let props = compiler.bind(Value::Object(properties));
        let text = format!(
            "UNWIND {ids} AS related_key CREATE ({}) SET {PIVOT_ALIAS} = {props}, {} = related_key",
            labelled(PIVOT_ALIAS, &spec.label),
            property_ref(PIVOT_ALIAS, &spec.related_pivot_key),
        );
        queries.push(CompiledQuery::with_params(text, compiler.into_params()));
    }

    if let Strategy::NativeEdge {
        edge,
        parent_key,
        related_key,
    }
    | Strategy::Hybrid {
        edge,
        parent_key,
        related_key,
        ..
    } = &desc.strategy
    {
        let mut compiler = CypherCompiler::new();
        let key = compiler.bind(parent_value(desc, parent, parent_key)?);
        let ids = compiler.bind(Value::Array(related_keys));
        let props = compiler.bind(Value::Object(attributes));
        let text = format!(
            "MATCH ({}) WHERE {} = {key} UNWIND {ids} AS related_key \
             MATCH ({}) WHERE {} = related_key CREATE {} SET {PIVOT_ALIAS} = {props}",
            labelled(PARENT_ALIAS, &desc.parent_label),
            property_ref(PARENT_ALIAS, parent_key),
            labelled(RELATED_ALIAS, &desc.related_label),
            property_ref(RELATED_ALIAS, related_key),
            edge_between(PARENT_ALIAS, RELATED_ALIAS, edge, PIVOT_ALIAS, true),
        );
        queries.push(CompiledQuery::with_params(text, compiler.into_params()));
    }
    Ok(queries)
}

/// Statements removing pivots; `None` detaches everything.
pub fn detach_queries(
    desc: &RelationDescriptor,
    parent: &Row,
    related_keys: Option<&[Value]>,
) -> Result<Vec<CompiledQuery>> {
    require_many_to_many(desc, "detach")?;
    if related_keys.is_some_and(|k| k.is_empty()) {
        return Ok(Vec::new());
    }
    let mut queries = Vec::new();

    if let Some(keys) = desc.strategy.keys() {
        let spec = pivot_spec(desc)?;
        let mut compiler = CypherCompiler::new();
        let key = compiler.bind(parent_value(desc, parent, &keys.local_key)?);
        let mut text = format!(
            "MATCH ({}) WHERE {} = {key}",
            labelled(PIVOT_ALIAS, &spec.label),
            property_ref(PIVOT_ALIAS, &spec.foreign_pivot_key),
        );
        if let Some(ids) = related_keys {
            let ids = compiler.bind(Value::Array(unique(ids)));
            text.push_str(&format!(
                " AND {} IN {ids}",
                property_ref(PIVOT_ALIAS, &spec.related_pivot_key)
            ));
        }
        text.push_str(&format!(" DELETE {PIVOT_ALIAS}"));
        queries.push(CompiledQuery::with_params(text, compiler.into_params()));
    }

    if let Strategy::NativeEdge {
        edge,
        parent_key,
        related_key,
    }
    | Strategy::Hybrid {
        edge,
        parent_key,
        related_key,
        ..
    } = &desc.strategy
    {
        let mut compiler = CypherCompiler::new();
        let key = compiler.bind(parent_value(desc, parent, parent_key)?);
        let mut text = format!(
            "MATCH {} WHERE {} = {key}",
            edge_between(
                &labelled(PARENT_ALIAS, &desc.parent_label),
                &labelled(RELATED_ALIAS, &desc.related_label),
                edge,
                PIVOT_ALIAS,
                false
            ),
            property_ref(PARENT_ALIAS, parent_key),
        );
        if let Some(ids) = related_keys {
            let ids = compiler.bind(Value::Array(unique(ids)));
            text.push_str(&format!(
                " AND {} IN {ids}",
                property_ref(RELATED_ALIAS, related_key)
            ));
        }
        text.push_str(&format!(" DELETE {PIVOT_ALIAS}"));
        queries.push(CompiledQuery::with_params(text, compiler.into_params()));
    }
    Ok(queries)
}

/// Statements merging `attributes` into an existing pivot; each reports `affected`.
pub fn update_pivot_queries(
    desc: &RelationDescriptor,
    parent: &Row,
    related_key_value: &Value,
    attributes: &Row,
) -> Result<Vec<CompiledQuery>> {
    require_many_to_many(desc, "update_existing_pivot")?;
    let attributes = timestamped(desc, attributes.clone(), false);
    let mut queries = Vec::new();

    if let Some(keys) = desc.strategy.keys() {
        let spec = pivot_spec(desc)?;
        let mut compiler = CypherCompiler::new();
        let key = compiler.bind(parent_value(desc, parent, &keys.local_key)?);
        let id = compiler.bind(related_key_value.clone());
        let props = compiler.bind(Value::Object(attributes.clone()));
        let text = format!(
            "MATCH ({}) WHERE {} = {key} AND {} = {id} SET {PIVOT_ALIAS} += {props} \
             RETURN count({PIVOT_ALIAS}) AS affected",
            labelled(PIVOT_ALIAS, &spec.label),
            property_ref(PIVOT_ALIAS, &spec.foreign_pivot_key),
            property_ref(PIVOT_ALIAS, &spec.related_pivot_key),
        );
        queries.push(CompiledQuery::with_params(text, compiler.into_params()).returning(["affected"]));
    }

    if let Strategy::NativeEdge {
        edge,
        parent_key,
        related_key,
    }
    | Strategy::Hybrid {
        edge,
        parent_key,
        related_key,
        ..
    } = &desc.strategy
    {
        let mut compiler = CypherCompiler::new();
        let key = compiler.bind(parent_value(desc, parent, parent_key)?);
        let id = compiler.bind(related_key_value.clone());
        let props = compiler.bind(Value::Object(attributes));
        let text = format!(
            "MATCH {} WHERE {} = {key} AND {} = {id} SET {PIVOT_ALIAS} += {props} \
             RETURN count({PIVOT_ALIAS}) AS affected",
            edge_between(
                &labelled(PARENT_ALIAS, &desc.parent_label),
                &labelled(RELATED_ALIAS, &desc.related_label),
                edge,
                PIVOT_ALIAS,
                false
            ),
            property_ref(PARENT_ALIAS, parent_key),
            property_ref(RELATED_ALIAS, related_key),
        );
        queries.push(CompiledQuery::with_params(text, compiler.into_params()).returning(["affected"]));
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;
    use crate::relations::descriptor::StrategyKind;
    use serde_json::json;

    fn ids(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| json!(v)).collect()
    }

    fn roles(strategy: StrategyKind) -> RelationDescriptor {
        RelationDescriptor::belongs_to_many("roles", "User", "Role")
            .keys("id", "id")
            .edge("HAS_ROLE", Direction::Outgoing)
            .pivot(PivotSpec::new("RoleUser", "user_id", "role_id").with_timestamps())
            .strategy(strategy)
            .build()
            .unwrap()
    }

    fn user() -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        row
    }

    #[test]
    fn test_sync_set_algebra() {
        let changes = diff(&ids(&[1, 2, 3]), &ids(&[2, 3, 4]), false);
        assert_eq!(changes.attached, ids(&[1]));
        assert_eq!(changes.detached, ids(&[4]));
        assert!(changes.updated.is_empty());

        let with_pivot = diff(&ids(&[1, 2, 3]), &ids(&[2, 3, 4]), true);
        assert_eq!(with_pivot.updated, ids(&[2, 3]));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let first = diff(&ids(&[5, 6]), &ids(&[6, 7]), false);
        let after: Vec<Value> = ids(&[6, 5]);
        let second = diff(&ids(&[5, 6]), &after, false);
        assert!(!first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn test_sync_ignores_duplicates() {
        let changes = diff(&ids(&[1, 1, 2]), &[], false);
        assert_eq!(changes.attached, ids(&[1, 2]));
    }

    #[test]
    fn test_toggle() {
        let changes = toggle_diff(&ids(&[1, 2]), &ids(&[2, 3]));
        assert_eq!(changes.attached, ids(&[1]));
        assert_eq!(changes.detached, ids(&[2]));
    }

    #[test]
    fn test_current_ids_per_strategy() {
        let q = current_ids_query(&roles(StrategyKind::ForeignKey), &user()).unwrap();
        assert_eq!(
            q.text,
            "MATCH (pivot:RoleUser) WHERE pivot.user_id = $p0 RETURN pivot.role_id AS related_key"
        );
        let q = current_ids_query(&roles(StrategyKind::NativeEdge), &user()).unwrap();
        assert_eq!(
            q.text,
            "MATCH (parent:User)-[pivot:HAS_ROLE]->(related:Role) WHERE parent.id = $p0 \
             RETURN related.id AS related_key"
        );
    }

    #[test]
    fn test_hybrid_attach_writes_pivot_and_edge() {
        let mut attrs = Row::new();
        attrs.insert("level".into(), json!("admin"));
        let queries =
            attach_queries(&roles(StrategyKind::Hybrid), &user(), &ids(&[4, 5]), &attrs).unwrap();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].text.starts_with("UNWIND $p0 AS related_key CREATE (pivot:RoleUser)"));
        let props = queries[0].params["p1"].as_object().unwrap();
        assert_eq!(props["user_id"], json!(1));
        assert_eq!(props["level"], json!("admin"));
        assert!(props.contains_key("created_at"));
        assert!(queries[1].text.contains("CREATE (parent)-[pivot:HAS_ROLE]->(related)"));
        for q in &queries {
            assert!(q.unbound_placeholders().is_empty(), "{}", q.text);
        }
    }

    #[test]
    fn test_detach_all_and_some() {
        let all = detach_queries(&roles(StrategyKind::ForeignKey), &user(), None).unwrap();
        assert_eq!(
            all[0].text,
            "MATCH (pivot:RoleUser) WHERE pivot.user_id = $p0 DELETE pivot"
        );
        let some =
            detach_queries(&roles(StrategyKind::NativeEdge), &user(), Some(&ids(&[2]))).unwrap();
        assert!(some[0].text.ends_with("AND related.id IN $p1 DELETE pivot"));
        let none = detach_queries(&roles(StrategyKind::Hybrid), &user(), Some(&[])).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_update_pivot_touches_updated_at_only() {
        let queries = update_pivot_queries(
            &roles(StrategyKind::ForeignKey),
            &user(),
            &json!(2),
            &Row::new(),
        )
        .unwrap();
        let props = queries[0].params["p2"].as_object().unwrap();
        assert!(props.contains_key("updated_at"));
        assert!(!props.contains_key("created_at"));
    }

    #[test]
    fn test_missing_parent_key_is_rejected() {
        let err = current_ids_query(&roles(StrategyKind::ForeignKey), &Row::new()).unwrap_err();
        assert!(matches!(err, GraphError::InvalidRelation { .. }));
    }

    #[test]
    fn test_non_pivot_relation_rejected() {
        let posts = RelationDescriptor::has_many("posts", "User", "Post")
            .keys("id", "user_id")
            .build()
            .unwrap();
        assert!(attach_queries(&posts, &user(), &ids(&[1]), &Row::new()).is_err());
    }
}
