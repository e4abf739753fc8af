//! Relationship writes executed through the transaction manager
//!
//! Every operation here runs as one managed write, so foreign-key and edge
//! statements of a hybrid relation commit or roll back together.

use super::descriptor::{RelationDescriptor, RelationKind, Strategy};
use super::pivot::{
    attach_queries, current_ids_query, detach_queries, diff, parent_value, toggle_diff,
    update_pivot_queries, SyncChanges, RELATED_KEY_COLUMN,
};
use super::resolver::{edge_between, labelled, PARENT_ALIAS, RELATED_ALIAS};
use crate::error::{GraphError, Result};
use crate::query::{property_ref, CompiledQuery, CypherCompiler, QueryBuilder, Row};
use crate::record::{EdgeChange, Record, Related};
use crate::transaction::{Transaction, TransactionManager};
use serde_json::Value;
use tracing::debug;

const EDGE_ALIAS: &str = "edge";

async fn run_all(tx: &Transaction, queries: Vec<CompiledQuery>) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for query in &queries {
        rows.extend(tx.run(query).await?);
    }
    Ok(rows)
}

async fn current_ids(tx: &Transaction, desc: &RelationDescriptor, parent: &Row) -> Result<Vec<Value>> {
    let rows = tx.run(&current_ids_query(desc, parent)?).await?;
    Ok(rows
        .into_iter()
        .filter_map(|mut row| row.remove(RELATED_KEY_COLUMN))
        .filter(|key| !key.is_null())
        .collect())
}

fn affected(rows: &[Row]) -> u64 {
    rows.iter()
        .filter_map(|row| row.get("affected").and_then(Value::as_u64))
        .max()
        .unwrap_or(0)
}

/// Make the pivot set equal to `desired`; pivot data also refreshes kept pivots.
pub async fn sync(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    desired: &[Value],
    pivot_data: Option<&Row>,
) -> Result<SyncChanges> {
    apply_sync(tm, desc, parent, desired, pivot_data, true).await
}

/// Like [`sync`] but never detaches.
pub async fn sync_without_detaching(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    desired: &[Value],
    pivot_data: Option<&Row>,
) -> Result<SyncChanges> {
    apply_sync(tm, desc, parent, desired, pivot_data, false).await
}

async fn apply_sync(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    desired: &[Value],
    pivot_data: Option<&Row>,
    detaching: bool,
) -> Result<SyncChanges> {
    desc.expect_kind(&[RelationKind::BelongsToMany], "sync")?;
    let no_attributes = Row::new();
    let attributes = pivot_data.unwrap_or(&no_attributes);

    let changes = tm
        .write(|tx| async move {
            let current = current_ids(&tx, desc, parent).await?;
            let mut changes = diff(desired, &current, pivot_data.is_some());
            if !detaching {
                changes.detached.clear();
            }
            run_all(&tx, detach_queries(desc, parent, Some(&changes.detached))?).await?;
            run_all(&tx, attach_queries(desc, parent, &changes.attached, attributes)?).await?;
            for key in &changes.updated {
                run_all(&tx, update_pivot_queries(desc, parent, key, attributes)?).await?;
            }
            Ok(changes)
        })
        .await?;

    debug!(
        relation = %desc.name,
        attached = changes.attached.len(),
        detached = changes.detached.len(),
        updated = changes.updated.len(),
        "Synced pivots"
    );
    Ok(changes)
}

/// Attach the absent ids and detach the present ones.
pub async fn toggle(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    ids: &[Value],
    pivot_data: Option<&Row>,
) -> Result<SyncChanges> {
    desc.expect_kind(&[RelationKind::BelongsToMany], "toggle")?;
    let no_attributes = Row::new();
    let attributes = pivot_data.unwrap_or(&no_attributes);

    tm.write(|tx| async move {
        let current = current_ids(&tx, desc, parent).await?;
        let changes = toggle_diff(ids, &current);
        run_all(&tx, detach_queries(desc, parent, Some(&changes.detached))?).await?;
        run_all(&tx, attach_queries(desc, parent, &changes.attached, attributes)?).await?;
        Ok(changes)
    })
    .await
}

pub async fn attach(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    ids: &[Value],
    attributes: &Row,
) -> Result<()> {
    let queries = attach_queries(desc, parent, ids, attributes)?;
    tm.write(|tx| {
        let queries = queries.clone();
        async move { run_all(&tx, queries).await.map(|_| ()) }
    })
    .await
}

/// Remove pivots for `ids`, or every pivot of `parent` when `ids` is `None`.
pub async fn detach(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    ids: Option<&[Value]>,
) -> Result<()> {
    let queries = detach_queries(desc, parent, ids)?;
    if queries.is_empty() {
        return Ok(());
    }
    tm.write(|tx| {
        let queries = queries.clone();
        async move { run_all(&tx, queries).await.map(|_| ()) }
    })
    .await
}

/// Merge `attributes` into the pivot linking `parent` to `related_key`.
/// Returns the number of pivots touched.
pub async fn update_existing_pivot(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    related_key: &Value,
    attributes: &Row,
) -> Result<u64> {
    let queries = update_pivot_queries(desc, parent, related_key, attributes)?;
    tm.write(|tx| {
        let queries = queries.clone();
        async move { run_all(&tx, queries).await.map(|rows| affected(&rows)) }
    })
    .await
}

/// Point `record`'s belongs-to relation at `related`.
///
/// The foreign key changes in memory at once; edge changes are queued until
/// [`persist_associations`].
pub fn associate(record: &mut Record, desc: &RelationDescriptor, related: &Record) -> Result<()> {
    desc.expect_kind(&[RelationKind::BelongsTo], "associate")?;
    let owner_column = desc.related_key_column();
    let owner_key = related
        .get(owner_column)
        .cloned()
        .ok_or_else(|| GraphError::InvalidRelation {
            relation: desc.name.clone(),
            reason: format!("related record has no `{owner_column}` value"),
        })?;

    if let Some(keys) = desc.strategy.keys() {
        record.set(keys.foreign_key.clone(), owner_key.clone());
    }
    if desc.strategy.uses_edge() {
        forget_pending(record, &desc.name);
        record.pending.push(EdgeChange::Associate {
            relation: desc.clone(),
            owner_key,
        });
    }
    record.set_relation(desc.name.clone(), Related::One(Some(Box::new(related.clone()))));
    Ok(())
}

/// Clear `record`'s belongs-to relation.
pub fn dissociate(record: &mut Record, desc: &RelationDescriptor) -> Result<()> {
    desc.expect_kind(&[RelationKind::BelongsTo], "dissociate")?;
    if let Some(keys) = desc.strategy.keys() {
        record.set(keys.foreign_key.clone(), Value::Null);
    }
    if desc.strategy.uses_edge() {
        forget_pending(record, &desc.name);
        record.pending.push(EdgeChange::Dissociate {
            relation: desc.clone(),
        });
    }
    record.set_relation(desc.name.clone(), Related::One(None));
    Ok(())
}

fn forget_pending(record: &mut Record, relation: &str) {
    record.pending.retain(|change| match change {
        EdgeChange::Associate { relation: r, .. } | EdgeChange::Dissociate { relation: r } => {
            r.name != relation
        }
    });
}

/// One statement of a queued change, with the owner it must link to
#[derive(Debug, Clone)]
struct ChangeStatement {
    query: CompiledQuery,
    links_to: Option<(String, Value)>,
}

/// Statements for one queued change: drop the current edge, then link the new
/// owner. Hybrid relations also write the foreign-key property.
fn change_queries(record: &Record, change: &EdgeChange) -> Result<Vec<ChangeStatement>> {
    let (desc, owner_key) = match change {
        EdgeChange::Associate {
            relation,
            owner_key,
        } => (relation, Some(owner_key)),
        EdgeChange::Dissociate { relation } => (relation, None),
    };
    let (edge, record_key, owner_column) = match &desc.strategy {
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
        } => (edge, parent_key, related_key),
        Strategy::ForeignKey(_) => return Ok(Vec::new()),
    };
    let record_value = parent_value(desc, &record.attributes, record_key)?;
    let mut queries = Vec::new();

    let mut compiler = CypherCompiler::new();
    let key = compiler.bind(record_value.clone());
    let text = format!(
        "MATCH {} WHERE {} = {key} DELETE {EDGE_ALIAS}",
        edge_between(
            &labelled(PARENT_ALIAS, &desc.parent_label),
            &labelled(RELATED_ALIAS, &desc.related_label),
            edge,
            EDGE_ALIAS,
            false
        ),
        property_ref(PARENT_ALIAS, record_key),
    );
    queries.push(ChangeStatement {
        query: CompiledQuery::with_params(text, compiler.into_params()),
        links_to: None,
    });

    let mut compiler = CypherCompiler::new();
    let key = compiler.bind(record_value);
    let mut text = format!(
        "MATCH ({}) WHERE {} = {key}",
        labelled(PARENT_ALIAS, &desc.parent_label),
        property_ref(PARENT_ALIAS, record_key),
    );
    if let Some(owner_key) = owner_key {
        let owner = compiler.bind(owner_key.clone());
        text.push_str(&format!(
            " MATCH ({}) WHERE {} = {owner} CREATE {}",
            labelled(RELATED_ALIAS, &desc.related_label),
            property_ref(RELATED_ALIAS, owner_column),
            edge_between(PARENT_ALIAS, RELATED_ALIAS, edge, EDGE_ALIAS, true),
        ));
    }
    if let Strategy::Hybrid { keys, .. } = &desc.strategy {
        let value = compiler.bind(owner_key.cloned().unwrap_or(Value::Null));
        text.push_str(&format!(
            " SET {} = {value}",
            property_ref(PARENT_ALIAS, &keys.foreign_key)
        ));
    } else if owner_key.is_none() {
        return Ok(queries);
    }
    // one row per created edge; none means the owner (or the record) is missing
    if owner_key.is_some() {
        text.push_str(" RETURN true AS linked");
    }
    queries.push(ChangeStatement {
        query: CompiledQuery::with_params(text, compiler.into_params()),
        links_to: owner_key.map(|key| (desc.related_label.clone(), key.clone())),
    });
    Ok(queries)
}

/// Write the edge changes queued by [`associate`]/[`dissociate`] in one
/// transaction. Returns how many changes were written.
pub async fn persist_associations(tm: &TransactionManager, record: &mut Record) -> Result<usize> {
    if record.pending.is_empty() {
        return Ok(0);
    }
    let mut statements = Vec::new();
    for change in &record.pending {
        statements.extend(change_queries(record, change)?);
    }
    tm.write(|tx| {
        let statements = statements.clone();
        async move {
            for statement in &statements {
                let rows = tx.run(&statement.query).await?;
                if let Some((label, key)) = &statement.links_to {
                    if rows.is_empty() {
                        return Err(GraphError::not_found(label.clone(), vec![key.to_string()]));
                    }
                }
            }
            Ok(())
        }
    })
    .await?;

    let written = std::mem::take(&mut record.pending).len();
    debug!(label = %record.label, written, "Persisted association changes");
    Ok(written)
}

/// Create a related node linked to `parent`.
///
/// Has-one/has-many set the foreign key and/or create the edge; belongs-to-many
/// creates the node and attaches it with `pivot_attributes`.
pub async fn create_related(
    tm: &TransactionManager,
    desc: &RelationDescriptor,
    parent: &Row,
    attributes: Row,
    pivot_attributes: Option<&Row>,
) -> Result<Record> {
    desc.expect_kind(
        &[
            RelationKind::HasOne,
            RelationKind::HasMany,
            RelationKind::BelongsToMany,
        ],
        "create",
    )?;
    let no_attributes = Row::new();
    let pivot_attributes = pivot_attributes.unwrap_or(&no_attributes);

    if desc.kind == RelationKind::BelongsToMany {
        let insert = QueryBuilder::to_insert(&desc.related_label, attributes);
        return tm
            .write(|tx| {
                let insert = &insert;
                async move {
                    let mut rows = tx.run(insert).await?;
                    let mut row = rows.pop().ok_or_else(|| {
                        GraphError::Query(format!("creating `{}` returned no row", desc.related_label))
                    })?;
                    let record = Record::from_column(desc.related_label.clone(), &mut row, "n")?;
                    let column = desc.related_key_column();
                    let key = record.get(column).cloned().ok_or_else(|| {
                        GraphError::InvalidRelation {
                            relation: desc.name.clone(),
                            reason: format!("created record has no `{column}` value"),
                        }
                    })?;
                    run_all(&tx, attach_queries(desc, parent, &[key], pivot_attributes)?).await?;
                    Ok(record)
                }
            })
            .await;
    }

    let query = has_create_query(desc, parent, attributes)?;
    tm.write(|tx| {
        let query = &query;
        async move {
            let mut rows = tx.run(query).await?;
            match rows.pop() {
                Some(mut row) => Record::from_column(desc.related_label.clone(), &mut row, RELATED_ALIAS),
                None => {
                    let key = parent_value(desc, parent, desc.parent_key_column())?;
                    Err(GraphError::not_found(desc.parent_label.clone(), vec![key.to_string()]))
                }
            }
        }
    })
    .await
}

fn has_create_query(desc: &RelationDescriptor, parent: &Row, mut attributes: Row) -> Result<CompiledQuery> {
    if let Some(keys) = desc.strategy.keys() {
        attributes.insert(
            keys.foreign_key.clone(),
            parent_value(desc, parent, &keys.local_key)?,
        );
    }
    let related = labelled(RELATED_ALIAS, &desc.related_label);
    let mut compiler = CypherCompiler::new();

    let text = match &desc.strategy {
        Strategy::ForeignKey(_) => {
            let props = compiler.bind(Value::Object(attributes));
            format!("CREATE ({related}) SET {RELATED_ALIAS} = {props} RETURN {RELATED_ALIAS} {{.*}} AS {RELATED_ALIAS}")
        }
        Strategy::NativeEdge {
            edge, parent_key, ..
        }
        | Strategy::Hybrid {
            edge, parent_key, ..
        } => {
            let key = compiler.bind(parent_value(desc, parent, parent_key)?);
            let props = compiler.bind(Value::Object(attributes));
            format!(
                "MATCH ({}) WHERE {} = {key} CREATE ({related}) SET {RELATED_ALIAS} = {props} \
                 CREATE {} RETURN {RELATED_ALIAS} {{.*}} AS {RELATED_ALIAS}",
                labelled(PARENT_ALIAS, &desc.parent_label),
                property_ref(PARENT_ALIAS, parent_key),
                edge_between(PARENT_ALIAS, RELATED_ALIAS, edge, EDGE_ALIAS, true),
            )
        }
    };
    Ok(CompiledQuery::with_params(text, compiler.into_params()).returning([RELATED_ALIAS]))
}
