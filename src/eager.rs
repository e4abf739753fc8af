//! Eager loading: one query per relation level
//!
//! Parents are batched by key, the resolved pattern runs once, and the rows
//! are partitioned back onto each parent. Dotted paths (`posts.comments`)
//! load level by level.

use crate::connection::session::QueryExecutor;
use crate::error::Result;
use crate::query::key_repr;
use crate::record::{Record, Related};
use crate::relations::resolver::distinct_keys;
use crate::relations::{
    resolve, RelationDescriptor, RelationRegistry, PARENT_KEY_COLUMN, PIVOT_COLUMN, RELATED_COLUMN,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Related records keyed by [`key_repr`] of the parent key
pub type BatchMap = HashMap<String, Vec<Record>>;

/// Fetch `desc` for every parent in one query.
///
/// Parents without a key are skipped; when none has a key no query runs.
pub async fn batch_load(
    exec: &dyn QueryExecutor,
    parents: &[&Record],
    desc: &RelationDescriptor,
) -> Result<BatchMap> {
    let column = desc.parent_key_column();
    let parent_keys: Vec<Value> = parents
        .iter()
        .filter_map(|parent| parent.get(column).cloned())
        .collect();
    let keys = distinct_keys(&parent_keys);
    if keys.is_empty() {
        return Ok(BatchMap::new());
    }

    let pattern = resolve(desc, &keys)?;
    let rows = exec.fetch(&pattern.query).await?;
    let fetched = rows.len();

    let mut batch = BatchMap::new();
    for mut row in rows {
        let Some(parent_key) = row.remove(PARENT_KEY_COLUMN) else {
            continue;
        };
        let mut related = Record::from_column(desc.related_label.clone(), &mut row, RELATED_COLUMN)?;
        if pattern.with_pivot {
            if let Some(Value::Object(pivot)) = row.remove(PIVOT_COLUMN) {
                related.pivot = Some(pivot);
            }
        }
        batch.entry(key_repr(&parent_key)).or_default().push(related);
    }

    debug!(
        relation = %desc.name,
        parents = parents.len(),
        keys = keys.len(),
        rows = fetched,
        "Eager-loaded relation"
    );
    Ok(batch)
}

/// Attach a batch to one parent; parents missing from the batch get an empty relation.
pub fn attach_batch(parent: &mut Record, desc: &RelationDescriptor, batch: &BatchMap) {
    let children = parent
        .get(desc.parent_key_column())
        .and_then(|key| batch.get(&key_repr(key)))
        .cloned()
        .unwrap_or_default();
    let related = if desc.is_single() {
        Related::One(children.into_iter().next().map(Box::new))
    } else {
        Related::Many(children)
    };
    parent.set_relation(desc.name.clone(), related);
}

/// Load every path, replacing relations that were already loaded.
pub async fn load(
    exec: &dyn QueryExecutor,
    registry: &RelationRegistry,
    records: &mut [Record],
    paths: &[&str],
) -> Result<()> {
    load_paths(exec, registry, records, paths, false).await
}

/// Load only the levels not yet loaded on a record; nothing missing means no query.
pub async fn load_missing(
    exec: &dyn QueryExecutor,
    registry: &RelationRegistry,
    records: &mut [Record],
    paths: &[&str],
) -> Result<()> {
    load_paths(exec, registry, records, paths, true).await
}

/// Every prefix of every path, parents before children
fn expand_paths(paths: &[&str]) -> Vec<Vec<String>> {
    let mut expanded = BTreeSet::new();
    for path in paths {
        let segments: Vec<String> = path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        for depth in 1..=segments.len() {
            expanded.insert(segments[..depth].to_vec());
        }
    }
    let mut expanded: Vec<Vec<String>> = expanded.into_iter().collect();
    expanded.sort_by_key(|segments| segments.len());
    expanded
}

fn records_at<'a>(records: &'a mut [Record], path: &[String]) -> Vec<&'a mut Record> {
    let mut level: Vec<&'a mut Record> = records.iter_mut().collect();
    for segment in path {
        level = level
            .into_iter()
            .flat_map(|record| record.children_mut(segment))
            .collect();
    }
    level
}

async fn load_paths(
    exec: &dyn QueryExecutor,
    registry: &RelationRegistry,
    records: &mut [Record],
    paths: &[&str],
    only_missing: bool,
) -> Result<()> {
    for path in expand_paths(paths) {
        let Some((name, parents_path)) = path.split_last() else {
            continue;
        };

        let mut by_label: BTreeMap<String, Vec<&mut Record>> = BTreeMap::new();
        for record in records_at(records, parents_path) {
            if only_missing && record.is_loaded(name) {
                continue;
            }
            by_label.entry(record.label.clone()).or_default().push(record);
        }

        for (label, mut parents) in by_label {
            let desc = registry.get(&label, name)?;
            let batch = {
                let view: Vec<&Record> = parents.iter().map(|record| &**record).collect();
                batch_load(exec, &view, desc).await?
            };
            for parent in parents.iter_mut() {
                attach_batch(parent, desc, &batch);
            }
        }
    }
    Ok(())
}
