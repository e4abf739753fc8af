//! Minimal record carried through eager loading and association writes

use crate::error::{GraphError, Result};
use crate::query::Row;
use crate::relations::RelationDescriptor;
use serde_json::Value;
use std::collections::BTreeMap;

/// Loaded relation payload
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Related {
    pub fn len(&self) -> usize {
        match self {
            Related::One(one) => usize::from(one.is_some()),
            Related::Many(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Edge mutation queued by `associate`/`dissociate`, written on persist
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeChange {
    Associate {
        relation: RelationDescriptor,
        owner_key: Value,
    },
    Dissociate {
        relation: RelationDescriptor,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub label: String,
    pub attributes: Row,
    pub relations: BTreeMap<String, Related>,
    /// Pivot properties when loaded through a many-to-many relation
    pub pivot: Option<Row>,
    pub pending: Vec<EdgeChange>,
}

impl Record {
    pub fn new(label: impl Into<String>, attributes: Row) -> Self {
        Self {
            label: label.into(),
            attributes,
            ..Default::default()
        }
    }

    /// Take the property map held in `column` of a result row
    pub fn from_column(label: impl Into<String>, row: &mut Row, column: &str) -> Result<Self> {
        match row.remove(column) {
            Some(Value::Object(attributes)) => Ok(Self::new(label, attributes)),
            other => Err(GraphError::Decode(format!(
                "column `{column}` is not a property map: {other:?}"
            ))),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(column.into(), value.into());
    }

    pub fn is_loaded(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    pub fn relation(&self, relation: &str) -> Option<&Related> {
        self.relations.get(relation)
    }

    pub fn set_relation(&mut self, relation: impl Into<String>, related: Related) {
        self.relations.insert(relation.into(), related);
    }

    /// Mutable access to every loaded child of `relation`
    pub fn children_mut(&mut self, relation: &str) -> Vec<&mut Record> {
        match self.relations.get_mut(relation) {
            Some(Related::One(Some(child))) => vec![child.as_mut()],
            Some(Related::Many(children)) => children.iter_mut().collect(),
            _ => Vec::new(),
        }
    }
}
