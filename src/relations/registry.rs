//! Relationship lookup by parent label and name

use super::descriptor::RelationDescriptor;
use crate::error::{GraphError, Result};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    relations: HashMap<String, BTreeMap<String, RelationDescriptor>>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the descriptor's parent label, replacing any previous entry.
    pub fn register(&mut self, descriptor: RelationDescriptor) -> &mut Self {
        self.relations
            .entry(descriptor.parent_label.clone())
            .or_default()
            .insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn with(mut self, descriptor: RelationDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, label: &str, name: &str) -> Result<&RelationDescriptor> {
        self.relations
            .get(label)
            .and_then(|by_name| by_name.get(name))
            .ok_or_else(|| GraphError::InvalidRelation {
                relation: name.to_string(),
                reason: format!("no relation `{name}` registered on `{label}`"),
            })
    }

    /// Relation names declared on `label`, sorted
    pub fn names(&self, label: &str) -> Vec<&str> {
        self.relations
            .get(label)
            .map(|by_name| by_name.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
