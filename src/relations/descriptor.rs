//! Relationship descriptors
//!
//! A descriptor is built once and validated at construction time; the
//! strategy tag decides how the resolver and the writers reach related
//! nodes (foreign-key property, native edge, or both).

use crate::error::{GraphError, Result};
use crate::query::{ConditionTree, Direction, OrderBy, SortDirection};
use serde::{Deserialize, Serialize};

/// Default key property for node identity
pub const DEFAULT_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
    HasOneThrough,
    HasManyThrough,
}

impl RelationKind {
    /// At most one related record per parent
    pub fn is_single(&self) -> bool {
        matches!(
            self,
            RelationKind::BelongsTo | RelationKind::HasOne | RelationKind::HasOneThrough
        )
    }

    pub fn is_through(&self) -> bool {
        matches!(self, RelationKind::HasOneThrough | RelationKind::HasManyThrough)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::BelongsToMany => "belongs_to_many",
            RelationKind::HasOneThrough => "has_one_through",
            RelationKind::HasManyThrough => "has_many_through",
        };
        f.write_str(name)
    }
}

/// Foreign-key columns.
///
/// - `has_one`/`has_many`: `local_key` on the parent, `foreign_key` on the related node.
/// - `belongs_to`: `foreign_key` on the parent, `local_key` is the owner key on the related node.
/// - `belongs_to_many`: `local_key` on the parent, `foreign_key` is the related node key
///   referenced by the pivot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keys {
    pub local_key: String,
    pub foreign_key: String,
}

impl Keys {
    pub fn new(local_key: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
        }
    }
}

/// Native edge type and its direction as seen from the parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub edge_type: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    ForeignKey,
    NativeEdge,
    Hybrid,
}

/// Resolved strategy; every variant carries exactly what it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    ForeignKey(Keys),
    NativeEdge {
        edge: EdgeSpec,
        parent_key: String,
        related_key: String,
    },
    /// Foreign-key property and native edge maintained together; reads use the edge.
    Hybrid {
        keys: Keys,
        edge: EdgeSpec,
        parent_key: String,
        related_key: String,
    },
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::ForeignKey(_) => StrategyKind::ForeignKey,
            Strategy::NativeEdge { .. } => StrategyKind::NativeEdge,
            Strategy::Hybrid { .. } => StrategyKind::Hybrid,
        }
    }

    pub fn keys(&self) -> Option<&Keys> {
        match self {
            Strategy::ForeignKey(keys) | Strategy::Hybrid { keys, .. } => Some(keys),
            Strategy::NativeEdge { .. } => None,
        }
    }

    pub fn edge(&self) -> Option<&EdgeSpec> {
        match self {
            Strategy::NativeEdge { edge, .. } | Strategy::Hybrid { edge, .. } => Some(edge),
            Strategy::ForeignKey(_) => None,
        }
    }

    pub fn uses_edge(&self) -> bool {
        self.edge().is_some()
    }
}

/// Many-to-many join record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotSpec {
    /// Label of the pivot node (foreign-key and hybrid modes)
    pub label: String,
    /// Pivot property holding the parent's key
    pub foreign_pivot_key: String,
    /// Pivot property holding the related node's key
    pub related_pivot_key: String,
    /// Extra pivot attributes exposed on reads
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub timestamps: bool,
}

impl PivotSpec {
    pub fn new(
        label: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            attributes: Vec::new(),
            timestamps: false,
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }
}

/// Constraints applied to the related side (the final hop of a through relation)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scope {
    pub conditions: ConditionTree,
    pub orders: Vec<OrderBy>,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.orders.is_empty()
    }
}

/// Two hops composed into one transitive relation
#[derive(Debug, Clone, PartialEq)]
pub struct Through {
    pub first: RelationDescriptor,
    pub second: RelationDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub parent_label: String,
    pub related_label: String,
    /// For through relations: the first hop's strategy, which reads the parent keys
    pub strategy: Strategy,
    pub pivot: Option<PivotSpec>,
    pub through: Option<Box<Through>>,
    pub scope: Scope,
}

impl RelationDescriptor {
    pub fn belongs_to(
        name: impl Into<String>,
        parent_label: impl Into<String>,
        related_label: impl Into<String>,
    ) -> RelationBuilder {
        RelationBuilder::new(name, RelationKind::BelongsTo, parent_label, related_label)
    }

    pub fn has_one(
        name: impl Into<String>,
        parent_label: impl Into<String>,
        related_label: impl Into<String>,
    ) -> RelationBuilder {
        RelationBuilder::new(name, RelationKind::HasOne, parent_label, related_label)
    }

    pub fn has_many(
        name: impl Into<String>,
        parent_label: impl Into<String>,
        related_label: impl Into<String>,
    ) -> RelationBuilder {
        RelationBuilder::new(name, RelationKind::HasMany, parent_label, related_label)
    }

    pub fn belongs_to_many(
        name: impl Into<String>,
        parent_label: impl Into<String>,
        related_label: impl Into<String>,
    ) -> RelationBuilder {
        RelationBuilder::new(name, RelationKind::BelongsToMany, parent_label, related_label)
    }

    /// Compose `first` (parent → intermediate) and `second` (intermediate → related).
    pub fn through(
        name: impl Into<String>,
        kind: RelationKind,
        first: RelationDescriptor,
        second: RelationDescriptor,
    ) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: String| GraphError::InvalidRelation {
            relation: name.clone(),
            reason,
        };

        if !kind.is_through() {
            return Err(invalid(format!("{kind} is not a through relation")));
        }
        if first.through.is_some() || second.through.is_some() {
            return Err(invalid("through hops must be direct relations".into()));
        }
        if first.related_label != second.parent_label {
            return Err(invalid(format!(
                "first hop ends at `{}` but second hop starts at `{}`",
                first.related_label, second.parent_label
            )));
        }

        Ok(Self {
            name,
            kind,
            parent_label: first.parent_label.clone(),
            related_label: second.related_label.clone(),
            strategy: first.strategy.clone(),
            pivot: None,
            through: Some(Box::new(Through { first, second })),
            scope: Scope::default(),
        })
    }

    /// Constrain the related side; for through relations only the final hop.
    pub fn constrain(mut self, conditions: ConditionTree) -> Self {
        self.scope.conditions = std::mem::take(&mut self.scope.conditions).merge(conditions);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.scope.orders.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    /// Column on parent records whose values correlate to related rows
    pub fn parent_key_column(&self) -> &str {
        if let Some(through) = &self.through {
            return through.first.parent_key_column();
        }
        match &self.strategy {
            Strategy::ForeignKey(keys) => match self.kind {
                RelationKind::BelongsTo => &keys.foreign_key,
                _ => &keys.local_key,
            },
            Strategy::NativeEdge { parent_key, .. } | Strategy::Hybrid { parent_key, .. } => {
                parent_key
            }
        }
    }

    /// Identity column of the related node used by pivot and association writes
    pub fn related_key_column(&self) -> &str {
        match &self.strategy {
            Strategy::ForeignKey(keys) => match self.kind {
                RelationKind::BelongsTo => &keys.local_key,
                RelationKind::BelongsToMany => &keys.foreign_key,
                _ => DEFAULT_KEY,
            },
            Strategy::NativeEdge { related_key, .. } | Strategy::Hybrid { related_key, .. } => {
                related_key
            }
        }
    }

    pub fn is_single(&self) -> bool {
        self.kind.is_single()
    }

    pub(crate) fn expect_kind(&self, kinds: &[RelationKind], operation: &str) -> Result<()> {
        if kinds.contains(&self.kind) {
            Ok(())
        } else {
            Err(GraphError::InvalidRelation {
                relation: self.name.clone(),
                reason: format!("{operation} is not supported on {}", self.kind),
            })
        }
    }
}

/// Fluent construction of a direct relation; `build` enforces strategy invariants.
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    name: String,
    kind: RelationKind,
    parent_label: String,
    related_label: String,
    strategy: StrategyKind,
    keys: Option<Keys>,
    edge: Option<EdgeSpec>,
    parent_key: String,
    related_key: String,
    pivot: Option<PivotSpec>,
    scope: Scope,
}

impl RelationBuilder {
    fn new(
        name: impl Into<String>,
        kind: RelationKind,
        parent_label: impl Into<String>,
        related_label: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            parent_label: parent_label.into(),
            related_label: related_label.into(),
            strategy: StrategyKind::default(),
            keys: None,
            edge: None,
            parent_key: DEFAULT_KEY.to_string(),
            related_key: DEFAULT_KEY.to_string(),
            pivot: None,
            scope: Scope::default(),
        }
    }

    pub fn keys(mut self, local_key: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.keys = Some(Keys::new(local_key, foreign_key));
        self
    }

    pub fn edge(mut self, edge_type: impl Into<String>, direction: Direction) -> Self {
        self.edge = Some(EdgeSpec {
            edge_type: edge_type.into(),
            direction,
        });
        self
    }

    /// Identity properties matched at each end of a native edge
    pub fn node_keys(mut self, parent_key: impl Into<String>, related_key: impl Into<String>) -> Self {
        self.parent_key = parent_key.into();
        self.related_key = related_key.into();
        self
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn pivot(mut self, pivot: PivotSpec) -> Self {
        self.pivot = Some(pivot);
        self
    }

    pub fn constrain(mut self, conditions: ConditionTree) -> Self {
        self.scope.conditions = std::mem::take(&mut self.scope.conditions).merge(conditions);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.scope.orders.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn build(self) -> Result<RelationDescriptor> {
        let invalid = |reason: &str| GraphError::InvalidRelation {
            relation: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.kind.is_through() {
            return Err(invalid("through relations are composed with RelationDescriptor::through"));
        }
        let keys = self
            .keys
            .clone()
            .filter(|k| !k.local_key.is_empty() && !k.foreign_key.is_empty());
        let edge = self.edge.clone().filter(|e| !e.edge_type.is_empty());

        let strategy = match self.strategy {
            StrategyKind::ForeignKey => Strategy::ForeignKey(
                keys.ok_or_else(|| invalid("foreign-key strategy requires local and foreign keys"))?,
            ),
            StrategyKind::NativeEdge => Strategy::NativeEdge {
                edge: edge.ok_or_else(|| invalid("native-edge strategy requires an edge type"))?,
                parent_key: self.parent_key.clone(),
                related_key: self.related_key.clone(),
            },
            StrategyKind::Hybrid => Strategy::Hybrid {
                keys: keys.ok_or_else(|| invalid("hybrid strategy requires local and foreign keys"))?,
                edge: edge.ok_or_else(|| invalid("hybrid strategy requires an edge type"))?,
                parent_key: self.parent_key.clone(),
                related_key: self.related_key.clone(),
            },
        };

        if self.kind == RelationKind::BelongsToMany
            && strategy.keys().is_some()
            && self.pivot.is_none()
        {
            return Err(invalid("belongs_to_many with foreign keys requires a pivot label"));
        }
        if self.kind != RelationKind::BelongsToMany && self.pivot.is_some() {
            return Err(invalid("only belongs_to_many relations carry a pivot"));
        }

        Ok(RelationDescriptor {
            name: self.name,
            kind: self.kind,
            parent_label: self.parent_label,
            related_label: self.related_label,
            strategy,
            pivot: self.pivot,
            through: None,
            scope: self.scope,
        })
    }
}
