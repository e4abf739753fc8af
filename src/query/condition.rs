//! Boolean filter trees
//!
//! A [`ConditionTree`] is an ordered list of [`Clause`]s. Each clause carries the
//! connector joining it to the previous sibling (ignored for the first clause),
//! a negation flag, and its payload: a predicate, a column comparison, a nested
//! group, a raw fragment or an existence subquery.
//!
//! Scoped sub-queries are plain values: build a tree, then hand it to
//! [`ConditionTree::where_group`] or [`ConditionTree::where_exists`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connector between sibling clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    pub fn as_cypher(&self) -> &'static str {
        match self {
            Boolean::And => "AND",
            Boolean::Or => "OR",
        }
    }
}

/// Comparison operators understood by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    /// Case-insensitive LIKE
    ILike,
    In,
    NotIn,
    Between,
    NotBetween,
    Null,
    NotNull,
    /// Anything the symbol table does not know; rejected at compile time
    Unknown(String),
}

impl Operator {
    /// Parse an operator symbol (`"="`, `">="`, `"not in"`, ...).
    pub fn from_symbol(symbol: &str) -> Self {
        let normalized = symbol
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        match normalized.as_str() {
            "=" | "==" => Operator::Eq,
            "<>" | "!=" => Operator::NotEq,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "ilike" => Operator::ILike,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "between" => Operator::Between,
            "not between" => Operator::NotBetween,
            "null" | "is null" => Operator::Null,
            "not null" | "is not null" => Operator::NotNull,
            _ => Operator::Unknown(symbol.to_string()),
        }
    }

    /// Cypher symbol for plain binary comparisons.
    pub fn comparison_symbol(&self) -> Option<&'static str> {
        match self {
            Operator::Eq => Some("="),
            Operator::NotEq => Some("<>"),
            Operator::Lt => Some("<"),
            Operator::Lte => Some("<="),
            Operator::Gt => Some(">"),
            Operator::Gte => Some(">="),
            _ => None,
        }
    }
}

/// Right-hand side of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    List(Vec<Value>),
    Range(Value, Value),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub operand: Operand,
}

/// Author-supplied Cypher with positional `?` bindings
#[derive(Debug, Clone, PartialEq)]
pub struct RawFragment {
    pub text: String,
    pub bindings: Vec<Value>,
}

/// Edge direction as seen from the outer node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    /// Render `(from)<edge>(to)` connectors around a relationship pattern body.
    pub fn wrap(&self, body: &str) -> String {
        match self {
            Direction::Outgoing => format!("-[{body}]->"),
            Direction::Incoming => format!("<-[{body}]-"),
            Direction::Both => format!("-[{body}]-"),
        }
    }
}

/// How an existence subquery is tied to the outer node
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    /// `inner.inner_column = outer.outer_column`
    Column {
        outer_column: String,
        inner_column: String,
    },
    /// `(outer)-[:edge_type]->(inner)`
    Edge {
        edge_type: String,
        direction: Direction,
    },
    /// Two-hop correlation through an intermediate label (through relations)
    Through {
        first: Box<Correlation>,
        intermediate_label: String,
        second: Box<Correlation>,
    },
}

/// Nested condition tree scoped to another label
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsQuery {
    pub label: String,
    pub correlation: Correlation,
    pub conditions: ConditionTree,
}

impl ExistsQuery {
    pub fn correlated(
        label: impl Into<String>,
        outer_column: impl Into<String>,
        inner_column: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            correlation: Correlation::Column {
                outer_column: outer_column.into(),
                inner_column: inner_column.into(),
            },
            conditions: ConditionTree::new(),
        }
    }

    pub fn via_edge(label: impl Into<String>, edge_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            label: label.into(),
            correlation: Correlation::Edge {
                edge_type: edge_type.into(),
                direction,
            },
            conditions: ConditionTree::new(),
        }
    }

    pub fn filter(mut self, conditions: ConditionTree) -> Self {
        self.conditions = conditions;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseKind {
    Predicate(Predicate),
    Columns {
        first: String,
        operator: Operator,
        second: String,
    },
    Group(ConditionTree),
    Raw(RawFragment),
    Exists(ExistsQuery),
}

/// One member of a condition group
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Connector to the previous sibling; `None` is only valid on the first clause
    pub boolean: Option<Boolean>,
    pub negated: bool,
    pub kind: ClauseKind,
}

/// Ordered boolean combination of clauses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionTree {
    pub clauses: Vec<Clause>,
}

impl ConditionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Append a clause with an explicit connector.
    pub fn push(&mut self, boolean: Boolean, negated: bool, kind: ClauseKind) {
        self.clauses.push(Clause {
            boolean: Some(boolean),
            negated,
            kind,
        });
    }

    fn with(mut self, boolean: Boolean, negated: bool, kind: ClauseKind) -> Self {
        self.push(boolean, negated, kind);
        self
    }

    fn predicate(column: impl Into<String>, operator: Operator, operand: Operand) -> ClauseKind {
        ClauseKind::Predicate(Predicate {
            column: column.into(),
            operator,
            operand,
        })
    }

    /// `column <op> value`; list and pair operands are inferred from the operator
    pub fn where_(self, column: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let operator = Operator::from_symbol(op);
        let operand = operand_for(&operator, value.into());
        self.with(Boolean::And, false, Self::predicate(column, operator, operand))
    }

    pub fn or_where(self, column: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let operator = Operator::from_symbol(op);
        let operand = operand_for(&operator, value.into());
        self.with(Boolean::Or, false, Self::predicate(column, operator, operand))
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(
            Boolean::And,
            false,
            Self::predicate(column, Operator::Eq, Operand::Value(value.into())),
        )
    }

    pub fn where_not(self, column: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let operator = Operator::from_symbol(op);
        let operand = operand_for(&operator, value.into());
        self.with(Boolean::And, true, Self::predicate(column, operator, operand))
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let list = values.into_iter().map(Into::into).collect();
        self.with(
            Boolean::And,
            false,
            Self::predicate(column, Operator::In, Operand::List(list)),
        )
    }

    pub fn or_where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let list = values.into_iter().map(Into::into).collect();
        self.with(
            Boolean::Or,
            false,
            Self::predicate(column, Operator::In, Operand::List(list)),
        )
    }

    pub fn where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let list = values.into_iter().map(Into::into).collect();
        self.with(
            Boolean::And,
            false,
            Self::predicate(column, Operator::NotIn, Operand::List(list)),
        )
    }

    /// Inclusive range; bounds are not reordered, so `lo > hi` matches nothing
    pub fn where_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.with(
            Boolean::And,
            false,
            Self::predicate(
                column,
                Operator::Between,
                Operand::Range(low.into(), high.into()),
            ),
        )
    }

    pub fn or_where_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.with(
            Boolean::Or,
            false,
            Self::predicate(
                column,
                Operator::Between,
                Operand::Range(low.into(), high.into()),
            ),
        )
    }

    pub fn where_not_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.with(
            Boolean::And,
            false,
            Self::predicate(
                column,
                Operator::NotBetween,
                Operand::Range(low.into(), high.into()),
            ),
        )
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.with(
            Boolean::And,
            false,
            Self::predicate(column, Operator::Null, Operand::None),
        )
    }

    pub fn or_where_null(self, column: impl Into<String>) -> Self {
        self.with(
            Boolean::Or,
            false,
            Self::predicate(column, Operator::Null, Operand::None),
        )
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.with(
            Boolean::And,
            false,
            Self::predicate(column, Operator::NotNull, Operand::None),
        )
    }

    pub fn where_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.with(
            Boolean::And,
            false,
            Self::predicate(
                column,
                Operator::Like,
                Operand::Value(Value::String(pattern.into())),
            ),
        )
    }

    /// Compare two properties of the same node
    pub fn where_column(
        self,
        first: impl Into<String>,
        op: &str,
        second: impl Into<String>,
    ) -> Self {
        self.with(
            Boolean::And,
            false,
            ClauseKind::Columns {
                first: first.into(),
                operator: Operator::from_symbol(op),
                second: second.into(),
            },
        )
    }

    pub fn where_raw<I, V>(self, text: impl Into<String>, bindings: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let raw = RawFragment {
            text: text.into(),
            bindings: bindings.into_iter().map(Into::into).collect(),
        };
        self.with(Boolean::And, false, ClauseKind::Raw(raw))
    }

    pub fn or_where_raw<I, V>(self, text: impl Into<String>, bindings: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let raw = RawFragment {
            text: text.into(),
            bindings: bindings.into_iter().map(Into::into).collect(),
        };
        self.with(Boolean::Or, false, ClauseKind::Raw(raw))
    }

    pub fn where_group(self, group: ConditionTree) -> Self {
        self.with(Boolean::And, false, ClauseKind::Group(group))
    }

    pub fn or_where_group(self, group: ConditionTree) -> Self {
        self.with(Boolean::Or, false, ClauseKind::Group(group))
    }

    pub fn where_not_group(self, group: ConditionTree) -> Self {
        self.with(Boolean::And, true, ClauseKind::Group(group))
    }

    pub fn where_exists(self, query: ExistsQuery) -> Self {
        self.with(Boolean::And, false, ClauseKind::Exists(query))
    }

    pub fn or_where_exists(self, query: ExistsQuery) -> Self {
        self.with(Boolean::Or, false, ClauseKind::Exists(query))
    }

    pub fn where_not_exists(self, query: ExistsQuery) -> Self {
        self.with(Boolean::And, true, ClauseKind::Exists(query))
    }

    /// AND-merge another tree as a single group (no-op for an empty tree).
    /// A receiver with a top-level OR is grouped first so the OR keeps its scope.
    pub fn merge(self, other: ConditionTree) -> Self {
        if other.is_empty() {
            self
        } else if self.is_empty() {
            other
        } else if self.has_top_level_or() {
            ConditionTree::new().where_group(self).where_group(other)
        } else {
            self.where_group(other)
        }
    }

    /// The first connector is never rendered, so only later ones count
    fn has_top_level_or(&self) -> bool {
        self.clauses
            .iter()
            .skip(1)
            .any(|c| c.boolean == Some(Boolean::Or))
    }
}

/// Infer the operand shape the operator expects from a single value.
fn operand_for(operator: &Operator, value: Value) -> Operand {
    match operator {
        Operator::Null | Operator::NotNull => Operand::None,
        Operator::In | Operator::NotIn => match value {
            Value::Array(items) => Operand::List(items),
            other => Operand::Value(other),
        },
        Operator::Between | Operator::NotBetween => match value {
            Value::Array(mut items) if items.len() == 2 => {
                let high = items.pop().unwrap_or(Value::Null);
                let low = items.pop().unwrap_or(Value::Null);
                Operand::Range(low, high)
            }
            other => Operand::Value(other),
        },
        _ => Operand::Value(value),
    }
}
