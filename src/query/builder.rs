//! Label-scoped fluent query builder
//!
//! Produces complete `MATCH … RETURN …` statements from a [`ConditionTree`]:
//! selects, counts, existence checks, updates, deletes and inserts.

use super::compiler::{window_clause, CypherCompiler, OrderBy, SortDirection, DEFAULT_ALIAS};
use super::condition::{ConditionTree, ExistsQuery};
use super::value::{escape_identifier, property_ref, CompiledQuery, Row};
use crate::error::Result;
use serde_json::Value;

/// Column holding aggregate and count results
pub const AGGREGATE_COLUMN: &str = "aggregate";

#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    pub label: String,
    pub alias: String,
    pub conditions: ConditionTree,
    pub orders: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Projected properties; empty means the whole property map
    pub columns: Vec<String>,
    pub distinct: bool,
}

impl QueryBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            alias: DEFAULT_ALIAS.to_string(),
            conditions: ConditionTree::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            columns: Vec::new(),
            distinct: false,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// AND-merge a prebuilt condition tree
    pub fn filter(mut self, tree: ConditionTree) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).merge(tree);
        self
    }

    pub fn where_(mut self, column: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).where_(column, op, value);
        self
    }

    pub fn or_where(mut self, column: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).or_where(column, op, value);
        self
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).where_eq(column, value);
        self
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions = std::mem::take(&mut self.conditions).where_in(column, values);
        self
    }

    pub fn where_between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).where_between(column, low, high);
        self
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).where_null(column);
        self
    }

    pub fn where_not_null(mut self, column: impl Into<String>) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).where_not_null(column);
        self
    }

    pub fn where_raw<I, V>(mut self, text: impl Into<String>, bindings: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions = std::mem::take(&mut self.conditions).where_raw(text, bindings);
        self
    }

    pub fn where_exists(mut self, query: ExistsQuery) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).where_exists(query);
        self
    }

    pub fn where_not_exists(mut self, query: ExistsQuery) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).where_not_exists(query);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.orders.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn latest(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Desc)
    }

    pub fn oldest(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Asc)
    }

    /// Drop every ordering on `column`
    pub fn without_order_on(mut self, column: &str) -> Self {
        self.orders.retain(|o| o.column != column);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Offset window for a 1-based page number
    pub fn for_page(self, page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        self.offset((page - 1) * per_page).limit(per_page)
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    fn match_clause(&self, compiler: &mut CypherCompiler) -> Result<String> {
        let mut text = format!("MATCH ({}:{})", self.alias, escape_identifier(&self.label));
        let filter = compiler.where_clause(&self.conditions, &self.alias)?;
        if !filter.is_empty() {
            text.push(' ');
            text.push_str(&filter);
        }
        Ok(text)
    }

    /// `RETURN` projection and the column names it produces
    fn projection(&self) -> (String, Vec<String>) {
        if self.columns.is_empty() {
            (
                format!("{0} {{.*}} AS {0}", self.alias),
                vec![self.alias.clone()],
            )
        } else {
            let names: Vec<String> = self
                .columns
                .iter()
                .map(|c| c.rsplit('.').next().unwrap_or(c).to_string())
                .collect();
            let parts: Vec<String> = self
                .columns
                .iter()
                .zip(&names)
                .map(|(c, name)| format!("{} AS {}", property_ref(&self.alias, c), escape_identifier(name)))
                .collect();
            (parts.join(", "), names)
        }
    }

    /// Full select statement
    pub fn to_select(&self) -> Result<CompiledQuery> {
        let mut compiler = CypherCompiler::new();
        let mut parts = vec![self.match_clause(&mut compiler)?];
        let (projection, columns) = self.projection();
        let keyword = if self.distinct { "RETURN DISTINCT" } else { "RETURN" };
        parts.push(format!("{keyword} {projection}"));

        let order = compiler.order_clause(&self.orders, &self.alias);
        if !order.is_empty() {
            parts.push(order);
        }
        parts.extend(window_clause(self.limit, self.offset));

        let query = CompiledQuery::with_params(parts.join(" "), compiler.into_params()).returning(columns);
        tracing::debug!(label = %self.label, cypher = %query.text, "Compiled select");
        Ok(query)
    }

    /// Total-count statement: filters kept, ordering and window dropped
    pub fn to_count(&self) -> Result<CompiledQuery> {
        let mut compiler = CypherCompiler::new();
        let text = format!(
            "{} RETURN count({}) AS {}",
            self.match_clause(&mut compiler)?,
            self.alias,
            AGGREGATE_COLUMN
        );
        Ok(CompiledQuery::with_params(text, compiler.into_params()).returning([AGGREGATE_COLUMN]))
    }

    pub fn to_exists(&self) -> Result<CompiledQuery> {
        let mut compiler = CypherCompiler::new();
        let text = format!(
            "{} RETURN count({}) > 0 AS {}",
            self.match_clause(&mut compiler)?,
            self.alias,
            AGGREGATE_COLUMN
        );
        Ok(CompiledQuery::with_params(text, compiler.into_params()).returning([AGGREGATE_COLUMN]))
    }

    /// Merge `values` into every matched node and report how many were touched
    pub fn to_update(&self, values: Row) -> Result<CompiledQuery> {
        let mut compiler = CypherCompiler::new();
        let matched = self.match_clause(&mut compiler)?;
        let placeholder = compiler.bind(Value::Object(values));
        let text = format!(
            "{matched} SET {} += {placeholder} RETURN count({}) AS affected",
            self.alias, self.alias
        );
        Ok(CompiledQuery::with_params(text, compiler.into_params()).returning(["affected"]))
    }

    pub fn to_delete(&self) -> Result<CompiledQuery> {
        let mut compiler = CypherCompiler::new();
        let matched = self.match_clause(&mut compiler)?;
        let text = format!(
            "{matched} WITH {0}, {0} {{.*}} AS props DETACH DELETE {0} RETURN count(props) AS affected",
            self.alias
        );
        Ok(CompiledQuery::with_params(text, compiler.into_params()).returning(["affected"]))
    }

    /// Create one node with the given properties
    pub fn to_insert(label: &str, attributes: Row) -> CompiledQuery {
        let text = format!(
            "CREATE (n:{}) SET n = $attributes RETURN n {{.*}} AS n",
            escape_identifier(label)
        );
        CompiledQuery::new(text)
            .param("attributes", Value::Object(attributes))
            .returning(["n"])
    }
}
