//! Condition tree → parameterized Cypher
//!
//! Values never reach the query text: every operand is bound as `$pN` in a
//! single parameter map, numbered in traversal order so that compiling the
//! same tree twice yields identical output.

use super::condition::{
    Boolean, Clause, ClauseKind, ConditionTree, Correlation, ExistsQuery, Operand, Operator,
    Predicate, RawFragment,
};
use super::value::{escape_identifier, property_ref, CompiledQuery, Params};
use crate::error::{GraphError, Result};
use serde_json::Value;

/// Default alias of the matched node
pub const DEFAULT_ALIAS: &str = "n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_cypher(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reversed(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Shape of a LIKE pattern once wildcards are analysed
#[derive(Debug, Clone, PartialEq)]
enum LikeShape {
    Equals(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LikeToken {
    Literal(char),
    Any,
    One,
}

fn tokenize_like(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(LikeToken::Literal(escaped)),
                None => tokens.push(LikeToken::Literal('\\')),
            },
            '%' => tokens.push(LikeToken::Any),
            '_' => tokens.push(LikeToken::One),
            other => tokens.push(LikeToken::Literal(other)),
        }
    }
    tokens
}

fn like_shape(pattern: &str) -> LikeShape {
    let tokens = tokenize_like(pattern);
    let literal = |slice: &[LikeToken]| -> Option<String> {
        slice
            .iter()
            .map(|t| match t {
                LikeToken::Literal(c) => Some(*c),
                _ => None,
            })
            .collect()
    };

    let leading = matches!(tokens.first(), Some(LikeToken::Any));
    let trailing = tokens.len() > usize::from(leading) && matches!(tokens.last(), Some(LikeToken::Any));
    let start = usize::from(leading);
    let end = tokens.len() - usize::from(trailing);

    if let Some(text) = literal(&tokens[start..end]) {
        return match (leading, trailing) {
            (false, false) => LikeShape::Equals(text),
            (false, true) => LikeShape::Prefix(text),
            (true, false) => LikeShape::Suffix(text),
            (true, true) => LikeShape::Contains(text),
        };
    }

    let mut regex = String::from("(?s)");
    for token in tokens {
        match token {
            LikeToken::Any => regex.push_str(".*"),
            LikeToken::One => regex.push('.'),
            LikeToken::Literal(c) => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    LikeShape::Regex(regex)
}

/// Stateful compiler sharing one parameter map across nested trees.
#[derive(Debug, Default)]
pub struct CypherCompiler {
    params: Params,
    next_param: usize,
    next_subquery: usize,
}

impl CypherCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its placeholder (`$p0`, `$p1`, ...)
    pub fn bind(&mut self, value: Value) -> String {
        let name = format!("p{}", self.next_param);
        self.next_param += 1;
        self.params.insert(name.clone(), value);
        format!("${name}")
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_params(self) -> Params {
        self.params
    }

    /// Render a tree as a boolean expression (empty string for an empty tree).
    pub fn compile_conditions(&mut self, tree: &ConditionTree, alias: &str) -> Result<String> {
        self.compile_chain(tree, alias)
    }

    /// `WHERE <expr>` or an empty string
    pub fn where_clause(&mut self, tree: &ConditionTree, alias: &str) -> Result<String> {
        let expr = self.compile_chain(tree, alias)?;
        Ok(if expr.is_empty() {
            String::new()
        } else {
            format!("WHERE {expr}")
        })
    }

    /// `ORDER BY ...` or an empty string
    pub fn order_clause(&self, orders: &[OrderBy], alias: &str) -> String {
        if orders.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = orders
            .iter()
            .map(|o| format!("{} {}", property_ref(alias, &o.column), o.direction.as_cypher()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }

    fn compile_chain(&mut self, tree: &ConditionTree, alias: &str) -> Result<String> {
        let mut out = String::new();
        for (index, clause) in tree.clauses.iter().enumerate() {
            let connector = match (index, clause.boolean) {
                (0, _) => None,
                (_, Some(boolean)) => Some(boolean),
                (_, None) => {
                    return Err(GraphError::Compile(format!(
                        "clause {index} has no AND/OR connector"
                    )))
                }
            };
            let Some(rendered) = self.compile_clause(clause, alias)? else {
                continue;
            };
            if !out.is_empty() {
                let joiner = connector.unwrap_or(Boolean::And);
                out.push(' ');
                out.push_str(joiner.as_cypher());
                out.push(' ');
            }
            out.push_str(&rendered);
        }
        Ok(out)
    }

    /// None for a group that renders nothing, however deeply nested
    fn compile_clause(&mut self, clause: &Clause, alias: &str) -> Result<Option<String>> {
        let body = match &clause.kind {
            ClauseKind::Predicate(p) => self.compile_predicate(p, alias)?,
            ClauseKind::Columns {
                first,
                operator,
                second,
            } => {
                let symbol = operator.comparison_symbol().ok_or_else(|| {
                    GraphError::Compile(format!(
                        "operator {operator:?} cannot compare columns `{first}` and `{second}`"
                    ))
                })?;
                format!(
                    "{} {} {}",
                    property_ref(alias, first),
                    symbol,
                    property_ref(alias, second)
                )
            }
            ClauseKind::Group(group) => {
                let inner = self.compile_chain(group, alias)?;
                if inner.is_empty() {
                    return Ok(None);
                }
                format!("({inner})")
            }
            ClauseKind::Raw(raw) => self.compile_raw(raw)?,
            ClauseKind::Exists(query) => self.compile_exists(query, alias)?,
        };
        Ok(Some(match (&clause.kind, clause.negated) {
            (_, false) => body,
            (ClauseKind::Group(_), true) => format!("NOT {body}"),
            (_, true) => format!("NOT ({body})"),
        }))
    }

    fn compile_predicate(&mut self, predicate: &Predicate, alias: &str) -> Result<String> {
        let column = &predicate.column;
        let prop = property_ref(alias, column);

        match (&predicate.operator, &predicate.operand) {
            (Operator::Unknown(symbol), _) => Err(GraphError::Compile(format!(
                "unknown operator `{symbol}` on column `{column}`"
            ))),
            (Operator::Eq, Operand::Value(Value::Null)) => Ok(format!("{prop} IS NULL")),
            (Operator::NotEq, Operand::Value(Value::Null)) => Ok(format!("{prop} IS NOT NULL")),
            (op, Operand::Value(Value::Null)) if op.comparison_symbol().is_some() => {
                Err(GraphError::Compile(format!(
                    "cannot compare `{column}` with null using {op:?}"
                )))
            }
            (op, Operand::Value(value)) if op.comparison_symbol().is_some() => {
                let symbol = op.comparison_symbol().unwrap_or("=");
                let placeholder = self.bind(value.clone());
                Ok(format!("{prop} {symbol} {placeholder}"))
            }
            (Operator::In, Operand::List(items)) if items.is_empty() => Ok("false".to_string()),
            (Operator::NotIn, Operand::List(items)) if items.is_empty() => Ok("true".to_string()),
            (Operator::In, Operand::List(items)) => {
                let placeholder = self.bind(Value::Array(items.clone()));
                Ok(format!("{prop} IN {placeholder}"))
            }
            (Operator::NotIn, Operand::List(items)) => {
                let placeholder = self.bind(Value::Array(items.clone()));
                Ok(format!("NOT {prop} IN {placeholder}"))
            }
            (Operator::Between, Operand::Range(low, high)) => {
                let low = self.bind(low.clone());
                let high = self.bind(high.clone());
                Ok(format!("({prop} >= {low} AND {prop} <= {high})"))
            }
            (Operator::NotBetween, Operand::Range(low, high)) => {
                let low = self.bind(low.clone());
                let high = self.bind(high.clone());
                Ok(format!("({prop} < {low} OR {prop} > {high})"))
            }
            (Operator::Null, _) => Ok(format!("{prop} IS NULL")),
            (Operator::NotNull, _) => Ok(format!("{prop} IS NOT NULL")),
            (Operator::Like | Operator::NotLike | Operator::ILike, Operand::Value(value)) => {
                self.compile_like(&predicate.operator, &prop, column, value)
            }
            (op, operand) => Err(GraphError::Compile(format!(
                "operator {op:?} on column `{column}` does not accept operand {operand:?}"
            ))),
        }
    }

    fn compile_like(
        &mut self,
        operator: &Operator,
        prop: &str,
        column: &str,
        value: &Value,
    ) -> Result<String> {
        let pattern = value.as_str().ok_or_else(|| {
            GraphError::Compile(format!("LIKE on `{column}` requires a string pattern"))
        })?;
        let insensitive = *operator == Operator::ILike;
        let lhs = if insensitive {
            format!("toLower({prop})")
        } else {
            prop.to_string()
        };

        let bind_text = |compiler: &mut Self, text: String| {
            let placeholder = compiler.bind(Value::String(text));
            if insensitive {
                format!("toLower({placeholder})")
            } else {
                placeholder
            }
        };

        let expr = match like_shape(pattern) {
            LikeShape::Equals(text) => format!("{lhs} = {}", bind_text(self, text)),
            LikeShape::Prefix(text) => format!("{lhs} STARTS WITH {}", bind_text(self, text)),
            LikeShape::Suffix(text) => format!("{lhs} ENDS WITH {}", bind_text(self, text)),
            LikeShape::Contains(text) => format!("{lhs} CONTAINS {}", bind_text(self, text)),
            LikeShape::Regex(regex) => {
                let regex = if insensitive {
                    regex.replacen("(?s)", "(?is)", 1)
                } else {
                    regex
                };
                let placeholder = self.bind(Value::String(regex));
                format!("{prop} =~ {placeholder}")
            }
        };

        Ok(if *operator == Operator::NotLike {
            format!("NOT ({expr})")
        } else {
            expr
        })
    }

    /// Remap positional `?` bindings (outside quoted strings) to named parameters.
    fn compile_raw(&mut self, raw: &RawFragment) -> Result<String> {
        let mut out = String::with_capacity(raw.text.len());
        let mut bindings = raw.bindings.iter();
        let mut used = 0usize;
        let mut quote: Option<char> = None;
        let mut chars = raw.text.chars();

        while let Some(c) = chars.next() {
            match (quote, c) {
                (Some(_), '\\') => {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (None, '\'' | '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (None, '?') => {
                    let value = bindings.next().ok_or_else(|| {
                        GraphError::Compile(format!(
                            "raw fragment `{}` has more placeholders than bindings ({})",
                            raw.text,
                            raw.bindings.len()
                        ))
                    })?;
                    used += 1;
                    let placeholder = self.bind(value.clone());
                    out.push_str(&placeholder);
                }
                _ => out.push(c),
            }
        }

        if used != raw.bindings.len() {
            return Err(GraphError::Compile(format!(
                "raw fragment `{}` uses {used} placeholder(s) but {} binding(s) were supplied",
                raw.text,
                raw.bindings.len()
            )));
        }
        Ok(out)
    }

    fn compile_exists(&mut self, query: &ExistsQuery, outer: &str) -> Result<String> {
        let inner = format!("s{}", self.next_subquery);
        self.next_subquery += 1;

        let mut segments = self.correlation_segments(&query.correlation, outer, &inner, &query.label)?;
        let nested = self.compile_chain(&query.conditions, &inner)?;
        if !nested.is_empty() {
            if let Some(last) = segments.last_mut() {
                last.1.push(format!("({nested})"));
            }
        }

        let body: Vec<String> = segments
            .into_iter()
            .map(|(pattern, conditions)| {
                if conditions.is_empty() {
                    format!("MATCH {pattern}")
                } else {
                    format!("MATCH {pattern} WHERE {}", conditions.join(" AND "))
                }
            })
            .collect();
        Ok(format!("EXISTS {{ {} }}", body.join(" ")))
    }

    /// MATCH segments (pattern, conditions) linking `outer` to `inner:label`.
    pub(crate) fn correlation_segments(
        &mut self,
        correlation: &Correlation,
        outer: &str,
        inner: &str,
        label: &str,
    ) -> Result<Vec<(String, Vec<String>)>> {
        let node = format!("({}:{})", inner, escape_identifier(label));
        match correlation {
            Correlation::Column {
                outer_column,
                inner_column,
            } => Ok(vec![(
                node,
                vec![format!(
                    "{} = {}",
                    property_ref(inner, inner_column),
                    property_ref(outer, outer_column)
                )],
            )]),
            Correlation::Edge {
                edge_type,
                direction,
            } => {
                let edge = direction.wrap(&format!(":{}", escape_identifier(edge_type)));
                Ok(vec![(format!("({outer}){edge}{node}"), Vec::new())])
            }
            Correlation::Through {
                first,
                intermediate_label,
                second,
            } => {
                let middle = format!("m{}", self.next_subquery);
                self.next_subquery += 1;
                let mut segments =
                    self.correlation_segments(first, outer, &middle, intermediate_label)?;
                segments.extend(self.correlation_segments(second, &middle, inner, label)?);
                Ok(segments)
            }
        }
    }
}

/// Compile a filter tree plus ordering and window for alias `n`.
///
/// The text is the clause tail (`WHERE … ORDER BY … SKIP … LIMIT …`) that a
/// `MATCH`/`RETURN` frame wraps.
pub fn compile(
    tree: &ConditionTree,
    order_by: &[OrderBy],
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<CompiledQuery> {
    let mut compiler = CypherCompiler::new();
    let mut parts = Vec::new();

    let filter = compiler.where_clause(tree, DEFAULT_ALIAS)?;
    if !filter.is_empty() {
        parts.push(filter);
    }
    let order = compiler.order_clause(order_by, DEFAULT_ALIAS);
    if !order.is_empty() {
        parts.push(order);
    }
    parts.extend(window_clause(limit, offset));

    Ok(CompiledQuery::with_params(parts.join(" "), compiler.into_params()))
}

/// `SKIP`/`LIMIT` fragments; both are typed integers so they are rendered inline.
pub fn window_clause(limit: Option<usize>, offset: Option<usize>) -> Vec<String> {
    let mut parts = Vec::new();
    if let Some(offset) = offset.filter(|o| *o > 0) {
        parts.push(format!("SKIP {offset}"));
    }
    if let Some(limit) = limit {
        parts.push(format!("LIMIT {limit}"));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::condition::Direction;
    use serde_json::json;

    fn compile_tree(tree: &ConditionTree) -> CompiledQuery {
        compile(tree, &[], None, None).unwrap()
    }

    #[test]
    fn test_simple_and_chain_is_unparenthesized() {
        let tree = ConditionTree::new()
            .where_("age", ">", 18)
            .where_eq("status", "active");
        let q = compile_tree(&tree);
        assert_eq!(q.text, "WHERE n.age > $p0 AND n.status = $p1");
        assert_eq!(q.params["p0"], json!(18));
        assert_eq!(q.params["p1"], json!("active"));
    }

    #[test]
    fn test_groups_are_parenthesized() {
        let tree = ConditionTree::new().where_eq("a", 1).or_where_group(
            ConditionTree::new()
                .where_eq("b", 2)
                .where_("c", "<", 3),
        );
        let q = compile_tree(&tree);
        assert_eq!(q.text, "WHERE n.a = $p0 OR (n.b = $p1 AND n.c < $p2)");
    }

    #[test]
    fn test_negated_group_and_predicate() {
        let tree = ConditionTree::new()
            .where_not("role", "=", "guest")
            .where_not_group(ConditionTree::new().where_null("a").or_where_null("b"));
        let q = compile_tree(&tree);
        assert_eq!(
            q.text,
            "WHERE NOT (n.role = $p0) AND NOT (n.a IS NULL OR n.b IS NULL)"
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let tree = ConditionTree::new()
            .where_in("id", vec![3, 1, 2])
            .or_where_between("score", 1.5, 9.5)
            .where_like("name", "%ada%");
        let orders = vec![OrderBy::desc("score")];
        let first = compile(&tree, &orders, Some(10), Some(20)).unwrap();
        let second = compile(&tree, &orders, Some(10), Some(20)).unwrap();
        assert_eq!(first, second);
        assert!(first.text.ends_with("ORDER BY n.score DESC SKIP 20 LIMIT 10"));
    }

    #[test]
    fn test_empty_in_is_always_false() {
        let q = compile_tree(&ConditionTree::new().where_in("id", Vec::<i64>::new()));
        assert_eq!(q.text, "WHERE false");
        assert!(q.params.is_empty());

        let q = compile_tree(&ConditionTree::new().where_not_in("id", Vec::<i64>::new()));
        assert_eq!(q.text, "WHERE true");
    }

    #[test]
    fn test_between_keeps_bound_order() {
        let q = compile_tree(&ConditionTree::new().where_between("age", 50, 30));
        assert_eq!(q.text, "WHERE (n.age >= $p0 AND n.age <= $p1)");
        assert_eq!(q.params["p0"], json!(50));
        assert_eq!(q.params["p1"], json!(30));

        let q = compile_tree(&ConditionTree::new().where_not_between("age", 30, 50));
        assert_eq!(q.text, "WHERE (n.age < $p0 OR n.age > $p1)");
    }

    #[test]
    fn test_null_checks_bind_nothing() {
        let tree = ConditionTree::new()
            .where_null("deleted_at")
            .where_not_null("email")
            .where_eq("parent_id", Value::Null);
        let q = compile_tree(&tree);
        assert_eq!(
            q.text,
            "WHERE n.deleted_at IS NULL AND n.email IS NOT NULL AND n.parent_id IS NULL"
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_like_shapes() {
        let cases = [
            ("%ada%", "n.name CONTAINS $p0", "ada"),
            ("ada%", "n.name STARTS WITH $p0", "ada"),
            ("%ada", "n.name ENDS WITH $p0", "ada"),
            ("ada", "n.name = $p0", "ada"),
            ("100\\%", "n.name = $p0", "100%"),
        ];
        for (pattern, expected, bound) in cases {
            let q = compile_tree(&ConditionTree::new().where_like("name", pattern));
            assert_eq!(q.text, format!("WHERE {expected}"), "pattern {pattern}");
            assert_eq!(q.params["p0"], json!(bound));
        }
    }

    #[test]
    fn test_like_with_inner_wildcards_uses_regex() {
        let q = compile_tree(&ConditionTree::new().where_like("code", "a_b%.c"));
        assert_eq!(q.text, "WHERE n.code =~ $p0");
        assert_eq!(q.params["p0"], json!("(?s)a.b.*\\.c"));
    }

    #[test]
    fn test_ilike_lowercases_both_sides() {
        let q = compile_tree(&ConditionTree::new().where_("name", "ilike", "%Ada%"));
        assert_eq!(q.text, "WHERE toLower(n.name) CONTAINS toLower($p0)");
        let q = compile_tree(&ConditionTree::new().where_("name", "not like", "x%"));
        assert_eq!(q.text, "WHERE NOT (n.name STARTS WITH $p0)");
    }

    #[test]
    fn test_like_requires_string() {
        let err = compile(&ConditionTree::new().where_("age", "like", 3), &[], None, None)
            .unwrap_err();
        assert!(matches!(err, GraphError::Compile(_)));
    }

    #[test]
    fn test_unknown_operator_is_compile_error() {
        let err = compile(&ConditionTree::new().where_("age", "~~", 3), &[], None, None)
            .unwrap_err();
        match err {
            GraphError::Compile(msg) => assert!(msg.contains("~~")),
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_connector_is_compile_error() {
        let mut tree = ConditionTree::new().where_eq("a", 1).where_eq("b", 2);
        tree.clauses[1].boolean = None;
        assert!(matches!(
            compile(&tree, &[], None, None),
            Err(GraphError::Compile(_))
        ));

        // the first clause's connector is irrelevant
        let mut tree = ConditionTree::new().where_eq("a", 1);
        tree.clauses[0].boolean = None;
        assert!(compile(&tree, &[], None, None).is_ok());
    }

    #[test]
    fn test_raw_bindings_are_remapped() {
        let tree = ConditionTree::new()
            .where_eq("a", 1)
            .where_raw("size(n.tags) > ? AND n.note <> 'why?'", vec![2]);
        let q = compile_tree(&tree);
        assert_eq!(
            q.text,
            "WHERE n.a = $p0 AND size(n.tags) > $p1 AND n.note <> 'why?'"
        );
        assert_eq!(q.params["p1"], json!(2));
        assert!(q.unbound_placeholders().is_empty());
    }

    #[test]
    fn test_raw_binding_count_mismatch() {
        let too_few = ConditionTree::new().where_raw("n.a = ? AND n.b = ?", vec![1]);
        assert!(compile(&too_few, &[], None, None).is_err());
        let too_many = ConditionTree::new().where_raw("n.a = ?", vec![1, 2]);
        assert!(compile(&too_many, &[], None, None).is_err());
    }

    #[test]
    fn test_column_comparison() {
        let q = compile_tree(&ConditionTree::new().where_column("updated_at", ">", "created_at"));
        assert_eq!(q.text, "WHERE n.updated_at > n.created_at");
        let err = compile(
            &ConditionTree::new().where_column("a", "in", "b"),
            &[],
            None,
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_correlated_exists_shares_param_map() {
        let exists = ExistsQuery::correlated("Post", "id", "user_id")
            .filter(ConditionTree::new().where_eq("published", true));
        let tree = ConditionTree::new()
            .where_eq("active", true)
            .where_exists(exists);
        let q = compile_tree(&tree);
        assert_eq!(
            q.text,
            "WHERE n.active = $p0 AND EXISTS { MATCH (s0:Post) WHERE s0.user_id = n.id AND (s0.published = $p1) }"
        );
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn test_edge_exists_negated() {
        let tree = ConditionTree::new()
            .where_not_exists(ExistsQuery::via_edge("Role", "HAS_ROLE", Direction::Outgoing));
        let q = compile_tree(&tree);
        assert_eq!(
            q.text,
            "WHERE NOT (EXISTS { MATCH (n)-[:HAS_ROLE]->(s0:Role) })"
        );
    }

    #[test]
    fn test_empty_groups_are_skipped() {
        let tree = ConditionTree::new()
            .where_group(ConditionTree::new())
            .or_where("a", "=", 1);
        let q = compile_tree(&tree);
        assert_eq!(q.text, "WHERE n.a = $p0");
    }

    #[test]
    fn test_nested_empty_groups_are_skipped() {
        let tree = ConditionTree::new()
            .where_eq("a", 1)
            .where_group(ConditionTree::new().where_group(ConditionTree::new()))
            .or_where_group(
                ConditionTree::new()
                    .where_not_group(ConditionTree::new().where_group(ConditionTree::new())),
            );
        let q = compile_tree(&tree);
        assert_eq!(q.text, "WHERE n.a = $p0");

        let only_empty =
            ConditionTree::new().where_group(ConditionTree::new().where_group(ConditionTree::new()));
        assert_eq!(compile_tree(&only_empty).text, "");
    }

    #[test]
    fn test_merged_or_chain_keeps_its_scope() {
        let tree = ConditionTree::new()
            .where_eq("a", 1)
            .or_where("b", "=", 2)
            .merge(ConditionTree::new().where_eq("c", 3));
        let q = compile_tree(&tree);
        assert_eq!(q.text, "WHERE (n.a = $p0 OR n.b = $p1) AND (n.c = $p2)");
    }

    #[test]
    fn test_every_placeholder_is_bound() {
        let tree = ConditionTree::new()
            .where_in("id", vec![1, 2])
            .where_like("name", "a_c")
            .where_raw("n.x = ?", vec!["y"])
            .where_exists(
                ExistsQuery::correlated("Tag", "id", "owner_id")
                    .filter(ConditionTree::new().where_between("w", 1, 2)),
            );
        let q = compile_tree(&tree);
        assert!(q.unbound_placeholders().is_empty());
        assert_eq!(q.placeholders().len(), q.params.len());
    }
}
