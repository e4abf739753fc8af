//! Compiled query text, parameter maps and result rows

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Named parameters bound to a compiled query. Ordered for deterministic output.
pub type Params = BTreeMap<String, Value>;

/// A result row: column name → decoded value.
pub type Row = serde_json::Map<String, Value>;

/// Parameterized Cypher ready for execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub text: String,
    pub params: Params,
    /// Result columns the executor decodes from each record
    pub columns: Vec<String>,
}

impl CompiledQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
            columns: Vec::new(),
        }
    }

    pub fn with_params(text: impl Into<String>, params: Params) -> Self {
        Self {
            text: text.into(),
            params,
            columns: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Names of every `$placeholder` referenced by the text.
    pub fn placeholders(&self) -> Vec<String> {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let re = PLACEHOLDER
            .get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));
        let mut names: Vec<String> = re
            .captures_iter(&self.text)
            .map(|c| c[1].to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Placeholders that have no bound value.
    pub fn unbound_placeholders(&self) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !self.params.contains_key(name))
            .collect()
    }
}

/// Hashable representation of a key value (ids may be integers or strings).
pub fn key_repr(value: &Value) -> String {
    match value {
        Value::String(s) => format!("s:{s}"),
        other => format!("v:{other}"),
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a property, label or relationship-type name for safe use in Cypher.
///
/// Plain identifiers pass through; everything else is wrapped in backticks
/// with embedded backticks doubled.
pub fn escape_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Render `alias.property`, honouring an explicit `other.property` prefix.
pub fn property_ref(alias: &str, column: &str) -> String {
    match column.split_once('.') {
        Some((prefix, rest)) if is_plain_identifier(prefix) && !rest.is_empty() => {
            format!("{}.{}", prefix, escape_identifier(rest))
        }
        _ => format!("{}.{}", alias, escape_identifier(column)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("name"), "name");
        assert_eq!(escape_identifier("first name"), "`first name`");
        assert_eq!(escape_identifier("a`b"), "`a``b`");
        assert_eq!(escape_identifier("1abc"), "`1abc`");
    }

    #[test]
    fn test_property_ref() {
        assert_eq!(property_ref("n", "age"), "n.age");
        assert_eq!(property_ref("n", "pivot.role"), "pivot.role");
        assert_eq!(property_ref("n", "created at"), "n.`created at`");
    }

    #[test]
    fn test_unbound_placeholders() {
        let q = CompiledQuery::new("MATCH (n) WHERE n.a = $p0 AND n.b = $p1").param("p0", 1);
        assert_eq!(q.placeholders(), vec!["p0", "p1"]);
        assert_eq!(q.unbound_placeholders(), vec!["p1"]);
    }

    #[test]
    fn test_key_repr_distinguishes_types() {
        assert_ne!(key_repr(&json!(1)), key_repr(&json!("1")));
        assert_eq!(key_repr(&json!(42)), key_repr(&json!(42)));
    }
}
