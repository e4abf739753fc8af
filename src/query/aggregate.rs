//! Aggregate translation
//!
//! Maps aggregate requests onto Cypher's native functions and normalizes the
//! empty-set result: count/sum/avg/min/max/stdev/stdevp report `0`,
//! percentiles report `null`, collect reports `[]`. The same semantics are
//! available client-side through [`Aggregate::evaluate`].

use super::builder::{QueryBuilder, AGGREGATE_COLUMN};
use super::compiler::{window_clause, CypherCompiler};
use super::value::{escape_identifier, property_ref, CompiledQuery, Row};
use crate::error::{GraphError, Result};
use serde_json::{json, Number, Value};
use std::cmp::Ordering;

/// Column name meaning "every matched node" (`count(n)`)
pub const ALL_COLUMNS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// Sample standard deviation
    StDev,
    /// Population standard deviation
    StDevP,
    /// Nearest-rank percentile; fraction in `[0, 1]`
    PercentileDisc(f64),
    /// Linearly interpolated percentile; fraction in `[0, 1]`
    PercentileCont(f64),
    Collect,
}

impl Aggregate {
    pub fn function_name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::StDev => "stDev",
            Aggregate::StDevP => "stDevP",
            Aggregate::PercentileDisc(_) => "percentileDisc",
            Aggregate::PercentileCont(_) => "percentileCont",
            Aggregate::Collect => "collect",
        }
    }

    fn fraction(&self) -> Option<f64> {
        match self {
            Aggregate::PercentileDisc(p) | Aggregate::PercentileCont(p) => Some(*p),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.fraction() {
            Some(p) if !(0.0..=1.0).contains(&p) => Err(GraphError::Compile(format!(
                "{} fraction must be within [0, 1], got {p}",
                self.function_name()
            ))),
            _ => Ok(()),
        }
    }

    /// Compile `fn(column)` over the builder's filters.
    ///
    /// Ordering is kept only for `collect`, where it defines the list order;
    /// the window (skip/limit) restricts the aggregated set.
    pub fn compile(&self, builder: &QueryBuilder, column: &str) -> Result<CompiledQuery> {
        self.validate()?;
        let alias = &builder.alias;
        let mut compiler = CypherCompiler::new();

        let mut parts = vec![format!(
            "MATCH ({}:{})",
            alias,
            escape_identifier(&builder.label)
        )];
        let filter = compiler.where_clause(&builder.conditions, alias)?;
        if !filter.is_empty() {
            parts.push(filter);
        }

        let keep_order = matches!(self, Aggregate::Collect) && !builder.orders.is_empty();
        let window = window_clause(builder.limit, builder.offset);
        if keep_order || !window.is_empty() {
            parts.push(format!("WITH {alias}"));
            if keep_order {
                parts.push(compiler.order_clause(&builder.orders, alias));
            }
            parts.extend(window);
        }

        let target = if column == ALL_COLUMNS {
            alias.clone()
        } else {
            property_ref(alias, column)
        };
        let call = match self.fraction() {
            Some(p) => {
                let placeholder = compiler.bind(json!(p));
                format!("{}({target}, {placeholder})", self.function_name())
            }
            None => format!("{}({target})", self.function_name()),
        };
        parts.push(format!("RETURN {call} AS {AGGREGATE_COLUMN}"));

        Ok(
            CompiledQuery::with_params(parts.join(" "), compiler.into_params())
                .returning([AGGREGATE_COLUMN]),
        )
    }

    /// Apply the empty-set policy to an engine result.
    pub fn finalize(&self, raw: Option<Value>) -> Value {
        match raw {
            Some(v) if !v.is_null() => v,
            _ => self.empty_value(),
        }
    }

    /// Result reported for an empty input set
    pub fn empty_value(&self) -> Value {
        match self {
            Aggregate::PercentileDisc(_) | Aggregate::PercentileCont(_) => Value::Null,
            Aggregate::Collect => Value::Array(Vec::new()),
            _ => json!(0),
        }
    }

    /// Evaluate over already fetched rows, skipping nulls like the engine does.
    pub fn evaluate_rows(&self, rows: &[Row], column: &str) -> Result<Value> {
        if column == ALL_COLUMNS {
            return match self {
                Aggregate::Count => Ok(json!(rows.len())),
                other => Err(GraphError::Compile(format!(
                    "{} requires a column",
                    other.function_name()
                ))),
            };
        }
        let values: Vec<Value> = rows
            .iter()
            .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
            .collect();
        self.evaluate(&values)
    }

    /// Evaluate over raw values.
    pub fn evaluate(&self, values: &[Value]) -> Result<Value> {
        self.validate()?;
        let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();

        if let Aggregate::Count = self {
            return Ok(json!(present.len()));
        }
        if let Aggregate::Collect = self {
            return Ok(Value::Array(present.into_iter().cloned().collect()));
        }
        if present.is_empty() {
            return Ok(self.empty_value());
        }

        match self {
            Aggregate::Min | Aggregate::Max => {
                let mut sorted = present.clone();
                sorted.sort_by(|a, b| compare_values(a, b));
                let picked = if *self == Aggregate::Min {
                    sorted.first()
                } else {
                    sorted.last()
                };
                Ok(picked.map(|v| (*v).clone()).unwrap_or_else(|| self.empty_value()))
            }
            _ => {
                let numbers = numeric(&present, self)?;
                Ok(self.evaluate_numeric(&present, &numbers))
            }
        }
    }

    fn evaluate_numeric(&self, present: &[&Value], numbers: &[f64]) -> Value {
        let n = numbers.len() as f64;
        match self {
            Aggregate::Sum => {
                // integer sum while every value is an i64 and nothing overflows
                let exact = present
                    .iter()
                    .try_fold(0i64, |acc, v| v.as_i64().and_then(|x| acc.checked_add(x)));
                match exact {
                    Some(total) => json!(total),
                    None => float(numbers.iter().sum()),
                }
            }
            Aggregate::Avg => float(numbers.iter().sum::<f64>() / n),
            Aggregate::StDev => {
                if numbers.len() < 2 {
                    return float(0.0);
                }
                float((sum_squared_deviation(numbers) / (n - 1.0)).sqrt())
            }
            Aggregate::StDevP => float((sum_squared_deviation(numbers) / n).sqrt()),
            Aggregate::PercentileDisc(p) => {
                let mut ordered: Vec<(f64, &Value)> =
                    numbers.iter().copied().zip(present.iter().copied()).collect();
                ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
                let rank = (p * n).ceil() as usize;
                let index = rank.saturating_sub(1).min(ordered.len() - 1);
                ordered[index].1.clone()
            }
            Aggregate::PercentileCont(p) => {
                let mut sorted = numbers.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                let position = p * (sorted.len() - 1) as f64;
                let lower = position.floor() as usize;
                let upper = position.ceil() as usize;
                let fraction = position - lower as f64;
                float(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
            }
            Aggregate::Count | Aggregate::Collect | Aggregate::Min | Aggregate::Max => {
                self.empty_value()
            }
        }
    }
}

fn sum_squared_deviation(numbers: &[f64]) -> f64 {
    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
    numbers.iter().map(|x| (x - mean).powi(2)).sum()
}

fn numeric(values: &[&Value], aggregate: &Aggregate) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                GraphError::Compile(format!(
                    "{} expects numeric values, got {v}",
                    aggregate.function_name()
                ))
            })
        })
        .collect()
}

fn float(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

/// Numbers compare numerically, everything else by its JSON text.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ages() -> Vec<Value> {
        vec![json!(20), json!(30), json!(40), json!(50), json!(60)]
    }

    #[test]
    fn test_example_scenario() {
        let ages = ages();
        assert_eq!(
            Aggregate::PercentileDisc(0.95).evaluate(&ages).unwrap(),
            json!(60)
        );
        assert_eq!(
            Aggregate::PercentileCont(0.5).evaluate(&ages).unwrap(),
            json!(40.0)
        );
        let stdev = Aggregate::StDev.evaluate(&ages).unwrap().as_f64().unwrap();
        assert!((stdev - 15.81).abs() < 0.01);
    }

    #[test]
    fn test_percentile_boundaries_are_min_and_max() {
        let values = vec![json!(7), json!(3), json!(11), json!(5)];
        for p in [0.0, 1.0] {
            let disc = Aggregate::PercentileDisc(p).evaluate(&values).unwrap();
            let cont = Aggregate::PercentileCont(p).evaluate(&values).unwrap();
            let expected = if p == 0.0 { 3.0 } else { 11.0 };
            assert_eq!(disc.as_f64().unwrap(), expected);
            assert_eq!(cont.as_f64().unwrap(), expected);
        }
    }

    #[test]
    fn test_empty_set_policy() {
        for agg in [
            Aggregate::Count,
            Aggregate::Sum,
            Aggregate::Avg,
            Aggregate::Min,
            Aggregate::Max,
            Aggregate::StDev,
            Aggregate::StDevP,
        ] {
            assert_eq!(agg.evaluate(&[]).unwrap(), json!(0), "{agg:?}");
            assert_eq!(agg.finalize(Some(Value::Null)), json!(0), "{agg:?}");
        }
        for agg in [Aggregate::PercentileDisc(0.5), Aggregate::PercentileCont(0.5)] {
            assert_eq!(agg.evaluate(&[]).unwrap(), Value::Null);
            assert_eq!(agg.finalize(None), Value::Null);
        }
        assert_eq!(Aggregate::Collect.evaluate(&[]).unwrap(), json!([]));
    }

    #[test]
    fn test_single_element_stdev_is_zero() {
        assert_eq!(
            Aggregate::StDev.evaluate(&[json!(42)]).unwrap().as_f64(),
            Some(0.0)
        );
        assert_eq!(
            Aggregate::StDevP.evaluate(&[json!(42)]).unwrap().as_f64(),
            Some(0.0)
        );
    }

    #[test]
    fn test_nulls_are_ignored() {
        let values = vec![json!(1), Value::Null, json!(3)];
        assert_eq!(Aggregate::Count.evaluate(&values).unwrap(), json!(2));
        assert_eq!(Aggregate::Sum.evaluate(&values).unwrap(), json!(4));
        assert_eq!(Aggregate::Avg.evaluate(&values).unwrap(), json!(2.0));
        assert_eq!(Aggregate::Collect.evaluate(&values).unwrap(), json!([1, 3]));
    }

    #[test]
    fn test_integer_sum_overflow_falls_back_to_float() {
        let values = vec![json!(i64::MAX), json!(i64::MAX)];
        let total = Aggregate::Sum.evaluate(&values).unwrap();
        assert!(total.is_f64());
        assert_eq!(total.as_f64(), Some(i64::MAX as f64 * 2.0));
        assert_eq!(
            Aggregate::Sum.evaluate(&[json!(i64::MAX), json!(-1)]).unwrap(),
            json!(i64::MAX - 1)
        );
    }

    #[test]
    fn test_min_max_on_strings() {
        let values = vec![json!("pear"), json!("apple"), json!("fig")];
        assert_eq!(Aggregate::Min.evaluate(&values).unwrap(), json!("apple"));
        assert_eq!(Aggregate::Max.evaluate(&values).unwrap(), json!("pear"));
    }

    #[test]
    fn test_fraction_out_of_range() {
        assert!(Aggregate::PercentileDisc(1.5).validate().is_err());
        assert!(Aggregate::PercentileCont(-0.1)
            .compile(&QueryBuilder::new("User"), "age")
            .is_err());
    }

    #[test]
    fn test_compile_percentile_binds_fraction() {
        let builder = QueryBuilder::new("User").where_("age", ">", 18);
        let q = Aggregate::PercentileDisc(0.95).compile(&builder, "age").unwrap();
        assert_eq!(
            q.text,
            "MATCH (n:User) WHERE n.age > $p0 RETURN percentileDisc(n.age, $p1) AS aggregate"
        );
        assert_eq!(q.params["p1"], json!(0.95));
    }

    #[test]
    fn test_compile_collect_keeps_order() {
        let builder = QueryBuilder::new("User").oldest("name");
        let q = Aggregate::Collect.compile(&builder, "email").unwrap();
        assert_eq!(
            q.text,
            "MATCH (n:User) WITH n ORDER BY n.name ASC RETURN collect(n.email) AS aggregate"
        );
        let q = Aggregate::Sum.compile(&builder, "score").unwrap();
        assert_eq!(q.text, "MATCH (n:User) RETURN sum(n.score) AS aggregate");
    }

    #[test]
    fn test_count_star_over_rows() {
        let mut row = Row::new();
        row.insert("age".into(), Value::Null);
        let rows = vec![row.clone(), row];
        assert_eq!(
            Aggregate::Count.evaluate_rows(&rows, ALL_COLUMNS).unwrap(),
            json!(2)
        );
        assert_eq!(Aggregate::Count.evaluate_rows(&rows, "age").unwrap(), json!(0));
        let q = Aggregate::Count.compile(&QueryBuilder::new("User"), ALL_COLUMNS).unwrap();
        assert_eq!(q.text, "MATCH (n:User) RETURN count(n) AS aggregate");
    }
}
