//! neo4rs-backed sessions and transactions
//!
//! Each session wraps a `neo4rs::Graph` holding a single Bolt connection to
//! the write endpoint, plus one to the read endpoint when configured. The
//! surrounding [`super::pool::ConnectionPool`] bounds how many exist.

use super::config::ConnectionConfig;
use super::session::{AccessMode, Connector, GraphSession, GraphTransaction};
use crate::error::{GraphError, Result};
use crate::query::{CompiledQuery, Row};
use async_trait::async_trait;
use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Txn};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

fn engine_error(error: neo4rs::Error) -> GraphError {
    GraphError::from_engine(error.to_string())
}

/// Convert a JSON parameter into its Bolt representation
pub fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.clone()),
        Value::Array(items) => {
            let mut list = BoltList::with_capacity(items.len());
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Object(map) => {
            let mut bolt = BoltMap::with_capacity(map.len());
            for (key, item) in map {
                bolt.put(BoltString::from(key.as_str()), to_bolt(item));
            }
            BoltType::Map(bolt)
        }
    }
}

fn to_query(compiled: &CompiledQuery) -> Query {
    compiled
        .params
        .iter()
        .fold(query(&compiled.text), |q, (name, value)| {
            q.param(name, to_bolt(value))
        })
}

/// Decode one driver row into the declared columns, or the whole row when
/// no columns were declared.
fn decode_row(compiled: &CompiledQuery, row: &neo4rs::Row) -> Result<Row> {
    if compiled.columns.is_empty() {
        return row
            .to::<Row>()
            .map_err(|e| GraphError::Decode(e.to_string()));
    }
    let mut decoded = Row::new();
    for column in &compiled.columns {
        let value = row
            .get::<Value>(column)
            .map_err(|e| GraphError::Decode(format!("column `{column}`: {e}")))?;
        decoded.insert(column.clone(), value);
    }
    Ok(decoded)
}

async fn open_graph(uri: &str, config: &ConnectionConfig) -> Result<Graph> {
    let mut builder = ConfigBuilder::default()
        .uri(uri)
        .user(config.username.as_str())
        .password(config.password.as_str())
        .max_connections(1);
    if let Some(database) = &config.database {
        builder = builder.db(database.as_str());
    }
    let driver_config = builder
        .build()
        .map_err(|e| GraphError::Config(e.to_string()))?;
    let graph = Graph::connect(driver_config).await.map_err(engine_error)?;
    // Credentials are only checked once a statement runs.
    graph.run(query("RETURN 1")).await.map_err(engine_error)?;
    Ok(graph)
}

/// Opens [`Neo4jSession`]s over Bolt
#[derive(Debug, Clone, Default)]
pub struct Neo4jConnector;

#[async_trait]
impl Connector for Neo4jConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn GraphSession>> {
        let write = open_graph(&config.uri(), config).await?;
        let read = match config.read_uri() {
            Some(uri) => Some(open_graph(&uri, config).await?),
            None => None,
        };
        debug!(
            connection = %config.name,
            uri = %config.uri(),
            read_replica = read.is_some(),
            "Connected to Neo4j"
        );
        Ok(Arc::new(Neo4jSession { write, read }))
    }
}

pub struct Neo4jSession {
    write: Graph,
    read: Option<Graph>,
}

impl Neo4jSession {
    fn graph(&self, mode: AccessMode) -> &Graph {
        match (mode, &self.read) {
            (AccessMode::Read, Some(read)) => read,
            _ => &self.write,
        }
    }
}

#[async_trait]
impl GraphSession for Neo4jSession {
    async fn execute(&self, compiled: &CompiledQuery, mode: AccessMode) -> Result<Vec<Row>> {
        let mut stream = self
            .graph(mode)
            .execute(to_query(compiled))
            .await
            .map_err(engine_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(engine_error)? {
            rows.push(decode_row(compiled, &row)?);
        }
        Ok(rows)
    }

    async fn begin(&self, mode: AccessMode) -> Result<Box<dyn GraphTransaction>> {
        let txn = self.graph(mode).start_txn().await.map_err(engine_error)?;
        Ok(Box::new(Neo4jTransaction { txn }))
    }

    async fn close(&self) {
        // Bolt connections close when the last `Graph` handle drops.
        debug!("Released Neo4j session");
    }
}

pub struct Neo4jTransaction {
    txn: Txn,
}

#[async_trait]
impl GraphTransaction for Neo4jTransaction {
    async fn execute(&mut self, compiled: &CompiledQuery) -> Result<Vec<Row>> {
        let mut stream = self
            .txn
            .execute(to_query(compiled))
            .await
            .map_err(engine_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await.map_err(engine_error)? {
            rows.push(decode_row(compiled, &row)?);
        }
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await.map_err(engine_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback().await.map_err(engine_error)
    }
}
