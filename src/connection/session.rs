//! Driver-facing seams: sessions, transactions and connectors
//!
//! The production implementation lives in [`super::neo4j`]; tests plug in the
//! in-memory [`super::mock`] implementation.

use super::config::ConnectionConfig;
use crate::error::Result;
use crate::query::{CompiledQuery, Row};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// A live connection able to run auto-committed queries and open transactions.
#[async_trait]
pub trait GraphSession: Send + Sync {
    async fn execute(&self, query: &CompiledQuery, mode: AccessMode) -> Result<Vec<Row>>;

    async fn begin(&self, mode: AccessMode) -> Result<Box<dyn GraphTransaction>>;

    async fn close(&self);
}

/// An open engine transaction. Consumed by commit or rollback.
#[async_trait]
pub trait GraphTransaction: Send {
    async fn execute(&mut self, query: &CompiledQuery) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Opens sessions from a configuration snapshot.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn GraphSession>>;
}

/// Anything that can fetch rows for a compiled query.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>>;
}
