//! Connections: configuration, driver seams, pooling, health and the facade

pub mod config;
pub mod graph;
pub mod monitor;
pub mod neo4j;
pub mod pool;
pub mod session;

#[cfg(test)]
pub mod mock;

pub use config::{ConnectionConfig, Endpoint, PoolConfig, RetryConfig};
pub use graph::GraphConnection;
pub use monitor::{ConnectionMonitor, ConnectionState};
pub use neo4j::Neo4jConnector;
pub use pool::{ConnectionPool, PooledSession};
pub use session::{AccessMode, Connector, GraphSession, GraphTransaction, QueryExecutor};
