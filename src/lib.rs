//! Graph Relational
//!
//! Relational-style data access over a property graph:
//! - Fluent query builder compiled to parameterized Cypher
//! - Declarative relationships stored as foreign keys, native edges or both
//! - Eager loading in one query per relation level
//! - Aggregates, cursor and offset pagination
//! - Managed transactions with retry, backoff and nesting
//! - Connection pooling, staleness detection and reconnect

pub mod connection;
pub mod eager;
pub mod error;
pub mod pagination;
pub mod query;
pub mod record;
pub mod relations;
pub mod transaction;

pub use connection::{AccessMode, ConnectionConfig, GraphConnection};
pub use error::{GraphError, Result};
pub use query::{Aggregate, CompiledQuery, ConditionTree, QueryBuilder, Row, SortDirection};
pub use record::{Record, Related};
pub use relations::{RelationDescriptor, RelationRegistry};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YamlConfig {
    /// Name of the connection used when none is requested
    pub default: String,
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl Default for YamlConfig {
    fn default() -> Self {
        let fallback = ConnectionConfig::default();
        Self {
            default: fallback.name.clone(),
            connections: BTreeMap::from([(fallback.name.clone(), fallback)]),
        }
    }
}

// ============================================================================
// Runtime config
// ============================================================================

/// Resolved set of named connections
#[derive(Debug, Clone)]
pub struct Config {
    pub default: String,
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override the
    /// default connection with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> anyhow::Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let mut connections = yaml.connections;
        for (name, connection) in connections.iter_mut() {
            connection.name = name.clone();
        }
        let default = connections
            .entry(yaml.default.clone())
            .or_insert_with(|| ConnectionConfig::named(yaml.default.clone()));

        if let Ok(host) = std::env::var("NEO4J_HOST") {
            default.host = host;
        }
        if let Some(port) = std::env::var("NEO4J_PORT").ok().and_then(|s| s.parse().ok()) {
            default.port = port;
        }
        if let Ok(username) = std::env::var("NEO4J_USERNAME") {
            default.username = username;
        }
        if let Ok(password) = std::env::var("NEO4J_PASSWORD") {
            default.password = password;
        }
        if let Ok(database) = std::env::var("NEO4J_DATABASE") {
            default.database = Some(database);
        }

        Ok(Self {
            default: yaml.default,
            connections,
        })
    }

    /// Named connection, or the default one when `name` is None
    pub fn connection(&self, name: Option<&str>) -> anyhow::Result<&ConnectionConfig> {
        let name = name.unwrap_or(&self.default);
        self.connections
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no connection named `{name}` is configured"))
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
