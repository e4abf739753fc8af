//! Per-connection settings as read from the `connections` YAML section

use serde::{Deserialize, Serialize};

/// Host/port override for read or write routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub enabled: bool,
    pub min_connections: usize,
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_connections: 1,
            max_connections: 10,
        }
    }
}

impl PoolConfig {
    /// Upper bound on live sessions; a disabled pool keeps a single one
    pub fn effective_max(&self) -> usize {
        if self.enabled {
            self.max_connections.max(1)
        } else {
            1
        }
    }

    /// Sessions opened eagerly when the connection is not lazy
    pub fn effective_min(&self) -> usize {
        if self.enabled {
            self.min_connections.min(self.effective_max())
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            delay_ms: 100,
        }
    }
}

fn default_port() -> u16 {
    7687
}

/// One named graph connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Key of this entry under `connections`
    #[serde(skip)]
    pub name: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub read: Option<Endpoint>,
    pub write: Option<Endpoint>,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    /// Defer connecting until the first query
    pub lazy: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "neo4j".into(),
            scheme: "bolt".into(),
            host: "localhost".into(),
            port: default_port(),
            username: "neo4j".into(),
            password: String::new(),
            database: None,
            read: None,
            write: None,
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            lazy: false,
        }
    }
}

impl ConnectionConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn format_uri(&self, host: &str, port: u16) -> String {
        format!("{}://{}:{}", self.scheme, host, port)
    }

    /// URI for writes (the `write` endpoint when configured)
    pub fn uri(&self) -> String {
        match &self.write {
            Some(endpoint) => self.format_uri(&endpoint.host, endpoint.port),
            None => self.format_uri(&self.host, self.port),
        }
    }

    /// URI of a dedicated read endpoint, if any
    pub fn read_uri(&self) -> Option<String> {
        self.read
            .as_ref()
            .map(|endpoint| self.format_uri(&endpoint.host, endpoint.port))
    }

    /// Copy safe to print or log
    pub fn redacted(&self) -> Self {
        Self {
            password: if self.password.is_empty() {
                String::new()
            } else {
                "********".into()
            },
            ..self.clone()
        }
    }
}
