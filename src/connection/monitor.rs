//! Connection health: staleness detection, liveness probe and reconnect
//!
//! Each monitor owns its own configuration snapshot. Changing it through
//! [`ConnectionMonitor::set_config`] only affects this instance, and only
//! from its next reconnect.

use super::config::ConnectionConfig;
use super::pool::{ConnectionPool, PooledSession};
use super::session::{AccessMode, Connector};
use crate::error::{GraphError, Result};
use crate::query::{CompiledQuery, Row};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const PING_QUERY: &str = "RETURN 1 AS ping";

/// Observable health snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub is_stale: bool,
    pub connected: bool,
    pub reconnect_count: u64,
    pub config: ConnectionConfig,
}

pub struct ConnectionMonitor {
    connector: Arc<dyn Connector>,
    config: RwLock<ConnectionConfig>,
    pool: tokio::sync::RwLock<Option<ConnectionPool>>,
    stale: AtomicBool,
    reconnects: AtomicU64,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("connection", &self.get_config().name)
            .field("stale", &self.stale.load(Ordering::Acquire))
            .field("reconnects", &self.reconnects.load(Ordering::Acquire))
            .finish()
    }
}

impl ConnectionMonitor {
    /// Open the connection (deferred until first use when `lazy`).
    pub async fn connect(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Result<Self> {
        let pool = if config.lazy {
            None
        } else {
            Some(ConnectionPool::open(connector.clone(), config.clone()).await?)
        };
        Ok(Self {
            connector,
            config: RwLock::new(config),
            pool: tokio::sync::RwLock::new(pool),
            stale: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
        })
    }

    /// Current pool, opening it on first use.
    async fn pool(&self) -> Result<ConnectionPool> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }
        let mut slot = self.pool.write().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let pool = ConnectionPool::open(self.connector.clone(), self.get_config()).await?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Check out a session for a transaction or a single statement.
    pub async fn acquire(&self) -> Result<PooledSession> {
        let pool = self.pool().await.map_err(|e| self.observe(e))?;
        pool.acquire().await.map_err(|e| self.observe(e))
    }

    /// Run one auto-committed statement.
    pub async fn execute(&self, query: &CompiledQuery, mode: AccessMode) -> Result<Vec<Row>> {
        let session = self.acquire().await?;
        session.execute(query, mode).await.map_err(|e| self.observe(e))
    }

    /// Record staleness carried by `error` and hand it back.
    pub fn observe(&self, error: GraphError) -> GraphError {
        if self.should_reconnect(&error) && !self.stale.swap(true, Ordering::AcqRel) {
            warn!(
                connection = %self.get_config().name,
                error = %error,
                "Connection marked stale"
            );
        }
        error
    }

    /// Whether `error` means the session has to be recreated.
    pub fn should_reconnect(&self, error: &GraphError) -> bool {
        error.is_stale()
    }

    /// Liveness probe. Never fails: a broken connection reports `false`
    /// and is marked stale.
    pub async fn ping(&self) -> bool {
        let probe = CompiledQuery::new(PING_QUERY).returning(["ping"]);
        let outcome = match self.pool().await {
            Ok(pool) => match pool.acquire().await {
                Ok(session) => session.execute(&probe, AccessMode::Read).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        match outcome {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Ping failed");
                self.stale.store(true, Ordering::Release);
                false
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some() && !self.is_stale()
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Reconnect only when stale. Returns whether a reconnect happened.
    pub async fn reconnect_if_stale(&self) -> Result<bool> {
        if !self.is_stale() {
            return Ok(false);
        }
        self.reconnect().await?;
        Ok(true)
    }

    /// Close the current pool and open a new one from the stored snapshot.
    pub async fn reconnect(&self) -> Result<()> {
        let config = self.get_config();
        let mut slot = self.pool.write().await;
        if let Some(old) = slot.take() {
            old.close().await;
        }
        let pool = ConnectionPool::open(self.connector.clone(), config.clone()).await?;
        *slot = Some(pool);
        self.stale.store(false, Ordering::Release);
        let count = self.reconnects.fetch_add(1, Ordering::AcqRel) + 1;
        info!(connection = %config.name, reconnects = count, "Reconnected to graph database");
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    pub fn get_config(&self) -> ConnectionConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace this instance's snapshot; used from the next reconnect on.
    pub fn set_config(&self, config: ConnectionConfig) {
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
    }

    /// Testing hook: flag the connection stale without touching the session
    pub fn force_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub async fn internal_state(&self) -> ConnectionState {
        ConnectionState {
            is_stale: self.is_stale(),
            connected: self.pool.read().await.is_some(),
            reconnect_count: self.reconnects.load(Ordering::Acquire),
            config: self.get_config().redacted(),
        }
    }
}
