//! Bounded pool of graph sessions
//!
//! Sessions are checked out through a semaphore sized to `max_connections`.
//! Idle sessions are reused; new ones are opened on demand up to the bound.

use super::config::ConnectionConfig;
use super::session::{Connector, GraphSession};
use crate::error::{GraphError, Result};
use futures::future::try_join_all;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

struct PoolInner {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    idle: Mutex<Vec<Arc<dyn GraphSession>>>,
    semaphore: Arc<Semaphore>,
    max_size: usize,
    opened: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn GraphSession>>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return a session to the idle list, or close it once the pool is closed.
    fn put_back(&self, session: Arc<dyn GraphSession>) {
        {
            let mut idle = self.idle();
            if !self.closed.load(Ordering::Acquire) {
                idle.push(session);
                return;
            }
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { session.close().await });
            }
            Err(_) => warn!(
                connection = %self.config.name,
                "Session returned after close with no runtime to close it on"
            ),
        }
    }

    async fn open_session(&self) -> Result<Arc<dyn GraphSession>> {
        let session = self.connector.connect(&self.config).await?;
        let opened = self.opened.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(connection = %self.config.name, opened, "Opened graph session");
        Ok(session)
    }
}

/// Cloneable handle to a shared pool
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connection", &self.inner.config.name)
            .field("max_size", &self.inner.max_size)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl ConnectionPool {
    /// Create the pool, opening `min_connections` sessions unless the config is lazy.
    pub async fn open(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Result<Self> {
        let max_size = config.pool.effective_max();
        let warm = if config.lazy {
            0
        } else {
            config.pool.effective_min()
        };
        let pool = Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                idle: Mutex::new(Vec::with_capacity(max_size)),
                semaphore: Arc::new(Semaphore::new(max_size)),
                max_size,
                opened: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        };

        let sessions = try_join_all((0..warm).map(|_| pool.inner.open_session())).await?;
        for session in sessions {
            pool.inner.put_back(session);
        }
        info!(
            connection = %pool.inner.config.name,
            uri = %pool.inner.config.uri(),
            warm,
            max_size,
            "Connection pool ready"
        );
        Ok(pool)
    }

    /// Check out a session, waiting for a free slot when the pool is at capacity.
    pub async fn acquire(&self) -> Result<PooledSession> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GraphError::Stale("pool is closed".into()))?;

        let reused = { self.inner.idle().pop() };
        let session = match reused {
            Some(session) => session,
            None => self.inner.open_session().await?,
        };

        Ok(PooledSession {
            session,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Sessions opened over the pool's lifetime
    pub fn opened_count(&self) -> usize {
        self.inner.opened.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close idle sessions and refuse further checkouts.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();
        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        for session in drained {
            session.close().await;
        }
        debug!(connection = %self.inner.config.name, "Connection pool closed");
    }
}

/// A session checked out from the pool, returned on drop.
pub struct PooledSession {
    session: Arc<dyn GraphSession>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledSession {
    type Target = dyn GraphSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.pool.put_back(self.session.clone());
    }
}
