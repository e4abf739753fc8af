//! Managed and manual transactions over a [`ConnectionMonitor`]
//!
//! Units of work are scoped to their caller. Nested `write`/`read` calls made
//! from inside a unit, and nested `begin_transaction` calls from the task that
//! opened a manual transaction, reuse the outermost engine transaction; only
//! the outermost level commits or rolls back. Callers in other tasks get their
//! own transaction on the shared pool.

use super::retry::RetryPolicy;
use crate::connection::monitor::ConnectionMonitor;
use crate::connection::pool::PooledSession;
use crate::connection::session::{AccessMode, GraphTransaction, QueryExecutor};
use crate::error::{GraphError, Result};
use crate::query::{CompiledQuery, Row};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

tokio::task_local! {
    /// Id of the managed unit the current future runs inside
    static UNIT: Uuid;
}

/// Who a transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Owner {
    /// A managed unit of work and everything it awaits
    Unit(Uuid),
    /// Manual begin/commit from one task (None outside a spawned task)
    Task(Option<tokio::task::Id>),
}

impl Owner {
    fn current() -> Self {
        UNIT.try_with(|id| Owner::Unit(*id))
            .unwrap_or_else(|_| Owner::Task(tokio::task::try_id()))
    }
}

/// Snapshot of the active unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionContext {
    pub depth: usize,
    pub mode: AccessMode,
    pub attempt: u32,
    pub max_attempts: u32,
}

struct ActiveTransaction {
    id: Uuid,
    tx: Box<dyn GraphTransaction>,
    _session: PooledSession,
}

#[derive(Default)]
struct TxState {
    depth: usize,
    mode: AccessMode,
    attempt: u32,
    max_attempts: u32,
    rollback_only: bool,
    active: Option<ActiveTransaction>,
}

type UnitState = Arc<Mutex<TxState>>;

struct TxInner {
    monitor: Arc<ConnectionMonitor>,
    policy: RetryPolicy,
    units: Mutex<HashMap<Owner, UnitState>>,
}

#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TxInner>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

/// Handle passed to units of work; statements run inside the caller's transaction.
#[derive(Clone, Debug)]
pub struct Transaction {
    manager: TransactionManager,
    owner: Owner,
}

impl Transaction {
    pub async fn run(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        self.manager.run_in_active(self.owner, query).await
    }

    /// Manager owning this transaction, for nested units of work
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub async fn context(&self) -> Option<TransactionContext> {
        self.manager.context_of(self.owner).await
    }
}

#[async_trait]
impl QueryExecutor for Transaction {
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        self.run(query).await
    }
}

impl TransactionManager {
    pub fn new(monitor: Arc<ConnectionMonitor>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(TxInner {
                monitor,
                policy,
                units: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.inner.monitor
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    fn handle(&self, owner: Owner) -> Transaction {
        Transaction {
            manager: self.clone(),
            owner,
        }
    }

    async fn unit(&self, owner: Owner) -> Option<UnitState> {
        self.inner.units.lock().await.get(&owner).cloned()
    }

    /// Nesting depth of the calling context (0 outside a transaction)
    pub async fn depth(&self) -> usize {
        self.depth_of(Owner::current()).await
    }

    async fn depth_of(&self, owner: Owner) -> usize {
        let Some(unit) = self.unit(owner).await else {
            return 0;
        };
        let state = unit.lock().await;
        state.depth
    }

    pub async fn context(&self) -> Option<TransactionContext> {
        self.context_of(Owner::current()).await
    }

    async fn context_of(&self, owner: Owner) -> Option<TransactionContext> {
        let unit = self.unit(owner).await?;
        let state = unit.lock().await;
        (state.depth > 0).then(|| TransactionContext {
            depth: state.depth,
            mode: state.mode,
            attempt: state.attempt,
            max_attempts: state.max_attempts,
        })
    }

    /// Number of engine transactions currently open through this manager
    pub async fn open_transactions(&self) -> usize {
        self.inner.units.lock().await.len()
    }

    /// Run `work` in a write transaction, retrying transient failures.
    ///
    /// The callback may run several times; only the successful attempt commits.
    pub async fn write<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.managed(AccessMode::Write, work).await
    }

    /// Run `work` in a read transaction, retrying transient failures.
    pub async fn read<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.managed(AccessMode::Read, work).await
    }

    async fn managed<F, Fut, T>(&self, mode: AccessMode, mut work: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let caller = Owner::current();
        if self.depth_of(caller).await > 0 {
            return self.nested(caller, work).await;
        }

        let max_attempts = self.inner.policy.attempts();
        let mut attempt = 1;
        loop {
            match self.attempt(mode, attempt, max_attempts, &mut work).await {
                Ok(value) => return Ok(value),
                Err(err) => self.prepare_retry(err, attempt, max_attempts).await?,
            }
            attempt += 1;
        }
    }

    async fn attempt<F, Fut, T>(
        &self,
        mode: AccessMode,
        attempt: u32,
        max_attempts: u32,
        work: &mut F,
    ) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id = Uuid::new_v4();
        let owner = Owner::Unit(id);
        self.open(owner, id, mode, attempt, max_attempts).await?;
        match UNIT.scope(id, work(self.handle(owner))).await {
            Ok(value) => {
                self.finish_commit(owner).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.finish_rollback(owner).await {
                    warn!(error = %rollback_err, original = %err, "Rollback after failure failed");
                }
                Err(err)
            }
        }
    }

    async fn nested<F, Fut, T>(&self, owner: Owner, mut work: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let unit = self
            .unit(owner)
            .await
            .ok_or_else(|| GraphError::Transaction("no active transaction to nest in".into()))?;
        unit.lock().await.depth += 1;
        let result = work(self.handle(owner)).await;
        let mut state = unit.lock().await;
        state.depth = state.depth.saturating_sub(1);
        if result.is_err() {
            state.rollback_only = true;
        }
        result
    }

    /// Decide whether a failed attempt may run again; sleeps through the backoff.
    async fn prepare_retry(&self, err: GraphError, attempt: u32, max_attempts: u32) -> Result<()> {
        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "Giving up after retryable failures");
            return Err(err);
        }

        let delay = self.inner.policy.backoff(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying unit of work"
        );
        if self.inner.monitor.should_reconnect(&err) {
            if let Err(e) = self.inner.monitor.reconnect_if_stale().await {
                warn!(error = %e, "Reconnect before retry failed");
            }
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Begin an engine transaction for `owner`; an owner holds at most one.
    async fn open(
        &self,
        owner: Owner,
        id: Uuid,
        mode: AccessMode,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<()> {
        let monitor = &self.inner.monitor;
        let session = monitor.acquire().await?;
        let tx = session.begin(mode).await.map_err(|e| monitor.observe(e))?;

        let mut units = self.inner.units.lock().await;
        if units.contains_key(&owner) {
            drop(units);
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback of refused transaction failed");
            }
            return Err(GraphError::Transaction(
                "a transaction is already active for this caller".into(),
            ));
        }
        units.insert(
            owner,
            Arc::new(Mutex::new(TxState {
                depth: 1,
                mode,
                attempt,
                max_attempts,
                rollback_only: false,
                active: Some(ActiveTransaction {
                    id,
                    tx,
                    _session: session,
                }),
            })),
        );
        debug!(tx_id = %id, ?mode, attempt, "Transaction started");
        Ok(())
    }

    async fn take_active(&self, owner: Owner) -> (Option<ActiveTransaction>, bool) {
        let Some(unit) = self.inner.units.lock().await.remove(&owner) else {
            return (None, false);
        };
        let mut state = unit.lock().await;
        (state.active.take(), state.rollback_only)
    }

    async fn finish_commit(&self, owner: Owner) -> Result<()> {
        let (active, rollback_only) = self.take_active(owner).await;
        let active = active
            .ok_or_else(|| GraphError::Transaction("no active transaction to commit".into()))?;
        let id = active.id;

        if rollback_only {
            active.tx.rollback().await.map_err(|e| self.inner.monitor.observe(e))?;
            debug!(tx_id = %id, "Rollback-only transaction rolled back");
            return Err(GraphError::Transaction(
                "transaction was rolled back by a nested unit of work".into(),
            ));
        }

        active.tx.commit().await.map_err(|e| self.inner.monitor.observe(e))?;
        debug!(tx_id = %id, "Transaction committed");
        Ok(())
    }

    async fn finish_rollback(&self, owner: Owner) -> Result<()> {
        let (active, _) = self.take_active(owner).await;
        let active = active
            .ok_or_else(|| GraphError::Transaction("no active transaction to roll back".into()))?;
        let id = active.id;
        active.tx.rollback().await.map_err(|e| self.inner.monitor.observe(e))?;
        debug!(tx_id = %id, "Transaction rolled back");
        Ok(())
    }

    async fn run_in_active(&self, owner: Owner, query: &CompiledQuery) -> Result<Vec<Row>> {
        let unit = self
            .unit(owner)
            .await
            .ok_or_else(|| GraphError::Transaction("no active transaction".into()))?;
        let mut state = unit.lock().await;
        let active = state
            .active
            .as_mut()
            .ok_or_else(|| GraphError::Transaction("no active transaction".into()))?;
        active
            .tx
            .execute(query)
            .await
            .map_err(|e| self.inner.monitor.observe(e))
    }

    /// Open a transaction for the calling task, or deepen the current one.
    pub async fn begin_transaction(&self, mode: AccessMode) -> Result<()> {
        let caller = Owner::current();
        if let Some(unit) = self.unit(caller).await {
            let mut state = unit.lock().await;
            if state.depth > 0 {
                state.depth += 1;
                return Ok(());
            }
        }
        self.open(caller, Uuid::new_v4(), mode, 1, 1).await
    }

    /// Commit at the outermost level; inner levels only unwind the depth.
    pub async fn commit(&self) -> Result<()> {
        let caller = Owner::current();
        let unit = self.unit(caller).await.ok_or_else(|| {
            GraphError::Transaction("commit called without an active transaction".into())
        })?;
        {
            let mut state = unit.lock().await;
            if state.depth > 1 {
                state.depth -= 1;
                return Ok(());
            }
        }
        self.finish_commit(caller).await
    }

    /// Roll back at the outermost level; inner levels mark the unit rollback-only.
    pub async fn rollback(&self) -> Result<()> {
        let caller = Owner::current();
        let unit = self.unit(caller).await.ok_or_else(|| {
            GraphError::Transaction("rollback called without an active transaction".into())
        })?;
        {
            let mut state = unit.lock().await;
            if state.depth > 1 {
                state.depth -= 1;
                state.rollback_only = true;
                return Ok(());
            }
        }
        self.finish_rollback(caller).await
    }

    /// Run one statement: inside the caller's transaction when there is one,
    /// otherwise reads retry directly and writes run as a managed write.
    pub async fn run(&self, query: &CompiledQuery, mode: AccessMode) -> Result<Vec<Row>> {
        let caller = Owner::current();
        if self.depth_of(caller).await > 0 {
            return self.run_in_active(caller, query).await;
        }
        match mode {
            AccessMode::Write => self.write(|tx| async move { tx.run(query).await }).await,
            AccessMode::Read => {
                let max_attempts = self.inner.policy.attempts();
                let mut attempt = 1;
                loop {
                    match self.inner.monitor.execute(query, AccessMode::Read).await {
                        Ok(rows) => return Ok(rows),
                        Err(err) => self.prepare_retry(err, attempt, max_attempts).await?,
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for TransactionManager {
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        self.run(query, AccessMode::Read).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::{ConnectionConfig, RetryConfig};
    use crate::connection::mock::MockConnector;
    use std::time::Duration;

    async fn manager(connector: &MockConnector, max_attempts: u32) -> TransactionManager {
        let monitor = ConnectionMonitor::connect(Arc::new(connector.clone()), ConnectionConfig::default())
            .await
            .unwrap();
        let policy = RetryPolicy::from(&RetryConfig {
            enabled: true,
            max_attempts,
            delay_ms: 1,
        });
        TransactionManager::new(Arc::new(monitor), policy)
    }

    fn create(name: &str) -> CompiledQuery {
        CompiledQuery::new("CREATE (n:User {name: $name})").param("name", name)
    }

    #[tokio::test]
    async fn test_write_commits_and_returns_value() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;
        let q = create("ada");
        let value = tm
            .write(|tx| {
                let q = &q;
                async move {
                    tx.run(q).await?;
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(connector.committed(), vec![q]);
        assert_eq!(connector.commits(), 1);
        assert_eq!(tm.depth().await, 0);
    }

    #[tokio::test]
    async fn test_fatal_failure_runs_once_and_commits_nothing() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;
        connector.fail_next(GraphError::from_engine("Invalid input 'CRATE'"));
        let q = create("ada");
        let mut calls = 0;
        let err = tm
            .write(|tx| {
                calls += 1;
                let q = &q;
                async move { tx.run(q).await.map(|_| ()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Query(_)));
        assert_eq!(calls, 1);
        assert!(connector.committed().is_empty());
        assert_eq!(connector.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_to_one_effect() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;
        connector.fail_next(GraphError::from_engine("Neo.TransientError.Transaction.DeadlockDetected"));
        connector.fail_next(GraphError::from_engine("Neo.TransientError.Transaction.DeadlockDetected"));
        let q = create("ada");
        let mut calls = 0;
        tm.write(|tx| {
            calls += 1;
            let q = &q;
            async move { tx.run(q).await.map(|_| ()) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(connector.committed(), vec![q]);
        assert_eq!(connector.rollbacks(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_raise_last_error() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 2).await;
        for _ in 0..2 {
            connector.fail_next(GraphError::Transient("leader switch".into()));
        }
        let q = create("ada");
        let mut calls = 0;
        let err = tm
            .write(|tx| {
                calls += 1;
                let q = &q;
                async move { tx.run(q).await.map(|_| ()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Transient(_)));
        assert_eq!(calls, 2);
        assert!(connector.committed().is_empty());
    }

    #[tokio::test]
    async fn test_stale_failure_reconnects_before_retry() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;
        connector.fail_next(GraphError::from_engine("Broken pipe"));
        let q = create("ada");
        tm.write(|tx| {
            let q = &q;
            async move { tx.run(q).await.map(|_| ()) }
        })
        .await
        .unwrap();
        assert_eq!(connector.connect_count(), 2);
        let state = tm.monitor().internal_state().await;
        assert_eq!(state.reconnect_count, 1);
        assert!(!state.is_stale);
    }

    #[tokio::test]
    async fn test_nested_write_reuses_outer_transaction() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;
        let outer = create("outer");
        let inner = create("inner");
        tm.write(|tx| {
            let (outer, inner) = (&outer, &inner);
            async move {
                tx.run(outer).await?;
                let depth = tx
                    .manager()
                    .write(|nested| async move {
                        nested.run(inner).await?;
                        Ok(nested.context().await.map(|c| c.depth))
                    })
                    .await?;
                assert_eq!(depth, Some(2));
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(connector.begins(), 1);
        assert_eq!(connector.commits(), 1);
        assert_eq!(connector.committed(), vec![outer, inner]);
    }

    #[tokio::test]
    async fn test_swallowed_nested_failure_rolls_back_outer() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;
        let q = create("ada");
        let err = tm
            .write(|tx| {
                let q = &q;
                async move {
                    tx.run(q).await?;
                    let nested: Result<()> = tx
                        .manager()
                        .write(|_| async { Err(GraphError::Query("boom".into())) })
                        .await;
                    assert!(nested.is_err());
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Transaction(_)));
        assert!(connector.committed().is_empty());
        assert_eq!(connector.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_manual_depth_rules() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;

        assert!(matches!(tm.commit().await, Err(GraphError::Transaction(_))));
        assert!(matches!(tm.rollback().await, Err(GraphError::Transaction(_))));

        tm.begin_transaction(AccessMode::Write).await.unwrap();
        tm.begin_transaction(AccessMode::Write).await.unwrap();
        assert_eq!(tm.depth().await, 2);
        tm.run(&create("ada"), AccessMode::Write).await.unwrap();
        tm.commit().await.unwrap();
        assert_eq!(connector.commits(), 0);
        tm.commit().await.unwrap();
        assert_eq!(connector.commits(), 1);
        assert_eq!(connector.committed().len(), 1);

        tm.begin_transaction(AccessMode::Write).await.unwrap();
        tm.begin_transaction(AccessMode::Write).await.unwrap();
        tm.rollback().await.unwrap();
        assert!(matches!(tm.commit().await, Err(GraphError::Transaction(_))));
        assert_eq!(tm.depth().await, 0);
        assert_eq!(connector.commits(), 1);
    }

    #[tokio::test]
    async fn test_read_outside_transaction_retries() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 3).await;
        connector.fail_next(GraphError::Transient("database unavailable".into()));
        let rows = tm
            .run(&CompiledQuery::new("MATCH (n) RETURN n"), AccessMode::Read)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(connector.executed().len(), 2);
        assert!(connector.committed().is_empty());
        assert!(tm.context().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_share_a_transaction() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 1).await;
        let (a, b) = (create("a"), create("b"));

        let failing = {
            let (tm, a) = (tm.clone(), a.clone());
            tokio::spawn(async move {
                tm.write(|tx| {
                    let a = a.clone();
                    async move {
                        tx.run(&a).await?;
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err::<(), _>(GraphError::Query("a failed".into()))
                    }
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let succeeding = {
            let (tm, b) = (tm.clone(), b.clone());
            tokio::spawn(async move {
                tm.write(|tx| {
                    let b = b.clone();
                    async move { tx.run(&b).await.map(|_| ()) }
                })
                .await
            })
        };

        let b_result = succeeding.await.unwrap();
        let a_result = failing.await.unwrap();
        assert!(matches!(a_result, Err(GraphError::Query(_))));
        assert!(b_result.is_ok());
        assert_eq!(connector.begins(), 2);
        assert_eq!(connector.commits(), 1);
        assert_eq!(connector.rollbacks(), 1);
        assert_eq!(connector.committed(), vec![b]);
        assert_eq!(tm.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_overlapping_successful_writers_commit_separately() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 1).await;
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|name| {
                let (tm, q) = (tm.clone(), create(name));
                tokio::spawn(async move {
                    tm.write(|tx| {
                        let q = q.clone();
                        async move {
                            tx.run(&q).await?;
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok(tx.context().await.map(|c| c.depth))
                        }
                    })
                    .await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(1));
        }
        assert_eq!(connector.begins(), 2);
        assert_eq!(connector.commits(), 2);
        assert_eq!(connector.committed().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_transaction_is_private_to_its_task() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 1).await;
        tm.begin_transaction(AccessMode::Write).await.unwrap();
        tm.run(&create("mine"), AccessMode::Write).await.unwrap();

        let other = {
            let tm = tm.clone();
            tokio::spawn(async move {
                assert_eq!(tm.depth().await, 0);
                tm.run(&create("theirs"), AccessMode::Write).await
            })
        };
        other.await.unwrap().unwrap();
        assert_eq!(connector.committed(), vec![create("theirs")]);
        assert_eq!(tm.depth().await, 1);

        tm.rollback().await.unwrap();
        assert_eq!(connector.committed(), vec![create("theirs")]);
        assert_eq!(connector.begins(), 2);
    }

    #[tokio::test]
    async fn test_context_reports_attempt() {
        let connector = MockConnector::new();
        let tm = manager(&connector, 4).await;
        connector.fail_next(GraphError::Transient("deadlock".into()));
        let q = create("ada");
        let context = tm
            .read(|tx| {
                let q = &q;
                async move {
                    tx.run(q).await?;
                    Ok(tx.context().await)
                }
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(context.attempt, 2);
        assert_eq!(context.max_attempts, 4);
        assert_eq!(context.mode, AccessMode::Read);
        assert_eq!(context.depth, 1);
    }
}
