//! In-memory connector for unit tests
//!
//! Every session opened by one [`MockConnector`] shares a single state:
//! auto-commit writes land in `committed` immediately, transactional writes
//! are buffered and only land on commit. Failures are scripted through a queue
//! consumed by the next executed statement.

use super::config::ConnectionConfig;
use super::session::{AccessMode, Connector, GraphSession, GraphTransaction};
use crate::error::{GraphError, Result};
use crate::query::{CompiledQuery, Row};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Responder = Arc<dyn Fn(&CompiledQuery) -> Vec<Row> + Send + Sync>;

#[derive(Default)]
struct MockState {
    connects: usize,
    connect_failures: VecDeque<GraphError>,
    failures: VecDeque<GraphError>,
    commit_failures: VecDeque<GraphError>,
    executed: Vec<CompiledQuery>,
    committed: Vec<CompiledQuery>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
    closed_sessions: usize,
    responder: Option<Responder>,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Answer every statement through `responder`
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&CompiledQuery) -> Vec<Row> + Send + Sync + 'static,
    {
        self.state().responder = Some(Arc::new(responder));
    }

    /// Fail the next executed statement with `error`
    pub fn fail_next(&self, error: GraphError) {
        self.state().failures.push_back(error);
    }

    pub fn fail_next_commit(&self, error: GraphError) {
        self.state().commit_failures.push_back(error);
    }

    pub fn fail_next_connect(&self, error: GraphError) {
        self.state().connect_failures.push_back(error);
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn executed(&self) -> Vec<CompiledQuery> {
        self.state().executed.clone()
    }

    pub fn committed(&self) -> Vec<CompiledQuery> {
        self.state().committed.clone()
    }

    pub fn begins(&self) -> usize {
        self.state().begins
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    pub fn closed_sessions(&self) -> usize {
        self.state().closed_sessions
    }

    fn run(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        let responder = {
            let mut state = self.state();
            state.executed.push(query.clone());
            if let Some(error) = state.failures.pop_front() {
                return Err(error);
            }
            state.responder.clone()
        };
        Ok(responder.map(|respond| respond(query)).unwrap_or_default())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn GraphSession>> {
        let mut state = self.state();
        if let Some(error) = state.connect_failures.pop_front() {
            return Err(error);
        }
        if config.password == "wrong" {
            return Err(GraphError::Authentication(format!(
                "the client is unauthorized due to authentication failure for `{}`",
                config.username
            )));
        }
        state.connects += 1;
        Ok(Arc::new(MockSession {
            connector: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockSession {
    connector: MockConnector,
    closed: AtomicBool,
}

impl MockSession {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(GraphError::Stale("socket closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GraphSession for MockSession {
    async fn execute(&self, query: &CompiledQuery, mode: AccessMode) -> Result<Vec<Row>> {
        self.check_open()?;
        let rows = self.connector.run(query)?;
        if mode == AccessMode::Write {
            self.connector.state().committed.push(query.clone());
        }
        Ok(rows)
    }

    async fn begin(&self, _mode: AccessMode) -> Result<Box<dyn GraphTransaction>> {
        self.check_open()?;
        self.connector.state().begins += 1;
        Ok(Box::new(MockTransaction {
            connector: self.connector.clone(),
            buffered: Vec::new(),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.connector.state().closed_sessions += 1;
        }
    }
}

pub struct MockTransaction {
    connector: MockConnector,
    buffered: Vec<CompiledQuery>,
}

#[async_trait]
impl GraphTransaction for MockTransaction {
    async fn execute(&mut self, query: &CompiledQuery) -> Result<Vec<Row>> {
        let rows = self.connector.run(query)?;
        self.buffered.push(query.clone());
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.connector.state();
        if let Some(error) = state.commit_failures.pop_front() {
            state.rollbacks += 1;
            return Err(error);
        }
        state.commits += 1;
        state.committed.extend(this.buffered);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.connector.state().rollbacks += 1;
        Ok(())
    }
}
