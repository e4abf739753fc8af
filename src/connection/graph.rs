//! The connection handed to the host ORM
//!
//! Statements, relation writes and eager loads all run through one
//! transaction manager. Anything issued inside a `write`/`read` callback, or
//! from the task that called `begin_transaction`, joins that open
//! transaction. Other tasks sharing the connection run in their own.

use super::config::ConnectionConfig;
use super::monitor::{ConnectionMonitor, ConnectionState};
use super::neo4j::Neo4jConnector;
use super::session::{AccessMode, Connector, QueryExecutor};
use crate::eager::{self, BatchMap};
use crate::error::{GraphError, Result};
use crate::pagination::{self, count_from_rows, Page};
use crate::query::{key_repr, Aggregate, CompiledQuery, QueryBuilder, Row, AGGREGATE_COLUMN};
use crate::record::Record;
use crate::relations::{writer, RelationDescriptor, RelationRegistry, SyncChanges, DEFAULT_KEY};
use crate::transaction::{RetryPolicy, Transaction, TransactionContext, TransactionManager};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

pub struct GraphConnection {
    monitor: Arc<ConnectionMonitor>,
    transactions: TransactionManager,
    relations: RelationRegistry,
}

impl std::fmt::Debug for GraphConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConnection")
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl GraphConnection {
    /// Connect to Neo4j over Bolt.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        Self::with_connector(Arc::new(Neo4jConnector), config).await
    }

    pub async fn with_connector(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Result<Self> {
        let policy = RetryPolicy::from(&config.retry);
        let name = config.name.clone();
        let monitor = Arc::new(ConnectionMonitor::connect(connector, config).await?);
        info!(connection = %name, "Graph connection ready");
        Ok(Self {
            transactions: TransactionManager::new(monitor.clone(), policy),
            monitor,
            relations: RelationRegistry::new(),
        })
    }

    pub fn with_relations(mut self, relations: RelationRegistry) -> Self {
        self.relations = relations;
        self
    }

    pub fn relations(&self) -> &RelationRegistry {
        &self.relations
    }

    pub fn relations_mut(&mut self) -> &mut RelationRegistry {
        &mut self.relations
    }

    pub fn relation(&self, label: &str, name: &str) -> Result<&RelationDescriptor> {
        self.relations.get(label, name)
    }

    pub fn query(&self, label: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(label)
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Run a compiled statement; joins the open transaction when there is one.
    pub async fn statement(&self, query: &CompiledQuery, mode: AccessMode) -> Result<Vec<Row>> {
        self.transactions.run(query, mode).await
    }

    pub async fn get(&self, builder: &QueryBuilder) -> Result<Vec<Row>> {
        self.statement(&builder.to_select()?, AccessMode::Read).await
    }

    /// Select rows as records; whole-node selects unwrap the property map.
    pub async fn records(&self, builder: &QueryBuilder) -> Result<Vec<Record>> {
        let rows = self.get(builder).await?;
        rows.into_iter()
            .map(|mut row| {
                if builder.columns.is_empty() {
                    Record::from_column(builder.label.clone(), &mut row, &builder.alias)
                } else {
                    Ok(Record::new(builder.label.clone(), row))
                }
            })
            .collect()
    }

    pub async fn first(&self, builder: &QueryBuilder) -> Result<Option<Record>> {
        let mut records = self.records(&builder.clone().limit(1)).await?;
        Ok(records.pop())
    }

    pub async fn find(&self, label: &str, id: impl Into<Value>) -> Result<Option<Record>> {
        self.first(&QueryBuilder::new(label).where_eq(DEFAULT_KEY, id)).await
    }

    pub async fn find_or_fail(&self, label: &str, id: impl Into<Value>) -> Result<Record> {
        let id = id.into();
        self.find(label, id.clone())
            .await?
            .ok_or_else(|| GraphError::not_found(label, vec![display_key(&id)]))
    }

    /// Every id must exist; the error lists the missing ones.
    pub async fn find_many_or_fail(&self, label: &str, ids: &[Value]) -> Result<Vec<Record>> {
        let records = self
            .records(&QueryBuilder::new(label).where_in(DEFAULT_KEY, ids.iter().cloned()))
            .await?;
        let found: HashSet<String> = records
            .iter()
            .filter_map(|r| r.get(DEFAULT_KEY).map(key_repr))
            .collect();
        let mut seen = HashSet::new();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !found.contains(&key_repr(id)) && seen.insert(key_repr(id)))
            .map(display_key)
            .collect();
        if missing.is_empty() {
            Ok(records)
        } else {
            Err(GraphError::not_found(label, missing))
        }
    }

    pub async fn exists(&self, builder: &QueryBuilder) -> Result<bool> {
        let rows = self.statement(&builder.to_exists()?, AccessMode::Read).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(AGGREGATE_COLUMN))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub async fn count(&self, builder: &QueryBuilder) -> Result<u64> {
        count_from_rows(&self.statement(&builder.to_count()?, AccessMode::Read).await?)
    }

    /// Server-side aggregate with the empty-set policy applied.
    pub async fn aggregate(&self, builder: &QueryBuilder, function: Aggregate, column: &str) -> Result<Value> {
        let query = function.compile(builder, column)?;
        let mut rows = self.statement(&query, AccessMode::Read).await?;
        let raw = rows.first_mut().and_then(|row| row.remove(AGGREGATE_COLUMN));
        Ok(function.finalize(raw))
    }

    /// Values of one property across the matched nodes
    pub async fn pluck(&self, builder: &QueryBuilder, column: &str) -> Result<Vec<Value>> {
        let name = column.rsplit('.').next().unwrap_or(column).to_string();
        let rows = self.get(&builder.clone().select([column])).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(&name).unwrap_or(Value::Null))
            .collect())
    }

    pub async fn paginate(&self, builder: &QueryBuilder, per_page: usize, page: usize) -> Result<Page<Record>> {
        let rows = pagination::paginate(self, builder, per_page, page).await?;
        let label = builder.label.clone();
        let alias = builder.alias.clone();
        let whole_node = builder.columns.is_empty();
        let mut items = Vec::with_capacity(rows.items.len());
        for mut row in rows.items {
            items.push(if whole_node {
                Record::from_column(label.clone(), &mut row, &alias)?
            } else {
                Record::new(label.clone(), row)
            });
        }
        Ok(Page {
            items,
            total: rows.total,
            per_page: rows.per_page,
            current_page: rows.current_page,
            last_page: rows.last_page,
        })
    }

    pub async fn insert(&self, label: &str, attributes: Row) -> Result<Record> {
        let mut rows = self
            .statement(&QueryBuilder::to_insert(label, attributes), AccessMode::Write)
            .await?;
        let mut row = rows
            .pop()
            .ok_or_else(|| GraphError::Query(format!("creating `{label}` returned no row")))?;
        Record::from_column(label, &mut row, "n")
    }

    /// Merge `values` into every matched node; returns the number touched.
    pub async fn update(&self, builder: &QueryBuilder, values: Row) -> Result<u64> {
        let rows = self.statement(&builder.to_update(values)?, AccessMode::Write).await?;
        Ok(affected(&rows))
    }

    pub async fn delete(&self, builder: &QueryBuilder) -> Result<u64> {
        let rows = self.statement(&builder.to_delete()?, AccessMode::Write).await?;
        Ok(affected(&rows))
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    pub async fn batch_load(&self, parents: &[&Record], relation: &RelationDescriptor) -> Result<BatchMap> {
        eager::batch_load(self, parents, relation).await
    }

    pub async fn load(&self, records: &mut [Record], paths: &[&str]) -> Result<()> {
        eager::load(self, &self.relations, records, paths).await
    }

    pub async fn load_missing(&self, records: &mut [Record], paths: &[&str]) -> Result<()> {
        eager::load_missing(self, &self.relations, records, paths).await
    }

    pub async fn sync(
        &self,
        relation: &RelationDescriptor,
        parent: &Record,
        ids: &[Value],
        pivot_data: Option<&Row>,
    ) -> Result<SyncChanges> {
        writer::sync(&self.transactions, relation, &parent.attributes, ids, pivot_data).await
    }

    pub async fn sync_without_detaching(
        &self,
        relation: &RelationDescriptor,
        parent: &Record,
        ids: &[Value],
        pivot_data: Option<&Row>,
    ) -> Result<SyncChanges> {
        writer::sync_without_detaching(&self.transactions, relation, &parent.attributes, ids, pivot_data)
            .await
    }

    pub async fn toggle(
        &self,
        relation: &RelationDescriptor,
        parent: &Record,
        ids: &[Value],
        pivot_data: Option<&Row>,
    ) -> Result<SyncChanges> {
        writer::toggle(&self.transactions, relation, &parent.attributes, ids, pivot_data).await
    }

    pub async fn attach(
        &self,
        relation: &RelationDescriptor,
        parent: &Record,
        ids: &[Value],
        attributes: &Row,
    ) -> Result<()> {
        writer::attach(&self.transactions, relation, &parent.attributes, ids, attributes).await
    }

    pub async fn detach(
        &self,
        relation: &RelationDescriptor,
        parent: &Record,
        ids: Option<&[Value]>,
    ) -> Result<()> {
        writer::detach(&self.transactions, relation, &parent.attributes, ids).await
    }

    pub async fn update_existing_pivot(
        &self,
        relation: &RelationDescriptor,
        parent: &Record,
        related_key: &Value,
        attributes: &Row,
    ) -> Result<u64> {
        writer::update_existing_pivot(&self.transactions, relation, &parent.attributes, related_key, attributes)
            .await
    }

    pub async fn persist_associations(&self, record: &mut Record) -> Result<usize> {
        writer::persist_associations(&self.transactions, record).await
    }

    pub async fn create_related(
        &self,
        relation: &RelationDescriptor,
        parent: &Record,
        attributes: Row,
        pivot_attributes: Option<&Row>,
    ) -> Result<Record> {
        writer::create_related(&self.transactions, relation, &parent.attributes, attributes, pivot_attributes)
            .await
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub async fn write<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transactions.write(work).await
    }

    pub async fn read<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transactions.read(work).await
    }

    pub async fn begin_transaction(&self) -> Result<()> {
        self.transactions.begin_transaction(AccessMode::Write).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.transactions.commit().await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.transactions.rollback().await
    }

    pub async fn transaction_context(&self) -> Option<TransactionContext> {
        self.transactions.context().await
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    pub async fn ping(&self) -> bool {
        self.monitor.ping().await
    }

    pub async fn is_connected(&self) -> bool {
        self.monitor.is_connected().await
    }

    pub fn is_stale(&self) -> bool {
        self.monitor.is_stale()
    }

    pub fn should_reconnect(&self, error: &GraphError) -> bool {
        self.monitor.should_reconnect(error)
    }

    pub async fn reconnect_if_stale(&self) -> Result<bool> {
        self.monitor.reconnect_if_stale().await
    }

    pub async fn internal_state(&self) -> ConnectionState {
        self.monitor.internal_state().await
    }

    pub fn get_config(&self) -> ConnectionConfig {
        self.monitor.get_config()
    }

    pub fn set_config(&self, config: ConnectionConfig) {
        self.monitor.set_config(config)
    }

    pub async fn disconnect(&self) {
        self.monitor.disconnect().await
    }
}

#[async_trait]
impl QueryExecutor for GraphConnection {
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        self.statement(query, AccessMode::Read).await
    }
}

fn affected(rows: &[Row]) -> u64 {
    rows.first()
        .and_then(|row| row.get("affected"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn display_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnector;
    use crate::query::SortDirection;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn connection(connector: &MockConnector) -> GraphConnection {
        let registry = RelationRegistry::new().with(
            RelationDescriptor::has_many("posts", "User", "Post")
                .keys("id", "user_id")
                .order_by("id", SortDirection::Asc)
                .build()
                .unwrap(),
        );
        GraphConnection::with_connector(Arc::new(connector.clone()), ConnectionConfig::default())
            .await
            .unwrap()
            .with_relations(registry)
    }

    /// Users 1 and 2 exist; every count is 2; Post lookups return one post for user 1.
    fn users(q: &CompiledQuery) -> Vec<Row> {
        if q.columns == [AGGREGATE_COLUMN] {
            return vec![row(json!({ AGGREGATE_COLUMN: 2 }))];
        }
        if q.text.contains("(related:Post)") {
            return vec![row(json!({"__parent_key": 1, "related": {"id": 10, "user_id": 1}}))];
        }
        let wanted: Vec<Value> = match q.params.get("p0") {
            Some(Value::Array(ids)) => ids.clone(),
            Some(id) => vec![id.clone()],
            None => vec![json!(1), json!(2)],
        };
        wanted
            .into_iter()
            .filter(|id| *id == json!(1) || *id == json!(2))
            .map(|id| row(json!({"n": {"id": id, "name": format!("user {id}")}})))
            .collect()
    }

    #[tokio::test]
    async fn test_find_and_find_or_fail() {
        let connector = MockConnector::new();
        connector.respond_with(users);
        let conn = connection(&connector).await;

        let found = conn.find("User", 1).await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&json!("user 1")));
        assert!(conn.find("User", 9).await.unwrap().is_none());

        match conn.find_or_fail("User", 9).await {
            Err(GraphError::NotFound { entity, ids }) => {
                assert_eq!(entity, "User");
                assert_eq!(ids, vec!["9"]);
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_find_many_or_fail_lists_missing_ids() {
        let connector = MockConnector::new();
        connector.respond_with(users);
        let conn = connection(&connector).await;

        assert_eq!(conn.find_many_or_fail("User", &[json!(1), json!(2)]).await.unwrap().len(), 2);
        match conn.find_many_or_fail("User", &[json!(1), json!(7), json!("x"), json!(7)]).await {
            Err(GraphError::NotFound { ids, .. }) => assert_eq!(ids, vec!["7", "x"]),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_aggregate_applies_empty_set_policy() {
        let connector = MockConnector::new();
        connector.respond_with(|_| vec![row(json!({ AGGREGATE_COLUMN: null }))]);
        let conn = connection(&connector).await;
        let users = conn.query("User");

        assert_eq!(conn.aggregate(&users, Aggregate::Sum, "age").await.unwrap(), json!(0));
        assert_eq!(
            conn.aggregate(&users, Aggregate::PercentileDisc(0.5), "age").await.unwrap(),
            Value::Null
        );
        assert_eq!(conn.aggregate(&users, Aggregate::Collect, "age").await.unwrap(), json!([]));
        assert!(matches!(
            conn.aggregate(&users, Aggregate::PercentileCont(1.5), "age").await,
            Err(GraphError::Compile(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_run_in_managed_transaction() {
        let connector = MockConnector::new();
        connector.respond_with(|q| {
            if q.columns == ["n"] {
                vec![row(json!({"n": {"id": 5, "name": "ada"}}))]
            } else {
                vec![row(json!({"affected": 3}))]
            }
        });
        let conn = connection(&connector).await;

        let created = conn.insert("User", row(json!({"id": 5, "name": "ada"}))).await.unwrap();
        assert_eq!(created.get("id"), Some(&json!(5)));
        let touched = conn
            .update(&conn.query("User").where_("age", "<", 18), row(json!({"minor": true})))
            .await
            .unwrap();
        assert_eq!(touched, 3);
        assert_eq!(connector.begins(), 2);
        assert_eq!(connector.commits(), 2);
    }

    #[tokio::test]
    async fn test_reads_join_open_transaction() {
        let connector = MockConnector::new();
        connector.respond_with(users);
        let conn = connection(&connector).await;

        conn.begin_transaction().await.unwrap();
        assert_eq!(conn.count(&conn.query("User")).await.unwrap(), 2);
        assert_eq!(conn.transaction_context().await.unwrap().depth, 1);
        conn.commit().await.unwrap();

        assert_eq!(connector.begins(), 1);
        assert_eq!(connector.committed().len(), 1);
        assert!(conn.transaction_context().await.is_none());
    }

    #[tokio::test]
    async fn test_load_uses_registered_relations() {
        let connector = MockConnector::new();
        connector.respond_with(users);
        let conn = connection(&connector).await;

        let mut records = conn.records(&conn.query("User")).await.unwrap();
        assert_eq!(records.len(), 2);
        conn.load(&mut records, &["posts"]).await.unwrap();
        conn.load_missing(&mut records, &["posts"]).await.unwrap();
        assert_eq!(connector.executed().len(), 2);
        assert_eq!(records[0].relation("posts").map(|r| r.len()), Some(1));
        assert_eq!(records[1].relation("posts").map(|r| r.len()), Some(0));
    }

    #[tokio::test]
    async fn test_pluck_and_exists() {
        let connector = MockConnector::new();
        connector.respond_with(|q| {
            if q.columns == [AGGREGATE_COLUMN] {
                vec![row(json!({ AGGREGATE_COLUMN: true }))]
            } else {
                vec![row(json!({"email": "a@b.c"})), row(json!({"email": null}))]
            }
        });
        let conn = connection(&connector).await;
        let users = conn.query("User");
        assert!(conn.exists(&users).await.unwrap());
        assert_eq!(
            conn.pluck(&users, "email").await.unwrap(),
            vec![json!("a@b.c"), Value::Null]
        );
    }

    #[tokio::test]
    async fn test_health_passthrough() {
        let connector = MockConnector::new();
        let conn = connection(&connector).await;
        assert!(conn.ping().await);
        assert!(conn.is_connected().await);
        conn.monitor().force_stale();
        assert!(conn.reconnect_if_stale().await.unwrap());
        assert_eq!(conn.internal_state().await.reconnect_count, 1);
        assert_eq!(conn.get_config().host, "localhost");
    }
}
