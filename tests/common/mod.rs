//! Shared test harness: in-memory collaborators plus a stand-in for the
//! indexing pipeline that consumes the bookkeeping queue.

#![allow(dead_code)]

use search_migrations::client::InMemorySearchBackend;
use search_migrations::queue::{InMemoryBookkeepingQueue, InMemoryReindexSink};
use search_migrations::source::{IndexingPolicy, InMemoryRecordSource, SourceRecord};
use search_migrations::state::{InMemoryStateStore, MigrationStateStore};
use search_migrations::{
    EngineConfig, Migration, MigrationContext, MigrationPolicy, MigrationScope, MigrationState,
    MigrationVersion, Strategy,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const INDEX: &str = "main";

const WRITE_OPERATIONS: [&str; 5] = [
    "update_by_query",
    "delete_by_query",
    "create_index",
    "delete_index",
    "update_mapping",
];

#[derive(Debug, PartialEq)]
pub struct Observed {
    pub state: Option<MigrationState>,
    pub writes: Vec<usize>,
    pub tracked: usize,
    pub reindex_requests: usize,
    pub documents: Vec<(String, Map<String, Value>)>,
}

pub struct Harness {
    pub backend: Arc<InMemorySearchBackend>,
    pub queue: Arc<InMemoryBookkeepingQueue>,
    pub states: Arc<InMemoryStateStore>,
    pub records: Arc<InMemoryRecordSource>,
    pub sink: Arc<InMemoryReindexSink>,
    pub ctx: MigrationContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_indexing_policy(policy: Arc<dyn IndexingPolicy>) -> Self {
        Self::build(test_config(), Some(policy))
    }

    fn build(config: EngineConfig, policy: Option<Arc<dyn IndexingPolicy>>) -> Self {
        let backend = Arc::new(InMemorySearchBackend::new());
        let queue = Arc::new(InMemoryBookkeepingQueue::new());
        let states = Arc::new(InMemoryStateStore::new());
        let records = Arc::new(InMemoryRecordSource::new());
        let sink = Arc::new(InMemoryReindexSink::new());

        let mut builder = MigrationContext::builder(config)
            .client(backend.clone())
            .queue(queue.clone())
            .states(states.clone())
            .records(records.clone())
            .reindex_sink(sink.clone());
        if let Some(policy) = policy {
            builder = builder.indexing_policy(policy);
        }
        let ctx = builder.build().unwrap();

        Self {
            backend,
            queue,
            states,
            records,
            sink,
            ctx,
        }
    }

    /// Indexes `count` documents of `doc_type` with ids starting at 1.
    pub async fn seed(&self, doc_type: &str, count: u64, extra: Value) {
        for id in 1..=count {
            self.seed_one(doc_type, id, extra.clone()).await;
        }
    }

    pub async fn seed_one(&self, doc_type: &str, id: u64, extra: Value) {
        let mut source = Map::new();
        source.insert("type".to_string(), json!(doc_type));
        source.insert("id".to_string(), json!(id));
        if let Value::Object(fields) = extra {
            source.extend(fields);
        }
        self.backend
            .index_document(INDEX, format!("{}_{}", doc_type, id), None, Value::Object(source))
            .await;
    }

    /// Plays the indexing pipeline: every queued reference is rewritten with
    /// `fields` merged into its document. Returns the number processed.
    pub async fn run_pipeline(&self, fields: Value) -> usize {
        let references = self.queue.drain().await;
        for reference in &references {
            let mut source = self
                .backend
                .get_document(INDEX, &reference.document_id)
                .await
                .map(|document| document.source)
                .unwrap_or_default();
            source.insert("type".to_string(), json!(reference.document_type()));
            source.insert("id".to_string(), json!(reference.record_id));
            if let Value::Object(extra) = &fields {
                source.extend(extra.clone());
            }
            self.backend
                .index_document(
                    INDEX,
                    reference.document_id.clone(),
                    reference.routing.as_deref(),
                    Value::Object(source),
                )
                .await;
        }
        references.len()
    }

    pub async fn insert_records(&self, record_type: &str, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            self.records.insert(record_type, SourceRecord::new(id)).await;
        }
    }

    pub async fn state(&self, version: u64) -> MigrationState {
        self.states
            .load(MigrationVersion::new(version))
            .await
            .unwrap()
            .unwrap_or_default()
    }

    pub async fn save_state(&self, version: u64, state: &MigrationState) {
        self.states
            .save(MigrationVersion::new(version), state)
            .await
            .unwrap();
    }

    /// Calls `completed` twice and checks both answers agree and nothing was written.
    pub async fn completed(&self, migration: &Migration) -> bool {
        let before = self.observe(migration).await;
        let first = migration.completed(&self.ctx).await.unwrap();
        let second = migration.completed(&self.ctx).await.unwrap();
        assert_eq!(first, second, "completed must not change between calls");
        assert_eq!(before, self.observe(migration).await, "completed must not write anything");
        first
    }

    /// Everything a migration can write: its state record, backend writes, queued and requested work.
    pub async fn observe(&self, migration: &Migration) -> Observed {
        let mut writes = Vec::new();
        for operation in WRITE_OPERATIONS {
            writes.push(self.backend.call_count(operation).await);
        }
        Observed {
            state: self.states.load(migration.version()).await.unwrap(),
            writes,
            tracked: self.queue.total_tracked().await,
            reindex_requests: self.sink.requests().await.len(),
            documents: self.snapshot().await,
        }
    }

    /// Runs `migrate` then `pipeline` until `completed`, bounded by `max_steps`.
    pub async fn migrate_until_completed(&self, migration: &Migration, fields: Value, max_steps: usize) -> usize {
        for step in 0..max_steps {
            if self.completed(migration).await {
                return step;
            }
            migration.migrate(&self.ctx).await.unwrap();
            self.run_pipeline(fields.clone()).await;
        }
        assert!(self.completed(migration).await, "migration did not complete in {} steps", max_steps);
        max_steps
    }

    pub fn scope<'a>(&'a self, policy: &'a MigrationPolicy) -> MigrationScope<'a> {
        MigrationScope::new(&self.ctx, policy)
    }

    /// Sorted `(id, source)` pairs of the main index.
    pub async fn snapshot(&self) -> Vec<(String, Map<String, Value>)> {
        let mut documents = Vec::new();
        for id in self.backend.document_ids(INDEX).await {
            if let Some(document) = self.backend.get_document(INDEX, &id).await {
                documents.push((id, document.source));
            }
        }
        documents
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig::new("http://localhost:9200", INDEX)
}

pub fn migration(version: u64, name: &str, strategy: impl Strategy + 'static) -> Migration {
    Migration::new(MigrationPolicy::new(version, name), strategy)
}

pub fn batched(version: u64, name: &str, batch_size: usize, strategy: impl Strategy + 'static) -> Migration {
    Migration::new(
        MigrationPolicy::new(version, name).batched().batch_size(batch_size),
        strategy,
    )
}
