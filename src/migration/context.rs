use super::MigrationPolicy;
use crate::client::SearchClient;
use crate::config::EngineConfig;
use crate::core::{MigrationError, MigrationVersion, Result};
use crate::queue::{BookkeepingQueue, ReindexTaskSink};
use crate::source::{IndexEverything, IndexingPolicy, RecordSource};
use crate::state::{MigrationState, MigrationStateStore};
use crate::task::TaskTracker;
use std::sync::Arc;
use tracing::{Level, event};

/// Collaborators shared by every migration.
#[derive(Clone)]
pub struct MigrationContext {
    config: EngineConfig,
    client: Arc<dyn SearchClient>,
    queue: Arc<dyn BookkeepingQueue>,
    states: Arc<dyn MigrationStateStore>,
    records: Option<Arc<dyn RecordSource>>,
    reindex_sink: Option<Arc<dyn ReindexTaskSink>>,
    indexing: Arc<dyn IndexingPolicy>,
    tasks: TaskTracker,
}

impl MigrationContext {
    pub fn builder(config: EngineConfig) -> MigrationContextBuilder {
        MigrationContextBuilder {
            config,
            client: None,
            queue: None,
            states: None,
            records: None,
            reindex_sink: None,
            indexing: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn client(&self) -> &dyn SearchClient {
        self.client.as_ref()
    }

    pub fn queue(&self) -> &dyn BookkeepingQueue {
        self.queue.as_ref()
    }

    pub fn states(&self) -> &dyn MigrationStateStore {
        self.states.as_ref()
    }

    pub fn indexing(&self) -> &dyn IndexingPolicy {
        self.indexing.as_ref()
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn records(&self) -> Result<&dyn RecordSource> {
        self.records
            .as_deref()
            .ok_or_else(|| MigrationError::Config("no record source configured".to_string()))
    }

    pub fn reindex_sink(&self) -> Result<&dyn ReindexTaskSink> {
        self.reindex_sink
            .as_deref()
            .ok_or_else(|| MigrationError::Config("no reindex task sink configured".to_string()))
    }

    /// Scheduling-state view used by the executor.
    pub async fn load_state(&self, version: MigrationVersion) -> Result<MigrationState> {
        Ok(self.states.load(version).await?.unwrap_or_default())
    }

    pub async fn save_state(&self, version: MigrationVersion, state: &MigrationState) -> Result<()> {
        self.states.save(version, state).await
    }
}

pub struct MigrationContextBuilder {
    config: EngineConfig,
    client: Option<Arc<dyn SearchClient>>,
    queue: Option<Arc<dyn BookkeepingQueue>>,
    states: Option<Arc<dyn MigrationStateStore>>,
    records: Option<Arc<dyn RecordSource>>,
    reindex_sink: Option<Arc<dyn ReindexTaskSink>>,
    indexing: Option<Arc<dyn IndexingPolicy>>,
}

impl MigrationContextBuilder {
    pub fn client(mut self, client: Arc<dyn SearchClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn BookkeepingQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn states(mut self, states: Arc<dyn MigrationStateStore>) -> Self {
        self.states = Some(states);
        self
    }

    pub fn records(mut self, records: Arc<dyn RecordSource>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn reindex_sink(mut self, sink: Arc<dyn ReindexTaskSink>) -> Self {
        self.reindex_sink = Some(sink);
        self
    }

    pub fn indexing_policy(mut self, policy: Arc<dyn IndexingPolicy>) -> Self {
        self.indexing = Some(policy);
        self
    }

    pub fn build(self) -> Result<MigrationContext> {
        self.config.validate()?;
        let client = self
            .client
            .ok_or_else(|| MigrationError::Config("search client is required".to_string()))?;
        let queue = self
            .queue
            .ok_or_else(|| MigrationError::Config("bookkeeping queue is required".to_string()))?;
        let states = self
            .states
            .ok_or_else(|| MigrationError::Config("state store is required".to_string()))?;

        Ok(MigrationContext {
            tasks: TaskTracker::new(client.clone()),
            config: self.config,
            client,
            queue,
            states,
            records: self.records,
            reindex_sink: self.reindex_sink,
            indexing: self.indexing.unwrap_or_else(|| Arc::new(IndexEverything)),
        })
    }
}

/// One migration's view of the context: its policy plus its own state record.
pub struct MigrationScope<'a> {
    ctx: &'a MigrationContext,
    policy: &'a MigrationPolicy,
}

impl<'a> MigrationScope<'a> {
    pub fn new(ctx: &'a MigrationContext, policy: &'a MigrationPolicy) -> Self {
        Self { ctx, policy }
    }

    pub fn ctx(&self) -> &'a MigrationContext {
        self.ctx
    }

    pub fn policy(&self) -> &'a MigrationPolicy {
        self.policy
    }

    pub fn name(&self) -> &'a str {
        &self.policy.name
    }

    pub fn version(&self) -> MigrationVersion {
        self.policy.version
    }

    pub fn client(&self) -> &'a dyn SearchClient {
        self.ctx.client()
    }

    pub fn config(&self) -> &'a EngineConfig {
        &self.ctx.config
    }

    /// Index a strategy targets: its own override or the configured main index.
    pub fn index<'b>(&'b self, index: Option<&'b str>) -> &'b str {
        index.unwrap_or(&self.ctx.config.index_name)
    }

    pub fn index_limiting_enabled(&self) -> bool {
        self.ctx.config.index_limiting_enabled || self.ctx.indexing.is_limiting()
    }

    /// Loads state without creating it.
    pub async fn existing_state(&self) -> Result<Option<MigrationState>> {
        self.ctx.states.load(self.policy.version).await
    }

    pub async fn load_state(&self) -> Result<MigrationState> {
        self.ctx.load_state(self.policy.version).await
    }

    pub async fn save_state(&self, state: &MigrationState) -> Result<()> {
        self.ctx.save_state(self.policy.version, state).await
    }

    /// Operator override first, then the declared batch size.
    pub fn batch_size(&self, state: &MigrationState) -> Result<usize> {
        state
            .batch_size
            .filter(|size| *size > 0)
            .or(self.policy.batch_size)
            .ok_or_else(|| MigrationError::NotImplemented {
                migration: self.policy.name.clone(),
                what: "batch_size".to_string(),
            })
    }

    pub fn update_batch_size(&self, state: &MigrationState) -> Result<usize> {
        self.policy
            .update_batch_size
            .map_or_else(|| self.batch_size(state), Ok)
    }

    pub fn fatal(&self, message: impl Into<String>) -> MigrationError {
        MigrationError::fatal(self.policy.name.clone(), message)
    }

    /// Logs `err` against this migration and turns it into a halting error.
    ///
    /// Errors that already identify a halt (task failures, contract errors,
    /// obsolete migrations) pass through unchanged.
    pub fn escalate(&self, err: MigrationError) -> MigrationError {
        event!(
            Level::ERROR,
            migration = %self.policy.name,
            version = %self.policy.version,
            error_class = err.kind(),
            error = %err,
            "migration batch failed"
        );
        match err {
            MigrationError::Fatal { .. }
            | MigrationError::NotImplemented { .. }
            | MigrationError::TaskFailed { .. }
            | MigrationError::Obsolete { .. }
            | MigrationError::InsufficientSpace { .. } => err,
            other => MigrationError::fatal(
                self.policy.name.clone(),
                format!("{} ({})", other, other.kind()),
            ),
        }
    }
}
