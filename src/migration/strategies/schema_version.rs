use crate::client::SearchRequest;
use crate::core::{Query, Result, to_document_type};
use crate::migration::{MigrationScope, Strategy};
use crate::queue::track_in_batches;
use async_trait::async_trait;
use tracing::{Level, event};

/// Re-enqueues every document tagged below `new_schema_version`.
///
/// The indexing pipeline stamps the current version on every document it
/// writes, so recomputing a document is enough to move it forward.
#[derive(Debug, Clone)]
pub struct ReindexBySchemaVersion {
    pub new_schema_version: i64,
    /// Restricts the sweep to one record type; `None` covers the whole index.
    pub record_type: Option<String>,
    pub index: Option<String>,
}

impl ReindexBySchemaVersion {
    pub fn new(new_schema_version: i64) -> Self {
        Self {
            new_schema_version,
            record_type: None,
            index: None,
        }
    }

    pub fn for_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn query(&self) -> Query {
        let outdated = Query::schema_version_below(self.new_schema_version);
        match &self.record_type {
            Some(record_type) => Query::doc_type(to_document_type(record_type)).and(outdated),
            None => outdated,
        }
    }

    async fn process_batch(&self, scope: &MigrationScope<'_>, index: &str, batch_size: usize) -> Result<usize> {
        let query = self.query();
        let remaining = scope.client().count(index, &query).await?;
        if remaining == 0 {
            return Ok(0);
        }

        let request = SearchRequest::new(query, batch_size)
            .sort_by("id")
            .source_fields(["id", "type"]);
        let hits = scope.client().search(index, &request).await?;
        let references = hits
            .iter()
            .map(|hit| hit.document_reference())
            .collect::<Result<Vec<_>>>()?;

        let tracked = track_in_batches(
            scope.ctx().queue(),
            references,
            scope.config().effective_queue_batch_limit(),
        )
        .await?;

        let mut state = scope.load_state().await?;
        state.documents_remaining = Some(remaining);
        scope.save_state(&state).await?;

        event!(
            Level::INFO,
            migration = %scope.name(),
            tracked,
            remaining,
            target_version = self.new_schema_version,
            "documents enqueued for schema version reindex"
        );
        Ok(tracked)
    }
}

#[async_trait]
impl Strategy for ReindexBySchemaVersion {
    fn kind(&self) -> &'static str {
        "reindex_by_schema_version"
    }

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        let state = scope.load_state().await?;
        // Fails loudly when the migration never declared how much to take per run.
        let batch_size = scope.batch_size(&state)?;
        let index = scope.index(self.index.as_deref());

        self.process_batch(scope, index, batch_size)
            .await
            .map(|_| ())
            .map_err(|err| scope.escalate(err))
    }

    async fn completed(&self, scope: &MigrationScope<'_>) -> Result<bool> {
        let index = scope.index(self.index.as_deref());
        let remaining = scope.client().count(index, &self.query()).await?;
        Ok(remaining == 0)
    }
}
