use crate::client::{Script, SearchRequest, UpdateByQueryOptions};
use crate::core::{Query, Result, to_document_type};
use crate::migration::{MigrationScope, Strategy};
use crate::queue::track_in_batches;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{Level, event};

/// How missing values get filled in.
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillMode {
    /// Enqueue the documents so the indexing pipeline recomputes them.
    Reindex,
    /// Write the value in place with update-by-query, `update_batch_size` at a time.
    Script(Script),
}

/// Adds a previously absent field to existing documents of one record type.
#[derive(Debug, Clone)]
pub struct BackfillField {
    pub record_type: String,
    pub field: String,
    pub index: Option<String>,
    /// Mapping properties to add before any document is touched.
    pub mappings: Map<String, Value>,
    pub mode: BackfillMode,
}

impl BackfillField {
    pub fn new(record_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            field: field.into(),
            index: None,
            mappings: Map::new(),
            mode: BackfillMode::Reindex,
        }
    }

    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_mapping(mut self, property: impl Into<String>, definition: Value) -> Self {
        self.mappings.insert(property.into(), definition);
        self
    }

    pub fn with_script(mut self, script: Script) -> Self {
        self.mode = BackfillMode::Script(script);
        self
    }

    pub fn query(&self) -> Query {
        Query::doc_type(to_document_type(&self.record_type)).and(Query::missing(self.field.clone()))
    }

    async fn ensure_mappings(&self, scope: &MigrationScope<'_>, index: &str) -> Result<()> {
        if self.mappings.is_empty() {
            return Ok(());
        }

        let current = scope.client().get_mapping(index).await?;
        let missing: Map<String, Value> = self
            .mappings
            .iter()
            .filter(|(name, _)| !current.contains_key(*name))
            .map(|(name, definition)| (name.clone(), definition.clone()))
            .collect();

        if !missing.is_empty() {
            event!(
                Level::INFO,
                migration = %scope.name(),
                properties = ?missing.keys().collect::<Vec<_>>(),
                "adding mapping properties"
            );
            scope.client().update_mapping(index, &missing).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for BackfillField {
    fn kind(&self) -> &'static str {
        "backfill_field"
    }

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        let index = scope.index(self.index.as_deref());
        self.ensure_mappings(scope, index).await?;

        let query = self.query();
        let mut state = scope.load_state().await?;
        let remaining = scope.client().count(index, &query).await?;
        state.documents_remaining = Some(remaining);

        if remaining == 0 {
            scope.save_state(&state).await?;
            event!(Level::INFO, migration = %scope.name(), "no documents left to backfill");
            return Ok(());
        }

        match &self.mode {
            BackfillMode::Reindex => {
                let limit = if scope.policy().batched {
                    scope.batch_size(&state)?
                } else {
                    // One search page is bounded by the cluster's result window.
                    (remaining as usize).min(scope.config().default_batch_size)
                };
                let request = SearchRequest::new(query, limit)
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
                event!(
                    Level::INFO,
                    migration = %scope.name(),
                    tracked,
                    remaining,
                    "documents enqueued for backfill"
                );
            }
            BackfillMode::Script(script) => {
                let max_docs = if scope.policy().batched {
                    Some(scope.update_batch_size(&state)? as u64)
                } else {
                    None
                };
                let response = scope
                    .client()
                    .update_by_query(
                        index,
                        &query,
                        script,
                        UpdateByQueryOptions {
                            wait_for_completion: true,
                            refresh: true,
                            max_docs,
                        },
                    )
                    .await?;
                state.documents_remaining = Some(remaining.saturating_sub(response.updated));
                event!(
                    Level::INFO,
                    migration = %scope.name(),
                    updated = response.updated,
                    "documents updated in place"
                );
            }
        }

        scope.save_state(&state).await
    }

    async fn completed(&self, scope: &MigrationScope<'_>) -> Result<bool> {
        let index = scope.index(self.index.as_deref());
        let remaining = scope.client().count(index, &self.query()).await?;
        event!(Level::DEBUG, migration = %scope.name(), remaining, "backfill remaining");
        Ok(remaining == 0)
    }
}
