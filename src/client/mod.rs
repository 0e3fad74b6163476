//! Search-engine client boundary.
//!
//! The engine treats the search backend as a black-box wire service. Every call
//! a strategy makes goes through [`SearchClient`], so the same migrations run
//! against a real cluster ([`HttpSearchClient`]) or the in-process
//! [`InMemorySearchBackend`].

pub mod http;
pub mod memory;

use crate::core::{DocumentReference, MigrationError, Query, Result, TYPE_FIELD, TaskId, to_record_type};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use http::HttpSearchClient;
pub use memory::InMemorySearchBackend;

/// Ordered, bounded document lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    pub size: usize,
    /// Numeric field to sort ascending by; falls back to document id order.
    pub sort_by: Option<String>,
    /// Restricts the returned `_source`. Empty means everything.
    pub source_fields: Vec<String>,
}

impl SearchRequest {
    pub fn new(query: Query, size: usize) -> Self {
        Self {
            query,
            size,
            sort_by: None,
            source_fields: Vec::new(),
        }
    }

    pub fn sort_by(mut self, field: impl Into<String>) -> Self {
        self.sort_by = Some(field.into());
        self
    }

    pub fn source_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub routing: Option<String>,
    pub source: Map<String, Value>,
}

impl SearchHit {
    /// Derives the reference the indexing pipeline needs to recompute this hit.
    ///
    /// Record type and id come from the `type`/`id` source fields; when `id` is
    /// absent it is parsed from the `{type}_{id}` document id.
    pub fn document_reference(&self) -> Result<DocumentReference> {
        let document_type = self
            .source
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                MigrationError::InvalidDocumentReference(format!(
                    "document '{}' has no '{}' field",
                    self.id, TYPE_FIELD
                ))
            })?;

        let record_id = match self.source.get("id") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse::<u64>().ok(),
            _ => self
                .id
                .rsplit_once('_')
                .and_then(|(_, suffix)| suffix.parse::<u64>().ok()),
        }
        .ok_or_else(|| {
            MigrationError::InvalidDocumentReference(format!(
                "cannot determine record id of document '{}'",
                self.id
            ))
        })?;

        let mut reference = DocumentReference::new(to_record_type(document_type), record_id)
            .with_document_id(self.id.clone());
        if let Some(routing) = &self.routing {
            reference = reference.with_routing(routing.clone());
        }
        Ok(reference)
    }
}

/// Painless-style update script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub source: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Script {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// `ctx._source[field] = value`
    pub fn set_field(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field: String = field.into();
        Self::new("ctx._source[params.field] = params.value")
            .param("field", field)
            .param("value", value)
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "source": self.source,
            "params": self.params,
            "lang": "painless",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateByQueryOptions {
    pub wait_for_completion: bool,
    pub refresh: bool,
    pub max_docs: Option<u64>,
}

impl Default for UpdateByQueryOptions {
    fn default() -> Self {
        Self {
            wait_for_completion: true,
            refresh: true,
            max_docs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateByQueryResponse {
    pub updated: u64,
    pub task: Option<TaskId>,
}

/// Either a task handle, or the failures reported when the submission was rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteByQueryResponse {
    pub task: Option<TaskId>,
    pub failures: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatusResponse {
    pub completed: bool,
    pub error: Option<Value>,
    pub failures: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub document_count: u64,
    pub size_in_bytes: u64,
}

/// Wire abstraction over the search backend.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn count(&self, index: &str, query: &Query) -> Result<u64>;

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>>;

    async fn update_by_query(
        &self,
        index: &str,
        query: &Query,
        script: &Script,
        options: UpdateByQueryOptions,
    ) -> Result<UpdateByQueryResponse>;

    /// Submits an asynchronous delete-by-query with `conflicts=proceed`.
    async fn delete_by_query(&self, index: &str, query: &Query) -> Result<DeleteByQueryResponse>;

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn create_index(&self, index: &str, body: &Value) -> Result<()>;

    async fn delete_index(&self, index: &str) -> Result<()>;

    /// Returns the `properties` object of the index mapping.
    async fn get_mapping(&self, index: &str) -> Result<Map<String, Value>>;

    async fn update_mapping(&self, index: &str, properties: &Map<String, Value>) -> Result<()>;

    async fn index_stats(&self, index: &str) -> Result<IndexStats>;

    async fn free_space_bytes(&self) -> Result<u64>;
}
