use super::{
    DeleteByQueryResponse, IndexStats, Script, SearchClient, SearchHit, SearchRequest,
    TaskStatusResponse, UpdateByQueryOptions, UpdateByQueryResponse,
};
use crate::core::{MigrationError, Query, Result, TaskId};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Document as stored by the in-memory backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub routing: Option<String>,
    pub source: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
struct MemoryIndex {
    settings: Value,
    properties: Map<String, Value>,
    documents: BTreeMap<String, StoredDocument>,
}

#[derive(Debug, Clone)]
enum MemoryTaskState {
    Running,
    Completed,
    Failed(Value),
    /// Reports an error while still claiming to be unfinished.
    Erroring(Value),
}

#[derive(Debug, Clone)]
struct MemoryTask {
    index: String,
    query: Query,
    state: MemoryTaskState,
}

struct BackendState {
    indices: BTreeMap<String, MemoryIndex>,
    tasks: HashMap<TaskId, MemoryTask>,
    task_order: Vec<TaskId>,
    auto_complete_tasks: bool,
    free_space_bytes: u64,
    injected_errors: HashMap<&'static str, VecDeque<MigrationError>>,
    delete_failures: Option<Vec<Value>>,
    calls: BTreeMap<&'static str, usize>,
}

impl BackendState {
    fn record(&mut self, operation: &'static str) -> Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if let Some(err) = self
            .injected_errors
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(())
    }

    fn index(&self, name: &str) -> Result<&MemoryIndex> {
        self.indices
            .get(name)
            .ok_or_else(|| index_not_found(name))
    }

    fn index_mut(&mut self, name: &str) -> Result<&mut MemoryIndex> {
        self.indices
            .get_mut(name)
            .ok_or_else(|| index_not_found(name))
    }

    fn apply_delete(&mut self, task_id: &TaskId) {
        let Some(task) = self.tasks.get(task_id).cloned() else {
            return;
        };
        if let Some(index) = self.indices.get_mut(&task.index) {
            index
                .documents
                .retain(|_, document| !task.query.matches(&document.source));
        }
        if let Some(stored) = self.tasks.get_mut(task_id) {
            stored.state = MemoryTaskState::Completed;
        }
    }
}

fn index_not_found(name: &str) -> MigrationError {
    MigrationError::BackendRejected {
        status: 404,
        message: format!("no such index [{}]", name),
    }
}

/// In-process search backend.
///
/// Evaluates [`Query`] locally and keeps delete tasks pending until the owner
/// completes or fails them, so callers can observe every step of an async
/// delete. Every client call is counted per operation name (`"count"`,
/// `"delete_by_query"`, ...) and can be made to fail with [`fail_next`].
///
/// [`fail_next`]: InMemorySearchBackend::fail_next
pub struct InMemorySearchBackend {
    state: RwLock<BackendState>,
}

impl InMemorySearchBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BackendState {
                indices: BTreeMap::new(),
                tasks: HashMap::new(),
                task_order: Vec::new(),
                auto_complete_tasks: false,
                free_space_bytes: u64::MAX,
                injected_errors: HashMap::new(),
                delete_failures: None,
                calls: BTreeMap::new(),
            }),
        }
    }

    /// Creates an empty index with the given mapping properties, replacing any existing one.
    pub async fn create_index_with_properties(&self, index: &str, properties: Map<String, Value>) {
        let mut state = self.state.write().await;
        state.indices.insert(
            index.to_string(),
            MemoryIndex {
                settings: Value::Null,
                properties,
                documents: BTreeMap::new(),
            },
        );
    }

    /// Upserts a document, creating the index on first use.
    pub async fn index_document(
        &self,
        index: &str,
        id: impl Into<String>,
        routing: Option<&str>,
        source: Value,
    ) {
        let source = match source {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let mut state = self.state.write().await;
        state.indices.entry(index.to_string()).or_default().documents.insert(
            id.into(),
            StoredDocument {
                routing: routing.map(str::to_string),
                source,
            },
        );
    }

    pub async fn get_document(&self, index: &str, id: &str) -> Option<StoredDocument> {
        let state = self.state.read().await;
        state.indices.get(index)?.documents.get(id).cloned()
    }

    pub async fn document_ids(&self, index: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .indices
            .get(index)
            .map(|idx| idx.documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn index_settings(&self, index: &str) -> Option<Value> {
        let state = self.state.read().await;
        state.indices.get(index).map(|idx| idx.settings.clone())
    }

    /// Completes delete tasks at submission time instead of leaving them running.
    pub async fn set_auto_complete_tasks(&self, enabled: bool) {
        self.state.write().await.auto_complete_tasks = enabled;
    }

    pub async fn set_free_space_bytes(&self, bytes: u64) {
        self.state.write().await.free_space_bytes = bytes;
    }

    /// Makes the next call of `operation` fail with `error`.
    pub async fn fail_next(&self, operation: &'static str, error: MigrationError) {
        self.state
            .write()
            .await
            .injected_errors
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Makes the next delete-by-query submission report `failures` instead of a task.
    pub async fn reject_next_delete(&self, failures: Vec<Value>) {
        self.state.write().await.delete_failures = Some(failures);
    }

    /// Runs a pending delete task to completion.
    pub async fn complete_task(&self, task_id: &TaskId) -> Result<()> {
        let mut state = self.state.write().await;
        let running = state
            .tasks
            .get(task_id)
            .map(|task| matches!(task.state, MemoryTaskState::Running));
        match running {
            Some(true) => {
                state.apply_delete(task_id);
                Ok(())
            }
            Some(false) => Ok(()),
            None => Err(MigrationError::backend(format!("task [{}] not found", task_id))),
        }
    }

    /// Terminates a pending delete task with an error, leaving documents untouched.
    pub async fn fail_task(&self, task_id: &TaskId, detail: Value) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| MigrationError::backend(format!("task [{}] not found", task_id)))?;
        task.state = MemoryTaskState::Failed(detail);
        Ok(())
    }

    /// Attaches an error to a pending task without finishing it.
    pub async fn fail_task_in_flight(&self, task_id: &TaskId, detail: Value) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| MigrationError::backend(format!("task [{}] not found", task_id)))?;
        task.state = MemoryTaskState::Erroring(detail);
        Ok(())
    }

    /// Task ids in submission order.
    pub async fn task_ids(&self) -> Vec<TaskId> {
        self.state.read().await.task_order.clone()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub async fn total_calls(&self) -> usize {
        self.state.read().await.calls.values().sum()
    }

    fn matching<'a>(
        index: &'a MemoryIndex,
        query: &Query,
        sort_by: Option<&str>,
    ) -> Vec<(&'a String, &'a StoredDocument)> {
        let mut hits: Vec<_> = index
            .documents
            .iter()
            .filter(|(_, document)| query.matches(&document.source))
            .collect();

        if let Some(field) = sort_by {
            hits.sort_by(|(a_id, a), (b_id, b)| {
                let a_key = a.source.get(field).and_then(Value::as_f64);
                let b_key = b.source.get(field).and_then(Value::as_f64);
                match (a_key, b_key) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
                .then_with(|| a_id.cmp(b_id))
            });
        }
        hits
    }
}

impl Default for InMemorySearchBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_script(source: &mut Map<String, Value>, script: &Script) -> Result<()> {
    let field = script.params.get("field").and_then(Value::as_str);
    let value = script.params.get("value");
    match (field, value) {
        (Some(field), Some(value)) => {
            source.insert(field.to_string(), value.clone());
            Ok(())
        }
        _ => Err(MigrationError::BackendRejected {
            status: 400,
            message: format!("unsupported script: {}", script.source),
        }),
    }
}

#[async_trait]
impl SearchClient for InMemorySearchBackend {
    async fn count(&self, index: &str, query: &Query) -> Result<u64> {
        let mut state = self.state.write().await;
        state.record("count")?;
        let idx = state.index(index)?;
        Ok(Self::matching(idx, query, None).len() as u64)
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let mut state = self.state.write().await;
        state.record("search")?;
        let idx = state.index(index)?;

        let hits = Self::matching(idx, &request.query, request.sort_by.as_deref())
            .into_iter()
            .take(request.size)
            .map(|(id, document)| {
                let source = if request.source_fields.is_empty() {
                    document.source.clone()
                } else {
                    document
                        .source
                        .iter()
                        .filter(|(k, _)| request.source_fields.iter().any(|f| f == *k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                };
                SearchHit {
                    id: id.clone(),
                    routing: document.routing.clone(),
                    source,
                }
            })
            .collect();
        Ok(hits)
    }

    async fn update_by_query(
        &self,
        index: &str,
        query: &Query,
        script: &Script,
        options: UpdateByQueryOptions,
    ) -> Result<UpdateByQueryResponse> {
        let mut state = self.state.write().await;
        state.record("update_by_query")?;

        let ids: Vec<String> = {
            let idx = state.index(index)?;
            let limit = options.max_docs.map(|m| m as usize).unwrap_or(usize::MAX);
            Self::matching(idx, query, None)
                .into_iter()
                .take(limit)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let idx = state.index_mut(index)?;
        for id in &ids {
            if let Some(document) = idx.documents.get_mut(id) {
                apply_script(&mut document.source, script)?;
            }
        }

        let task = if options.wait_for_completion {
            None
        } else {
            let task_id = TaskId::new(Uuid::new_v4().to_string());
            state.tasks.insert(
                task_id.clone(),
                MemoryTask {
                    index: index.to_string(),
                    query: query.clone(),
                    state: MemoryTaskState::Completed,
                },
            );
            state.task_order.push(task_id.clone());
            Some(task_id)
        };

        Ok(UpdateByQueryResponse {
            updated: ids.len() as u64,
            task,
        })
    }

    async fn delete_by_query(&self, index: &str, query: &Query) -> Result<DeleteByQueryResponse> {
        let mut state = self.state.write().await;
        state.record("delete_by_query")?;
        state.index(index)?;

        if let Some(failures) = state.delete_failures.take() {
            return Ok(DeleteByQueryResponse {
                task: None,
                failures,
            });
        }

        let task_id = TaskId::new(Uuid::new_v4().to_string());
        state.tasks.insert(
            task_id.clone(),
            MemoryTask {
                index: index.to_string(),
                query: query.clone(),
                state: MemoryTaskState::Running,
            },
        );
        state.task_order.push(task_id.clone());

        if state.auto_complete_tasks {
            state.apply_delete(&task_id);
        }

        Ok(DeleteByQueryResponse {
            task: Some(task_id),
            failures: Vec::new(),
        })
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse> {
        let mut state = self.state.write().await;
        state.record("task_status")?;
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| MigrationError::BackendRejected {
                status: 404,
                message: format!("task [{}] isn't running and hasn't stored its results", task_id),
            })?;

        Ok(match &task.state {
            MemoryTaskState::Running => TaskStatusResponse::default(),
            MemoryTaskState::Completed => TaskStatusResponse {
                completed: true,
                ..Default::default()
            },
            MemoryTaskState::Failed(detail) => TaskStatusResponse {
                completed: true,
                error: Some(detail.clone()),
                failures: Vec::new(),
            },
            MemoryTaskState::Erroring(detail) => TaskStatusResponse {
                completed: false,
                error: Some(detail.clone()),
                failures: Vec::new(),
            },
        })
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        state.record("index_exists")?;
        Ok(state.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        let mut state = self.state.write().await;
        state.record("create_index")?;
        if state.indices.contains_key(index) {
            return Err(MigrationError::BackendRejected {
                status: 400,
                message: format!("index [{}] already exists", index),
            });
        }

        let properties = body
            .pointer("/mappings/properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let settings = body.get("settings").cloned().unwrap_or(json!({}));
        state.indices.insert(
            index.to_string(),
            MemoryIndex {
                settings,
                properties,
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.record("delete_index")?;
        state
            .indices
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| index_not_found(index))
    }

    async fn get_mapping(&self, index: &str) -> Result<Map<String, Value>> {
        let mut state = self.state.write().await;
        state.record("get_mapping")?;
        Ok(state.index(index)?.properties.clone())
    }

    async fn update_mapping(&self, index: &str, properties: &Map<String, Value>) -> Result<()> {
        let mut state = self.state.write().await;
        state.record("update_mapping")?;
        let idx = state.index_mut(index)?;
        for (name, definition) in properties {
            idx.properties.insert(name.clone(), definition.clone());
        }
        Ok(())
    }

    async fn index_stats(&self, index: &str) -> Result<IndexStats> {
        let mut state = self.state.write().await;
        state.record("index_stats")?;
        let idx = state.index(index)?;
        let size_in_bytes = idx
            .documents
            .values()
            .map(|document| serde_json::to_vec(&document.source).map(|bytes| bytes.len() as u64))
            .sum::<std::result::Result<u64, _>>()?;
        Ok(IndexStats {
            document_count: idx.documents.len() as u64,
            size_in_bytes,
        })
    }

    async fn free_space_bytes(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        state.record("free_space_bytes")?;
        Ok(state.free_space_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> InMemorySearchBackend {
        let backend = InMemorySearchBackend::new();
        for id in 1..=3u64 {
            backend
                .index_document(
                    "main",
                    format!("issue_{}", id),
                    Some("project_1"),
                    json!({ "type": "issue", "id": id, "schema_version": 2300 }),
                )
                .await;
        }
        backend
    }

    #[tokio::test]
    async fn test_delete_task_stays_running_until_completed() {
        let backend = seeded().await;
        let response = backend
            .delete_by_query("main", &Query::doc_type("issue"))
            .await
            .unwrap();
        let task_id = response.task.unwrap();

        assert!(!backend.task_status(&task_id).await.unwrap().completed);
        assert_eq!(backend.count("main", &Query::MatchAll).await.unwrap(), 3);

        backend.complete_task(&task_id).await.unwrap();
        let status = backend.task_status(&task_id).await.unwrap();
        assert!(status.completed);
        assert!(status.error.is_none());
        assert_eq!(backend.count("main", &Query::MatchAll).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_task_reports_error_and_keeps_documents() {
        let backend = seeded().await;
        let task_id = backend
            .delete_by_query("main", &Query::MatchAll)
            .await
            .unwrap()
            .task
            .unwrap();
        backend
            .fail_task(&task_id, json!({ "type": "search_phase_execution_exception" }))
            .await
            .unwrap();

        let status = backend.task_status(&task_id).await.unwrap();
        assert!(status.completed);
        assert!(status.error.is_some());
        assert_eq!(backend.count("main", &Query::MatchAll).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_search_sorts_and_limits() {
        let backend = seeded().await;
        let hits = backend
            .search(
                "main",
                &SearchRequest::new(Query::MatchAll, 2)
                    .sort_by("id")
                    .source_fields(["id"]),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "issue_1");
        assert_eq!(hits[0].routing.as_deref(), Some("project_1"));
        assert!(hits[0].source.get("type").is_none());
    }

    #[tokio::test]
    async fn test_update_by_query_respects_max_docs() {
        let backend = seeded().await;
        let response = backend
            .update_by_query(
                "main",
                &Query::missing("hidden"),
                &Script::set_field("hidden", false),
                UpdateByQueryOptions {
                    max_docs: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.updated, 2);
        assert_eq!(backend.count("main", &Query::missing("hidden")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let backend = seeded().await;
        backend
            .fail_next("count", MigrationError::transient("timed out"))
            .await;
        assert!(backend.count("main", &Query::MatchAll).await.is_err());
        assert_eq!(backend.count("main", &Query::MatchAll).await.unwrap(), 3);
        assert_eq!(backend.call_count("count").await, 2);
    }

    #[tokio::test]
    async fn test_missing_index_is_rejected() {
        let backend = InMemorySearchBackend::new();
        let err = backend.count("nope", &Query::MatchAll).await.unwrap_err();
        assert!(matches!(err, MigrationError::BackendRejected { status: 404, .. }));
    }
}
