//! Submission and polling of long-running backend operations.

use crate::client::SearchClient;
use crate::core::{MigrationError, Query, Result, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncTask {
    pub task_id: TaskId,
    pub status: TaskState,
    /// Present only when `status` is `Failed`.
    pub error_detail: Option<String>,
}

impl AsyncTask {
    pub fn is_finished(&self) -> bool {
        self.status != TaskState::Running
    }
}

/// Submit/poll facade over the client's task API.
///
/// One call performs at most one backend request; waiting for completion is
/// left to the caller's next invocation.
#[derive(Clone)]
pub struct TaskTracker {
    client: Arc<dyn SearchClient>,
}

impl TaskTracker {
    pub fn new(client: Arc<dyn SearchClient>) -> Self {
        Self { client }
    }

    /// Starts an asynchronous delete-by-query.
    ///
    /// A submission that comes back with failures and no task is a
    /// data-integrity error: some shards may already have deleted documents.
    pub async fn submit_delete(&self, index: &str, query: &Query) -> Result<AsyncTask> {
        let response = self.client.delete_by_query(index, query).await?;

        if !response.failures.is_empty() {
            return Err(MigrationError::backend(format!(
                "delete_by_query reported failures: {}",
                Value::Array(response.failures)
            )));
        }

        let task_id = response.task.ok_or_else(|| {
            MigrationError::backend("delete_by_query response contained no task id")
        })?;
        event!(Level::INFO, index = %index, task_id = %task_id, "delete task submitted");

        Ok(AsyncTask {
            task_id,
            status: TaskState::Running,
            error_detail: None,
        })
    }

    pub async fn poll(&self, task_id: &TaskId) -> Result<AsyncTask> {
        let response = self.client.task_status(task_id).await?;

        let error_detail = match (&response.error, response.failures.is_empty()) {
            (Some(error), _) => Some(error.to_string()),
            (None, false) => Some(Value::Array(response.failures.clone()).to_string()),
            (None, true) => None,
        };

        // An error fails the task even while the backend still reports it in flight.
        let status = match (&error_detail, response.completed) {
            (Some(_), _) => TaskState::Failed,
            (None, false) => TaskState::Running,
            (None, true) => TaskState::Completed,
        };

        Ok(AsyncTask {
            task_id: task_id.clone(),
            status,
            error_detail: if status == TaskState::Failed { error_detail } else { None },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemorySearchBackend;
    use serde_json::json;

    async fn backend() -> Arc<InMemorySearchBackend> {
        let backend = Arc::new(InMemorySearchBackend::new());
        backend
            .index_document("main", "issue_1", None, json!({ "type": "issue", "id": 1 }))
            .await;
        backend
    }

    #[tokio::test]
    async fn test_submit_then_poll_lifecycle() {
        let backend = backend().await;
        let tracker = TaskTracker::new(backend.clone());

        let task = tracker.submit_delete("main", &Query::MatchAll).await.unwrap();
        assert_eq!(task.status, TaskState::Running);

        let polled = tracker.poll(&task.task_id).await.unwrap();
        assert!(!polled.is_finished());

        backend.complete_task(&task.task_id).await.unwrap();
        let polled = tracker.poll(&task.task_id).await.unwrap();
        assert_eq!(polled.status, TaskState::Completed);
        assert_eq!(polled.error_detail, None);
    }

    #[tokio::test]
    async fn test_poll_reports_failure_detail() {
        let backend = backend().await;
        let tracker = TaskTracker::new(backend.clone());
        let task = tracker.submit_delete("main", &Query::MatchAll).await.unwrap();
        backend
            .fail_task(&task.task_id, json!({ "reason": "node left" }))
            .await
            .unwrap();

        let polled = tracker.poll(&task.task_id).await.unwrap();
        assert_eq!(polled.status, TaskState::Failed);
        assert!(polled.error_detail.unwrap().contains("node left"));
    }

    #[tokio::test]
    async fn test_error_on_unfinished_task_is_a_failure() {
        let backend = backend().await;
        let tracker = TaskTracker::new(backend.clone());
        let task = tracker.submit_delete("main", &Query::MatchAll).await.unwrap();
        backend
            .fail_task_in_flight(&task.task_id, json!({ "type": "node_left" }))
            .await
            .unwrap();

        let polled = tracker.poll(&task.task_id).await.unwrap();
        assert_eq!(polled.status, TaskState::Failed);
        assert!(polled.error_detail.unwrap().contains("node_left"));
    }

    #[tokio::test]
    async fn test_rejected_submission_is_an_error() {
        let backend = backend().await;
        backend
            .reject_next_delete(vec![json!({ "shard": 0, "reason": "version conflict" })])
            .await;
        let tracker = TaskTracker::new(backend.clone());

        let err = tracker.submit_delete("main", &Query::MatchAll).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
