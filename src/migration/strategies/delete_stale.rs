use crate::core::{MigrationError, Query, Result, to_document_type};
use crate::migration::{MigrationScope, Strategy};
use crate::state::MigrationState;
use crate::task::{AsyncTask, TaskState};
use async_trait::async_trait;
use tracing::{Level, event};

/// Removes documents of one type written under an older schema version with
/// a single asynchronous delete-by-query task.
///
/// Each invocation does one of: nothing (no stale documents), submit a task,
/// or poll the tracked task once. At most one task is in flight per migration.
#[derive(Debug, Clone)]
pub struct DeleteStaleBySchemaVersion {
    pub record_type: String,
    pub current_schema_version: i64,
    pub index: Option<String>,
}

impl DeleteStaleBySchemaVersion {
    pub fn new(record_type: impl Into<String>, current_schema_version: i64) -> Self {
        Self {
            record_type: record_type.into(),
            current_schema_version,
            index: None,
        }
    }

    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn query(&self) -> Query {
        Query::doc_type(to_document_type(&self.record_type))
            .and(Query::schema_version_below(self.current_schema_version))
    }

    async fn submit(&self, scope: &MigrationScope<'_>, index: &str, mut state: MigrationState) -> Result<()> {
        let query = self.query();
        let remaining = scope.client().count(index, &query).await?;
        state.documents_remaining = Some(remaining);

        if remaining == 0 {
            event!(Level::INFO, migration = %scope.name(), "no stale documents to delete");
            return scope.save_state(&state).await;
        }

        let task = scope
            .ctx()
            .tasks()
            .submit_delete(index, &query)
            .await
            .map_err(|err| scope.escalate(err))?;

        state.task_id = Some(task.task_id.clone());
        scope.save_state(&state).await?;

        event!(
            Level::INFO,
            migration = %scope.name(),
            task_id = %task.task_id,
            remaining,
            "stale document deletion started"
        );
        Ok(())
    }

    async fn poll(&self, scope: &MigrationScope<'_>, index: &str, mut state: MigrationState) -> Result<()> {
        let Some(task_id) = state.task_id.clone() else {
            return Ok(());
        };

        let task = match scope.ctx().tasks().poll(&task_id).await {
            Ok(task) => task,
            // Keep the task: the next invocation polls it again.
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                state.task_id = None;
                scope.save_state(&state).await?;
                return Err(scope.escalate(err));
            }
        };

        match task {
            AsyncTask {
                status: TaskState::Running,
                ..
            } => {
                event!(
                    Level::INFO,
                    migration = %scope.name(),
                    task_id = %task_id,
                    "stale document deletion still running"
                );
                Ok(())
            }
            AsyncTask {
                status: TaskState::Failed,
                error_detail,
                ..
            } => {
                state.task_id = None;
                scope.save_state(&state).await?;
                let err = MigrationError::TaskFailed {
                    migration: scope.name().to_string(),
                    task_id: task_id.to_string(),
                    detail: error_detail.unwrap_or_else(|| "unknown failure".to_string()),
                };
                Err(scope.escalate(err))
            }
            AsyncTask {
                status: TaskState::Completed,
                ..
            } => {
                state.task_id = None;
                let remaining = scope.client().count(index, &self.query()).await?;
                state.documents_remaining = Some(remaining);
                scope.save_state(&state).await?;
                event!(
                    Level::INFO,
                    migration = %scope.name(),
                    task_id = %task_id,
                    remaining,
                    "stale document deletion finished"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Strategy for DeleteStaleBySchemaVersion {
    fn kind(&self) -> &'static str {
        "delete_stale_by_schema_version"
    }

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        let index = scope.index(self.index.as_deref());
        let state = scope.load_state().await?;

        if state.task_id.is_some() {
            self.poll(scope, index, state).await
        } else {
            self.submit(scope, index, state).await
        }
    }

    async fn completed(&self, scope: &MigrationScope<'_>) -> Result<bool> {
        let index = scope.index(self.index.as_deref());
        let remaining = scope.client().count(index, &self.query()).await?;
        Ok(remaining == 0)
    }
}
