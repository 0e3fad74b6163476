use crate::core::{DocumentReference, MigrationError, Result};
use crate::migration::{MigrationScope, Strategy};
use crate::queue::track_in_batches;
use async_trait::async_trait;
use tracing::{Level, event};

/// Cursor sweep over every record of one type, regardless of what is indexed.
///
/// The sweep target is the highest primary key at the first invocation;
/// records created afterwards reach the index through normal indexing.
#[derive(Debug, Clone)]
pub struct FullReindex {
    pub record_type: String,
    /// Keys loaded per invocation; falls back to the migration's batch size.
    pub limit_per_iteration: Option<usize>,
}

impl FullReindex {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            limit_per_iteration: None,
        }
    }

    pub fn limit_per_iteration(mut self, limit: usize) -> Self {
        self.limit_per_iteration = Some(limit);
        self
    }
}

#[async_trait]
impl Strategy for FullReindex {
    fn kind(&self) -> &'static str {
        "full_reindex"
    }

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        let records = scope.ctx().records()?;
        let mut state = scope.load_state().await?;

        let target = match state.max_id {
            Some(target) => target,
            None => {
                let target = records.max_id(&self.record_type).await?.unwrap_or(0);
                state.max_id = Some(target);
                target
            }
        };
        let cursor = state.current_id.unwrap_or(0);

        if cursor >= target {
            scope.save_state(&state).await?;
            return Ok(());
        }

        let limit = match self.limit_per_iteration {
            Some(limit) => limit,
            None => scope.batch_size(&state).unwrap_or(scope.config().default_batch_size),
        };
        if limit == 0 {
            return Err(scope.escalate(MigrationError::Config(format!(
                "full reindex of {} needs a positive limit per iteration",
                self.record_type
            ))));
        }

        let page = records.records_after(&self.record_type, cursor, limit).await?;

        let mut last_seen = cursor;
        let mut skipped = 0usize;
        let mut references: Vec<DocumentReference> = Vec::with_capacity(page.len());
        for record in page.iter().take_while(|record| record.id <= target) {
            last_seen = record.id;
            if scope.ctx().indexing().should_index(&self.record_type, record) {
                references.push(record.document_reference(&self.record_type));
            } else {
                skipped += 1;
            }
        }

        // A short page, or one that ran past the target, means nothing is left below it.
        if page.len() < limit || page.last().is_some_and(|record| record.id >= target) {
            last_seen = target;
        }

        let tracked = track_in_batches(
            scope.ctx().queue(),
            references,
            scope.config().effective_queue_batch_limit(),
        )
        .await?;

        state.current_id = Some(last_seen);
        scope.save_state(&state).await?;

        event!(
            Level::INFO,
            migration = %scope.name(),
            record_type = %self.record_type,
            tracked,
            skipped,
            current_id = last_seen,
            max_id = target,
            "full reindex iteration finished"
        );
        Ok(())
    }

    async fn completed(&self, scope: &MigrationScope<'_>) -> Result<bool> {
        let state = scope.existing_state().await?.unwrap_or_default();
        let target = match state.max_id {
            Some(target) => target,
            None => scope
                .ctx()
                .records()?
                .max_id(&self.record_type)
                .await?
                .unwrap_or(0),
        };
        Ok(state.current_id.unwrap_or(0) >= target)
    }
}
