use crate::core::{MigrationError, Result};
use crate::migration::{MigrationScope, Strategy};
use crate::queue::ReindexRequest;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{Level, event};

/// Hands the work to an out-of-band reindexing task and is done once the
/// request has been recorded.
#[derive(Debug, Clone, Default)]
pub struct Deferred {
    /// Indices or record types the external task should rebuild.
    pub targets: Vec<String>,
}

impl Deferred {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Strategy for Deferred {
    fn kind(&self) -> &'static str {
        "deferred"
    }

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        let mut state = scope.load_state().await?;
        if state.reindex_requested_at.is_some() {
            return Ok(());
        }

        let requested_at = Utc::now();
        scope
            .ctx()
            .reindex_sink()?
            .request_reindex(ReindexRequest {
                migration: scope.name().to_string(),
                targets: self.targets.clone(),
                requested_at,
            })
            .await?;

        state.reindex_requested_at = Some(requested_at);
        scope.save_state(&state).await?;
        event!(
            Level::INFO,
            migration = %scope.name(),
            targets = ?self.targets,
            "reindexing task requested"
        );
        Ok(())
    }

    async fn completed(&self, scope: &MigrationScope<'_>) -> Result<bool> {
        Ok(scope
            .existing_state()
            .await?
            .is_some_and(|state| state.reindex_requested_at.is_some()))
    }
}

/// Placeholder for a migration whose implementation was removed.
///
/// Never completes and refuses to run, so deployments that still have it
/// pending stop instead of silently skipping it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deprecated;

#[async_trait]
impl Strategy for Deprecated {
    fn kind(&self) -> &'static str {
        "deprecated"
    }

    async fn migrate(&self, scope: &MigrationScope<'_>) -> Result<()> {
        event!(
            Level::ERROR,
            migration = %scope.name(),
            version = %scope.version(),
            "obsolete migration invoked"
        );
        Err(MigrationError::Obsolete {
            migration: scope.name().to_string(),
        })
    }

    async fn completed(&self, _scope: &MigrationScope<'_>) -> Result<bool> {
        Ok(false)
    }

    fn obsolete(&self) -> bool {
        true
    }
}
