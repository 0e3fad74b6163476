use super::MigrationScope;
use crate::core::{MigrationError, Query, Result};
use async_trait::async_trait;
use tracing::{Level, event};

/// Pre-flight check run by the executor before each invocation.
///
/// A failing check halts the migration; it is never retried automatically.
#[async_trait]
pub trait Precondition: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, scope: &MigrationScope<'_>) -> Result<()>;
}

/// Refuses to start when the cluster lacks room for the documents a
/// migration is about to (re)write.
pub struct SpaceRequirement {
    /// Documents the migration will rewrite.
    pub query: Query,
    pub index: Option<String>,
}

impl SpaceRequirement {
    pub fn new(query: Query) -> Self {
        Self { query, index: None }
    }

    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Zero without index limiting; otherwise the share of the index size
    /// taken by matching documents.
    pub async fn required_bytes(&self, scope: &MigrationScope<'_>) -> Result<u64> {
        if !scope.index_limiting_enabled() {
            return Ok(0);
        }

        let index = scope.index(self.index.as_deref());
        let stats = scope.client().index_stats(index).await?;
        if stats.document_count == 0 {
            return Ok(0);
        }

        let matching = scope.client().count(index, &self.query).await?;
        let required = (stats.size_in_bytes as u128 * matching as u128) / stats.document_count as u128;
        Ok(required.min(u64::MAX as u128) as u64)
    }
}

#[async_trait]
impl Precondition for SpaceRequirement {
    fn name(&self) -> &'static str {
        "space_requirement"
    }

    async fn check(&self, scope: &MigrationScope<'_>) -> Result<()> {
        let required_bytes = self.required_bytes(scope).await?;
        if required_bytes == 0 {
            return Ok(());
        }

        let available_bytes = scope.client().free_space_bytes().await?;
        event!(
            Level::DEBUG,
            migration = %scope.name(),
            required_bytes,
            available_bytes,
            "space requirement evaluated"
        );
        if required_bytes > available_bytes {
            return Err(MigrationError::InsufficientSpace {
                migration: scope.name().to_string(),
                required_bytes,
                available_bytes,
            });
        }
        Ok(())
    }
}
