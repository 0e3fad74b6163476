use super::MigrationState;
use crate::core::{MigrationVersion, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Whole-record persistence of migration state, keyed by version.
#[async_trait]
pub trait MigrationStateStore: Send + Sync {
    async fn load(&self, version: MigrationVersion) -> Result<Option<MigrationState>>;

    /// Replaces the stored record atomically.
    async fn save(&self, version: MigrationVersion, state: &MigrationState) -> Result<()>;

    async fn all(&self) -> Result<BTreeMap<MigrationVersion, MigrationState>>;
}

#[derive(Default)]
pub struct InMemoryStateStore {
    records: RwLock<BTreeMap<MigrationVersion, MigrationState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationStateStore for InMemoryStateStore {
    async fn load(&self, version: MigrationVersion) -> Result<Option<MigrationState>> {
        Ok(self.records.read().await.get(&version).cloned())
    }

    async fn save(&self, version: MigrationVersion, state: &MigrationState) -> Result<()> {
        self.records.write().await.insert(version, state.clone());
        Ok(())
    }

    async fn all(&self) -> Result<BTreeMap<MigrationVersion, MigrationState>> {
        Ok(self.records.read().await.clone())
    }
}
