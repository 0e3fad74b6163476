//! Per-version resumable migration state.

pub mod file;
pub mod store;

use crate::core::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file::FileStateStore;
pub use store::{InMemoryStateStore, MigrationStateStore};

/// Persisted record of one migration version.
///
/// Strategies own the progress fields (`current_id`, `max_id`, `task_id`,
/// `documents_remaining`, `reindex_requested_at`, `index_created_at`); the
/// executor owns the scheduling fields (`last_invoked_at`, `failed_attempts`,
/// `halted*`, `completed_at`). `batch_size` is an operator override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reindex_requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_invoked_at: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub halted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationState {
    pub fn halt(&mut self, reason: impl Into<String>) {
        self.halted = true;
        self.halted_reason = Some(reason.into());
    }

    /// Clears the halt and the retry counter so the executor picks the version up again.
    pub fn resume(&mut self) {
        self.halted = false;
        self.halted_reason = None;
        self.failed_attempts = 0;
    }
}
