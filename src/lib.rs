// ============================================================================
// Search Migrations Library
// ============================================================================

//! Versioned, resumable migrations for a search index.
//!
//! Migrations are registered in a [`MigrationRegistry`] and advanced one
//! bounded step at a time by a [`MigrationExecutor`]. Each migration composes
//! a [`MigrationPolicy`] with one of the strategies in
//! [`migration::strategies`].
//!
//! # Examples
//!
//! ```
//! use search_migrations::client::InMemorySearchBackend;
//! use search_migrations::migration::strategies::BackfillField;
//! use search_migrations::queue::InMemoryBookkeepingQueue;
//! use search_migrations::state::InMemoryStateStore;
//! use search_migrations::{
//!     AdvanceOutcome, EngineConfig, Migration, MigrationContext, MigrationExecutor,
//!     MigrationPolicy, MigrationRegistry,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> search_migrations::Result<()> {
//! let backend = Arc::new(InMemorySearchBackend::new());
//! backend
//!     .index_document("main", "issue_1", None, json!({ "type": "issue", "id": 1 }))
//!     .await;
//!
//! let queue = Arc::new(InMemoryBookkeepingQueue::new());
//! let ctx = MigrationContext::builder(EngineConfig::new("http://localhost:9200", "main"))
//!     .client(backend.clone())
//!     .queue(queue.clone())
//!     .states(Arc::new(InMemoryStateStore::new()))
//!     .build()?;
//!
//! let registry = MigrationRegistry::new().with(Migration::new(
//!     MigrationPolicy::new(20240101000000, "backfill_hidden").batched().batch_size(100),
//!     BackfillField::new("Issue", "hidden"),
//! ))?;
//!
//! let executor = MigrationExecutor::new(registry, ctx);
//! let outcome = executor.advance().await?;
//! assert!(matches!(outcome, AdvanceOutcome::Progressed { completed: false, .. }));
//! assert_eq!(queue.total_tracked().await, 1);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod executor;
pub mod migration;
pub mod queue;
pub mod source;
pub mod state;
pub mod task;

pub use client::{HttpSearchClient, InMemorySearchBackend, SearchClient};
pub use config::EngineConfig;
pub use core::{DocumentReference, MigrationError, MigrationVersion, Query, Result, TaskId};
pub use executor::{
    AdvanceOutcome, MigrationExecutor, MigrationRegistry, MigrationStatus, MigrationWorker,
    spawn_migration_worker,
};
pub use migration::{
    Migration, MigrationContext, MigrationPolicy, MigrationScope, Precondition, SkipCondition,
    SkipWhenIndexMissing, SpaceRequirement, Strategy,
};
pub use queue::{BookkeepingQueue, ReindexTaskSink};
pub use source::{IndexingPolicy, RecordSource, SourceRecord};
pub use state::{MigrationState, MigrationStateStore};
