//! Reusable migration shapes.

pub mod backfill;
pub mod create_index;
pub mod delete_stale;
pub mod full_reindex;
pub mod markers;
pub mod schema_version;

pub use backfill::{BackfillField, BackfillMode};
pub use create_index::{CreateStandaloneIndex, validate_index_name};
pub use delete_stale::DeleteStaleBySchemaVersion;
pub use full_reindex::FullReindex;
pub use markers::{Deferred, Deprecated};
pub use schema_version::ReindexBySchemaVersion;
