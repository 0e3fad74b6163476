pub mod error;
pub mod query;
pub mod types;

pub use error::{MigrationError, Result};
pub use query::{Query, SCHEMA_VERSION_FIELD, TYPE_FIELD};
pub use types::{DocumentReference, MigrationVersion, TaskId, to_document_type, to_record_type};
