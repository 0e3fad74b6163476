use super::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordering key of a migration, usually a `YYYYMMDDHHMMSS` timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationVersion(pub u64);

impl MigrationVersion {
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MigrationVersion {
    fn from(version: u64) -> Self {
        Self(version)
    }
}

impl FromStr for MigrationVersion {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| MigrationError::Config(format!("Invalid migration version '{}': {}", s, e)))
    }
}

/// Opaque handle of a long-running backend task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical document the indexing pipeline should (re)compute.
///
/// The queue form is `"{RecordType} {record_id} {document_id} {routing}"`,
/// with the routing segment omitted for unrouted documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentReference {
    pub record_type: String,
    pub record_id: u64,
    pub document_id: String,
    pub routing: Option<String>,
}

impl DocumentReference {
    /// Builds a reference whose document id follows the `{type}_{id}` convention.
    pub fn new(record_type: impl Into<String>, record_id: u64) -> Self {
        let record_type = record_type.into();
        let document_id = format!("{}_{}", to_document_type(&record_type), record_id);
        Self {
            record_type,
            record_id,
            document_id,
            routing: None,
        }
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = document_id.into();
        self
    }

    /// The `type` value stored inside indexed documents for this record type.
    pub fn document_type(&self) -> String {
        to_document_type(&self.record_type)
    }
}

impl fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.record_type, self.record_id, self.document_id)?;
        if let Some(routing) = &self.routing {
            write!(f, " {}", routing)?;
        }
        Ok(())
    }
}

impl FromStr for DocumentReference {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(MigrationError::InvalidDocumentReference(s.to_string()));
        }

        let record_id = parts[1]
            .parse::<u64>()
            .map_err(|_| MigrationError::InvalidDocumentReference(s.to_string()))?;

        Ok(Self {
            record_type: parts[0].to_string(),
            record_id,
            document_id: parts[2].to_string(),
            routing: parts.get(3).map(|r| r.to_string()),
        })
    }
}

/// `MergeRequest` -> `merge_request`
pub fn to_document_type(record_type: &str) -> String {
    let mut out = String::with_capacity(record_type.len() + 4);
    for (i, ch) in record_type.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == ':' {
            // Namespaced record types (`Ci::Build`) collapse to one segment.
            continue;
        } else {
            out.push(ch);
        }
    }
    out
}

/// `merge_request` -> `MergeRequest`
pub fn to_record_type(document_type: &str) -> String {
    document_type
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_reference_queue_form() {
        let reference = DocumentReference::new("MergeRequest", 42).with_routing("project_7");
        assert_eq!(reference.document_id, "merge_request_42");
        assert_eq!(reference.to_string(), "MergeRequest 42 merge_request_42 project_7");

        let parsed: DocumentReference = "MergeRequest 42 merge_request_42 project_7".parse().unwrap();
        assert_eq!(parsed, reference);
    }

    #[test]
    fn test_document_reference_without_routing() {
        let parsed: DocumentReference = "Issue 5 issue_5".parse().unwrap();
        assert_eq!(parsed.routing, None);
        assert_eq!(parsed.record_id, 5);
    }

    #[test]
    fn test_document_reference_rejects_garbage() {
        assert!("Issue".parse::<DocumentReference>().is_err());
        assert!("Issue five issue_5".parse::<DocumentReference>().is_err());
        assert!("a 1 b c d".parse::<DocumentReference>().is_err());
    }

    #[test]
    fn test_type_name_conversions() {
        assert_eq!(to_document_type("Issue"), "issue");
        assert_eq!(to_document_type("MergeRequest"), "merge_request");
        assert_eq!(to_record_type("merge_request"), "MergeRequest");
        assert_eq!(to_record_type("note"), "Note");
    }

    #[test]
    fn test_version_parsing_and_order() {
        let a: MigrationVersion = "20230101000000".parse().unwrap();
        let b = MigrationVersion::new(20230201000000);
        assert!(a < b);
        assert!("v1".parse::<MigrationVersion>().is_err());
    }
}
