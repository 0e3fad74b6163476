//! Source-of-truth records owned by the host application, and the
//! index-limiting policy deciding which of them belong in the index.

use crate::core::{DocumentReference, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

/// Primary key and shard routing of one source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: u64,
    pub routing: Option<String>,
}

impl SourceRecord {
    pub fn new(id: u64) -> Self {
        Self { id, routing: None }
    }

    pub fn routed(id: u64, routing: impl Into<String>) -> Self {
        Self {
            id,
            routing: Some(routing.into()),
        }
    }

    pub fn document_reference(&self, record_type: &str) -> DocumentReference {
        let reference = DocumentReference::new(record_type, self.id);
        match &self.routing {
            Some(routing) => reference.with_routing(routing.clone()),
            None => reference,
        }
    }
}

/// Read access to the application's records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Highest primary key of `record_type`, `None` for an empty table.
    async fn max_id(&self, record_type: &str) -> Result<Option<u64>>;

    /// Up to `limit` records with `id > after`, ascending, in one bounded query.
    async fn records_after(&self, record_type: &str, after: u64, limit: usize) -> Result<Vec<SourceRecord>>;
}

/// Decides whether a record should be present in the index.
pub trait IndexingPolicy: Send + Sync {
    fn should_index(&self, record_type: &str, record: &SourceRecord) -> bool;

    /// Whether the policy restricts indexing at all.
    fn is_limiting(&self) -> bool {
        false
    }
}

/// Index everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexEverything;

impl IndexingPolicy for IndexEverything {
    fn should_index(&self, _record_type: &str, _record: &SourceRecord) -> bool {
        true
    }
}

/// Only records routed to an allowed key (project or namespace) are indexed.
#[derive(Debug, Clone, Default)]
pub struct RoutingAllowList {
    allowed: HashSet<String>,
}

impl RoutingAllowList {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl IndexingPolicy for RoutingAllowList {
    fn should_index(&self, _record_type: &str, record: &SourceRecord) -> bool {
        record
            .routing
            .as_ref()
            .is_some_and(|routing| self.allowed.contains(routing))
    }

    fn is_limiting(&self) -> bool {
        true
    }
}

/// Record tables held in memory, keyed by record type.
#[derive(Default)]
pub struct InMemoryRecordSource {
    tables: RwLock<BTreeMap<String, BTreeMap<u64, SourceRecord>>>,
    queries: RwLock<usize>,
}

impl InMemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record_type: &str, record: SourceRecord) {
        self.tables
            .write()
            .await
            .entry(record_type.to_string())
            .or_default()
            .insert(record.id, record);
    }

    /// Number of `records_after` queries served.
    pub async fn query_count(&self) -> usize {
        *self.queries.read().await
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn max_id(&self, record_type: &str) -> Result<Option<u64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(record_type)
            .and_then(|table| table.keys().next_back().copied()))
    }

    async fn records_after(&self, record_type: &str, after: u64, limit: usize) -> Result<Vec<SourceRecord>> {
        *self.queries.write().await += 1;
        let tables = self.tables.read().await;
        Ok(tables
            .get(record_type)
            .map(|table| {
                table
                    .range(after.saturating_add(1)..)
                    .take(limit)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_after_is_bounded_and_ordered() {
        let source = InMemoryRecordSource::new();
        for id in [5, 1, 3, 9, 7] {
            source.insert("Issue", SourceRecord::new(id)).await;
        }

        let page = source.records_after("Issue", 1, 2).await.unwrap();
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 5]);
        assert_eq!(source.max_id("Issue").await.unwrap(), Some(9));
        assert_eq!(source.max_id("Note").await.unwrap(), None);
        assert_eq!(source.query_count().await, 1);
    }

    #[test]
    fn test_routing_allow_list() {
        let policy = RoutingAllowList::new(["project_1"]);
        assert!(policy.is_limiting());
        assert!(policy.should_index("Issue", &SourceRecord::routed(1, "project_1")));
        assert!(!policy.should_index("Issue", &SourceRecord::routed(2, "project_2")));
        assert!(!policy.should_index("Issue", &SourceRecord::new(3)));
        assert!(IndexEverything.should_index("Issue", &SourceRecord::new(3)));
    }

    #[test]
    fn test_record_reference_carries_routing() {
        let reference = SourceRecord::routed(4, "project_9").document_reference("Issue");
        assert_eq!(reference.to_string(), "Issue 4 issue_4 project_9");
    }
}
