//! Outbound collaborators: the bookkeeping queue that re-indexes documents, and
//! the sink for out-of-band reindexing tasks.

use crate::config::QUEUE_BATCH_LIMIT;
use crate::core::{DocumentReference, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Buffer consumed by the indexing pipeline. Delivery is fire-and-forget.
#[async_trait]
pub trait BookkeepingQueue: Send + Sync {
    /// Accepts at most [`QUEUE_BATCH_LIMIT`] references per call.
    async fn track(&self, references: Vec<DocumentReference>) -> Result<()>;
}

/// Pushes `references` in chunks of at most `batch_limit` (itself capped at 100).
///
/// Returns the number of references enqueued.
pub async fn track_in_batches(
    queue: &dyn BookkeepingQueue,
    references: Vec<DocumentReference>,
    batch_limit: usize,
) -> Result<usize> {
    let limit = batch_limit.clamp(1, QUEUE_BATCH_LIMIT);
    let total = references.len();
    let mut remaining = references.into_iter().peekable();
    while remaining.peek().is_some() {
        let chunk: Vec<DocumentReference> = remaining.by_ref().take(limit).collect();
        queue.track(chunk).await?;
    }
    Ok(total)
}

/// A request for a full, out-of-band rebuild of the search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexRequest {
    pub migration: String,
    pub targets: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

/// Receives reindexing tasks whose progress is tracked outside this engine.
#[async_trait]
pub trait ReindexTaskSink: Send + Sync {
    async fn request_reindex(&self, request: ReindexRequest) -> Result<()>;
}

/// Queue that keeps every push, for embedding and tests.
#[derive(Default)]
pub struct InMemoryBookkeepingQueue {
    batches: Mutex<Vec<Vec<DocumentReference>>>,
}

impl InMemoryBookkeepingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes of every push so far.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().await.iter().map(Vec::len).collect()
    }

    pub async fn total_tracked(&self) -> usize {
        self.batches.lock().await.iter().map(Vec::len).sum()
    }

    /// Removes and returns everything pushed so far, flattened in push order.
    pub async fn drain(&self) -> Vec<DocumentReference> {
        let mut batches = self.batches.lock().await;
        batches.drain(..).flatten().collect()
    }
}

#[async_trait]
impl BookkeepingQueue for InMemoryBookkeepingQueue {
    async fn track(&self, references: Vec<DocumentReference>) -> Result<()> {
        if references.is_empty() {
            return Ok(());
        }
        self.batches.lock().await.push(references);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryReindexSink {
    requests: Mutex<Vec<ReindexRequest>>,
}

impl InMemoryReindexSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn requests(&self) -> Vec<ReindexRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ReindexTaskSink for InMemoryReindexSink {
    async fn request_reindex(&self, request: ReindexRequest) -> Result<()> {
        self.requests.lock().await.push(request);
        Ok(())
    }
}
