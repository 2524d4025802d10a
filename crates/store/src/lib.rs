//! Document-store collaborator for the sightings query layer.
//!
//! The query layer only speaks in BSON filters and aggregation pipelines;
//! [`SightingStore`] is the seam between it and whatever executes them.
//! [`MongoStore`] talks to a MongoDB deployment, [`MemoryStore`] evaluates the
//! same expressions in-process for tests and local tooling.

use async_trait::async_trait;
use bson::Document;

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::{MongoStore, MongoStoreConfig};

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Driver(mongodb::error::Error),
    Unsupported(String),
    Evaluation(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::Driver(err) => write!(f, "store driver error: {}", err),
            StoreError::Unsupported(what) => write!(f, "unsupported store expression: {}", what),
            StoreError::Evaluation(what) => write!(f, "store evaluation failed: {}", what),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(value: mongodb::error::Error) -> Self {
        StoreError::Driver(value)
    }
}

/// A `find` request. `limit: None` leaves the result unbounded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub skip: u64,
    pub limit: Option<u64>,
    pub sort: Option<Document>,
}

impl FindQuery {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// Read interface the query layer runs against. Implementations must be
/// safe to share across concurrently handled requests.
#[async_trait]
pub trait SightingStore: Send + Sync {
    async fn find(&self, query: FindQuery) -> Result<Vec<Document>, StoreError>;

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, StoreError>;

    /// Counts matching documents, stopping early once `limit` is reached.
    async fn count(&self, filter: Document, limit: Option<u64>) -> Result<u64, StoreError>;

    /// Idempotent ascending single-field index.
    async fn create_index(&self, field: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Batch write interface used only by the offline loader.
#[async_trait]
pub trait BulkWriter: Send + Sync {
    /// Unordered insert; returns the number of documents written.
    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError>;

    async fn delete_all(&self) -> Result<u64, StoreError>;
}

/// Creates each index, logging and skipping failures.
pub async fn ensure_indexes<S>(store: &S, fields: &[&str]) -> usize
where
    S: SightingStore + ?Sized,
{
    let mut created = 0;
    for field in fields {
        match store.create_index(field).await {
            Ok(()) => created += 1,
            Err(err) => {
                tracing::warn!(field = %field, error = %err, "index creation failed; continuing");
            }
        }
    }
    created
}
