//! In-process store.
//!
//! Evaluates the subset of query and pipeline operators the sightings query
//! layer emits, over documents held in memory. Anything outside that subset is
//! reported as [`StoreError::Unsupported`] rather than silently ignored.

use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::Document;

use crate::{BulkWriter, FindQuery, SightingStore, StoreError};

mod eval;

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<Vec<Document>>,
    indexes: RwLock<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, assigning an ObjectId to documents without `_id`.
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        {
            let mut guard = write_guard(&store.documents);
            guard.extend(documents.into_iter().map(with_object_id));
        }
        store
    }

    pub fn len(&self) -> usize {
        read_guard(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indexed_fields(&self) -> Vec<String> {
        read_guard(&self.indexes).iter().cloned().collect()
    }

    fn snapshot(&self) -> Vec<Document> {
        read_guard(&self.documents).clone()
    }
}

fn read_guard<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_guard<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn with_object_id(mut document: Document) -> Document {
    if !document.contains_key("_id") {
        document.insert("_id", ObjectId::new());
    }
    document
}

#[async_trait]
impl SightingStore for MemoryStore {
    async fn find(&self, query: FindQuery) -> Result<Vec<Document>, StoreError> {
        let guard = read_guard(&self.documents);
        let mut matched = Vec::new();
        for document in guard.iter() {
            if eval::matches(document, &query.filter)? {
                matched.push(document.clone());
            }
        }
        drop(guard);

        if let Some(sort) = &query.sort {
            eval::sort_documents(&mut matched, sort)?;
        }

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(skip).take(limit).collect())
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        eval::run_pipeline(self.snapshot(), &pipeline)
    }

    async fn count(&self, filter: Document, limit: Option<u64>) -> Result<u64, StoreError> {
        let guard = read_guard(&self.documents);
        let cap = limit.unwrap_or(u64::MAX);
        let mut count = 0;
        for document in guard.iter() {
            if count >= cap {
                break;
            }
            if eval::matches(document, &filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn create_index(&self, field: &str) -> Result<(), StoreError> {
        write_guard(&self.indexes).insert(field.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl BulkWriter for MemoryStore {
    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError> {
        let mut guard = write_guard(&self.documents);
        let before = guard.len();
        guard.extend(documents.into_iter().map(with_object_id));
        Ok((guard.len() - before) as u64)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut guard = write_guard(&self.documents);
        let deleted = guard.len() as u64;
        guard.clear();
        Ok(deleted)
    }
}
