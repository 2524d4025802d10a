use std::time::Duration;

use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, IndexModel};

use crate::{BulkWriter, FindQuery, SightingStore, StoreError};

#[derive(Debug, Clone)]
pub struct MongoStoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub connect_timeout: Duration,
    pub app_name: Option<String>,
}

/// One long-lived client shared by every in-flight request.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: String,
    collection: Collection<Document>,
}

impl MongoStore {
    pub async fn connect(config: &MongoStoreConfig) -> Result<Self, StoreError> {
        let mut options = tokio::time::timeout(
            config.connect_timeout,
            ClientOptions::parse(config.uri.as_str()),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);
        options.app_name = config.app_name.clone();

        let client = Client::with_options(options)?;
        let collection = client
            .database(&config.database)
            .collection::<Document>(&config.collection);

        let store = Self {
            client,
            database: config.database.clone(),
            collection,
        };

        tokio::time::timeout(config.connect_timeout, store.ping())
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(store)
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

#[async_trait]
impl SightingStore for MongoStore {
    async fn find(&self, query: FindQuery) -> Result<Vec<Document>, StoreError> {
        let mut find = self.collection.find(query.filter).skip(query.skip);
        if let Some(limit) = query.limit {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(sort) = query.sort {
            find = find.sort(sort);
        }

        let cursor = find.await?;
        Ok(cursor.try_collect().await?)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        let cursor = self.collection.aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count(&self, filter: Document, limit: Option<u64>) -> Result<u64, StoreError> {
        let mut count = self.collection.count_documents(filter);
        if let Some(limit) = limit {
            count = count.limit(limit);
        }
        Ok(count.await?)
    }

    async fn create_index(&self, field: &str) -> Result<(), StoreError> {
        let index = IndexModel::builder().keys(doc! { field: 1 }).build();
        self.collection.create_index(index).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BulkWriter for MongoStore {
    async fn insert_many(&self, documents: Vec<Document>) -> Result<u64, StoreError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let result = self.collection.insert_many(documents).ordered(false).await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = self.collection.delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }
}
