use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use shardwork_application::DocumentStore;
use shardwork_core::{AppError, AppResult};
use shardwork_domain::{DocumentKey, Filter, Update};
use tokio::sync::RwLock;

/// In-memory document store.
///
/// Each collection is kept ordered by key, and every operation takes the
/// collection lock, so conditional updates are atomic.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<DocumentKey, Value>>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in one collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Inserts or replaces documents without conflict checks.
    pub async fn upsert_many(&self, collection: &str, documents: Vec<Value>) -> AppResult<()> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_owned()).or_default();

        for document in documents {
            let key = document_key(collection, &document)?;
            stored.insert(key, document);
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Value>> {
        let collections = self.collections.read().await;

        Ok(collections.get(collection).and_then(|stored| {
            stored
                .values()
                .find(|document| filter.matches(document))
                .cloned()
        }))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> AppResult<u64> {
        let mut collections = self.collections.write().await;
        let Some(document) = collections
            .get_mut(collection)
            .and_then(|stored| stored.values_mut().find(|document| filter.matches(document)))
        else {
            return Ok(0);
        };

        let mut updated = document.clone();
        update.apply(&mut updated)?;
        *document = updated;

        Ok(1)
    }

    async fn insert_one(&self, collection: &str, document: Value) -> AppResult<()> {
        let key = document_key(collection, &document)?;
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_owned()).or_default();

        if stored.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "document '{key}' already exists in collection '{collection}'"
            )));
        }

        stored.insert(key, document);
        Ok(())
    }

    async fn find_range(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> AppResult<Vec<Value>> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(collection)
            .map(|stored| {
                stored
                    .values()
                    .filter(|document| filter.matches(document))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn document_key(collection: &str, document: &Value) -> AppResult<DocumentKey> {
    DocumentKey::of_document(document).ok_or_else(|| {
        AppError::Validation(format!(
            "document in collection '{collection}' needs an integer or string _id"
        ))
    })
}

#[cfg(test)]
mod tests;
