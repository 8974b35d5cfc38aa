use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use shardwork_core::{AppError, AppResult};
use shardwork_domain::{DocumentKey, Filter, Update};
use tokio::sync::Mutex;

use crate::store_ports::DocumentStore;

#[derive(Default)]
pub(crate) struct FakeDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<DocumentKey, Value>>>,
    fail_ranges: AtomicBool,
    range_calls: AtomicUsize,
    fail_next_update: Mutex<Option<String>>,
}

impl FakeDocumentStore {
    pub(crate) async fn seed(&self, collection: &str, documents: Vec<Value>) {
        let mut collections = self.collections.lock().await;
        let stored = collections.entry(collection.to_owned()).or_default();
        for document in documents {
            let key = DocumentKey::of_document(&document).unwrap_or_else(|| unreachable!());
            stored.insert(key, document);
        }
    }

    pub(crate) async fn get(&self, collection: &str, key: &DocumentKey) -> Option<Value> {
        self.collections
            .lock()
            .await
            .get(collection)
            .and_then(|stored| stored.get(key))
            .cloned()
    }

    pub(crate) async fn put(&self, collection: &str, document: Value) {
        self.seed(collection, vec![document]).await;
    }

    pub(crate) fn fail_ranges(&self, fail: bool) {
        self.fail_ranges.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `update_one` against `collection` fail once.
    pub(crate) async fn fail_next_update(&self, collection: &str) {
        *self.fail_next_update.lock().await = Some(collection.to_owned());
    }

    pub(crate) fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Value>> {
        Ok(self.collections.lock().await.get(collection).and_then(|stored| {
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
        {
            let mut fail_next = self.fail_next_update.lock().await;
            if fail_next.as_deref() == Some(collection) {
                *fail_next = None;
                return Err(AppError::Store(format!("{collection} update unavailable")));
            }
        }

        let mut collections = self.collections.lock().await;
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
        let key = DocumentKey::of_document(&document)
            .ok_or_else(|| AppError::Validation("document has no _id".to_owned()))?;
        let mut collections = self.collections.lock().await;
        let stored = collections.entry(collection.to_owned()).or_default();
        if stored.contains_key(&key) {
            return Err(AppError::Conflict(format!("duplicate key '{key}'")));
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
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ranges.load(Ordering::SeqCst) {
            return Err(AppError::Store("range query unavailable".to_owned()));
        }

        Ok(self
            .collections
            .lock()
            .await
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

pub(crate) fn sample_task(
    task_id: &str,
    job_id: &str,
    collection: &str,
    templates: Vec<shardwork_domain::FilterTemplate>,
    stream_type: shardwork_domain::StreamType,
) -> shardwork_domain::Task {
    shardwork_domain::Task::new(
        task_id,
        job_id,
        stream_type,
        shardwork_domain::TaskProperties {
            collection: collection.to_owned(),
            ..shardwork_domain::TaskProperties::default()
        },
        templates,
    )
    .unwrap_or_else(|_| unreachable!())
}

pub(crate) fn region_templates(regions: &[&str]) -> Vec<shardwork_domain::FilterTemplate> {
    regions
        .iter()
        .map(|region| shardwork_domain::FilterTemplate::keyset().eq("region", *region))
        .collect()
}
