use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use shardwork_core::{AppError, AppResult};
use shardwork_domain::{DocumentKey, FilterTemplate};
use tracing::debug;

use crate::store_ports::DocumentStore;

/// One document read from a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorDocument {
    /// Primary key.
    pub key: DocumentKey,
    /// Full stored document.
    pub payload: Value,
}

/// Why a partition scan stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boundary {
    /// The partition has no documents after the last key.
    Eof,
    /// The store returned data the cursor cannot page through.
    Error(String),
}

/// Event produced by [`PartitionCursor::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum CursorEvent {
    /// Next document in ascending key order.
    Document(CursorDocument),
    /// End of the scan.
    Boundary(Boundary),
}

impl CursorEvent {
    /// Returns true for document events.
    #[must_use]
    pub fn is_document(&self) -> bool {
        matches!(self, Self::Document(_))
    }

    /// Returns true for the end-of-partition boundary.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Boundary(Boundary::Eof))
    }
}

/// Resumable keyset-paginated reader over one partition.
///
/// Pages are loaded with `_id > last_key` bound into the partition's
/// filter template, so a cursor reopened from a committed key yields
/// exactly the documents after it.
pub struct PartitionCursor {
    store: Arc<dyn DocumentStore>,
    collection: String,
    template: FilterTemplate,
    batch_size: usize,
    buffer: VecDeque<CursorDocument>,
    last_key: Option<DocumentKey>,
    boundary: Option<Boundary>,
}

impl PartitionCursor {
    /// Opens a cursor after `resume_key` and loads the first page.
    pub async fn query(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        template: FilterTemplate,
        resume_key: Option<DocumentKey>,
        batch_size: usize,
    ) -> AppResult<Self> {
        if batch_size == 0 {
            return Err(AppError::Validation(
                "cursor batch_size must be greater than zero".to_owned(),
            ));
        }

        let mut cursor = Self {
            store,
            collection: collection.into(),
            template,
            batch_size,
            buffer: VecDeque::new(),
            last_key: resume_key,
            boundary: None,
        };
        cursor.load_page().await?;
        Ok(cursor)
    }

    /// Returns the key of the last document handed out, or the resume key.
    #[must_use]
    pub fn last_key(&self) -> Option<&DocumentKey> {
        self.last_key.as_ref()
    }

    /// Returns the next event, loading the next page when the buffer is empty.
    ///
    /// Once a boundary was returned every further call returns it again.
    pub async fn next(&mut self) -> AppResult<CursorEvent> {
        if self.buffer.is_empty() && self.boundary.is_none() {
            self.load_page().await?;
        }

        if let Some(document) = self.buffer.pop_front() {
            self.last_key = Some(document.key.clone());
            return Ok(CursorEvent::Document(document));
        }

        Ok(CursorEvent::Boundary(
            self.boundary.clone().unwrap_or(Boundary::Eof),
        ))
    }

    async fn load_page(&mut self) -> AppResult<()> {
        let filter = self.template.bind(self.last_key.as_ref());
        let page = self
            .store
            .find_range(&self.collection, &filter, self.batch_size)
            .await?;

        debug!(
            collection = %self.collection,
            resume_key = ?self.last_key,
            loaded = page.len(),
            "partition page loaded"
        );

        if page.is_empty() {
            self.boundary = Some(Boundary::Eof);
            return Ok(());
        }

        let mut previous = self.last_key.clone();
        for payload in page {
            let Some(key) = DocumentKey::of_document(&payload) else {
                self.boundary = Some(Boundary::Error(format!(
                    "document without a usable _id in collection '{}'",
                    self.collection
                )));
                break;
            };

            if previous.as_ref().is_some_and(|previous| &key <= previous) {
                self.boundary = Some(Boundary::Error(format!(
                    "collection '{}' returned key '{key}' out of ascending order",
                    self.collection
                )));
                break;
            }

            previous = Some(key.clone());
            self.buffer.push_back(CursorDocument { key, payload });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use shardwork_domain::{DocumentKey, FilterTemplate};

    use super::{CursorEvent, PartitionCursor};
    use crate::store_ports::DocumentStore;
    use crate::test_support::FakeDocumentStore;

    async fn seeded_store(count: i64) -> Arc<FakeDocumentStore> {
        let store = Arc::new(FakeDocumentStore::default());
        store
            .seed(
                "events",
                (1..=count)
                    .map(|id| json!({"_id": id, "region": if id % 2 == 0 { "eu" } else { "us" }}))
                    .collect(),
            )
            .await;
        store
    }

    async fn drain(cursor: &mut PartitionCursor) -> (Vec<DocumentKey>, CursorEvent) {
        let mut keys = Vec::new();
        loop {
            match cursor.next().await {
                Ok(CursorEvent::Document(document)) => keys.push(document.key),
                Ok(boundary) => return (keys, boundary),
                Err(error) => panic!("cursor failed: {error}"),
            }
        }
    }

    #[tokio::test]
    async fn drains_every_document_in_key_order_then_eof() {
        for batch_size in [1, 3, 7, 10, 50] {
            let store = seeded_store(10).await;
            let dyn_store: Arc<dyn DocumentStore> = store.clone();
            let mut cursor =
                PartitionCursor::query(dyn_store, "events", FilterTemplate::keyset(), None, batch_size)
                    .await
                    .unwrap_or_else(|_| unreachable!());

            let (keys, boundary) = drain(&mut cursor).await;
            assert_eq!(keys, (1..=10).map(DocumentKey::Int).collect::<Vec<_>>());
            assert!(boundary.is_eof());
            assert!(cursor.next().await.map(|event| event.is_eof()).unwrap_or(false));
        }
    }

    #[tokio::test]
    async fn resumes_strictly_after_committed_key() {
        let store: Arc<dyn DocumentStore> = seeded_store(10).await;
        let mut cursor = PartitionCursor::query(
            store,
            "events",
            FilterTemplate::keyset(),
            Some(DocumentKey::Int(6)),
            3,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

        let (keys, _) = drain(&mut cursor).await;
        assert_eq!(keys, vec![7, 8, 9, 10].into_iter().map(DocumentKey::Int).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn template_predicates_filter_the_partition() {
        let store: Arc<dyn DocumentStore> = seeded_store(10).await;
        let mut cursor = PartitionCursor::query(
            store,
            "events",
            FilterTemplate::keyset().eq("region", "eu"),
            None,
            2,
        )
        .await
        .unwrap_or_else(|_| unreachable!());

        let (keys, _) = drain(&mut cursor).await;
        assert_eq!(keys, vec![2, 4, 6, 8, 10].into_iter().map(DocumentKey::Int).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_partition_is_immediately_eof() {
        let store = Arc::new(FakeDocumentStore::default());
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let mut cursor =
            PartitionCursor::query(dyn_store, "events", FilterTemplate::keyset(), None, 5)
                .await
                .unwrap_or_else(|_| unreachable!());

        assert!(cursor.next().await.map(|event| event.is_eof()).unwrap_or(false));
        assert_eq!(store.range_calls(), 1);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let store: Arc<dyn DocumentStore> = Arc::new(FakeDocumentStore::default());
        let cursor =
            PartitionCursor::query(store, "events", FilterTemplate::keyset(), None, 0).await;
        assert!(cursor.is_err());
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let store = seeded_store(3).await;
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let mut cursor =
            PartitionCursor::query(dyn_store, "events", FilterTemplate::keyset(), None, 2)
                .await
                .unwrap_or_else(|_| unreachable!());

        store.fail_ranges(true);
        assert!(cursor.next().await.is_ok());
        assert!(cursor.next().await.is_ok());
        assert!(cursor.next().await.is_err());
    }
}
