use async_trait::async_trait;
use serde_json::Value;
use shardwork_core::AppResult;
use shardwork_domain::{Filter, Update};

/// Document store port consumed by the scheduler.
///
/// Every stored document carries its primary key in `_id`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the first document matching the filter.
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Value>>;

    /// Applies the update to the first matching document and returns the
    /// matched count.
    ///
    /// Matching and writing must be atomic, so a filter that includes a
    /// version field acts as a compare-and-swap.
    async fn update_one(&self, collection: &str, filter: &Filter, update: &Update)
    -> AppResult<u64>;

    /// Inserts one document and fails with `AppError::Conflict` when the
    /// primary key already exists.
    async fn insert_one(&self, collection: &str, document: Value) -> AppResult<()>;

    /// Returns up to `limit` matching documents in ascending `_id` order.
    async fn find_range(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> AppResult<Vec<Value>>;
}
