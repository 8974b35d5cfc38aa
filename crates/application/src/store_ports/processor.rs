use async_trait::async_trait;
use shardwork_core::AppResult;

use crate::partition_cursor::CursorDocument;

/// Identifies the partition a document was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingContext {
    /// Owning job.
    pub job_id: String,
    /// Owning task.
    pub task_id: String,
    /// Partition identifier, `"<task_id>:<number>"`.
    pub partition_id: String,
    /// Source collection.
    pub collection: String,
}

/// Caller-supplied callback invoked once per streamed document.
///
/// A document only counts as processed once its key has been committed
/// into the partition lease, so processors must tolerate replays of the
/// documents between the last commit and a crash.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Processes one document. An error fails the current partition attempt.
    async fn process(
        &self,
        context: &ProcessingContext,
        document: &CursorDocument,
    ) -> AppResult<()>;
}
