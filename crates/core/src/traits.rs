use crate::error::StoreError;
use crate::models::{RetrievedChunk, VectorStoreEntry};
use async_trait::async_trait;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Appends entries. No uniqueness check: re-ingesting a file duplicates its entries.
    async fn add(&self, entries: Vec<VectorStoreEntry>) -> Result<(), StoreError>;

    /// The `k` nearest entries, most similar first; equal scores keep insertion order.
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, StoreError>;

    async fn persist(&self) -> Result<(), StoreError>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
