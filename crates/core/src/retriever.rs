use crate::embeddings::Embedder;
use crate::error::AskError;
use crate::models::RetrievedChunk;
use crate::traits::VectorStore;
use std::sync::Arc;
use tracing::debug;

/// Embeds a query with the ingestion-time embedder and returns the `top_k` nearest chunks.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, top_k: usize) -> Self {
        Self {
            embedder,
            store,
            top_k,
        }
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, AskError> {
        let query_vector = self.embedder.embed(query).await?;
        let hits = self.store.search(&query_vector, self.top_k).await?;
        debug!(hits = hits.len(), top_k = self.top_k, "retrieved context");
        Ok(hits)
    }
}
