use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::embeddings::EmbeddingClient;
use crate::index::{ScoredChunk, VectorIndex};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Read-mostly handle over the catalog index. Searches run against a
/// cloned `Arc` snapshot, so a rebuild blocks readers only for the swap
/// assignment itself, and no lock is ever held across provider I/O.
pub struct Retriever {
    index: RwLock<Arc<VectorIndex>>,
    embedder: Arc<dyn EmbeddingClient>,
    default_top_k: usize,
    top_k_max: usize,
}

impl Retriever {
    pub fn new(
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingClient>,
        default_top_k: usize,
        top_k_max: usize,
    ) -> Self {
        Self {
            index: RwLock::new(Arc::new(index)),
            embedder,
            default_top_k: default_top_k.max(1),
            top_k_max: top_k_max.max(1),
        }
    }

    /// Top-k chunks for `query`, `k` clamped to the configured maximum.
    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let k = k.unwrap_or(self.default_top_k).clamp(1, self.top_k_max);

        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|error| RetrievalError::ProviderUnavailable(error.to_string()))?;

        let index = self.snapshot().await;
        Ok(index.search(&query_embedding, k))
    }

    /// Installs a rebuilt index. Readers holding the previous snapshot
    /// finish their queries against it undisturbed.
    pub async fn swap(&self, new_index: VectorIndex) {
        let mut guard = self.index.write().await;
        *guard = Arc::new(new_index);
    }

    pub async fn snapshot(&self) -> Arc<VectorIndex> {
        self.index.read().await.clone()
    }

    pub async fn fingerprint(&self) -> String {
        self.snapshot().await.fingerprint().to_string()
    }

    pub async fn chunk_count(&self) -> usize {
        self.snapshot().await.len()
    }
}
