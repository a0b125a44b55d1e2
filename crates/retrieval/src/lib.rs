pub mod chunker;
pub mod embeddings;
pub mod index;
pub mod retriever;

pub use chunker::{split_text, Chunk, ChunkSettings};
pub use embeddings::{
    DeterministicEmbeddingClient, EmbeddingClient, EmbeddingConfig, EmbeddingError,
    OpenAiEmbeddingClient,
};
pub use index::{artifact_path, build_or_load, IndexError, ScoredChunk, VectorIndex};
pub use retriever::{RetrievalError, Retriever};
