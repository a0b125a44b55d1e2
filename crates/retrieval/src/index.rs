//! Catalog index construction and persistence.
//!
//! Building embeds every chunk, which is the expensive, rate-limited part
//! of startup, so the artifact on disk carries a fingerprint of everything
//! that shapes it (source bytes, chunk settings, embedding model). A
//! matching artifact is loaded instead of rebuilt.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunker::{split_text, Chunk, ChunkSettings};
use crate::embeddings::{EmbeddingClient, EmbeddingError};

const ARTIFACT_FILE: &str = "index.json";

/// Location of the persisted artifact inside `index_dir`.
pub fn artifact_path(index_dir: &Path) -> PathBuf {
    index_dir.join(ARTIFACT_FILE)
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("source document unavailable at `{path}`: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },
    #[error("index artifact at `{path}` could not be used: {reason}")]
    Artifact { path: PathBuf, reason: String },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    fingerprint: String,
    model: String,
    dimensions: usize,
    entries: Vec<IndexedChunk>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl VectorIndex {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nearest chunks by cosine similarity, ties broken by chunk id so a
    /// fixed index and query always rank identically.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query_embedding, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);
        scored
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Fingerprint of everything that shapes the index contents.
fn fingerprint(source: &str, settings: &ChunkSettings, model: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.as_bytes());
    hasher.update(&(settings.chunk_size as u64).to_le_bytes());
    hasher.update(&(settings.chunk_overlap as u64).to_le_bytes());
    hasher.update(model.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Loads the persisted index when its fingerprint matches the current
/// source + settings + model; otherwise rebuilds (embedding every chunk)
/// and persists the artifact atomically. A missing or unreadable source
/// document is fatal: serving chat without the catalog produces wrong
/// answers.
pub async fn build_or_load(
    source_path: &Path,
    index_dir: &Path,
    settings: ChunkSettings,
    embedder: &dyn EmbeddingClient,
) -> Result<VectorIndex, IndexError> {
    let source =
        tokio::fs::read_to_string(source_path).await.map_err(|error| {
            IndexError::SourceUnavailable {
                path: source_path.to_path_buf(),
                reason: error.to_string(),
            }
        })?;
    if source.trim().is_empty() {
        return Err(IndexError::SourceUnavailable {
            path: source_path.to_path_buf(),
            reason: "document is empty".to_string(),
        });
    }

    let expected_fingerprint = fingerprint(&source, &settings, embedder.model());
    let artifact_path = index_dir.join(ARTIFACT_FILE);

    if let Some(existing) = try_load(&artifact_path).await? {
        if existing.fingerprint == expected_fingerprint {
            tracing::info!(
                event_name = "retrieval.index.loaded",
                chunks = existing.len(),
                artifact = %artifact_path.display(),
                "persisted index matches source, skipping rebuild"
            );
            return Ok(existing);
        }
        tracing::info!(
            event_name = "retrieval.index.stale",
            artifact = %artifact_path.display(),
            "persisted index fingerprint differs, rebuilding"
        );
    }

    let chunks = split_text(&source, &settings);
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let embeddings = embedder.embed_documents(&texts).await?;
    if embeddings.len() != chunks.len() {
        return Err(IndexError::Embedding(EmbeddingError::BatchMismatch {
            expected: chunks.len(),
            actual: embeddings.len(),
        }));
    }

    let dimensions = embeddings.first().map(|vector| vector.len()).unwrap_or(0);
    let entries = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
        .collect();

    let index = VectorIndex {
        fingerprint: expected_fingerprint,
        model: embedder.model().to_string(),
        dimensions,
        entries,
    };

    persist(&index, index_dir, &artifact_path).await?;
    tracing::info!(
        event_name = "retrieval.index.built",
        chunks = index.len(),
        dimensions,
        artifact = %artifact_path.display(),
        "catalog index built and persisted"
    );

    Ok(index)
}

async fn try_load(artifact_path: &Path) -> Result<Option<VectorIndex>, IndexError> {
    let raw = match tokio::fs::read_to_string(artifact_path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(IndexError::Artifact {
                path: artifact_path.to_path_buf(),
                reason: error.to_string(),
            })
        }
    };

    // A corrupt artifact is not fatal; the index is rebuildable.
    match serde_json::from_str::<VectorIndex>(&raw) {
        Ok(index) => Ok(Some(index)),
        Err(error) => {
            tracing::warn!(
                event_name = "retrieval.index.corrupt_artifact",
                artifact = %artifact_path.display(),
                error = %error,
                "ignoring unreadable index artifact, will rebuild"
            );
            Ok(None)
        }
    }
}

async fn persist(
    index: &VectorIndex,
    index_dir: &Path,
    artifact_path: &Path,
) -> Result<(), IndexError> {
    let artifact_error = |reason: String| IndexError::Artifact {
        path: artifact_path.to_path_buf(),
        reason,
    };

    tokio::fs::create_dir_all(index_dir).await.map_err(|error| artifact_error(error.to_string()))?;

    let payload =
        serde_json::to_vec(index).map_err(|error| artifact_error(error.to_string()))?;

    // Write-then-rename so a crash mid-write never leaves a truncated
    // artifact behind.
    let tmp_path = artifact_path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, payload).await.map_err(|error| artifact_error(error.to_string()))?;
    tokio::fs::rename(&tmp_path, artifact_path)
        .await
        .map_err(|error| artifact_error(error.to_string()))?;

    Ok(())
}
