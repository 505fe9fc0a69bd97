//! VectorStore trait — abstract interface for the persisted index.
//!
//! The primary implementation is `SqliteVectorStore` in the `sqlite`
//! module. The store is written once at build time and read-only after.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// An indexed chunk as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Unique chunk identifier.
    pub chunk_id: String,
    /// The text content of the chunk.
    pub content: String,
    /// Source document name.
    pub source: String,
    /// Character offset of the chunk within its document.
    pub start_offset: usize,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: IndexedChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

/// Abstract interface over the persisted vector index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert chunks with their embedding vectors in one transaction.
    async fn insert_batch(&self, items: Vec<(IndexedChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Return the `limit` chunks most similar to the query embedding.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    /// Total number of indexed chunks.
    async fn count(&self) -> Result<usize, ApiError>;

    /// Read a value from the index metadata table.
    async fn get_meta(&self, key: &str) -> Result<Option<String>, ApiError>;

    /// Write a value into the index metadata table.
    async fn set_meta(&self, key: &str, value: &str) -> Result<(), ApiError>;
}
