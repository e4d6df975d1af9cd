//! Chunk storage: persist chunks with their vectors, retrieve by cosine
//! similarity under hard policy isolation.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │  ChunkStore      │
//!                  │  (async trait)   │
//!                  └────────┬─────────┘
//!                           │
//!               ┌───────────┴───────────┐
//!               ▼                       ▼
//!        ┌─────────────┐        ┌──────────────┐
//!        │   Memory    │        │    SQLite    │
//!        │ brute-force │        │  sqlite-vec  │
//!        └─────────────┘        └──────────────┘
//! ```
//!
//! Both backends share the same contract: `policy_id` and the kind filter
//! are applied *before* ranking (no chunk from another policy can appear in
//! a result under any circumstances), scores are `(1 + cos)/2`, ties break
//! by position ascending, and `put_batch`/`delete_policy` are atomic.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use cg_core::{Chunk, ChunkId, ChunkKind, NewChunk, ScoredChunk};

use crate::error::StoreError;

pub use memory::MemoryChunkStore;
pub use sqlite::SqliteChunkStore;

/// Persistence contract for chunks and their vectors.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// The embedding dimension D this store was opened with. Every stored
    /// vector has exactly this length.
    fn dimension(&self) -> usize;

    /// Insert a batch of chunks atomically, assigning ids.
    ///
    /// Returns the assigned ids in input order. Nothing is written if any
    /// chunk fails validation; partial inserts are not allowed.
    async fn put_batch(
        &self,
        policy_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<ChunkId>, StoreError>;

    /// Remove every chunk belonging to `policy_id` atomically, returning
    /// how many were deleted. No orphan survives.
    async fn delete_policy(&self, policy_id: &str) -> Result<usize, StoreError>;

    /// Top-`k` chunks of `policy_id` by cosine similarity to `query`,
    /// optionally restricted to `kinds`. Deterministic for an unchanged
    /// store: score descending, position ascending.
    async fn similar(
        &self,
        policy_id: &str,
        query: &[f32],
        k: usize,
        kinds: Option<&[ChunkKind]>,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Fetch one chunk by id.
    async fn fetch(&self, id: &ChunkId) -> Result<Option<Chunk>, StoreError>;

    /// Number of chunks for `policy_id`, optionally restricted to `kinds`.
    async fn count(&self, policy_id: &str, kinds: Option<&[ChunkKind]>)
        -> Result<usize, StoreError>;
}

/// Validate a batch against the store dimension before any write.
pub(crate) fn validate_batch(dimension: usize, chunks: &[NewChunk]) -> Result<(), StoreError> {
    for chunk in chunks {
        if chunk.embedding.len() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                actual: chunk.embedding.len(),
            });
        }
    }
    Ok(())
}

/// Validate a query vector against the store dimension.
pub(crate) fn validate_query(dimension: usize, query: &[f32]) -> Result<(), StoreError> {
    if query.len() != dimension {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: query.len(),
        });
    }
    Ok(())
}

/// Cosine similarity, zero-safe.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Shared ranking: score descending, position ascending, truncate to `k`.
pub(crate) fn rank(mut results: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.position.cmp(&b.chunk.position))
    });
    results.truncate(k);
    results
}
