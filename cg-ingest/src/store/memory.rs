//! In-memory chunk store: brute-force cosine over per-policy vectors.
//!
//! The development and test backend. Retrieval semantics are identical to
//! the SQLite backend's, which makes it the oracle the recall requirement
//! is measured against.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use cg_core::{cosine_to_score, Chunk, ChunkId, ChunkKind, NewChunk, ScoredChunk};

use super::{cosine, rank, validate_batch, validate_query, ChunkStore};
use crate::error::StoreError;

/// Brute-force store keyed by policy.
pub struct MemoryChunkStore {
    dimension: usize,
    policies: RwLock<FxHashMap<String, Vec<Chunk>>>,
}

impl MemoryChunkStore {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            policies: RwLock::new(FxHashMap::default()),
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn put_batch(
        &self,
        policy_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<ChunkId>, StoreError> {
        validate_batch(self.dimension, &chunks)?;

        let now = Utc::now();
        let mut ids = Vec::with_capacity(chunks.len());
        let stored: Vec<Chunk> = chunks
            .into_iter()
            .map(|chunk| {
                let id = ChunkId(Uuid::new_v4().to_string());
                ids.push(id.clone());
                Chunk {
                    id,
                    policy_id: policy_id.to_string(),
                    text: chunk.text,
                    kind: chunk.kind,
                    page_number: chunk.page_number,
                    section_title: chunk.section_title,
                    position: chunk.position,
                    embedding: chunk.embedding,
                    created_at: now,
                }
            })
            .collect();

        let mut policies = self.policies.write().expect("memory store poisoned");
        policies
            .entry(policy_id.to_string())
            .or_default()
            .extend(stored);
        Ok(ids)
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<usize, StoreError> {
        let mut policies = self.policies.write().expect("memory store poisoned");
        Ok(policies.remove(policy_id).map_or(0, |chunks| chunks.len()))
    }

    async fn similar(
        &self,
        policy_id: &str,
        query: &[f32],
        k: usize,
        kinds: Option<&[ChunkKind]>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        validate_query(self.dimension, query)?;

        let policies = self.policies.read().expect("memory store poisoned");
        let Some(chunks) = policies.get(policy_id) else {
            return Ok(Vec::new());
        };

        let results: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|chunk| kinds.is_none_or(|set| set.contains(&chunk.kind)))
            .map(|chunk| ScoredChunk {
                score: cosine_to_score(cosine(&chunk.embedding, query)),
                chunk: chunk.clone(),
            })
            .collect();

        Ok(rank(results, k))
    }

    async fn fetch(&self, id: &ChunkId) -> Result<Option<Chunk>, StoreError> {
        let policies = self.policies.read().expect("memory store poisoned");
        Ok(policies
            .values()
            .flat_map(|chunks| chunks.iter())
            .find(|chunk| &chunk.id == id)
            .cloned())
    }

    async fn count(
        &self,
        policy_id: &str,
        kinds: Option<&[ChunkKind]>,
    ) -> Result<usize, StoreError> {
        let policies = self.policies.read().expect("memory store poisoned");
        Ok(policies.get(policy_id).map_or(0, |chunks| {
            chunks
                .iter()
                .filter(|chunk| kinds.is_none_or(|set| set.contains(&chunk.kind)))
                .count()
        }))
    }
}
