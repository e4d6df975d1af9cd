//! The ingestion pipeline: bytes in, classified and embedded chunks out.
//!
//! Ingestion for one policy is serialized; a second run for the same
//! policy while one is in flight is rejected with
//! [`IngestError::Conflict`]. Re-ingesting replaces: the policy's previous
//! chunks are deleted before the new batch is inserted, and the insert
//! itself is atomic, so readers only ever see the pre- or post-ingestion
//! snapshot.

use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};

use cg_core::providers::retry::RetryPolicy;
use cg_core::providers::EmbeddingProvider;
use cg_core::{ChunkKind, CoverageConfig, NewChunk};

use crate::chunker::Chunker;
use crate::classifier::Classifier;
use crate::error::{IngestError, StoreError};
use crate::extract::{DocumentFormat, TextExtractor};
use crate::store::ChunkStore;

/// What an ingestion run produced.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub policy_id: String,
    pub chunk_count: usize,
    pub pages: u32,
    /// Pages where neither extraction strategy produced text.
    pub failed_pages: Vec<u32>,
    pub kind_histogram: FxHashMap<ChunkKind, usize>,
}

/// Extract → chunk → classify → embed → store.
pub struct IngestionPipeline {
    extractor: TextExtractor,
    classifier: Classifier,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
    retry: RetryPolicy,
    in_flight: Mutex<FxHashSet<String>>,
}

impl IngestionPipeline {
    /// Wire a pipeline. Fails fast when the embedder's dimension disagrees
    /// with the store's. That mismatch is a deployment bug, not a
    /// per-document condition.
    pub fn new(
        extractor: TextExtractor,
        classifier: Classifier,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
        config: &CoverageConfig,
    ) -> Result<Self, StoreError> {
        if embedder.dimension() != store.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimension(),
            });
        }
        Ok(Self {
            extractor,
            classifier,
            chunker: Chunker::from_config(config),
            embedder,
            store,
            retry: RetryPolicy::new(config.retry_base, config.retry_max_tries),
            in_flight: Mutex::new(FxHashSet::default()),
        })
    }

    /// Ingest one document under `policy_id`, replacing any previous
    /// ingestion of that policy.
    pub async fn ingest(
        &self,
        policy_id: &str,
        bytes: &[u8],
        declared_mime: &str,
    ) -> Result<IngestReport, IngestError> {
        let format = DocumentFormat::from_mime(declared_mime)?;
        let _claim = self.claim(policy_id)?;

        let outcome = self.extractor.extract(bytes, format).await?;
        for (page, cause) in &outcome.holes {
            tracing::warn!(policy_id, page, cause = %cause, "page skipped during extraction");
        }

        let drafts = self.chunker.chunk_blocks(&outcome.blocks);

        let mut kinds = Vec::with_capacity(drafts.len());
        let mut embed_texts = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let kind = self
                .classifier
                .classify(&draft.text, draft.section_title.as_deref())
                .await;
            kinds.push(kind);
            // Embeddings see the section context; stored text stays the
            // exact page substring.
            embed_texts.push(match &draft.section_title {
                Some(section) => format!("[{section}]\n{}", draft.text),
                None => draft.text.clone(),
            });
        }

        let embeddings = if embed_texts.is_empty() {
            Vec::new()
        } else {
            self.retry
                .run("embed_batch", || self.embedder.embed_batch(&embed_texts))
                .await?
        };

        let mut kind_histogram: FxHashMap<ChunkKind, usize> = FxHashMap::default();
        let new_chunks: Vec<NewChunk> = drafts
            .into_iter()
            .zip(kinds)
            .zip(embeddings)
            .map(|((draft, kind), embedding)| {
                *kind_histogram.entry(kind).or_default() += 1;
                NewChunk {
                    text: draft.text,
                    kind,
                    page_number: draft.page_number,
                    section_title: draft.section_title,
                    position: draft.position,
                    overlap: draft.overlap,
                    embedding,
                }
            })
            .collect();

        let replaced = self.store.delete_policy(policy_id).await?;
        if replaced > 0 {
            tracing::info!(policy_id, replaced, "re-ingest replaced previous chunks");
        }

        let chunk_count = new_chunks.len();
        if chunk_count > 0 {
            self.store.put_batch(policy_id, new_chunks).await?;
        }

        tracing::info!(
            policy_id,
            chunk_count,
            pages = outcome.pages,
            failed_pages = outcome.holes.len(),
            "ingestion complete"
        );

        Ok(IngestReport {
            policy_id: policy_id.to_string(),
            chunk_count,
            pages: outcome.pages,
            failed_pages: outcome.holes.iter().map(|(page, _)| *page).collect(),
            kind_histogram,
        })
    }

    fn claim(&self, policy_id: &str) -> Result<IngestClaim<'_>, IngestError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
        if !in_flight.insert(policy_id.to_string()) {
            return Err(IngestError::Conflict {
                policy_id: policy_id.to_string(),
            });
        }
        Ok(IngestClaim {
            set: &self.in_flight,
            policy_id: policy_id.to_string(),
        })
    }
}

/// RAII marker serializing ingestion per policy.
struct IngestClaim<'a> {
    set: &'a Mutex<FxHashSet<String>>,
    policy_id: String,
}

impl Drop for IngestClaim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.policy_id);
    }
}
