//! End-to-end ingestion tests over the in-memory store and mock providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cg_core::providers::mock::MockEmbeddingProvider;
use cg_core::providers::EmbeddingProvider;
use cg_core::{ChunkKind, CoverageConfig, ProviderError};
use cg_ingest::{
    Classifier, ChunkStore, IngestError, IngestionPipeline, MemoryChunkStore, TextExtractor,
};

const DIM: usize = 64;

fn sample_policy() -> &'static [u8] {
    b"POLICY OVERVIEW\n\nThis agreement describes mechanical breakdown protection for the \
vehicle named in the schedule. The schedule forms part of this agreement.\x0c\
COVERAGE\n\nCoverage includes pistons and cylinder heads under Engine coverage. We will pay \
for repairs performed by an approved workshop.\x0c\
EXCLUSIONS\n\nWe do not insure damage you intentionally cause. Turbo is excluded.\x0c\
LIMITATIONS\n\nDeductible: 400 per visit; cap 15000. Claims must be notified within 30 days."
}

fn pipeline_with(
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
) -> IngestionPipeline {
    IngestionPipeline::new(
        TextExtractor::new(),
        Classifier::heuristic(),
        embedder,
        store,
        &CoverageConfig::default(),
    )
    .expect("dimensions agree")
}

fn default_pipeline() -> (IngestionPipeline, Arc<MemoryChunkStore>) {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    let pipeline = pipeline_with(
        Arc::new(MockEmbeddingProvider::new(DIM)),
        store.clone(),
    );
    (pipeline, store)
}

#[tokio::test]
async fn ingest_produces_classified_pages_and_chunks() {
    let (pipeline, store) = default_pipeline();
    let report = pipeline
        .ingest("pol-1", sample_policy(), "text/plain")
        .await
        .unwrap();

    assert_eq!(report.pages, 4);
    assert!(report.chunk_count >= 4);
    assert!(report.failed_pages.is_empty());
    assert!(report.kind_histogram.contains_key(&ChunkKind::Exclusion));
    assert!(report.kind_histogram.contains_key(&ChunkKind::Inclusion));
    assert!(report.kind_histogram.contains_key(&ChunkKind::Limitation));

    assert_eq!(store.count("pol-1", None).await.unwrap(), report.chunk_count);
    assert_eq!(
        store
            .count("pol-1", Some(&[ChunkKind::Exclusion]))
            .await
            .unwrap(),
        report.kind_histogram[&ChunkKind::Exclusion]
    );
}

#[tokio::test]
async fn reingest_replaces_and_reproduces_the_same_distribution() {
    let (pipeline, store) = default_pipeline();
    let first = pipeline
        .ingest("pol-1", sample_policy(), "text/plain")
        .await
        .unwrap();
    let second = pipeline
        .ingest("pol-1", sample_policy(), "text/plain")
        .await
        .unwrap();

    assert_eq!(first.chunk_count, second.chunk_count);
    assert_eq!(first.kind_histogram, second.kind_histogram);
    // Replacement, not accumulation.
    assert_eq!(store.count("pol-1", None).await.unwrap(), second.chunk_count);
}

#[tokio::test]
async fn empty_document_yields_a_policy_with_zero_chunks() {
    let (pipeline, store) = default_pipeline();
    let report = pipeline.ingest("pol-empty", b"", "text/plain").await.unwrap();
    assert_eq!(report.chunk_count, 0);
    assert_eq!(store.count("pol-empty", None).await.unwrap(), 0);

    let embedder = MockEmbeddingProvider::new(DIM);
    let query = embedder.embed_one("is anything covered").await.unwrap();
    assert!(store
        .similar("pol-empty", &query, 8, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unknown_mime_is_rejected() {
    let (pipeline, _) = default_pipeline();
    let err = pipeline
        .ingest("pol-1", b"bytes", "image/png")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Extract(_)));
}

/// Embedder that stalls long enough for a concurrent ingest to collide.
struct SlowEmbedder {
    inner: MockEmbeddingProvider,
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inner.embed_one(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.inner.embed_batch(texts).await
    }
}

#[tokio::test]
async fn concurrent_ingest_for_one_policy_is_rejected_with_conflict() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    let pipeline = Arc::new(pipeline_with(
        Arc::new(SlowEmbedder {
            inner: MockEmbeddingProvider::new(DIM),
        }),
        store,
    ));

    let second = {
        let pipeline = pipeline.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pipeline.ingest("pol-1", sample_policy(), "text/plain").await
        }
    };

    let (first, second) = tokio::join!(
        pipeline.ingest("pol-1", sample_policy(), "text/plain"),
        second
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(IngestError::Conflict { .. })));
}

#[tokio::test]
async fn two_policies_keep_their_chunks_apart() {
    let (pipeline, store) = default_pipeline();
    pipeline
        .ingest("pol-a", sample_policy(), "text/plain")
        .await
        .unwrap();
    pipeline
        .ingest(
            "pol-b",
            b"EXCLUSIONS\n\nFlood damage is excluded from every coverage section.",
            "text/plain",
        )
        .await
        .unwrap();

    let embedder = MockEmbeddingProvider::new(DIM);
    let query = embedder.embed_one("flood damage excluded").await.unwrap();
    // Policy B's text is the nearest match, but a query against A must
    // return only A's chunks.
    let results = store.similar("pol-a", &query, 10, None).await.unwrap();
    assert!(!results.is_empty());
    for result in results {
        assert_eq!(result.chunk.policy_id, "pol-a");
    }
}
