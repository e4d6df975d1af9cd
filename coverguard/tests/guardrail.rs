//! End-to-end guardrail scenarios over ingested fixtures, mock providers,
//! and the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cg_core::providers::mock::{MockEmbeddingProvider, MockLlm};
use cg_core::providers::{
    ComposeRequest, ExclusionJudgment, InclusionJudgment, LlmProvider, TokenStream,
};
use cg_core::{ChunkKind, CoverageConfig, CoverageStatus, FinancialTerms, ProviderError};
use cg_ingest::{Classifier, ChunkStore, IngestionPipeline, MemoryChunkStore, TextExtractor};
use coverguard::{ChatOrchestrator, ChatError, CoverageAgent, TurnEvent};

const DIM: usize = 64;

fn doc(pages: &[&str]) -> Vec<u8> {
    pages.join("\u{c}").into_bytes()
}

/// Eight-page mechanical warranty used by the exclusion-side scenarios.
fn warranty_pages() -> Vec<&'static str> {
    vec![
        "POLICY OVERVIEW\n\nThis mechanical breakdown agreement protects the vehicle named in the schedule.",
        "DEFINITIONS\n\n\"Wear\" means gradual deterioration from ordinary use.",
        "COVERAGE\n\nEngine coverage includes turbo components and cylinder heads.",
        "LIMITATIONS\n\nDeductible: 400 per visit; cap 15000.",
        "PROCEDURES\n\nYou must notify us within 30 days of any failure.",
        "SERVICE\n\nRepairs happen at approved workshops across the country.",
        "GENERAL TERMS\n\nThis agreement is governed by the law of the state named in the schedule.",
        "EXCLUSIONS\n\nWe do not insure damage you intentionally cause. Turbo is excluded from all coverage.",
    ]
}

async fn ingest(store: &Arc<MemoryChunkStore>, policy_id: &str, bytes: &[u8]) {
    let pipeline = IngestionPipeline::new(
        TextExtractor::new(),
        Classifier::heuristic(),
        Arc::new(MockEmbeddingProvider::new(DIM)),
        store.clone(),
        &CoverageConfig::default(),
    )
    .expect("dimensions agree");
    pipeline
        .ingest(policy_id, bytes, "text/plain")
        .await
        .expect("fixture ingests");
}

fn agent_over(store: Arc<MemoryChunkStore>, llm: MockLlm, config: CoverageConfig) -> CoverageAgent {
    CoverageAgent::new(
        store,
        Arc::new(MockEmbeddingProvider::new(DIM)),
        Arc::new(llm),
        config,
    )
}

async fn warranty_agent() -> (CoverageAgent, Arc<MemoryChunkStore>) {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(&store, "pol-warranty", &doc(&warranty_pages())).await;
    let agent = agent_over(store.clone(), MockLlm::new(), CoverageConfig::default());
    (agent, store)
}

#[tokio::test]
async fn explicit_exclusion_dominates() {
    let (agent, _) = warranty_agent().await;
    let outcome = agent
        .run_turn("pol-warranty", "Is intentional damage covered?", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.verdict.status, CoverageStatus::NotCovered);
    assert_eq!(outcome.verdict.item, "intentional damage");
    assert!(!outcome.verdict.citations.is_empty());
    assert_eq!(outcome.verdict.citations[0].page, 8);
    assert!(outcome.verdict.citations[0].quote.contains("intentionally cause"));
    assert!(outcome.verdict.confidence >= 0.6);
    // Invariant 3: a NOT_COVERED verdict cites exclusion or limitation text.
    assert!(outcome
        .verdict
        .citations
        .iter()
        .any(|c| matches!(c.kind, ChunkKind::Exclusion | ChunkKind::Limitation)));
}

#[tokio::test]
async fn plain_inclusion_is_covered_with_its_citation() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(
        &store,
        "pol-engine",
        &doc(&[
            "POLICY OVERVIEW\n\nThis agreement describes engine protection.",
            "GENERAL TERMS\n\nThe schedule names the insured vehicle.",
            "COVERAGE\n\nCoverage includes pistons and cylinder heads under Engine coverage.",
        ]),
    )
    .await;
    let agent = agent_over(store, MockLlm::new(), CoverageConfig::default());

    let outcome = agent
        .run_turn("pol-engine", "Are pistons covered?", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.verdict.status, CoverageStatus::Covered);
    assert!(!outcome.verdict.citations.is_empty());
    assert_eq!(outcome.verdict.citations[0].page, 3);
    // Invariant 2: COVERED citations stay on the inclusion side.
    for citation in &outcome.verdict.citations {
        assert!(matches!(
            citation.kind,
            ChunkKind::Inclusion | ChunkKind::Definition | ChunkKind::General
        ));
    }
}

#[tokio::test]
async fn inclusion_with_limitations_is_conditional_with_financials() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(
        &store,
        "pol-cond",
        &doc(&[
            "COVERAGE\n\nEngine coverage includes repair of engine components.",
            "LIMITATIONS\n\nDeductible: 400 per visit; cap 15000.",
        ]),
    )
    .await;
    let agent = agent_over(store, MockLlm::new(), CoverageConfig::default());

    let outcome = agent
        .run_turn("pol-cond", "Is engine repair covered?", None, None)
        .await
        .unwrap();

    assert!(matches!(
        outcome.verdict.status,
        CoverageStatus::Covered | CoverageStatus::Conditional
    ));
    let financials = outcome.verdict.financials.expect("financial terms attached");
    assert_eq!(financials.deductible, Some(400.0));
    assert_eq!(financials.cap, Some(15_000.0));
    // Citations include the inclusion text and the limitation text.
    assert!(outcome.verdict.citations.iter().any(|c| c.kind == ChunkKind::Inclusion));
    assert!(outcome.verdict.citations.iter().any(|c| c.kind == ChunkKind::Limitation));
}

#[tokio::test]
async fn unknown_item_yields_unknown_with_no_citations() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(
        &store,
        "pol-engine-only",
        &doc(&["COVERAGE\n\nEngine coverage includes pistons and cylinder heads."]),
    )
    .await;
    let agent = agent_over(store, MockLlm::new(), CoverageConfig::default());

    let outcome = agent
        .run_turn("pol-engine-only", "Is flood damage covered?", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.verdict.status, CoverageStatus::Unknown);
    assert!(outcome.verdict.citations.is_empty());
    assert_eq!(outcome.verdict.confidence, 0.0);
}

#[tokio::test]
async fn exclusion_beats_inclusion_for_the_same_item() {
    // The warranty grants turbo components under COVERAGE and excludes
    // turbo under EXCLUSIONS; the guardrail order decides.
    let (agent, store) = warranty_agent().await;
    let outcome = agent
        .run_turn("pol-warranty", "Is turbo covered?", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.verdict.status, CoverageStatus::NotCovered);
    let citation = &outcome.verdict.citations[0];
    assert_eq!(citation.kind, ChunkKind::Exclusion);
    assert_eq!(citation.page, 8);

    // Invariant 1: every citation resolves to a chunk of the queried policy.
    for citation in &outcome.verdict.citations {
        let chunk = store
            .fetch(&citation.chunk_id)
            .await
            .unwrap()
            .expect("citation resolves");
        assert_eq!(chunk.policy_id, "pol-warranty");
    }
}

#[tokio::test]
async fn policy_isolation_holds_even_for_nearer_foreign_chunks() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(&store, "pol-a", &doc(&warranty_pages())).await;
    ingest(
        &store,
        "pol-b",
        &doc(&["EXCLUSIONS\n\nFlood damage is excluded. No coverage for flood losses."]),
    )
    .await;
    let agent = agent_over(store.clone(), MockLlm::new(), CoverageConfig::default());

    // Policy B's flood text is the nearest match in embedding space, but a
    // turn against A must never surface it.
    let outcome = agent
        .run_turn("pol-a", "Is flood damage covered?", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.verdict.status, CoverageStatus::Unknown);
    for citation in &outcome.verdict.citations {
        let chunk = store.fetch(&citation.chunk_id).await.unwrap().unwrap();
        assert_eq!(chunk.policy_id, "pol-a");
    }
}

#[tokio::test]
async fn scores_below_tau_produce_unknown() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(&store, "pol-warranty", &doc(&warranty_pages())).await;
    let strict = CoverageConfig::default()
        .with_tau_exclusion(0.95)
        .with_tau_inclusion(0.95);
    let agent = agent_over(store, MockLlm::new(), strict);

    let outcome = agent
        .run_turn("pol-warranty", "Is turbo covered?", None, None)
        .await
        .unwrap();
    assert_eq!(outcome.verdict.status, CoverageStatus::Unknown);
}

#[tokio::test]
async fn identical_turns_against_an_unchanged_store_agree() {
    let (agent, _) = warranty_agent().await;
    let first = agent
        .run_turn("pol-warranty", "Is turbo covered?", None, None)
        .await
        .unwrap();
    let second = agent
        .run_turn("pol-warranty", "Is turbo covered?", None, None)
        .await
        .unwrap();

    assert_eq!(first.verdict.status, second.verdict.status);
    assert_eq!(first.verdict.citations, second.verdict.citations);
    assert_eq!(first.verdict.confidence, second.verdict.confidence);
}

#[tokio::test]
async fn grounding_failure_downgrades_to_unknown() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(&store, "pol-warranty", &doc(&warranty_pages())).await;
    let agent = agent_over(
        store,
        MockLlm::new().with_rogue_composer(),
        CoverageConfig::default(),
    );

    let outcome = agent
        .run_turn("pol-warranty", "Is turbo covered?", None, None)
        .await
        .unwrap();

    // The probes decided NOT_COVERED, but the composer cited material that
    // was never supplied; the verdict must not ship.
    assert_eq!(outcome.verdict.status, CoverageStatus::Unknown);
    assert_eq!(outcome.verdict.confidence, 0.0);
    assert!(outcome.composed.contains("[99]"));
}

#[tokio::test]
async fn provider_outages_are_retried_to_completion() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(&store, "pol-warranty", &doc(&warranty_pages())).await;
    let agent = agent_over(store, MockLlm::new().flaky(2), CoverageConfig::default());

    let outcome = agent
        .run_turn("pol-warranty", "Is turbo covered?", None, None)
        .await
        .unwrap();
    assert_eq!(outcome.verdict.status, CoverageStatus::NotCovered);
}

#[tokio::test]
async fn listing_turns_cite_exclusion_clauses() {
    let (agent, _) = warranty_agent().await;
    let outcome = agent
        .run_turn("pol-warranty", "What are the exclusions?", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.verdict.status, CoverageStatus::Unknown);
    assert!(!outcome.verdict.citations.is_empty());
    for citation in &outcome.verdict.citations {
        assert_eq!(citation.kind, ChunkKind::Exclusion);
    }
}

#[tokio::test]
async fn get_limits_turns_attach_financials_and_citations() {
    let (agent, _) = warranty_agent().await;
    let outcome = agent
        .run_turn("pol-warranty", "How much is the deductible?", None, None)
        .await
        .unwrap();

    assert_eq!(outcome.intent, cg_core::QueryIntent::GetLimits);
    assert!(!outcome.verdict.citations.is_empty());
    let financials = outcome.verdict.financials.expect("limits extracted");
    assert_eq!(financials.deductible, Some(400.0));
}

// ── Chat orchestration ─────────────────────────────────────────────────

async fn orchestrator() -> (Arc<ChatOrchestrator>, String) {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(&store, "pol-warranty", &doc(&warranty_pages())).await;
    let agent = Arc::new(agent_over(store, MockLlm::new(), CoverageConfig::default()));
    let orchestrator = Arc::new(ChatOrchestrator::new(agent));
    let session_id = orchestrator.open_session("pol-warranty");
    (orchestrator, session_id)
}

#[tokio::test]
async fn turn_streams_tokens_then_exactly_one_trailer() {
    let (orchestrator, session_id) = orchestrator().await;
    let stream = orchestrator
        .submit_turn(
            &session_id,
            "pol-warranty",
            "Is turbo covered?",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    let events = stream.collect().await;
    assert!(events.len() >= 2, "tokens plus a trailer");
    let (terminal, tokens) = events.split_last().unwrap();
    for event in tokens {
        assert!(matches!(event, TurnEvent::Token { .. }));
    }
    match terminal {
        TurnEvent::Trailer { verdict } => {
            assert_eq!(verdict.status, CoverageStatus::NotCovered);
        }
        other => panic!("expected trailer, got {other:?}"),
    }

    let history = orchestrator.history(&session_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[1].role, "assistant");
}

#[tokio::test]
async fn cross_policy_claims_are_rejected() {
    let (orchestrator, session_id) = orchestrator().await;
    let err = orchestrator
        .submit_turn(
            &session_id,
            "pol-other",
            "Is turbo covered?",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::PolicyMismatch { .. }));

    let err = orchestrator
        .submit_turn("no-such-session", "pol-warranty", "hi", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::UnknownSession { .. }));
}

#[tokio::test]
async fn zero_deadline_cancels_immediately() {
    let (orchestrator, session_id) = orchestrator().await;
    let err = orchestrator
        .submit_turn(&session_id, "pol-warranty", "Is turbo covered?", Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Deadline));
}

/// LLM whose evaluations stall, to exercise mid-turn deadline expiry.
struct StallingLlm {
    inner: MockLlm,
}

#[async_trait]
impl LlmProvider for StallingLlm {
    async fn classify_chunk(
        &self,
        text: &str,
        heading: Option<&str>,
    ) -> Result<Option<ChunkKind>, ProviderError> {
        self.inner.classify_chunk(text, heading).await
    }

    async fn evaluate_exclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<ExclusionJudgment, ProviderError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.inner.evaluate_exclusion(chunk_text, item).await
    }

    async fn evaluate_inclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<InclusionJudgment, ProviderError> {
        self.inner.evaluate_inclusion(chunk_text, item).await
    }

    async fn extract_financials(&self, chunk_text: &str) -> Result<FinancialTerms, ProviderError> {
        self.inner.extract_financials(chunk_text).await
    }

    async fn compose(&self, request: &ComposeRequest) -> Result<TokenStream, ProviderError> {
        self.inner.compose(request).await
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_mid_turn_aborts_without_a_verdict() {
    let store = Arc::new(MemoryChunkStore::new(DIM));
    ingest(&store, "pol-warranty", &doc(&warranty_pages())).await;
    let agent = Arc::new(CoverageAgent::new(
        store,
        Arc::new(MockEmbeddingProvider::new(DIM)),
        Arc::new(StallingLlm {
            inner: MockLlm::new(),
        }),
        CoverageConfig::default(),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(agent));
    let session_id = orchestrator.open_session("pol-warranty");

    let stream = orchestrator
        .submit_turn(
            &session_id,
            "pol-warranty",
            "Is turbo covered?",
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    let events = stream.collect().await;
    let terminal = events.last().expect("stream carries a terminal event");
    assert!(matches!(terminal, TurnEvent::Aborted { .. }));
    assert!(!events
        .iter()
        .any(|event| matches!(event, TurnEvent::Trailer { .. })));
    // An aborted turn leaves no transcript entry.
    assert!(orchestrator.history(&session_id).unwrap().is_empty());
}
