//! Retrieval + bounded LLM evaluation for the guardrail's probe steps.
//!
//! Each probe retrieves kind-filtered chunks for the policy, verifies the
//! isolation invariant on every returned chunk, then fans the LLM
//! evaluations out concurrently, bounded by the configured fan-out limit.
//! Decisions are deterministic: the winning chunk is the one with the
//! highest confidence, ties broken by lowest position.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};

use cg_core::providers::retry::RetryPolicy;
use cg_core::providers::LlmProvider;
use cg_core::{Chunk, ChunkKind, CoverageConfig, ScoredChunk};
use cg_ingest::ChunkStore;

use crate::error::AgentError;

/// Kinds the exclusion probe retrieves.
pub const EXCLUSION_KINDS: [ChunkKind; 2] = [ChunkKind::Exclusion, ChunkKind::Limitation];

/// Kinds the inclusion probe retrieves.
pub const INCLUSION_KINDS: [ChunkKind; 3] =
    [ChunkKind::Inclusion, ChunkKind::Definition, ChunkKind::General];

/// A chunk whose evaluation crossed the probe's threshold.
#[derive(Clone, Debug)]
pub struct ProbeHit {
    pub chunk: Chunk,
    pub score: f32,
    pub confidence: f32,
    pub reason: String,
}

/// What one probe concluded for one item.
#[derive(Debug, Default)]
pub struct ProbeOutcome {
    /// The deciding hit, if any evaluation crossed the threshold.
    pub decided: Option<ProbeHit>,
    /// Highest confidence seen, threshold or not. Feeds the verdict's
    /// confidence arithmetic for conditional outcomes.
    pub best_confidence: f32,
    /// How many retrieved chunks were evaluated.
    pub evaluated: usize,
}

/// Retrieve with the policy filter and verify isolation on every chunk.
///
/// A violation here is fatal: it means the store's hard filter is broken
/// and no answer from this deployment can be trusted.
pub async fn retrieve_guarded(
    store: &Arc<dyn ChunkStore>,
    policy_id: &str,
    query: &[f32],
    k: usize,
    kinds: Option<&[ChunkKind]>,
) -> Result<Vec<ScoredChunk>, AgentError> {
    let results = store.similar(policy_id, query, k, kinds).await?;
    for result in &results {
        if result.chunk.policy_id != policy_id {
            tracing::error!(
                requested = policy_id,
                found = %result.chunk.policy_id,
                chunk = %result.chunk.id,
                "policy isolation violation detected in retrieval"
            );
            return Err(AgentError::PolicyIsolation {
                requested: policy_id.to_string(),
                found: result.chunk.policy_id.clone(),
            });
        }
    }
    Ok(results)
}

/// Step 2 of the guardrail: is `item` explicitly excluded?
///
/// False negatives here are the catastrophic direction; deployments tune
/// `tau_exclusion` down, not up.
pub async fn exclusion_probe(
    store: &Arc<dyn ChunkStore>,
    llm: &Arc<dyn LlmProvider>,
    retry: &RetryPolicy,
    config: &CoverageConfig,
    policy_id: &str,
    query: &[f32],
    item: &str,
) -> Result<ProbeOutcome, AgentError> {
    let retrieved =
        retrieve_guarded(store, policy_id, query, config.k_exclusion, Some(&EXCLUSION_KINDS))
            .await?;
    let evaluated = retrieved.len();

    let judgments: Vec<Result<ProbeHit, AgentError>> = stream::iter(retrieved)
        .map(|scored| async move {
            let judgment = retry
                .run("evaluate_exclusion", || {
                    llm.evaluate_exclusion(&scored.chunk.text, item)
                })
                .await?;
            Ok(ProbeHit {
                chunk: scored.chunk,
                score: scored.score,
                confidence: if judgment.excluded { judgment.confidence } else { 0.0 },
                reason: judgment.reason,
            })
        })
        .buffer_unordered(config.fanout_limit)
        .collect()
        .await;

    decide(judgments, config.tau_exclusion, evaluated)
}

/// Step 3: is `item` explicitly covered? Runs only when step 2 found no
/// exclusion.
pub async fn inclusion_probe(
    store: &Arc<dyn ChunkStore>,
    llm: &Arc<dyn LlmProvider>,
    retry: &RetryPolicy,
    config: &CoverageConfig,
    policy_id: &str,
    query: &[f32],
    item: &str,
) -> Result<ProbeOutcome, AgentError> {
    let retrieved =
        retrieve_guarded(store, policy_id, query, config.k_inclusion, Some(&INCLUSION_KINDS))
            .await?;
    let evaluated = retrieved.len();

    let judgments: Vec<Result<ProbeHit, AgentError>> = stream::iter(retrieved)
        .map(|scored| async move {
            let judgment = retry
                .run("evaluate_inclusion", || {
                    llm.evaluate_inclusion(&scored.chunk.text, item)
                })
                .await?;
            Ok(ProbeHit {
                chunk: scored.chunk,
                score: scored.score,
                confidence: if judgment.covered { judgment.confidence } else { 0.0 },
                reason: judgment.reason,
            })
        })
        .buffer_unordered(config.fanout_limit)
        .collect()
        .await;

    decide(judgments, config.tau_inclusion, evaluated)
}

fn decide(
    judgments: Vec<Result<ProbeHit, AgentError>>,
    tau: f32,
    evaluated: usize,
) -> Result<ProbeOutcome, AgentError> {
    let mut hits = Vec::with_capacity(judgments.len());
    for judgment in judgments {
        hits.push(judgment?);
    }

    let best_confidence = hits.iter().map(|h| h.confidence).fold(0.0f32, f32::max);

    // Highest confidence wins; position breaks ties so reruns agree.
    hits.retain(|hit| hit.confidence >= tau && hit.confidence > 0.0);
    hits.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.chunk.position.cmp(&b.chunk.position))
    });

    Ok(ProbeOutcome {
        decided: hits.into_iter().next(),
        best_confidence,
        evaluated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_core::ChunkId;
    use chrono::Utc;

    fn hit(confidence: f32, position: u64) -> ProbeHit {
        ProbeHit {
            chunk: Chunk {
                id: ChunkId(format!("c{position}")),
                policy_id: "p".into(),
                text: "text".into(),
                kind: ChunkKind::Exclusion,
                page_number: 1,
                section_title: None,
                position,
                embedding: vec![],
                created_at: Utc::now(),
            },
            score: 0.8,
            confidence,
            reason: String::new(),
        }
    }

    #[test]
    fn decide_prefers_confidence_then_lowest_position() {
        let outcome = decide(
            vec![Ok(hit(0.7, 9)), Ok(hit(0.9, 5)), Ok(hit(0.9, 2)), Ok(hit(0.2, 0))],
            0.6,
            4,
        )
        .unwrap();
        let decided = outcome.decided.unwrap();
        assert_eq!(decided.chunk.position, 2);
        assert!((outcome.best_confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(outcome.evaluated, 4);
    }

    #[test]
    fn below_threshold_judgments_do_not_decide() {
        let outcome = decide(vec![Ok(hit(0.5, 1)), Ok(hit(0.3, 2))], 0.6, 2).unwrap();
        assert!(outcome.decided.is_none());
        assert!((outcome.best_confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn evaluation_errors_escalate() {
        let err = decide(
            vec![
                Ok(hit(0.9, 1)),
                Err(AgentError::Provider(cg_core::ProviderError::unavailable(
                    "mock", "down",
                ))),
            ],
            0.6,
            2,
        )
        .unwrap_err();
        assert_eq!(err.code(), "provider_unavailable");
    }

    #[test]
    fn probe_kind_sets_match_the_guardrail_contract() {
        assert!(EXCLUSION_KINDS.contains(&ChunkKind::Exclusion));
        assert!(EXCLUSION_KINDS.contains(&ChunkKind::Limitation));
        assert!(!EXCLUSION_KINDS.contains(&ChunkKind::Inclusion));
        assert!(INCLUSION_KINDS.contains(&ChunkKind::General));
        assert!(!INCLUSION_KINDS.contains(&ChunkKind::Exclusion));
    }

}
