//! The Coverage Guardrail: a fixed-order decision state machine.
//!
//! The order (route, exclusion probe, inclusion probe, financial probe,
//! compose) is a correctness property, not a performance choice. An
//! exclusion match short-circuits straight to composition; nothing
//! downstream (financial context included) may overturn a NOT_COVERED
//! outcome.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;

use cg_core::providers::retry::RetryPolicy;
use cg_core::providers::{ComposeRequest, EmbeddingProvider, LlmProvider};
use cg_core::{
    Citation, ChunkKind, CoverageConfig, CoverageStatus, CoverageVerdict, FinancialTerms,
    QueryIntent,
};
use cg_ingest::ChunkStore;

use crate::compose::{grounding_violations, run_compose};
use crate::error::AgentError;
use crate::financial::extract_with_llm;
use crate::probes::{exclusion_probe, inclusion_probe, retrieve_guarded};
use crate::router::route;

/// Retrieval depth for "list the exclusions" turns.
const LISTING_DEPTH: usize = 15;
/// Citations attached to informational (non-guardrail) turns.
const CONTEXT_CITATIONS: usize = 3;
/// Verbatim quote length cap per citation.
const QUOTE_CHARS: usize = 300;

/// The guardrail's states. Adding a step is a code change here and in
/// [`CoverageAgent::run_turn`]; there is no runtime graph to reconfigure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailStep {
    Route,
    ExclusionProbe,
    InclusionProbe,
    FinancialProbe,
    Compose,
}

impl fmt::Display for GuardrailStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GuardrailStep::Route => "route",
            GuardrailStep::ExclusionProbe => "exclusion_probe",
            GuardrailStep::InclusionProbe => "inclusion_probe",
            GuardrailStep::FinancialProbe => "financial_probe",
            GuardrailStep::Compose => "compose",
        };
        f.write_str(label)
    }
}

/// Everything one guardrail run produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub verdict: CoverageVerdict,
    /// Full composed answer text (also streamed token by token when
    /// streaming is on).
    pub composed: String,
    pub intent: QueryIntent,
    /// Step-by-step audit trail. Never consulted for decisions.
    pub trace: Vec<String>,
}

/// Per-item result of the probe sequence, before composition.
struct ItemCheck {
    item: String,
    status: CoverageStatus,
    confidence: f32,
    reason: String,
    citations: Vec<Citation>,
    financials: Option<FinancialTerms>,
}

/// The guardrail agent. One instance serves many concurrent turns; all
/// state lives on the turn's stack.
pub struct CoverageAgent {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    config: CoverageConfig,
    retry: RetryPolicy,
    compose_gate: Semaphore,
}

impl CoverageAgent {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        config: CoverageConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry_base, config.retry_max_tries);
        let compose_gate = Semaphore::new(config.compose_concurrency);
        Self {
            store,
            embedder,
            llm,
            config,
            retry,
            compose_gate,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    /// Run one turn against `policy_id`.
    ///
    /// Tokens stream into `sink` as the composer produces them (when
    /// streaming is enabled); the returned outcome carries the final
    /// verdict after the grounding check.
    pub async fn run_turn(
        &self,
        policy_id: &str,
        utterance: &str,
        advisory: Option<String>,
        sink: Option<&flume::Sender<String>>,
    ) -> Result<TurnOutcome, AgentError> {
        let mut trace = Vec::new();
        let routed = route(utterance);
        trace.push(format!(
            "[{}] intent={:?} items={:?} listing={}",
            GuardrailStep::Route,
            routed.intent,
            routed.items,
            routed.list_exclusions,
        ));

        let check = if routed.list_exclusions {
            self.list_exclusions(policy_id, utterance, &mut trace).await?
        } else if routed.intent == QueryIntent::CheckCoverage && !routed.items.is_empty() {
            self.guardrail(policy_id, utterance, &routed.items, &mut trace)
                .await?
        } else {
            self.informational(policy_id, utterance, routed.intent, &routed.items, &mut trace)
                .await?
        };

        let mut verdict = CoverageVerdict {
            status: check.status,
            item: check.item,
            reason: check.reason,
            confidence: check.confidence,
            citations: check.citations,
            financials: check.financials,
        };

        let request = ComposeRequest {
            utterance: utterance.to_string(),
            intent: routed.intent,
            status: verdict.status,
            item: verdict.item.clone(),
            reason: verdict.reason.clone(),
            citations: verdict.citations.clone(),
            financials: verdict.financials.clone(),
            advisory,
        };
        let composed = run_compose(
            &self.llm,
            &self.compose_gate,
            &self.retry,
            self.config.compose_stream,
            &request,
            sink,
        )
        .await?;
        trace.push(format!(
            "[{}] {} chars, {} citations",
            GuardrailStep::Compose,
            composed.len(),
            verdict.citations.len(),
        ));

        let violations = grounding_violations(&composed, verdict.citations.len());
        if !violations.is_empty() {
            tracing::warn!(
                policy_id,
                markers = ?violations,
                status = %verdict.status,
                "grounding failure: composed answer cites unsupplied material; \
                 downgrading verdict to UNKNOWN"
            );
            trace.push(format!(
                "[{}] grounding failure on markers {:?}; downgraded to UNKNOWN",
                GuardrailStep::Compose,
                violations,
            ));
            verdict.status = CoverageStatus::Unknown;
            verdict.confidence = 0.0;
            verdict.reason =
                "the composed answer referenced material outside the cited policy text".to_string();
        }

        Ok(TurnOutcome {
            verdict,
            composed,
            intent: routed.intent,
            trace,
        })
    }

    /// Steps 2–4 for each extracted item, guardrail order enforced.
    async fn guardrail(
        &self,
        policy_id: &str,
        utterance: &str,
        items: &[String],
        trace: &mut Vec<String>,
    ) -> Result<ItemCheck, AgentError> {
        let mut checks: Vec<ItemCheck> = Vec::with_capacity(items.len());

        for item in items {
            let query_text = format!("{utterance} {item}");
            let query = self
                .retry
                .run("embed_one", || self.embedder.embed_one(&query_text))
                .await?;

            let exclusion = exclusion_probe(
                &self.store,
                &self.llm,
                &self.retry,
                &self.config,
                policy_id,
                &query,
                item,
            )
            .await?;
            if let Some(hit) = exclusion.decided {
                trace.push(format!(
                    "[{}] item={item} EXCLUDED confidence={:.2} page={} (checked {})",
                    GuardrailStep::ExclusionProbe,
                    hit.confidence,
                    hit.chunk.page_number,
                    exclusion.evaluated,
                ));
                checks.push(ItemCheck {
                    item: item.clone(),
                    status: CoverageStatus::NotCovered,
                    confidence: hit.confidence,
                    reason: hit.reason,
                    citations: vec![hit.chunk.citation(QUOTE_CHARS)],
                    financials: None,
                });
                continue;
            }
            trace.push(format!(
                "[{}] item={item} no exclusion (checked {}, best {:.2})",
                GuardrailStep::ExclusionProbe,
                exclusion.evaluated,
                exclusion.best_confidence,
            ));

            let inclusion = inclusion_probe(
                &self.store,
                &self.llm,
                &self.retry,
                &self.config,
                policy_id,
                &query,
                item,
            )
            .await?;
            let Some(hit) = inclusion.decided else {
                trace.push(format!(
                    "[{}] item={item} no explicit coverage (checked {})",
                    GuardrailStep::InclusionProbe,
                    inclusion.evaluated,
                ));
                checks.push(ItemCheck {
                    item: item.clone(),
                    status: CoverageStatus::Unknown,
                    confidence: 0.0,
                    reason: "no policy text explicitly covers or excludes this item".to_string(),
                    citations: Vec::new(),
                    financials: None,
                });
                continue;
            };
            trace.push(format!(
                "[{}] item={item} COVERED confidence={:.2} page={}",
                GuardrailStep::InclusionProbe,
                hit.confidence,
                hit.chunk.page_number,
            ));

            // Step 4 annotates; it never overturns.
            let (terms, financial_citations) =
                self.financial_context(policy_id, &query, trace).await?;

            let mut citations = vec![hit.chunk.citation(QUOTE_CHARS)];
            let conditional = !financial_citations.is_empty();
            citations.extend(financial_citations);

            if conditional {
                checks.push(ItemCheck {
                    item: item.clone(),
                    status: CoverageStatus::Conditional,
                    confidence: hit.confidence.max(exclusion.best_confidence),
                    reason: format!("{} subject to the cited financial terms", hit.reason),
                    citations,
                    financials: Some(terms),
                });
            } else {
                checks.push(ItemCheck {
                    item: item.clone(),
                    status: CoverageStatus::Covered,
                    confidence: hit.confidence,
                    reason: hit.reason,
                    citations,
                    financials: if terms.is_empty() { None } else { Some(terms) },
                });
            }
        }

        // An excluded item dominates the turn; then a covered one; a turn
        // that decided nothing stays UNKNOWN.
        let decisive = checks
            .iter()
            .position(|c| c.status == CoverageStatus::NotCovered)
            .or_else(|| {
                checks.iter().position(|c| {
                    matches!(c.status, CoverageStatus::Covered | CoverageStatus::Conditional)
                })
            })
            .unwrap_or(0);

        Ok(checks.swap_remove(decisive))
    }

    /// Step 4: pull deductible/cap/conditions near the query.
    async fn financial_context(
        &self,
        policy_id: &str,
        query: &[f32],
        trace: &mut Vec<String>,
    ) -> Result<(FinancialTerms, Vec<Citation>), AgentError> {
        let retrieved = retrieve_guarded(
            &self.store,
            policy_id,
            query,
            self.config.k_financial,
            Some(&[ChunkKind::Limitation]),
        )
        .await?;

        let mut terms = FinancialTerms::default();
        let mut citations = Vec::new();
        for scored in retrieved {
            let found = extract_with_llm(&self.llm, &scored.chunk.text).await;
            if !found.is_empty() {
                citations.push(scored.chunk.citation(QUOTE_CHARS));
                terms.absorb(found);
            }
        }
        trace.push(format!(
            "[{}] deductible={:?} cap={:?} conditions={:?}",
            GuardrailStep::FinancialProbe,
            terms.deductible,
            terms.cap,
            terms.conditions,
        ));
        Ok((terms, citations))
    }

    /// "What are the exclusions?": cite the policy's exclusion clauses
    /// without judging a specific item.
    async fn list_exclusions(
        &self,
        policy_id: &str,
        utterance: &str,
        trace: &mut Vec<String>,
    ) -> Result<ItemCheck, AgentError> {
        let query = self
            .retry
            .run("embed_one", || self.embedder.embed_one(utterance))
            .await?;
        let retrieved = retrieve_guarded(
            &self.store,
            policy_id,
            &query,
            LISTING_DEPTH,
            Some(&[ChunkKind::Exclusion]),
        )
        .await?;

        let citations: Vec<Citation> = retrieved
            .iter()
            .take(5)
            .map(|scored| scored.chunk.citation(QUOTE_CHARS))
            .collect();
        trace.push(format!(
            "[{}] listing mode: {} exclusion clauses found",
            GuardrailStep::ExclusionProbe,
            citations.len(),
        ));

        let reason = if citations.is_empty() {
            "no explicit exclusion clauses found in the policy".to_string()
        } else {
            format!("the policy carries {} exclusion clause(s)", citations.len())
        };

        Ok(ItemCheck {
            item: "policy exclusions".to_string(),
            status: CoverageStatus::Unknown,
            confidence: 0.0,
            reason,
            citations,
            financials: None,
        })
    }

    /// Non-guardrail intents: bounded retrieval, citations still attached.
    async fn informational(
        &self,
        policy_id: &str,
        utterance: &str,
        intent: QueryIntent,
        items: &[String],
        trace: &mut Vec<String>,
    ) -> Result<ItemCheck, AgentError> {
        let kinds: Option<&[ChunkKind]> = match intent {
            QueryIntent::ExplainTerms => {
                Some(&[ChunkKind::Definition, ChunkKind::General, ChunkKind::Inclusion])
            }
            QueryIntent::GetLimits => Some(&[ChunkKind::Limitation]),
            _ => None,
        };

        let query = self
            .retry
            .run("embed_one", || self.embedder.embed_one(utterance))
            .await?;
        let retrieved = retrieve_guarded(
            &self.store,
            policy_id,
            &query,
            self.config.k_inclusion,
            kinds,
        )
        .await?;

        let citations: Vec<Citation> = retrieved
            .iter()
            .take(CONTEXT_CITATIONS)
            .map(|scored| scored.chunk.citation(QUOTE_CHARS))
            .collect();

        let financials = if intent == QueryIntent::GetLimits {
            let (terms, _) = self.financial_context(policy_id, &query, trace).await?;
            if terms.is_empty() {
                None
            } else {
                Some(terms)
            }
        } else {
            None
        };

        trace.push(format!(
            "[{:?}] informational turn with {} citations",
            intent,
            citations.len(),
        ));

        let item = items
            .first()
            .cloned()
            .unwrap_or_else(|| utterance.to_string());
        let reason = if citations.is_empty() {
            "no relevant policy text retrieved".to_string()
        } else {
            "informational answer grounded in the cited policy text".to_string()
        };

        Ok(ItemCheck {
            item,
            status: CoverageStatus::Unknown,
            confidence: 0.0,
            reason,
            citations,
            financials,
        })
    }
}
