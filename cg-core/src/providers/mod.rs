//! Capability traits for the external services the engine depends on.
//!
//! The core never names a concrete model. Embedding and LLM backends live
//! behind [`EmbeddingProvider`] and [`LlmProvider`]; deployments plug in the
//! `rig`-backed adapters from [`rig`], tests use the deterministic mocks
//! from [`mock`].
//!
//! Every method on these traits is a suspension point; callers must not
//! hold a lock across an `.await` of a provider call.

pub mod cache;
pub mod mock;
pub mod retry;
pub mod rig;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkKind, Citation};
use crate::error::ProviderError;
use crate::verdict::{CoverageStatus, FinancialTerms, QueryIntent};

/// Stream of composed answer tokens, in emission order.
pub type TokenStream = BoxStream<'static, Result<String, ProviderError>>;

/// Maps text to fixed-dimension vectors.
///
/// All vectors returned by one provider instance have identical length,
/// fixed at construction. Input-length limits (and any truncation policy)
/// are the provider's own business; the core asserts only the output
/// dimension.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The dimension D of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Answer to "does this chunk exclude the item?".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExclusionJudgment {
    pub excluded: bool,
    pub confidence: f32,
    pub reason: String,
}

/// Answer to "does this chunk cover the item?".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InclusionJudgment {
    pub covered: bool,
    pub confidence: f32,
    pub reason: String,
}

/// Structured context handed to the composer.
///
/// The composer is instructed to use only the supplied citations; any claim
/// not grounded in one is a composition failure the agent detects
/// downstream. `advisory` carries non-authoritative session context (e.g.
/// B2B account constraints) that may be mentioned but never decides
/// coverage.
#[derive(Clone, Debug, Serialize)]
pub struct ComposeRequest {
    pub utterance: String,
    pub intent: QueryIntent,
    pub status: CoverageStatus,
    pub item: String,
    pub reason: String,
    pub citations: Vec<Citation>,
    pub financials: Option<FinancialTerms>,
    pub advisory: Option<String>,
}

/// Prompt-to-structured-JSON capability of an LLM backend.
///
/// Structured calls (`classify_chunk`, `evaluate_*`, `extract_financials`)
/// are never streamed; only [`compose`](Self::compose) yields tokens.
/// Non-conforming structured answers surface as
/// [`ProviderError::MalformedAnswer`] and are treated by callers as a
/// no-decision, not as a verdict.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Confirm or override a heuristic classification prior.
    ///
    /// The answer must come from the closed [`ChunkKind`] enum; `None`
    /// means the model answered outside it and the prior stands.
    async fn classify_chunk(
        &self,
        text: &str,
        heading: Option<&str>,
    ) -> Result<Option<ChunkKind>, ProviderError>;

    /// Evaluate whether `chunk_text` explicitly excludes `item`.
    async fn evaluate_exclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<ExclusionJudgment, ProviderError>;

    /// Evaluate whether `chunk_text` explicitly covers `item`.
    async fn evaluate_inclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<InclusionJudgment, ProviderError>;

    /// Pull deductible/cap/conditions out of a limitation chunk.
    async fn extract_financials(
        &self,
        chunk_text: &str,
    ) -> Result<FinancialTerms, ProviderError>;

    /// Compose the final natural-language answer from structured context.
    async fn compose(&self, request: &ComposeRequest) -> Result<TokenStream, ProviderError>;
}
