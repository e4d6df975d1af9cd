//! Deterministic providers for tests and offline development.
//!
//! [`MockEmbeddingProvider`] hashes tokens into a fixed number of buckets,
//! so texts sharing vocabulary land close in cosine space, which is enough signal
//! for retrieval tests without a model. [`MockLlm`] answers the structured
//! calls from keyword rules, which makes the guardrail's end-to-end
//! behavior reproducible.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use rustc_hash::FxHasher;

use super::{
    ComposeRequest, EmbeddingProvider, ExclusionJudgment, InclusionJudgment, LlmProvider,
    TokenStream,
};
use crate::chunk::ChunkKind;
use crate::error::ProviderError;
use crate::verdict::FinancialTerms;

/// Hashed bag-of-words embedding with a fixed dimension.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self { dimension: 64 }
    }
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        debug_assert!(dimension > 0, "embedding dimension must be positive");
        Self { dimension }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let mut hasher = FxHasher::default();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

const EXCLUSION_CUES: [&str; 7] = [
    "not covered",
    "excluded",
    "does not cover",
    "we do not insure",
    "following are not included",
    "except",
    "no coverage for",
];

const INCLUSION_CUES: [&str; 4] = [
    "we will pay",
    "coverage includes",
    "is covered",
    "benefits include",
];

const DEFINITION_CUES: [&str; 3] = ["means", "defined as", "refers to"];

const LIMITATION_CUES: [&str; 5] = ["up to", "maximum", "cap", "deductible", "limit"];

/// Keyword-rule LLM standing in for a real backend.
///
/// The rules mirror what the prompts ask of a production model: an item is
/// excluded only when the chunk names it inside exclusion language, and
/// covered only when it is named inside coverage language.
#[derive(Debug, Default)]
pub struct MockLlm {
    fail_remaining: AtomicU32,
    out_of_enum_classifier: bool,
    rogue_composer: bool,
}

impl MockLlm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` structured calls with a retriable error.
    #[must_use]
    pub fn flaky(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Answer classification outside the closed enum (always `None`).
    #[must_use]
    pub fn answering_out_of_enum(mut self) -> Self {
        self.out_of_enum_classifier = true;
        self
    }

    /// Compose answers that reference a citation that was never supplied.
    /// Exercises the grounding check.
    #[must_use]
    pub fn with_rogue_composer(mut self) -> Self {
        self.rogue_composer = true;
        self
    }

    fn take_failure(&self) -> Option<ProviderError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            Some(ProviderError::unavailable("mock-llm", "injected outage"))
        } else {
            None
        }
    }
}

fn contains_item(text: &str, item: &str) -> bool {
    let haystack = text.to_lowercase();
    let mut any = false;
    for word in item.to_lowercase().split_whitespace() {
        if !haystack.contains(word) {
            return false;
        }
        any = true;
    }
    any
}

fn has_cue(text: &str, cues: &[&str]) -> bool {
    let haystack = text.to_lowercase();
    cues.iter().any(|cue| haystack.contains(cue))
}

fn number_after(text: &str, keys: &[&str]) -> Option<f64> {
    let haystack = text.to_lowercase();
    for key in keys {
        let Some(at) = haystack.find(key) else {
            continue;
        };
        let tail = &haystack[at + key.len()..];
        let digits: String = tail
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .filter(|c| *c != ',')
            .collect();
        if let Ok(value) = digits.trim_end_matches('.').parse() {
            return Some(value);
        }
    }
    None
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn classify_chunk(
        &self,
        text: &str,
        heading: Option<&str>,
    ) -> Result<Option<ChunkKind>, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        if self.out_of_enum_classifier {
            return Ok(None);
        }
        let heading = heading.unwrap_or("").to_lowercase();
        let kind = if heading.contains("exclusion") || has_cue(text, &EXCLUSION_CUES) {
            ChunkKind::Exclusion
        } else if heading.contains("coverage") || has_cue(text, &INCLUSION_CUES) {
            ChunkKind::Inclusion
        } else if heading.contains("definition") || has_cue(text, &DEFINITION_CUES) {
            ChunkKind::Definition
        } else if heading.contains("limitation") || has_cue(text, &LIMITATION_CUES) {
            ChunkKind::Limitation
        } else {
            ChunkKind::General
        };
        Ok(Some(kind))
    }

    async fn evaluate_exclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<ExclusionJudgment, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let named = contains_item(chunk_text, item);
        let cue = has_cue(chunk_text, &EXCLUSION_CUES);
        let judgment = if named && cue {
            ExclusionJudgment {
                excluded: true,
                confidence: 0.9,
                reason: format!("the text explicitly removes {item} from coverage"),
            }
        } else if cue {
            ExclusionJudgment {
                excluded: false,
                confidence: 0.3,
                reason: "exclusion language present but the item is not its subject".to_string(),
            }
        } else {
            ExclusionJudgment {
                excluded: false,
                confidence: 0.0,
                reason: "no exclusion language".to_string(),
            }
        };
        Ok(judgment)
    }

    async fn evaluate_inclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<InclusionJudgment, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let named = contains_item(chunk_text, item);
        let grants = has_cue(chunk_text, &INCLUSION_CUES) && !has_cue(chunk_text, &EXCLUSION_CUES);
        let judgment = if named && grants {
            InclusionJudgment {
                covered: true,
                confidence: 0.85,
                reason: format!("the text grants coverage for {item}"),
            }
        } else {
            InclusionJudgment {
                covered: false,
                confidence: 0.0,
                reason: "no explicit grant of coverage for the item".to_string(),
            }
        };
        Ok(judgment)
    }

    async fn extract_financials(
        &self,
        chunk_text: &str,
    ) -> Result<FinancialTerms, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(FinancialTerms {
            deductible: number_after(chunk_text, &["deductible"]),
            cap: number_after(chunk_text, &["cap", "maximum", "up to"]),
            conditions: None,
        })
    }

    async fn compose(&self, request: &ComposeRequest) -> Result<TokenStream, ProviderError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut text = format!(
            "{status} for {item}: {reason}.",
            status = request.status,
            item = request.item,
            reason = request.reason
        );
        for (index, citation) in request.citations.iter().enumerate() {
            text.push_str(&format!(" [{}] page {}.", index + 1, citation.page));
        }
        if let Some(financials) = &request.financials {
            if let Some(deductible) = financials.deductible {
                text.push_str(&format!(" Deductible {deductible}."));
            }
            if let Some(cap) = financials.cap {
                text.push_str(&format!(" Cap {cap}."));
            }
        }
        if self.rogue_composer {
            text.push_str(" Also note the unrelated clause [99].");
        }
        let tokens: Vec<Result<String, ProviderError>> = text
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(futures_util::stream::iter(tokens).boxed())
    }
}
