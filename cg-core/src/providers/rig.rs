//! `rig`-backed implementations of the provider capabilities.
//!
//! [`RigEmbedding`] wraps any [`rig::embeddings::EmbeddingModel`];
//! [`RigLlm`] wraps any [`rig::completion::CompletionModel`]. Structured
//! calls ask for a single JSON object and parse it out of the reply;
//! anything that does not conform surfaces as
//! [`ProviderError::MalformedAnswer`].
//!
//! `compose` issues one completion and chunks the reply into the token
//! stream; per-token backend streaming is an adapter concern that does not
//! change the caller-visible contract.

use async_trait::async_trait;
use futures_util::StreamExt;

use ::rig::completion::{AssistantContent, CompletionModel, Message as RigMessage};
use ::rig::embeddings::embedding::EmbeddingModel;

use super::{
    ComposeRequest, EmbeddingProvider, ExclusionJudgment, InclusionJudgment, LlmProvider,
    TokenStream,
};
use crate::chunk::ChunkKind;
use crate::error::ProviderError;
use crate::verdict::FinancialTerms;

/// Adapter exposing a rig embedding model as an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct RigEmbedding<M> {
    model: M,
    dimension: usize,
}

impl<M: EmbeddingModel> RigEmbedding<M> {
    #[must_use]
    pub fn new(model: M) -> Self {
        let dimension = model.ndims();
        Self { model, dimension }
    }
}

#[async_trait]
impl<M> EmbeddingProvider for RigEmbedding<M>
where
    M: EmbeddingModel + Clone + Send + Sync + 'static,
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch.pop().ok_or_else(|| ProviderError::MalformedAnswer {
            provider: "rig-embedding",
            message: "model returned no embedding".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        // Respect the model's batch ceiling; order is preserved chunk by chunk.
        for window in texts.chunks(M::MAX_DOCUMENTS.max(1)) {
            let embeddings = self
                .model
                .embed_texts(window.to_vec())
                .await
                .map_err(|err| ProviderError::unavailable("rig-embedding", err.to_string()))?;
            for embedding in embeddings {
                let vector: Vec<f32> = embedding.vec.into_iter().map(|v| v as f32).collect();
                if vector.len() != self.dimension {
                    return Err(ProviderError::MalformedAnswer {
                        provider: "rig-embedding",
                        message: format!(
                            "expected dimension {}, model returned {}",
                            self.dimension,
                            vector.len()
                        ),
                    });
                }
                vectors.push(vector);
            }
        }
        if vectors.len() != texts.len() {
            return Err(ProviderError::MalformedAnswer {
                provider: "rig-embedding",
                message: format!("asked for {} embeddings, got {}", texts.len(), vectors.len()),
            });
        }
        Ok(vectors)
    }
}

const CLASSIFY_PREAMBLE: &str = "You label insurance policy text. Answer with exactly one word \
from: EXCLUSION, INCLUSION, DEFINITION, LIMITATION, PROCEDURE, GENERAL.";

const EVALUATE_PREAMBLE: &str = "You are an insurance policy analyst. Answer with a single JSON \
object and nothing else. Only treat an item as decided when the text explicitly names it; being \
near relevant language is not enough.";

const COMPOSE_PREAMBLE: &str = "You are an insurance policy assistant. Use ONLY the numbered \
policy excerpts supplied in the context; cite them as [1], [2], ... Never state coverage that \
the excerpts do not support. Start with the verdict, then the reasoning, then any financial \
terms. This is not legal advice.";

/// Adapter exposing a rig completion model as an [`LlmProvider`].
#[derive(Clone)]
pub struct RigLlm<M> {
    model: M,
    compose_temperature: f64,
}

impl<M: CompletionModel> RigLlm<M> {
    #[must_use]
    pub fn new(model: M) -> Self {
        Self {
            model,
            compose_temperature: 0.4,
        }
    }

    #[must_use]
    pub fn with_compose_temperature(mut self, temperature: f64) -> Self {
        self.compose_temperature = temperature;
        self
    }

    async fn prompt(
        &self,
        preamble: &str,
        prompt: String,
        temperature: f64,
    ) -> Result<String, ProviderError> {
        let request = self
            .model
            .completion_request(RigMessage::user(prompt))
            .preamble(preamble.to_owned())
            .temperature(temperature)
            .build();
        let response = self
            .model
            .completion(request)
            .await
            .map_err(|err| ProviderError::unavailable("rig-llm", err.to_string()))?;
        let text = response
            .choice
            .into_iter()
            .map(|content| match content {
                AssistantContent::Text(text) => text.text,
                _ => String::new(),
            })
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }

    fn parse_json_object<T: serde::de::DeserializeOwned>(
        reply: &str,
    ) -> Result<T, ProviderError> {
        let start = reply.find('{');
        let end = reply.rfind('}');
        let (Some(start), Some(end)) = (start, end) else {
            return Err(ProviderError::MalformedAnswer {
                provider: "rig-llm",
                message: "reply carries no JSON object".to_string(),
            });
        };
        serde_json::from_str(&reply[start..=end]).map_err(|err| ProviderError::MalformedAnswer {
            provider: "rig-llm",
            message: err.to_string(),
        })
    }
}

#[derive(serde::Deserialize)]
struct RawExclusion {
    is_excluded: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reason: String,
}

#[derive(serde::Deserialize)]
struct RawInclusion {
    is_covered: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reason: String,
}

#[async_trait]
impl<M> LlmProvider for RigLlm<M>
where
    M: CompletionModel + Clone + Send + Sync + 'static,
{
    async fn classify_chunk(
        &self,
        text: &str,
        heading: Option<&str>,
    ) -> Result<Option<ChunkKind>, ProviderError> {
        let heading_line = heading
            .map(|h| format!("Section heading: {h}\n"))
            .unwrap_or_default();
        let prompt = format!(
            "{heading_line}Classify this policy text chunk.\n\
             EXCLUSION denies coverage, INCLUSION grants it, DEFINITION defines a term,\n\
             LIMITATION carries caps or deductibles, PROCEDURE describes claims duties,\n\
             GENERAL is everything else.\n\nText:\n\"\"\"\n{text}\n\"\"\"\n\nCategory:"
        );
        let reply = self.prompt(CLASSIFY_PREAMBLE, prompt, 0.0).await?;
        let word = reply
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_lowercase();
        Ok(ChunkKind::parse(&word))
    }

    async fn evaluate_exclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<ExclusionJudgment, ProviderError> {
        let prompt = format!(
            "Does this policy text EXPLICITLY state that \"{item}\" is not covered, excluded, \
             or not insured?\n\nPolicy text:\n---\n{chunk_text}\n---\n\n\
             Reply with JSON: {{\"is_excluded\": true|false, \"confidence\": 0.0-1.0, \
             \"reason\": \"short explanation\"}}"
        );
        let reply = self.prompt(EVALUATE_PREAMBLE, prompt, 0.0).await?;
        let raw: RawExclusion = Self::parse_json_object(&reply)?;
        Ok(ExclusionJudgment {
            excluded: raw.is_excluded,
            confidence: raw.confidence.clamp(0.0, 1.0),
            reason: raw.reason,
        })
    }

    async fn evaluate_inclusion(
        &self,
        chunk_text: &str,
        item: &str,
    ) -> Result<InclusionJudgment, ProviderError> {
        let prompt = format!(
            "Does this policy text EXPLICITLY state that \"{item}\" is covered, insured, or \
             protected? Consider phrasings like \"we will pay\", \"coverage includes\", \
             \"we insure against\".\n\nPolicy text:\n---\n{chunk_text}\n---\n\n\
             Reply with JSON: {{\"is_covered\": true|false, \"confidence\": 0.0-1.0, \
             \"reason\": \"short explanation\"}}"
        );
        let reply = self.prompt(EVALUATE_PREAMBLE, prompt, 0.0).await?;
        let raw: RawInclusion = Self::parse_json_object(&reply)?;
        Ok(InclusionJudgment {
            covered: raw.is_covered,
            confidence: raw.confidence.clamp(0.0, 1.0),
            reason: raw.reason,
        })
    }

    async fn extract_financials(
        &self,
        chunk_text: &str,
    ) -> Result<FinancialTerms, ProviderError> {
        let prompt = format!(
            "Extract financial terms from this policy text.\n---\n{chunk_text}\n---\n\n\
             Reply with JSON: {{\"deductible\": number|null, \"cap\": number|null, \
             \"conditions\": \"text\"|null}}"
        );
        let reply = self.prompt(EVALUATE_PREAMBLE, prompt, 0.0).await?;
        Self::parse_json_object(&reply)
    }

    async fn compose(&self, request: &ComposeRequest) -> Result<TokenStream, ProviderError> {
        let mut context = format!(
            "Question: {}\nVerdict: {} for \"{}\"\nReasoning: {}\n",
            request.utterance, request.status, request.item, request.reason
        );
        for (index, citation) in request.citations.iter().enumerate() {
            let section = citation.section.as_deref().unwrap_or("-");
            context.push_str(&format!(
                "[{}] (page {}, section {}): {}\n",
                index + 1,
                citation.page,
                section,
                citation.quote
            ));
        }
        if let Some(financials) = &request.financials {
            context.push_str(&format!(
                "Financial terms: deductible={:?} cap={:?} conditions={:?}\n",
                financials.deductible, financials.cap, financials.conditions
            ));
        }
        if let Some(advisory) = &request.advisory {
            context.push_str(&format!(
                "Advisory (informational only, never decides coverage): {advisory}\n"
            ));
        }
        let reply = self
            .prompt(COMPOSE_PREAMBLE, context, self.compose_temperature)
            .await?;
        let tokens: Vec<Result<String, ProviderError>> = reply
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(futures_util::stream::iter(tokens).boxed())
    }
}
