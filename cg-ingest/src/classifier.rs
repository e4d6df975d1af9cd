//! Chunk classification: keyword prior, section context, optional LLM
//! refinement.
//!
//! The heuristic cues are a *prior*. When refinement is enabled, the LLM's
//! verdict wins for the three kinds whose misclassification is legally
//! costly (exclusion, inclusion, limitation), but only when the model
//! answers from the closed enum. Out-of-enum answers and provider failures
//! keep the prior and the chunk.

use std::sync::Arc;
use std::sync::LazyLock;

use cg_core::providers::LlmProvider;
use cg_core::ChunkKind;
use regex::Regex;

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

const PROCEDURE_CUES: [&str; 3] = ["must", "required to", "notify"];

static WITHIN_N_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"within\s+\d+\s+days").expect("static procedure regex"));

fn has_cue(text: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| text.contains(cue))
}

/// Keyword prior for a chunk, before section context and refinement.
#[must_use]
pub fn heuristic_prior(text: &str) -> ChunkKind {
    let lower = text.to_lowercase();
    if has_cue(&lower, &EXCLUSION_CUES) {
        ChunkKind::Exclusion
    } else if has_cue(&lower, &INCLUSION_CUES) {
        ChunkKind::Inclusion
    } else if has_cue(&lower, &DEFINITION_CUES) {
        ChunkKind::Definition
    } else if has_cue(&lower, &LIMITATION_CUES) {
        ChunkKind::Limitation
    } else if has_cue(&lower, &PROCEDURE_CUES) || WITHIN_N_DAYS.is_match(&lower) {
        ChunkKind::Procedure
    } else {
        ChunkKind::General
    }
}

/// Kind implied by a section heading, if any.
#[must_use]
pub fn section_kind(section_title: &str) -> Option<ChunkKind> {
    let upper = section_title.to_uppercase();
    if upper.contains("EXCLUSION") {
        Some(ChunkKind::Exclusion)
    } else if upper.contains("COVERAGE") || upper.contains("INCLUSION") {
        Some(ChunkKind::Inclusion)
    } else if upper.contains("DEFINITION") {
        Some(ChunkKind::Definition)
    } else if upper.contains("LIMITATION") {
        Some(ChunkKind::Limitation)
    } else if upper.contains("OBLIGATION") {
        Some(ChunkKind::Procedure)
    } else {
        None
    }
}

/// Two-stage chunk classifier.
pub struct Classifier {
    refiner: Option<Arc<dyn LlmProvider>>,
}

impl Classifier {
    /// Heuristics only.
    #[must_use]
    pub fn heuristic() -> Self {
        Self { refiner: None }
    }

    /// Heuristics plus LLM refinement for the legally costly kinds.
    #[must_use]
    pub fn with_refiner(llm: Arc<dyn LlmProvider>) -> Self {
        Self { refiner: Some(llm) }
    }

    /// Assign exactly one kind to a chunk.
    ///
    /// Stage 1 takes the cue-table prior; a cue-less chunk under a known
    /// section heading takes the section's kind (section context wins
    /// ties). Stage 2, when enabled, lets the LLM confirm or override
    /// priors in {Exclusion, Inclusion, Limitation}.
    pub async fn classify(&self, text: &str, section_title: Option<&str>) -> ChunkKind {
        let mut kind = heuristic_prior(text);
        if kind == ChunkKind::General {
            if let Some(section) = section_title.and_then(section_kind) {
                kind = section;
            }
        }

        let refine = matches!(
            kind,
            ChunkKind::Exclusion | ChunkKind::Inclusion | ChunkKind::Limitation
        );
        if !refine {
            return kind;
        }
        let Some(llm) = &self.refiner else {
            return kind;
        };

        match llm.classify_chunk(text, section_title).await {
            Ok(Some(refined)) => refined,
            Ok(None) => {
                tracing::info!(
                    prior = %kind,
                    "classifier answered outside the enum; keeping the prior"
                );
                kind
            }
            Err(err) => {
                tracing::warn!(
                    prior = %kind,
                    error = %err,
                    "classification refinement unavailable; keeping the prior"
                );
                kind
            }
        }
    }
}
