//! Financial term extraction from limitation chunks.
//!
//! A regex pass pulls the common shapes (deductible, cap, per-X
//! conditions); the LLM extractor fills whatever the patterns miss. This
//! step never overturns a coverage decision; it only annotates one.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use cg_core::providers::LlmProvider;
use cg_core::FinancialTerms;

static DEDUCTIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:deductible|co-?pay|self[-\s]participation)[:\s]*([0-9][0-9,]*(?:\.[0-9]+)?)")
        .expect("static deductible regex")
});

static CAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:cap|maximum|max|limit|up\s*to)[:\s]*(?:of\s*)?([0-9][0-9,]*(?:\.[0-9]+)?)")
        .expect("static cap regex")
});

static CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(per\s+\w+|subject\s+to\s+[^.;]+)").expect("static condition regex")
});

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

/// Regex-only extraction.
#[must_use]
pub fn extract_terms(text: &str) -> FinancialTerms {
    FinancialTerms {
        deductible: DEDUCTIBLE
            .captures(text)
            .and_then(|c| parse_amount(&c[1])),
        cap: CAP.captures(text).and_then(|c| parse_amount(&c[1])),
        conditions: CONDITION
            .captures(text)
            .map(|c| c[1].trim().to_string()),
    }
}

/// Regex first, LLM filling the gaps. LLM failures degrade to whatever the
/// patterns found. This step is advisory, not decisive.
pub async fn extract_with_llm(llm: &Arc<dyn LlmProvider>, text: &str) -> FinancialTerms {
    let mut terms = extract_terms(text);
    if terms.deductible.is_some() && terms.cap.is_some() {
        return terms;
    }
    match llm.extract_financials(text).await {
        Ok(refined) => terms.absorb(refined),
        Err(err) => {
            tracing::debug!(error = %err, "LLM financial extraction unavailable; keeping regex terms");
        }
    }
    terms
}
