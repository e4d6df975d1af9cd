//! Coverage verdicts: the structured result of a chat turn.
//!
//! The JSON shape of [`CoverageVerdict`] is part of the external contract;
//! field names are stable across versions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chunk::Citation;

/// Final coverage decision for a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageStatus {
    Covered,
    NotCovered,
    Conditional,
    Unknown,
}

impl fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CoverageStatus::Covered => "COVERED",
            CoverageStatus::NotCovered => "NOT_COVERED",
            CoverageStatus::Conditional => "CONDITIONAL",
            CoverageStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Classified intent of a user utterance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// "Is X covered?"
    CheckCoverage,
    /// "What does X mean?"
    ExplainTerms,
    /// "What are the deductibles?"
    GetLimits,
    /// Anything else about the policy.
    General,
}

/// Financial terms pulled from limitation chunks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialTerms {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deductible: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
}

impl FinancialTerms {
    /// True when no field carries a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deductible.is_none() && self.cap.is_none() && self.conditions.is_none()
    }

    /// Merge another extraction into this one, keeping existing values.
    pub fn absorb(&mut self, other: FinancialTerms) {
        if self.deductible.is_none() {
            self.deductible = other.deductible;
        }
        if self.cap.is_none() {
            self.cap = other.cap;
        }
        if self.conditions.is_none() {
            self.conditions = other.conditions;
        }
    }
}

/// The structured result of a turn.
///
/// `confidence` is the confidence of the decisive step: the excluding
/// chunk's for `NotCovered`, the including chunk's for `Covered`, the max
/// of the two for `Conditional`, and 0 for `Unknown`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoverageVerdict {
    pub status: CoverageStatus,
    pub item: String,
    pub reason: String,
    pub confidence: f32,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financials: Option<FinancialTerms>,
}

impl CoverageVerdict {
    /// The degraded verdict emitted when nothing in the policy answers the
    /// question. Never claims coverage and carries zero citations.
    #[must_use]
    pub fn unknown(item: impl Into<String>) -> Self {
        CoverageVerdict {
            status: CoverageStatus::Unknown,
            item: item.into(),
            reason: "I could not find relevant policy text for this question".to_string(),
            confidence: 0.0,
            citations: Vec::new(),
            financials: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&CoverageStatus::NotCovered).unwrap(),
            r#""NOT_COVERED""#
        );
        assert_eq!(
            serde_json::to_string(&CoverageStatus::Covered).unwrap(),
            r#""COVERED""#
        );
    }

    #[test]
    fn unknown_verdict_never_claims_coverage() {
        let verdict = CoverageVerdict::unknown("flood damage");
        assert_eq!(verdict.status, CoverageStatus::Unknown);
        assert!(verdict.citations.is_empty());
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn financial_terms_absorb_keeps_existing() {
        let mut terms = FinancialTerms {
            deductible: Some(400.0),
            cap: None,
            conditions: None,
        };
        terms.absorb(FinancialTerms {
            deductible: Some(999.0),
            cap: Some(15_000.0),
            conditions: Some("per visit".into()),
        });
        assert_eq!(terms.deductible, Some(400.0));
        assert_eq!(terms.cap, Some(15_000.0));
        assert_eq!(terms.conditions.as_deref(), Some("per visit"));
    }

    #[test]
    fn verdict_json_field_names_are_stable() {
        let verdict = CoverageVerdict::unknown("engine");
        let value = serde_json::to_value(&verdict).unwrap();
        let object = value.as_object().unwrap();
        for field in ["status", "item", "reason", "confidence", "citations"] {
            assert!(object.contains_key(field), "missing field {field}");
        }
    }
}
