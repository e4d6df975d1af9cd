//! Intent routing and item extraction for user utterances.
//!
//! Routing is heuristic and cheap: coverage and exclusion phrasings go
//! through the guardrail, definition questions to term explanation,
//! money questions to the financial path. Items to evaluate come from a
//! lexicon of common coverage subjects, a table of exclusion scenarios,
//! and a stop-word fallback over the utterance's own words.

use cg_core::QueryIntent;

/// The router's reading of one utterance.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutedQuery {
    pub intent: QueryIntent,
    /// Subjects to evaluate, in extraction order, deduplicated.
    pub items: Vec<String>,
    /// "What are the exclusions?"-style listing request: probe exclusions
    /// without a specific item and summarize what the policy carves out.
    pub list_exclusions: bool,
}

const COVERAGE_KEYWORDS: [&str; 14] = [
    "covered",
    "cover",
    "does my policy",
    "am i covered",
    "exclusion",
    "excluded",
    "not covered",
    "exception",
    "exempt",
    "limitation",
    "restricted",
    "included",
    "include",
    "what's covered",
];

const EXPLAIN_KEYWORDS: [&str; 5] = ["what is", "what does", "define", "mean", "explain"];

const LIMIT_KEYWORDS: [&str; 5] = ["deductible", "limit", "cap", "how much", "payment"];

const LISTING_PATTERNS: [&str; 6] = [
    "what are the exclusion",
    "list exclusion",
    "all exclusion",
    "show exclusion",
    "what exclusion",
    "tell me the exclusion",
];

/// Common coverage subjects across auto, health, and property policies.
const STANDARD_ITEMS: [&str; 22] = [
    "engine",
    "transmission",
    "brakes",
    "suspension",
    "battery",
    "turbo",
    "pistons",
    "collision",
    "liability",
    "towing",
    "medical",
    "hospitalization",
    "surgery",
    "prescription",
    "disability",
    "theft",
    "vandalism",
    "fire",
    "flood",
    "earthquake",
    "property damage",
    "bodily injury",
];

/// Exclusion scenarios phrased many ways across insurers.
const SCENARIOS: [(&str, &[&str]); 6] = [
    ("intentional damage", &["intentional", "deliberately", "on purpose"]),
    ("fraud", &["fraud", "misrepresentation", "false statement"]),
    ("pre-existing condition", &["pre-existing", "prior condition"]),
    ("self-inflicted", &["self-inflicted", "self-harm"]),
    ("illegal activity", &["illegal", "criminal", "unlawful"]),
    ("war", &["war", "terrorism", "civil unrest"]),
];

const STOP_WORDS: [&str; 30] = [
    "am", "i", "is", "my", "the", "a", "an", "if", "to", "for", "in", "on", "it", "be", "do",
    "does", "will", "would", "can", "could", "what", "how", "when", "where", "why", "covered",
    "cover", "coverage", "policy", "insurance",
];

fn any_keyword(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// Classify an utterance and extract the items to evaluate.
#[must_use]
pub fn route(utterance: &str) -> RoutedQuery {
    let lower = utterance.to_lowercase();

    // Coverage and exclusion questions must travel the full guardrail, so
    // that check comes first.
    let intent = if any_keyword(&lower, &COVERAGE_KEYWORDS) {
        QueryIntent::CheckCoverage
    } else if any_keyword(&lower, &EXPLAIN_KEYWORDS) {
        QueryIntent::ExplainTerms
    } else if any_keyword(&lower, &LIMIT_KEYWORDS) {
        QueryIntent::GetLimits
    } else {
        QueryIntent::General
    };

    if any_keyword(&lower, &LISTING_PATTERNS) {
        return RoutedQuery {
            intent: QueryIntent::CheckCoverage,
            items: Vec::new(),
            list_exclusions: true,
        };
    }

    let mut items: Vec<String> = Vec::new();
    for item in STANDARD_ITEMS {
        if lower.contains(item) {
            items.push(item.to_string());
        }
    }
    for (scenario, cues) in SCENARIOS {
        if cues.iter().any(|cue| lower.contains(cue)) {
            items.push(scenario.to_string());
        }
    }

    if items.is_empty() {
        items = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.len() > 3 && word.chars().all(char::is_alphabetic))
            .filter(|word| !STOP_WORDS.contains(word))
            .take(3)
            .map(str::to_string)
            .collect();
    }

    let mut seen = rustc_hash::FxHashSet::default();
    items.retain(|item| seen.insert(item.clone()));

    RoutedQuery {
        intent,
        items,
        list_exclusions: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_questions_route_to_the_guardrail() {
        let routed = route("Is intentional damage covered?");
        assert_eq!(routed.intent, QueryIntent::CheckCoverage);
        assert_eq!(routed.items, vec!["intentional damage".to_string()]);
        assert!(!routed.list_exclusions);
    }

    #[test]
    fn lexicon_items_are_picked_up() {
        let routed = route("Are pistons covered?");
        assert_eq!(routed.intent, QueryIntent::CheckCoverage);
        assert_eq!(routed.items, vec!["pistons".to_string()]);

        let routed = route("Is turbo covered?");
        assert_eq!(routed.items, vec!["turbo".to_string()]);
    }

    #[test]
    fn fallback_extracts_content_words() {
        let routed = route("Is windscreen washer fluid covered?");
        assert_eq!(routed.intent, QueryIntent::CheckCoverage);
        assert!(routed.items.contains(&"windscreen".to_string()));
        assert!(!routed.items.iter().any(|i| i == "covered"));
    }

    #[test]
    fn listing_mode_triggers_without_items() {
        let routed = route("What are the exclusions in my policy?");
        assert!(routed.list_exclusions);
        assert!(routed.items.is_empty());
        assert_eq!(routed.intent, QueryIntent::CheckCoverage);
    }

    #[test]
    fn explain_and_limit_intents() {
        assert_eq!(route("What does wear mean?").intent, QueryIntent::ExplainTerms);
        assert_eq!(route("How much is the deductible?").intent, QueryIntent::GetLimits);
        assert_eq!(route("Tell me about this product").intent, QueryIntent::General);
    }

    #[test]
    fn duplicate_items_collapse() {
        let routed = route("Is the engine covered and is engine repair included?");
        let engines = routed.items.iter().filter(|i| *i == "engine").count();
        assert_eq!(engines, 1);
    }
}
