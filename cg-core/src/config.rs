//! Engine configuration surface.
//!
//! One [`CoverageConfig`] is shared by the ingestion pipeline, the chunk
//! store, and the guardrail agent. Values come from code (builder methods)
//! or from the environment via [`CoverageConfig::from_env`], which loads a
//! `.env` file when present.

use std::time::Duration;

/// Tunable knobs the engine recognizes, with the deployment defaults.
///
/// ```rust
/// use cg_core::CoverageConfig;
///
/// let config = CoverageConfig::default()
///     .with_chunk_size(600)
///     .with_tau_exclusion(0.5);
///
/// assert_eq!(config.chunk_size, 600);
/// assert_eq!(config.k_exclusion, 8);
/// ```
#[derive(Clone, Debug)]
pub struct CoverageConfig {
    /// Target chunk length in characters (500–1000).
    pub chunk_size: usize,
    /// Overlap carried across chunk boundaries, as a fraction of
    /// `chunk_size`.
    pub chunk_overlap: f32,
    /// Embedding dimension D, fixed per deployment. Switching providers
    /// with a different D requires a full re-ingest.
    pub embedding_dim: usize,
    /// Retrieval depth for the exclusion probe.
    pub k_exclusion: usize,
    /// Retrieval depth for the inclusion probe.
    pub k_inclusion: usize,
    /// Retrieval depth for the financial probe.
    pub k_financial: usize,
    /// Confidence threshold above which an exclusion evaluation decides
    /// the step. False negatives here are catastrophic; prefer lowering
    /// this over raising it.
    pub tau_exclusion: f32,
    /// Confidence threshold for the inclusion probe.
    pub tau_inclusion: f32,
    /// Concurrent per-step LLM evaluations.
    pub fanout_limit: usize,
    /// Whether verdict composition streams tokens.
    pub compose_stream: bool,
    /// Base delay of the provider retry policy.
    pub retry_base: Duration,
    /// Maximum attempts for retriable provider calls.
    pub retry_max_tries: u32,
    /// Whether the classifier asks the LLM to refine heuristic priors.
    pub llm_classification: bool,
    /// Global cap on concurrent compose streams across sessions.
    pub compose_concurrency: usize,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 0.15,
            embedding_dim: 384,
            k_exclusion: 8,
            k_inclusion: 8,
            k_financial: 4,
            tau_exclusion: 0.6,
            tau_inclusion: 0.6,
            fanout_limit: 4,
            compose_stream: true,
            retry_base: Duration::from_millis(200),
            retry_max_tries: 3,
            llm_classification: false,
            compose_concurrency: 8,
        }
    }
}

impl CoverageConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables mirror the field names with a `COVERGUARD_`
    /// prefix (e.g. `COVERGUARD_CHUNK_SIZE`, `COVERGUARD_TAU_EXCLUSION`).
    /// A `.env` file in the working directory is honored when present.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Some(value) = read_env("COVERGUARD_CHUNK_SIZE") {
            config.chunk_size = value;
        }
        if let Some(value) = read_env("COVERGUARD_CHUNK_OVERLAP") {
            config.chunk_overlap = value;
        }
        if let Some(value) = read_env("COVERGUARD_EMBEDDING_DIM") {
            config.embedding_dim = value;
        }
        if let Some(value) = read_env("COVERGUARD_K_EXCLUSION") {
            config.k_exclusion = value;
        }
        if let Some(value) = read_env("COVERGUARD_K_INCLUSION") {
            config.k_inclusion = value;
        }
        if let Some(value) = read_env("COVERGUARD_K_FINANCIAL") {
            config.k_financial = value;
        }
        if let Some(value) = read_env("COVERGUARD_TAU_EXCLUSION") {
            config.tau_exclusion = value;
        }
        if let Some(value) = read_env("COVERGUARD_TAU_INCLUSION") {
            config.tau_inclusion = value;
        }
        if let Some(value) = read_env("COVERGUARD_FANOUT_LIMIT") {
            config.fanout_limit = value;
        }
        if let Some(value) = read_env("COVERGUARD_COMPOSE_STREAM") {
            config.compose_stream = value;
        }
        if let Some(value) = read_env::<u64>("COVERGUARD_RETRY_BASE_MS") {
            config.retry_base = Duration::from_millis(value);
        }
        if let Some(value) = read_env("COVERGUARD_RETRY_MAX_TRIES") {
            config.retry_max_tries = value;
        }
        if let Some(value) = read_env("COVERGUARD_LLM_CLASSIFICATION") {
            config.llm_classification = value;
        }
        config
    }

    /// Overlap length in characters, derived from size and fraction.
    #[must_use]
    pub fn overlap_chars(&self) -> usize {
        (self.chunk_size as f32 * self.chunk_overlap).round() as usize
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        debug_assert!(
            (500..=1000).contains(&chunk_size),
            "chunk_size should stay within 500..=1000, got {chunk_size}",
        );
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_chunk_overlap(mut self, fraction: f32) -> Self {
        debug_assert!(
            (0.0..0.5).contains(&fraction),
            "chunk_overlap must be a fraction below 0.5, got {fraction}",
        );
        self.chunk_overlap = fraction;
        self
    }

    #[must_use]
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    #[must_use]
    pub fn with_k_exclusion(mut self, k: usize) -> Self {
        self.k_exclusion = k;
        self
    }

    #[must_use]
    pub fn with_k_inclusion(mut self, k: usize) -> Self {
        self.k_inclusion = k;
        self
    }

    #[must_use]
    pub fn with_k_financial(mut self, k: usize) -> Self {
        self.k_financial = k;
        self
    }

    #[must_use]
    pub fn with_tau_exclusion(mut self, tau: f32) -> Self {
        debug_assert!((0.0..=1.0).contains(&tau), "tau must be in [0, 1]");
        self.tau_exclusion = tau;
        self
    }

    #[must_use]
    pub fn with_tau_inclusion(mut self, tau: f32) -> Self {
        debug_assert!((0.0..=1.0).contains(&tau), "tau must be in [0, 1]");
        self.tau_inclusion = tau;
        self
    }

    #[must_use]
    pub fn with_fanout_limit(mut self, limit: usize) -> Self {
        self.fanout_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_compose_stream(mut self, stream: bool) -> Self {
        self.compose_stream = stream;
        self
    }

    #[must_use]
    pub fn with_llm_classification(mut self, enabled: bool) -> Self {
        self.llm_classification = enabled;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, base: Duration, max_tries: u32) -> Self {
        self.retry_base = base;
        self.retry_max_tries = max_tries;
        self
    }

    #[must_use]
    pub fn with_compose_concurrency(mut self, limit: usize) -> Self {
        self.compose_concurrency = limit.max(1);
        self
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_deployment() {
        let config = CoverageConfig::default();
        assert_eq!(config.k_exclusion, 8);
        assert_eq!(config.k_financial, 4);
        assert_eq!(config.fanout_limit, 4);
        assert!((config.tau_exclusion - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.retry_base, Duration::from_millis(200));
        assert_eq!(config.retry_max_tries, 3);
    }

    #[test]
    fn overlap_chars_derives_from_size() {
        let config = CoverageConfig::default()
            .with_chunk_size(600)
            .with_chunk_overlap(0.15);
        assert_eq!(config.overlap_chars(), 90);
    }

    #[test]
    fn fanout_limit_never_drops_to_zero() {
        let config = CoverageConfig::default().with_fanout_limit(0);
        assert_eq!(config.fanout_limit, 1);
    }
}
