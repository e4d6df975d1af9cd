//! Provider-level errors shared by embedding and LLM capabilities.

use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by embedding and LLM providers.
///
/// Only [`Unavailable`](Self::Unavailable) is retriable; everything else
/// indicates a bug or misconfiguration that retrying cannot fix.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// The backing service could not be reached or timed out.
    #[error("provider unavailable ({provider}): {message}")]
    #[diagnostic(
        code(cg_core::provider::unavailable),
        help("Transient failure; the caller retries with exponential backoff.")
    )]
    Unavailable {
        provider: &'static str,
        message: String,
    },

    /// Input exceeded the provider's limits. The chunker guarantees inputs
    /// stay under provider limits, so hitting this means a configuration
    /// bug, not bad luck.
    #[error("input too large for provider {provider}: {chars} chars")]
    #[diagnostic(
        code(cg_core::provider::input_too_large),
        help("Check chunk_size against the provider's context limit; this is not retried.")
    )]
    InputTooLarge { provider: &'static str, chars: usize },

    /// A structured call returned output that does not conform to the
    /// declared JSON shape. Callers treat this as a no-decision and log it.
    #[error("malformed structured answer from {provider}: {message}")]
    #[diagnostic(code(cg_core::provider::malformed_answer))]
    MalformedAnswer {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Whether the retry policy applies to this error.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProviderError::Unavailable { .. })
    }

    /// Convenience constructor for the common transient case.
    #[must_use]
    pub fn unavailable(provider: &'static str, message: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            provider,
            message: message.into(),
        }
    }
}
