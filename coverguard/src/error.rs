//! Agent- and chat-level errors with stable codes for the event stream.

use cg_core::ProviderError;
use cg_ingest::StoreError;
use miette::Diagnostic;
use thiserror::Error;

/// Failures inside a single guardrail run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Retrieval handed back a chunk from another policy. This is an
    /// invariant breach, not a degraded mode; crash loudly.
    #[error("policy isolation violated: asked for {requested}, store returned {found}")]
    PolicyIsolation { requested: String, found: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// Hand-written in place of `#[derive(Diagnostic)]`: the derive's generated
// `code()` forwarding for the transparent variants resolves to the inherent
// `AgentError::code()` below instead of `Diagnostic::code()` (inherent
// methods shadow trait methods of the same name), which fails to type-check.
// Fully-qualified calls here route to the trait method explicitly.
impl Diagnostic for AgentError {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            AgentError::PolicyIsolation { .. } => {
                Some(Box::new("coverguard::agent::policy_isolation"))
            }
            AgentError::Provider(inner) => Diagnostic::code(inner),
            AgentError::Store(inner) => Diagnostic::code(inner),
        }
    }

    fn severity(&self) -> Option<miette::Severity> {
        match self {
            AgentError::PolicyIsolation { .. } => Some(miette::Severity::Error),
            AgentError::Provider(inner) => Diagnostic::severity(inner),
            AgentError::Store(inner) => Diagnostic::severity(inner),
        }
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            AgentError::PolicyIsolation { .. } => Some(Box::new(
                "The chunk store must apply policy_id as a hard filter; this deployment is unsafe.",
            )),
            AgentError::Provider(inner) => Diagnostic::help(inner),
            AgentError::Store(inner) => Diagnostic::help(inner),
        }
    }

    fn url<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            AgentError::PolicyIsolation { .. } => None,
            AgentError::Provider(inner) => Diagnostic::url(inner),
            AgentError::Store(inner) => Diagnostic::url(inner),
        }
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        match self {
            AgentError::PolicyIsolation { .. } => None,
            AgentError::Provider(inner) => Diagnostic::source_code(inner),
            AgentError::Store(inner) => Diagnostic::source_code(inner),
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        match self {
            AgentError::PolicyIsolation { .. } => None,
            AgentError::Provider(inner) => Diagnostic::labels(inner),
            AgentError::Store(inner) => Diagnostic::labels(inner),
        }
    }

    fn related<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn Diagnostic> + 'a>> {
        match self {
            AgentError::PolicyIsolation { .. } => None,
            AgentError::Provider(inner) => Diagnostic::related(inner),
            AgentError::Store(inner) => Diagnostic::related(inner),
        }
    }

    fn diagnostic_source(&self) -> Option<&dyn Diagnostic> {
        match self {
            AgentError::PolicyIsolation { .. } => None,
            AgentError::Provider(inner) => Diagnostic::diagnostic_source(inner),
            AgentError::Store(inner) => Diagnostic::diagnostic_source(inner),
        }
    }
}

impl AgentError {
    /// Stable machine-readable code surfaced in failure trailers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::PolicyIsolation { .. } => "policy_isolation_violation",
            AgentError::Provider(ProviderError::Unavailable { .. }) => "provider_unavailable",
            AgentError::Provider(ProviderError::InputTooLarge { .. }) => "provider_input_too_large",
            AgentError::Provider(ProviderError::MalformedAnswer { .. }) => "provider_malformed_answer",
            AgentError::Store(StoreError::DimensionMismatch { .. }) => "embedding_dimension_mismatch",
            AgentError::Store(_) => "store_backend_error",
        }
    }
}

/// Failures at the session boundary.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unknown session {session_id}")]
    UnknownSession { session_id: String },

    /// The caller claimed a policy other than the session's. Cross-policy
    /// answering is rejected outright.
    #[error("session {session_id} is bound to policy {bound}, caller claimed {claimed}")]
    PolicyMismatch {
        session_id: String,
        bound: String,
        claimed: String,
    },

    /// The turn's deadline expired before it produced a verdict.
    #[error("turn cancelled by deadline")]
    Deadline,

    #[error(transparent)]
    Agent(#[from] AgentError),
}

// Hand-written for the same reason as `AgentError`'s impl above: ChatError's
// own inherent `code()` shadows `Diagnostic::code()` for the transparent
// `Agent` arm, so the forwarding call must be fully qualified.
impl Diagnostic for ChatError {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            ChatError::UnknownSession { .. } => {
                Some(Box::new("coverguard::chat::unknown_session"))
            }
            ChatError::PolicyMismatch { .. } => Some(Box::new("coverguard::chat::policy_mismatch")),
            ChatError::Deadline => Some(Box::new("coverguard::chat::cancelled_by_deadline")),
            ChatError::Agent(inner) => Diagnostic::code(inner),
        }
    }

    fn severity(&self) -> Option<miette::Severity> {
        match self {
            ChatError::Agent(inner) => Diagnostic::severity(inner),
            _ => None,
        }
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            ChatError::Agent(inner) => Diagnostic::help(inner),
            _ => None,
        }
    }

    fn url<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        match self {
            ChatError::Agent(inner) => Diagnostic::url(inner),
            _ => None,
        }
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        match self {
            ChatError::Agent(inner) => Diagnostic::source_code(inner),
            _ => None,
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        match self {
            ChatError::Agent(inner) => Diagnostic::labels(inner),
            _ => None,
        }
    }

    fn related<'a>(&'a self) -> Option<Box<dyn Iterator<Item = &'a dyn Diagnostic> + 'a>> {
        match self {
            ChatError::Agent(inner) => Diagnostic::related(inner),
            _ => None,
        }
    }

    fn diagnostic_source(&self) -> Option<&dyn Diagnostic> {
        match self {
            ChatError::Agent(inner) => Diagnostic::diagnostic_source(inner),
            _ => None,
        }
    }
}

impl ChatError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::UnknownSession { .. } => "unknown_session",
            ChatError::PolicyMismatch { .. } => "policy_mismatch",
            ChatError::Deadline => "cancelled_by_deadline",
            ChatError::Agent(err) => err.code(),
        }
    }
}
