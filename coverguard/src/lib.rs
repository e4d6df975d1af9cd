//! ```text
//! utterance ──► Route ──► ExclusionProbe ──excluded──► Compose ──► verdict
//!                              │no                        ▲
//!                              ▼                          │
//!                        InclusionProbe ──unknown─────────┤
//!                              │covered                   │
//!                              ▼                          │
//!                        FinancialProbe ──────────────────┘
//! ```
//!
//! The reasoning side of the coverguard engine. The Coverage Guardrail is a
//! fixed enumeration of states dispatched in code (adding a step is a code
//! change, never configuration) and its ordering is a legal invariant: no
//! question may produce COVERED while any exclusion path matches, even when
//! inclusion text also matches.
//!
//! [`chat`] binds sessions to the agent and streams composer tokens back to
//! the caller with deadlines, per-session serialization, and a global
//! compose semaphore.

pub mod agent;
pub mod chat;
pub mod compose;
pub mod error;
pub mod financial;
pub mod probes;
pub mod router;

pub use agent::{CoverageAgent, GuardrailStep, TurnOutcome};
pub use chat::{ChatOrchestrator, TurnEvent, TurnStream};
pub use error::{AgentError, ChatError};
