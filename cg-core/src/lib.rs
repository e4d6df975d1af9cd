//! ```text
//! document bytes ──► cg-ingest (extract ► chunk ► classify ► embed ► store)
//!                                                │
//!                     ChunkKind / Chunk / Citation (this crate)
//!                                                │
//! user utterance ──► coverguard (route ► exclusion ► inclusion ► financial
//!                                                       ► compose ► verdict)
//!                                                │
//!                     EmbeddingProvider / LlmProvider (this crate)
//! ```
//!
//! `cg-core` holds everything the ingestion and reasoning crates share: the
//! chunk data model and its closed classification enum, the coverage verdict
//! shape, the engine configuration surface, and the capability traits behind
//! which embedding and LLM backends live. Deterministic mock providers for
//! testing and `rig`-backed adapters for real deployments are included here
//! so that downstream crates never name a concrete model.

pub mod chunk;
pub mod config;
pub mod error;
pub mod providers;
pub mod verdict;

pub use chunk::{cosine_to_score, Chunk, ChunkId, ChunkKind, Citation, NewChunk, ScoredChunk};
pub use config::CoverageConfig;
pub use error::ProviderError;
pub use verdict::{CoverageStatus, CoverageVerdict, FinancialTerms, QueryIntent};
