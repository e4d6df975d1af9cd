//! ```text
//! bytes + MIME ──► extract (native text │ OCR capability) ──► TextBlock*
//!                                                              │
//!                          chunker (page-bounded, overlapped) ─┤
//!                          classifier (cue prior + LLM refine) ┤
//!                          embedder (batch)                    │
//!                                                              ▼
//!                    ChunkStore (memory │ sqlite-vec) ◄── put_batch
//! ```
//!
//! The ingestion side of the coverguard engine: turning an unstructured
//! policy document into a classified, embedded, per-policy-isolated chunk
//! store that the reasoning side retrieves from.
//!
//! Ingestion for one policy is serialized; retrieval runs concurrently
//! under a single-writer-many-readers discipline backed by the store's
//! transactional `put_batch`/`delete_policy`.

pub mod chunker;
pub mod classifier;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod store;

pub use chunker::{Chunker, DraftChunk};
pub use classifier::Classifier;
pub use error::{ExtractError, IngestError, StoreError};
pub use extract::{DocumentFormat, ExtractOutcome, OcrEngine, TextBlock, TextExtractor};
pub use pipeline::{IngestReport, IngestionPipeline};
pub use store::{ChunkStore, MemoryChunkStore, SqliteChunkStore};
