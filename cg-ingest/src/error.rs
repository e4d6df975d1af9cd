//! Error types for extraction, storage, and the ingestion pipeline.

use cg_core::ProviderError;
use miette::Diagnostic;
use thiserror::Error;

/// Failures while turning document bytes into text blocks.
#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    /// The declared MIME kind is not one the extractor understands.
    #[error("unsupported document MIME kind: {mime}")]
    #[diagnostic(
        code(cg_ingest::extract::unsupported_mime),
        help("Supported kinds: application/pdf, text/plain.")
    )]
    UnsupportedMime { mime: String },

    /// The document could not be opened at all.
    #[error("invalid document: {message}")]
    #[diagnostic(code(cg_ingest::extract::invalid_document))]
    InvalidDocument { message: String },

    /// Neither strategy produced usable text for one page. The pipeline
    /// records the page as a hole and keeps going.
    #[error("extraction failed for page {page}: {cause}")]
    #[diagnostic(code(cg_ingest::extract::page_failed))]
    PageFailed { page: u32, cause: String },
}

/// Failures at the chunk-store boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// A vector's length differs from the store's declared dimension.
    /// This is a misconfiguration, never silently truncated.
    #[error("embedding dimension mismatch: store is {expected}-d, got {actual}-d")]
    #[diagnostic(
        severity(Error),
        code(cg_ingest::store::dimension_mismatch),
        help(
            "The store's dimension is fixed per deployment; switching embedding \
             providers requires a full re-ingest."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// A persisted row carries a kind outside the closed enum.
    #[error("unknown chunk kind in store: {value}")]
    #[diagnostic(code(cg_ingest::store::unknown_kind))]
    UnknownKind { value: String },

    /// Anything the backing database reports.
    #[error("store backend error: {0}")]
    #[diagnostic(code(cg_ingest::store::backend))]
    Backend(String),
}

/// Failures of an ingestion run as a whole.
#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    /// Another ingestion for the same policy is already running.
    #[error("ingestion already in flight for policy {policy_id}")]
    #[diagnostic(
        code(cg_ingest::pipeline::conflict),
        help("Ingestion per policy is serialized; retry once the current run finishes.")
    )]
    Conflict { policy_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}
