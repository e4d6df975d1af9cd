//! The chunk data model shared by ingestion and retrieval.
//!
//! A [`Chunk`] is the atomic unit of retrieval: a page-bounded slice of
//! policy text carrying a classification [`ChunkKind`], an embedding, and
//! provenance (page number and nearest section heading). Chunks are created
//! only by the ingestion pipeline, are immutable once stored, and are
//! destroyed only by policy deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification tag for a chunk, drawn from a closed set.
///
/// Every switch over `ChunkKind` is exhaustive; an unknown kind coming out
/// of persistence is a load error, never a silent fallthrough.
///
/// # Persistence
///
/// `ChunkKind` round-trips through its lowercase string form via
/// [`as_str`](Self::as_str) and [`parse`](Self::parse):
///
/// ```rust
/// use cg_core::ChunkKind;
///
/// assert_eq!(ChunkKind::Exclusion.as_str(), "exclusion");
/// assert_eq!(ChunkKind::parse("exclusion"), Some(ChunkKind::Exclusion));
/// assert_eq!(ChunkKind::parse("identity_data"), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Language that explicitly denies or carves out coverage.
    Exclusion,
    /// Language that confirms or grants coverage.
    Inclusion,
    /// Definitions of policy terms.
    Definition,
    /// Financial limits, caps, deductibles, and conditions.
    Limitation,
    /// Claims procedures and policyholder obligations.
    Procedure,
    /// Everything else.
    General,
}

impl ChunkKind {
    /// All kinds, in declaration order. Handy for iteration in tests and
    /// for building kind histograms.
    pub const ALL: [ChunkKind; 6] = [
        ChunkKind::Exclusion,
        ChunkKind::Inclusion,
        ChunkKind::Definition,
        ChunkKind::Limitation,
        ChunkKind::Procedure,
        ChunkKind::General,
    ];

    /// The persisted lowercase string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Exclusion => "exclusion",
            ChunkKind::Inclusion => "inclusion",
            ChunkKind::Definition => "definition",
            ChunkKind::Limitation => "limitation",
            ChunkKind::Procedure => "procedure",
            ChunkKind::General => "general",
        }
    }

    /// Parse the persisted form back into a kind.
    ///
    /// Returns `None` for anything outside the closed set (callers treat
    /// that as a load-time error, not a default).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exclusion" => Some(ChunkKind::Exclusion),
            "inclusion" => Some(ChunkKind::Inclusion),
            "definition" => Some(ChunkKind::Definition),
            "limitation" => Some(ChunkKind::Limitation),
            "procedure" => Some(ChunkKind::Procedure),
            "general" => Some(ChunkKind::General),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque chunk identifier, unique across the whole store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        ChunkId(s.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        ChunkId(s)
    }
}

/// A chunk as produced by the ingestion pipeline, before the store has
/// assigned it an id.
///
/// `position` is monotonic within a policy and preserves document order;
/// `overlap` counts the leading characters duplicated from the previous
/// chunk's tail, so position-ordered concatenation minus overlaps tiles
/// the extracted page text exactly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewChunk {
    pub text: String,
    pub kind: ChunkKind,
    pub page_number: u32,
    pub section_title: Option<String>,
    pub position: u64,
    pub overlap: usize,
    pub embedding: Vec<f32>,
}

/// A stored chunk, as returned by the chunk store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub policy_id: String,
    pub text: String,
    pub kind: ChunkKind,
    pub page_number: u32,
    pub section_title: Option<String>,
    pub position: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Build a citation for this chunk, quoting at most `max_quote` chars.
    ///
    /// Truncation lands on a char boundary so the quote stays valid UTF-8.
    #[must_use]
    pub fn citation(&self, max_quote: usize) -> Citation {
        let quote = if self.text.len() <= max_quote {
            self.text.clone()
        } else {
            let mut end = max_quote;
            while !self.text.is_char_boundary(end) {
                end -= 1;
            }
            self.text[..end].to_string()
        };
        Citation {
            chunk_id: self.id.clone(),
            page: self.page_number,
            section: self.section_title.clone(),
            quote,
            kind: self.kind,
        }
    }
}

/// A scored chunk reference returned by similarity search.
///
/// Scores live in `[0, 1]` (higher = closer) and are comparable only
/// within a single query.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Map a cosine similarity in `[-1, 1]` into the `[0, 1]` score space.
#[must_use]
pub fn cosine_to_score(cosine: f32) -> f32 {
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

/// A chunk reference attached to a verdict, carrying everything a reader
/// needs to locate the source text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub quote: String,
    pub kind: ChunkKind,
}
