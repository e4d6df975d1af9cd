//! Page-bounded chunking with section awareness and soft overlap.
//!
//! Chunks target 500–1000 characters with a ~15% overlap carried as a
//! verbatim prefix from the previous chunk's tail. Splits prefer, in
//! order: section break, paragraph break, sentence break, hard cut. A page
//! boundary is always a hard split, so no chunk ever spans pages and the
//! overlap never crosses one either.
//!
//! Chunk text is an exact substring of the page text (plus the overlap
//! prefix), so concatenating chunk texts in position order minus their
//! overlap regions reproduces the extractor output page by page.

use std::sync::LazyLock;

use regex::Regex;

use crate::extract::TextBlock;

static NUMBERED_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)*\s+(.+)$").expect("static heading regex"));

const HEADING_KEYWORDS: [&str; 5] = [
    "EXCLUSIONS",
    "COVERAGE",
    "DEFINITIONS",
    "LIMITATIONS",
    "OBLIGATIONS",
];

/// A chunk fresh out of the chunker, before classification and embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct DraftChunk {
    /// Overlap prefix plus the chunk's own slice of page text.
    pub text: String,
    pub page_number: u32,
    pub section_title: Option<String>,
    /// Monotonic across the whole document.
    pub position: u64,
    /// Leading bytes duplicated from the previous chunk's tail.
    pub overlap: usize,
}

impl DraftChunk {
    /// The chunk's own region, with the overlap prefix removed.
    #[must_use]
    pub fn core(&self) -> &str {
        &self.text[self.overlap..]
    }
}

/// Decide whether a line reads as a section heading and return its title.
///
/// A line qualifies when it is an ALL-CAPS short line, a
/// `1.`/`2.3.`-numbered line followed by title-cased text, or starts with
/// one of the known policy section keywords. Trailing colons are stripped
/// from the returned title.
#[must_use]
pub fn detect_heading(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.len() > 80 || !trimmed.chars().any(|c| c.is_alphabetic()) {
        return None;
    }
    let clean = trimmed.trim_end_matches(':').trim();

    let upper = clean.to_uppercase();
    if HEADING_KEYWORDS.iter().any(|k| upper.starts_with(k)) {
        return Some(clean.to_string());
    }

    if !trimmed.chars().any(|c| c.is_lowercase()) && trimmed.split_whitespace().count() <= 10 {
        return Some(clean.to_string());
    }

    if let Some(captures) = NUMBERED_HEADING.captures(trimmed) {
        let rest = captures.get(1).map_or("", |m| m.as_str());
        let title_cased = rest
            .chars()
            .find(|c| c.is_alphabetic())
            .is_some_and(|c| c.is_uppercase());
        if title_cased {
            return Some(clean.to_string());
        }
    }

    None
}

/// Splits extracted text blocks into [`DraftChunk`]s.
pub struct Chunker {
    target: usize,
    overlap: usize,
}

impl Chunker {
    /// `target` is the chunk length goal in bytes of page text; `overlap`
    /// is the prefix carried across in-page boundaries.
    #[must_use]
    pub fn new(target: usize, overlap: usize) -> Self {
        debug_assert!(target >= 2, "chunk target must be at least 2 bytes");
        Self {
            target: target.max(2),
            overlap,
        }
    }

    #[must_use]
    pub fn from_config(config: &cg_core::CoverageConfig) -> Self {
        Self::new(config.chunk_size, config.overlap_chars())
    }

    /// Chunk a whole document's blocks, page by page.
    ///
    /// The most recent heading above a chunk becomes its `section_title`,
    /// carrying across pages until the next heading appears.
    #[must_use]
    pub fn chunk_blocks(&self, blocks: &[TextBlock]) -> Vec<DraftChunk> {
        let mut drafts = Vec::new();
        let mut position = 0u64;
        let mut section: Option<String> = None;

        let mut pages: Vec<u32> = Vec::new();
        for block in blocks {
            if pages.last() != Some(&block.page_number) {
                pages.push(block.page_number);
            }
        }

        for page_number in pages {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.page_number == page_number)
                .map(|b| b.text.as_str())
                .collect();
            let page_text = texts.join("\n\n");
            if page_text.is_empty() {
                continue;
            }
            self.chunk_page(&page_text, page_number, &mut section, &mut position, &mut drafts);
        }

        drafts
    }

    fn chunk_page(
        &self,
        page_text: &str,
        page_number: u32,
        section: &mut Option<String>,
        position: &mut u64,
        drafts: &mut Vec<DraftChunk>,
    ) {
        let headings = heading_offsets(page_text);
        let paragraphs = paragraph_boundaries(page_text);
        let sentences = sentence_boundaries(page_text);

        let len = page_text.len();
        let mut start = 0usize;
        let mut first = true;

        while start < len {
            let end = if len - start <= self.target {
                len
            } else {
                self.cut_point(page_text, start, &headings, &paragraphs, &sentences)
            };

            let prefix_start = if first {
                start
            } else {
                let mut at = start.saturating_sub(self.overlap);
                while !page_text.is_char_boundary(at) {
                    at += 1;
                }
                at
            };

            if let Some((_, title)) = headings
                .iter()
                .take_while(|(offset, _)| *offset <= start)
                .last()
            {
                *section = Some(title.clone());
            }

            drafts.push(DraftChunk {
                text: page_text[prefix_start..end].to_string(),
                page_number,
                section_title: section.clone(),
                position: *position,
                overlap: start - prefix_start,
            });

            *position += 1;
            first = false;
            start = end;
        }

        // Headings in the page tail still shift the running section for the
        // next page.
        if let Some((_, title)) = headings.last() {
            if section.as_deref() != Some(title.as_str()) {
                *section = Some(title.clone());
            }
        }
    }

    fn cut_point(
        &self,
        page_text: &str,
        start: usize,
        headings: &[(usize, String)],
        paragraphs: &[usize],
        sentences: &[usize],
    ) -> usize {
        let window_end = start + self.target;
        let window_start = start + self.target / 2;

        let pick = |candidates: &mut dyn Iterator<Item = usize>| -> Option<usize> {
            candidates
                .filter(|&at| at > window_start && at <= window_end)
                .max()
        };

        if let Some(at) = pick(&mut headings.iter().map(|(offset, _)| *offset)) {
            return at;
        }
        if let Some(at) = pick(&mut paragraphs.iter().copied()) {
            return at;
        }
        if let Some(at) = pick(&mut sentences.iter().copied()) {
            return at;
        }

        let mut at = window_end;
        while !page_text.is_char_boundary(at) {
            at -= 1;
        }
        if at <= start {
            at = window_end;
            while at < page_text.len() && !page_text.is_char_boundary(at) {
                at += 1;
            }
        }
        at
    }
}

/// Byte offsets of lines that read as headings, with their titles.
fn heading_offsets(page_text: &str) -> Vec<(usize, String)> {
    let mut offsets = Vec::new();
    let mut at = 0usize;
    for line in page_text.split('\n') {
        if let Some(title) = detect_heading(line) {
            offsets.push((at, title));
        }
        at += line.len() + 1;
    }
    offsets
}

/// Byte offsets just past every blank-line separator.
fn paragraph_boundaries(page_text: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut from = 0usize;
    while let Some(found) = page_text[from..].find("\n\n") {
        let at = from + found + 2;
        boundaries.push(at);
        from = at;
    }
    boundaries
}

/// Byte offsets of capital letters starting a new sentence.
fn sentence_boundaries(page_text: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let chars: Vec<(usize, char)> = page_text.char_indices().collect();
    let mut index = 0usize;
    while index < chars.len() {
        let (_, c) = chars[index];
        if matches!(c, '.' | '!' | '?') {
            let mut next = index + 1;
            let mut saw_space = false;
            while next < chars.len() && chars[next].1.is_whitespace() {
                saw_space = true;
                next += 1;
            }
            if saw_space && next < chars.len() && chars[next].1.is_uppercase() {
                boundaries.push(chars[next].0);
            }
        }
        index += 1;
    }
    boundaries
}
