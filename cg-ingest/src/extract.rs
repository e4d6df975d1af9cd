//! Text extraction: document bytes in, ordered text blocks out.
//!
//! Two strategies feed the same [`TextBlock`] shape. PDFs with a usable
//! machine-readable text layer take the fast native path; pages whose
//! native text fails the coverage heuristic fall back to the [`OcrEngine`]
//! capability. The concrete OCR backend is deliberately out of scope:
//! deployments plug one in, tests run without.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExtractError;

/// Minimum native-text length for a page to count as machine-readable.
const NATIVE_MIN_CHARS: usize = 150;
/// Minimum ASCII ratio; scanned PDFs often decode to mojibake that fails
/// this check even when `extract_text` returns something.
const NATIVE_MIN_ASCII_RATIO: f64 = 0.7;

/// Document kinds the extractor understands, parsed from a declared MIME.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
}

impl DocumentFormat {
    pub fn from_mime(mime: &str) -> Result<Self, ExtractError> {
        match mime.split(';').next().unwrap_or("").trim() {
            "application/pdf" => Ok(DocumentFormat::Pdf),
            "text/plain" | "text/markdown" => Ok(DocumentFormat::PlainText),
            other => Err(ExtractError::UnsupportedMime {
                mime: other.to_string(),
            }),
        }
    }
}

/// An ordered slice of extracted text with its provenance.
///
/// Blocks preserve reading order within a page; a page boundary is always
/// a block boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct TextBlock {
    pub text: String,
    /// 1-based page number.
    pub page_number: u32,
    pub section_hint: Option<String>,
}

/// OCR capability for pages without a usable native text layer.
///
/// Implementations receive the whole document plus the page number and own
/// rendering, recognition, and reading-order reconstruction. The engine
/// must emit blocks in reading order for that page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize_page(
        &self,
        document: &[u8],
        page_number: u32,
    ) -> Result<Vec<TextBlock>, ExtractError>;
}

/// Result of extracting a whole document.
///
/// `holes` lists pages where neither strategy produced usable text; the
/// pipeline logs them and continues; downstream classification tolerates
/// gaps.
#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub blocks: Vec<TextBlock>,
    pub pages: u32,
    pub holes: Vec<(u32, String)>,
}

impl ExtractOutcome {
    /// Page text as the chunker sees it: the page's blocks joined by blank
    /// lines, in reading order.
    #[must_use]
    pub fn page_text(&self, page_number: u32) -> String {
        let texts: Vec<&str> = self
            .blocks
            .iter()
            .filter(|b| b.page_number == page_number)
            .map(|b| b.text.as_str())
            .collect();
        texts.join("\n\n")
    }
}

/// Strategy-choosing extractor over native text layers and OCR.
#[derive(Clone, Default)]
pub struct TextExtractor {
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl TextExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an OCR backend for pages the native path cannot read.
    #[must_use]
    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    /// Extract ordered text blocks from `bytes` declared as `format`.
    pub async fn extract(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<ExtractOutcome, ExtractError> {
        match format {
            DocumentFormat::PlainText => Ok(extract_plain_text(bytes)),
            DocumentFormat::Pdf => self.extract_pdf(bytes).await,
        }
    }

    async fn extract_pdf(&self, bytes: &[u8]) -> Result<ExtractOutcome, ExtractError> {
        let document =
            lopdf::Document::load_mem(bytes).map_err(|err| ExtractError::InvalidDocument {
                message: err.to_string(),
            })?;

        let mut outcome = ExtractOutcome::default();
        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        outcome.pages = page_numbers.len() as u32;

        for page_number in page_numbers {
            let native = document
                .extract_text(&[page_number])
                .ok()
                .filter(|text| native_text_usable(text));

            match native {
                Some(text) => {
                    outcome
                        .blocks
                        .extend(blocks_from_page_text(&text, page_number));
                }
                None => match &self.ocr {
                    Some(engine) => match engine.recognize_page(bytes, page_number).await {
                        Ok(blocks) if !blocks.iter().all(|b| b.text.trim().is_empty()) => {
                            outcome.blocks.extend(blocks);
                        }
                        Ok(_) => {
                            record_hole(&mut outcome, page_number, "OCR produced no text");
                        }
                        Err(err) => {
                            record_hole(&mut outcome, page_number, &err.to_string());
                        }
                    },
                    None => {
                        record_hole(
                            &mut outcome,
                            page_number,
                            "no native text layer and no OCR engine configured",
                        );
                    }
                },
            }
        }

        Ok(outcome)
    }
}

fn record_hole(outcome: &mut ExtractOutcome, page_number: u32, cause: &str) {
    tracing::warn!(page = page_number, cause, "page extraction failed, recording hole");
    outcome.holes.push((page_number, cause.to_string()));
}

/// Whether a page's native text layer covers enough of the page to trust.
fn native_text_usable(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < NATIVE_MIN_CHARS {
        return false;
    }
    let total = trimmed.chars().count() as f64;
    let ascii = trimmed.chars().filter(|c| c.is_ascii()).count() as f64;
    ascii / total >= NATIVE_MIN_ASCII_RATIO
}

/// Plain text documents: pages split on form-feed, one document-wide page
/// otherwise.
fn extract_plain_text(bytes: &[u8]) -> ExtractOutcome {
    let text = String::from_utf8_lossy(bytes);
    let mut outcome = ExtractOutcome::default();
    let pages: Vec<&str> = text.split('\u{c}').collect();
    outcome.pages = pages.len() as u32;
    for (index, page) in pages.iter().enumerate() {
        let page_number = index as u32 + 1;
        outcome
            .blocks
            .extend(blocks_from_page_text(page, page_number));
    }
    outcome
}

/// Split page text into paragraph blocks, preserving reading order.
fn blocks_from_page_text(text: &str, page_number: u32) -> Vec<TextBlock> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|paragraph| TextBlock {
            text: paragraph.to_string(),
            page_number,
            section_hint: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_parsing_handles_parameters_and_rejects_unknowns() {
        assert_eq!(
            DocumentFormat::from_mime("application/pdf").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_mime("text/plain; charset=utf-8").unwrap(),
            DocumentFormat::PlainText
        );
        assert!(DocumentFormat::from_mime("image/png").is_err());
    }

    #[tokio::test]
    async fn plain_text_pages_split_on_form_feed() {
        let extractor = TextExtractor::new();
        let bytes = b"Page one intro.\n\nSecond paragraph.\x0cPage two text.";
        let outcome = extractor
            .extract(bytes, DocumentFormat::PlainText)
            .await
            .unwrap();
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.blocks.len(), 3);
        assert_eq!(outcome.blocks[0].page_number, 1);
        assert_eq!(outcome.blocks[2].page_number, 2);
        assert_eq!(outcome.blocks[2].text, "Page two text.");
    }

    #[tokio::test]
    async fn empty_document_yields_no_blocks() {
        let extractor = TextExtractor::new();
        let outcome = extractor
            .extract(b"", DocumentFormat::PlainText)
            .await
            .unwrap();
        assert!(outcome.blocks.is_empty());
        assert!(outcome.holes.is_empty());
    }

    #[test]
    fn native_coverage_heuristic_rejects_short_and_non_ascii_pages() {
        assert!(!native_text_usable("short"));
        let mojibake: String = "\u{fffd}".repeat(400);
        assert!(!native_text_usable(&mojibake));
        let readable = "This policy covers engine components. ".repeat(10);
        assert!(native_text_usable(&readable));
    }

    #[tokio::test]
    async fn pdf_without_text_layer_and_no_ocr_records_holes() {
        // Not a valid PDF at all: must fail loudly, not hole-punch.
        let extractor = TextExtractor::new();
        let err = extractor
            .extract(b"not a pdf", DocumentFormat::Pdf)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidDocument { .. }));
    }

    struct StubOcr;

    #[async_trait]
    impl OcrEngine for StubOcr {
        async fn recognize_page(
            &self,
            _document: &[u8],
            page_number: u32,
        ) -> Result<Vec<TextBlock>, ExtractError> {
            Ok(vec![TextBlock {
                text: format!("ocr text for page {page_number}"),
                page_number,
                section_hint: None,
            }])
        }
    }

    #[tokio::test]
    async fn ocr_engine_contract_emits_page_scoped_blocks() {
        let engine = StubOcr;
        let blocks = engine.recognize_page(b"document bytes", 4).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].page_number, 4);
    }

    #[tokio::test]
    async fn page_text_joins_blocks_in_order() {
        let outcome = ExtractOutcome {
            blocks: vec![
                TextBlock {
                    text: "first".into(),
                    page_number: 1,
                    section_hint: None,
                },
                TextBlock {
                    text: "second".into(),
                    page_number: 1,
                    section_hint: None,
                },
                TextBlock {
                    text: "other page".into(),
                    page_number: 2,
                    section_hint: None,
                },
            ],
            pages: 2,
            holes: vec![],
        };
        assert_eq!(outcome.page_text(1), "first\n\nsecond");
        assert_eq!(outcome.page_text(2), "other page");
    }
}
