//! Property tests for the chunker's tiling and page-bounding guarantees.

use proptest::prelude::*;

use cg_ingest::chunker::Chunker;
use cg_ingest::TextBlock;

fn blocks_from(pages: &[Vec<String>]) -> Vec<TextBlock> {
    let mut blocks = Vec::new();
    for (index, paragraphs) in pages.iter().enumerate() {
        for paragraph in paragraphs {
            blocks.push(TextBlock {
                text: paragraph.clone(),
                page_number: index as u32 + 1,
                section_hint: None,
            });
        }
    }
    blocks
}

fn page_text(paragraphs: &[String]) -> String {
    paragraphs
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

proptest! {
    #[test]
    fn chunks_tile_the_source_page_by_page(
        pages in prop::collection::vec(
            prop::collection::vec("[ -~]{1,200}", 1..6),
            1..4,
        ),
        target in 64usize..512,
        overlap in 0usize..48,
    ) {
        let chunker = Chunker::new(target, overlap);
        let blocks = blocks_from(&pages);
        let drafts = chunker.chunk_blocks(&blocks);

        // Positions are monotonic across the whole document.
        for pair in drafts.windows(2) {
            prop_assert!(pair[1].position == pair[0].position + 1);
        }

        for (index, paragraphs) in pages.iter().enumerate() {
            let page_number = index as u32 + 1;
            let expected = page_text(paragraphs);

            let reconstructed: String = drafts
                .iter()
                .filter(|d| d.page_number == page_number)
                .map(|d| d.core())
                .collect();
            prop_assert_eq!(&reconstructed, &expected);
        }

        for draft in &drafts {
            // No chunk spans a page and none exceeds target plus overlap.
            prop_assert!(draft.text.len() <= target + overlap + 4);
            // The overlap prefix is verbatim from the same page.
            prop_assert!(draft.overlap <= draft.text.len());
        }

        // First chunk of every page carries no overlap.
        let mut seen_pages = std::collections::BTreeSet::new();
        for draft in &drafts {
            if seen_pages.insert(draft.page_number) {
                prop_assert_eq!(draft.overlap, 0);
            }
        }
    }
}
