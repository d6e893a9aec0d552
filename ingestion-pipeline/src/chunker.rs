use text_splitter::{ChunkConfig, TextSplitter};

use common::error::AppError;

/// A span of page text awaiting embedding. `chunk_index` is global across
/// the document, `page_number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub page_number: u32,
    pub chunk_index: u32,
    pub text: String,
}

/// Split per-page text into bounded fragments.
///
/// The splitter's fallback hierarchy for plain text is paragraph, then line,
/// then word, then character, so chunk boundaries land on the largest
/// semantic unit that fits. Pages without text are skipped; they contribute
/// nothing to the index.
pub fn split_pages(
    pages: &[String],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<TextFragment>, AppError> {
    let chunk_config = ChunkConfig::new(chunk_size)
        .with_overlap(chunk_overlap)
        .map_err(|err| AppError::Processing(format!("Invalid chunking configuration: {err}")))?;
    let splitter = TextSplitter::new(chunk_config);

    let mut fragments = Vec::new();
    let mut chunk_index = 0u32;

    for (page_idx, page) in pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }

        for chunk in splitter.chunks(page) {
            fragments.push(TextFragment {
                page_number: page_idx as u32 + 1,
                chunk_index,
                text: chunk.to_string(),
            });
            chunk_index += 1;
        }
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_pages_become_one_fragment_each() {
        let pages = vec!["first page".to_string(), "second page".to_string()];

        let fragments = split_pages(&pages, 100, 0).expect("split");

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].page_number, 1);
        assert_eq!(fragments[1].page_number, 2);
        assert_eq!(fragments[0].chunk_index, 0);
        assert_eq!(fragments[1].chunk_index, 1);
        assert_eq!(fragments[0].text, "first page");
    }

    #[test]
    fn test_long_page_is_split_with_global_indexes() {
        let long_page = "sentence one. ".repeat(40);
        let pages = vec![long_page, "tail page".to_string()];

        let fragments = split_pages(&pages, 80, 10).expect("split");

        assert!(fragments.len() > 2, "long page should produce several chunks");
        for fragment in &fragments {
            assert!(fragment.text.len() <= 80);
        }

        // Indexes are consecutive across pages.
        for (expected, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.chunk_index, expected as u32);
        }
        assert_eq!(fragments.last().map(|f| f.page_number), Some(2));
    }

    #[test]
    fn test_blank_pages_are_skipped() {
        let pages = vec![
            "content".to_string(),
            "   \n ".to_string(),
            "more content".to_string(),
        ];

        let fragments = split_pages(&pages, 100, 0).expect("split");

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].page_number, 1);
        assert_eq!(fragments[1].page_number, 3);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let pages = vec!["content".to_string()];

        let result = split_pages(&pages, 100, 100);
        assert!(matches!(result, Err(AppError::Processing(_))));
    }
}
