//! Recursive chunking for contract text.
//!
//! Contracts split cleanly on paragraph and sentence boundaries, so the
//! separator ladder prefers those before falling back to word and
//! character splits. Page markers emitted by extraction ("--- Page N ---")
//! are used to tag each chunk with its page, then stripped from the
//! stored content.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches page markers inserted during extraction.
static PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"---\s*Page\s+(\d+)\s*---").unwrap());

/// A chunk ready for storage, ordinal-ordered within its document.
#[derive(Debug, Clone)]
pub struct DraftChunk {
    pub content: String,
    pub ordinal: i32,
    pub page_number: Option<i32>,
    pub char_count: usize,
    pub word_count: usize,
}

/// Recursive character splitter tuned for legal prose.
pub struct ContractChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl ContractChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: vec!["\n\n", "\n", ". ", "; ", ", ", " ", ""],
        }
    }

    /// Split extracted document text into draft chunks.
    pub fn chunk(&self, text: &str) -> Vec<DraftChunk> {
        let markers = page_markers(text);
        let raw = self.split_text(text, &self.separators);

        let mut chunks = Vec::new();
        // Every piece is a contiguous substring of the input, so its true
        // offset (needed for page attribution) can be recovered by searching
        // forward. Overlapping pieces only ever step back by the overlap, so
        // advancing the search point one byte past each start is enough.
        let mut search_from = 0usize;
        for piece in raw {
            let start = text[search_from..]
                .find(piece.as_str())
                .map(|i| search_from + i)
                .unwrap_or(search_from);
            search_from = start + text[start..].chars().next().map_or(1, char::len_utf8);

            let page_number = page_at_offset(&markers, start);
            let content = PAGE_MARKER.replace_all(&piece, " ").trim().to_string();
            if content.is_empty() {
                continue;
            }

            let word_count = content.split_whitespace().count();
            chunks.push(DraftChunk {
                char_count: content.chars().count(),
                word_count,
                content,
                ordinal: chunks.len() as i32,
                page_number,
            });
        }
        chunks
    }

    fn split_text(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let Some((&separator, remaining)) = separators.split_first() else {
            return vec![text.to_string()];
        };

        if separator.is_empty() {
            // Character-level last resort: hard-split at chunk_size, keeping
            // the configured overlap between neighbors.
            return self.split_chars(text);
        }

        let splits: Vec<&str> = text.split(separator).collect();
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_size = 0usize;

        for split in splits {
            let split_size = split.len();

            if split_size > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.join(separator));
                    current.clear();
                    current_size = 0;
                }
                chunks.extend(self.split_text(split, remaining));
            } else if current_size + split_size + separator.len() > self.chunk_size
                && !current.is_empty()
            {
                chunks.push(current.join(separator));
                current = vec![split];
                current_size = split_size;
            } else {
                current.push(split);
                current_size += split_size + separator.len();
            }
        }

        if !current.is_empty() {
            chunks.push(current.join(separator));
        }
        chunks
    }

    fn split_chars(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

fn page_markers(text: &str) -> Vec<(usize, i32)> {
    PAGE_MARKER
        .captures_iter(text)
        .filter_map(|c| {
            let m = c.get(0)?;
            let page: i32 = c.get(1)?.as_str().parse().ok()?;
            Some((m.start(), page))
        })
        .collect()
}

/// The page a byte offset falls on: the last marker at or before it.
fn page_at_offset(markers: &[(usize, i32)], offset: usize) -> Option<i32> {
    markers
        .iter()
        .take_while(|(pos, _)| *pos <= offset)
        .last()
        .map(|(_, page)| *page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = ContractChunker::new(6000, 600);
        let chunks = chunker.chunk("This Agreement is entered into by the parties.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert!(chunks[0].page_number.is_none());
    }

    #[test]
    fn test_splits_on_paragraphs_first() {
        let chunker = ContractChunker::new(60, 10);
        let text = "First paragraph about termination rights.\n\nSecond paragraph about indemnification duties.";
        let chunks = chunker.chunk(text);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.contains("termination"));
        assert!(chunks[1].content.contains("indemnification"));
    }

    #[test]
    fn test_ordinals_are_dense_and_ordered() {
        let chunker = ContractChunker::new(50, 5);
        let text = "Clause one text here. Clause two text here. Clause three text here. Clause four text here.";
        let chunks = chunker.chunk(text);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as i32);
        }
    }

    #[test]
    fn test_page_markers_tag_chunks_and_are_stripped() {
        let chunker = ContractChunker::new(80, 10);
        let text = "--- Page 1 ---\nRecitals and definitions section.\n\n--- Page 2 ---\nGoverning law shall be Delaware.";
        let chunks = chunker.chunk(text);

        assert!(chunks.iter().all(|c| !c.content.contains("--- Page")));
        let first = chunks.iter().find(|c| c.content.contains("Recitals")).unwrap();
        assert_eq!(first.page_number, Some(1));
        let second = chunks.iter().find(|c| c.content.contains("Delaware")).unwrap();
        assert_eq!(second.page_number, Some(2));
    }

    #[test]
    fn test_oversized_unbroken_text_falls_through_ladder() {
        let chunker = ContractChunker::new(100, 20);
        let text = "x".repeat(350);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.char_count <= 100));
    }

    #[test]
    fn test_counts() {
        let chunker = ContractChunker::new(6000, 600);
        let chunks = chunker.chunk("Net thirty payment terms apply.");
        assert_eq!(chunks[0].word_count, 5);
        assert_eq!(chunks[0].char_count, 31);
    }
}
