//! Recursive character text splitter.
//!
//! Splits the text segments of a loaded document into [`Chunk`]s of at most
//! `chunk_size` characters, with up to `overlap` characters carried over from
//! the end of one chunk into the start of the next. Splitting prefers
//! paragraph boundaries (`\n\n`), then lines, then words, and only falls back
//! to individual characters for runs with no whitespace at all.
//!
//! Ordinals are contiguous from 0 across all segments of a document, so a
//! chunk's ordinal is its position in the document.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Separators tried in order. The empty separator splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split every segment of `source_file` and number the chunks in order.
///
/// Returns an empty vector when the document has no non-whitespace text.
pub fn split_segments(
    source_file: &str,
    segments: &[String],
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    segments
        .iter()
        .flat_map(|segment| split_text(segment, config.chunk_size, config.overlap))
        .enumerate()
        .map(|(ordinal, text)| Chunk {
            text,
            source_file: source_file.to_string(),
            ordinal,
        })
        .collect()
}

/// Split a single text into trimmed, non-empty pieces of at most
/// `chunk_size` characters.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    split_recursive(text, &SEPARATORS, chunk_size.max(1), overlap)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    // The empty separator always matches, so this never runs off the end.
    let idx = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len() - 1);
    let separator = separators[idx];
    let finer = &separators[idx + 1..];

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in splits {
        if char_len(piece) <= chunk_size {
            pending.push(piece);
            continue;
        }

        // Oversized piece: flush what fits, then split the piece finer
        if !pending.is_empty() {
            chunks.extend(merge_splits(&pending, separator, chunk_size, overlap));
            pending.clear();
        }
        if finer.is_empty() {
            chunks.push(piece.trim().to_string());
        } else {
            chunks.extend(split_recursive(piece, finer, chunk_size, overlap));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_splits(&pending, separator, chunk_size, overlap));
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

/// Greedily join small splits into chunks, keeping a window of trailing
/// splits (at most `overlap` characters) as the start of the next chunk.
fn merge_splits(splits: &[&str], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in splits {
        let len = char_len(piece);
        let joiner = if window.is_empty() { 0 } else { sep_len };

        if total + len + joiner > chunk_size && !window.is_empty() {
            push_joined(&mut chunks, &window, separator);

            // Shrink the window down to the overlap budget
            while total > overlap
                || (total > 0
                    && total + len + if window.is_empty() { 0 } else { sep_len } > chunk_size)
            {
                let Some(first) = window.front() else {
                    break;
                };
                let removed = char_len(first) + if window.len() > 1 { sep_len } else { 0 };
                total = total.saturating_sub(removed);
                window.pop_front();
            }
        }

        window.push_back(piece);
        total += len + if window.len() > 1 { sep_len } else { 0 };
    }

    push_joined(&mut chunks, &window, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_segments("a.txt", &["Hello, world!".to_string()], &cfg(1000, 150));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].source_file, "a.txt");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_segments("a.txt", &["".to_string()], &cfg(1000, 150)).is_empty());
        assert!(split_segments("a.txt", &["  \n\n \n".to_string()], &cfg(1000, 150)).is_empty());
    }

    #[test]
    fn test_paragraphs_become_separate_chunks() {
        let text = "Alpha paragraph about cats.\n\nBeta paragraph about dogs.\n\nGamma paragraph about birds.";
        let chunks = split_text(text, 40, 0);
        assert_eq!(
            chunks,
            vec![
                "Alpha paragraph about cats.",
                "Beta paragraph about dogs.",
                "Gamma paragraph about birds."
            ]
        );
    }

    #[test]
    fn test_paragraphs_under_limit_merge() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split_text(text, 1000, 150);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        for chunk in split_text(&text, 50, 10) {
            assert!(chunk.chars().count() <= 50, "chunk too long: {:?}", chunk);
        }
    }

    #[test]
    fn test_overlap_carries_trailing_words() {
        let text = (0..20)
            .map(|i| format!("w{:02}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, 20, 8);
        assert!(chunks.len() > 1);
        assert!(chunks[0].starts_with("w00"));
        for pair in chunks.windows(2) {
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].contains(first_word),
                "{:?} does not overlap {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_unbroken_run_split_by_characters() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, 10, 0);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn test_multibyte_text_is_not_split_mid_character() {
        let text = "é".repeat(15);
        let chunks = split_text(&text, 4, 0);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_ordinals_contiguous_across_segments() {
        let segments = vec![
            "Page one first.\n\nPage one second.".to_string(),
            "Page two first.\n\nPage two second.".to_string(),
        ];
        let chunks = split_segments("doc.pdf", &segments, &cfg(20, 0));
        assert_eq!(chunks.len(), 4);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i, "ordinal mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta".to_string();
        let c1 = split_segments("d", &[text.clone()], &cfg(12, 4));
        let c2 = split_segments("d", &[text], &cfg(12, 4));
        assert_eq!(c1, c2);
    }
}
