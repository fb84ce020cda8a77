//! Reassembly of per-chunk transcripts into one document.
//!
//! Adjacent chunks share audio, so their transcripts tend to repeat a
//! span of words at the join. The merge keeps the earlier chunk's
//! wording and drops the longest duplicated word run from the head of
//! the next transcript. Matching is word-based and case-insensitive;
//! punctuation differences between the two renditions break a match, in
//! which case both spans are kept rather than guessing.

/// Word run considered when looking for a duplicated join span.
const DEFAULT_MAX_OVERLAP_WORDS: usize = 50;

/// Per-chunk transcript fed into assembly, ordered by sequence index.
#[derive(Debug, Clone)]
pub enum ChunkText {
    /// Transcribed chunk.
    Text(String),
    /// Permanently failed chunk; leaves a gap in the document.
    Missing,
}

/// Merges ordered chunk transcripts with overlap deduplication.
#[derive(Debug, Clone, Copy)]
pub struct Assembler {
    max_overlap_words: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            max_overlap_words: DEFAULT_MAX_OVERLAP_WORDS,
        }
    }

    /// Custom dedup window, in words.
    pub fn with_max_overlap_words(max_overlap_words: usize) -> Self {
        Self { max_overlap_words }
    }

    /// Merge chunk transcripts in sequence order.
    ///
    /// A `Missing` entry suppresses deduplication across the gap: the
    /// chunks on either side never shared audio with each other, so
    /// their join has no duplicate to remove.
    pub fn merge(&self, parts: &[ChunkText]) -> String {
        let mut doc_words: Vec<String> = Vec::new();
        let mut after_gap = true;

        for part in parts {
            let text = match part {
                ChunkText::Text(text) => text,
                ChunkText::Missing => {
                    after_gap = true;
                    continue;
                }
            };

            let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
            if words.is_empty() {
                continue;
            }

            let skip = if after_gap {
                0
            } else {
                longest_join_overlap(&doc_words, &words, self.max_overlap_words)
            };
            doc_words.extend(words.into_iter().skip(skip));
            after_gap = false;
        }

        doc_words.join(" ")
    }
}

/// Length of the longest suffix of `doc` equal to a prefix of `next`,
/// capped at `max_words`. Comparison ignores case but not punctuation.
fn longest_join_overlap(doc: &[String], next: &[String], max_words: usize) -> usize {
    let limit = doc.len().min(next.len()).min(max_words);
    for n in (1..=limit).rev() {
        let tail = &doc[doc.len() - n..];
        let head = &next[..n];
        if tail
            .iter()
            .zip(head.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
        {
            return n;
        }
    }
    0
}
