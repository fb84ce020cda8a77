//! Window planning and reassembly for long-text formatting.
//!
//! Formatters have a bounded input size, so long transcripts are split
//! into overlapping character windows, cut at sentence or line boundaries
//! where possible. The overlap gives the formatter context from the
//! previous window; reassembly removes the duplicated lines at each join.

/// Split `text` into windows of at most `window_chars` characters, each
/// overlapping the previous by roughly `overlap_chars`.
///
/// Cut points prefer, in order: a newline, then a sentence terminator,
/// then a space, searching backward within the overlap zone. A text that
/// fits in one window comes back unsplit.
pub fn split_windows(text: &str, window_chars: usize, overlap_chars: usize) -> Vec<String> {
    debug_assert!(overlap_chars < window_chars);

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window_chars {
        return vec![text.to_string()];
    }

    let stride_min = window_chars.saturating_sub(overlap_chars).max(1);
    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + window_chars).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            find_cut(&chars, start + stride_min, hard_end)
        };

        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        // Next window starts one overlap before the cut.
        start = end.saturating_sub(overlap_chars).max(start + 1);
    }

    windows
}

/// Best cut position in `(min_end, max_end]`, searching backward from
/// `max_end` for a boundary character.
fn find_cut(chars: &[char], min_end: usize, max_end: usize) -> usize {
    let zone = &chars[min_end..max_end];

    let boundaries: [fn(char) -> bool; 3] = [
        |c| c == '\n',
        |c| matches!(c, '.' | '!' | '?'),
        char::is_whitespace,
    ];
    for pred in boundaries {
        if let Some(offset) = zone.iter().rposition(|&c| pred(c)) {
            return min_end + offset + 1;
        }
    }
    max_end
}

/// Stitch formatted windows back together, dropping lines duplicated
/// across each join.
///
/// The formatter sees overlapping input, so the head of each piece tends
/// to repeat the tail of the previous one. Matching is line-based: the
/// longest run of leading lines of the next piece that equals a trailing
/// run of the document so far is dropped before appending.
pub fn merge_formatted(pieces: &[String]) -> String {
    let mut merged = String::new();
    for piece in pieces {
        if merged.is_empty() {
            merged.push_str(piece.trim_end());
            continue;
        }

        let doc_lines: Vec<&str> = merged.lines().collect();
        let piece_lines: Vec<&str> = piece.trim_end().lines().collect();

        let max_overlap = doc_lines.len().min(piece_lines.len());
        let mut skip = 0;
        for n in (1..=max_overlap).rev() {
            let doc_tail = &doc_lines[doc_lines.len() - n..];
            let piece_head = &piece_lines[..n];
            if lines_match(doc_tail, piece_head) {
                skip = n;
                break;
            }
        }

        let remainder = &piece_lines[skip..];
        if remainder.is_empty() {
            continue;
        }
        if !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(&remainder.join("\n"));
    }
    merged
}

fn lines_match(a: &[&str], b: &[&str]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.trim() == y.trim() && !x.trim().is_empty())
}
