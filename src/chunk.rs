//! Overlapping word-boundary text chunker.
//!
//! Splits one extracted text body into passages bounded by a token budget,
//! with a fixed overlap carried between consecutive chunks so context
//! survives the cut. Splitting happens on whitespace boundaries; a chunk
//! never starts or ends mid-word unless a single word exceeds the whole
//! budget.
//!
//! Each chunk records its byte span within the original text, which the
//! pipeline later turns into a citation locator (offsets, line ranges, or
//! transcript time ranges).

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// One chunk of text plus its byte span within the original body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Position in reading order, starting at 0.
    pub seq: i64,
    pub text: String,
    /// Byte offset of the chunk's first character in the original text.
    pub start: usize,
    /// Byte offset one past the chunk's last character.
    pub end: usize,
}

/// Estimated token count for a piece of text.
pub fn approx_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Split text into overlapping chunks of at most `max_tokens`, with
/// consecutive chunks sharing roughly `overlap_tokens` of trailing context.
///
/// Empty or whitespace-only input yields zero chunks; that is not an error.
/// Text within the budget comes back as a single chunk. Chunk sequence
/// numbers are contiguous from 0 and spans always advance, so concatenating
/// the spans with overlaps removed reconstructs the original word content.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<ChunkSpan> {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN).max(CHARS_PER_TOKEN);
    // Overlap must leave room for forward progress
    let overlap_chars = overlap_tokens
        .saturating_mul(CHARS_PER_TOKEN)
        .min(max_chars.saturating_sub(CHARS_PER_TOKEN));

    let words = word_spans(text);
    if words.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<ChunkSpan> = Vec::new();
    let mut seq: i64 = 0;
    let mut i = 0usize;

    while i < words.len() {
        let (word_start, word_end) = words[i];

        // A single word larger than the whole budget is hard-split at char
        // boundaries; overlap does not apply across the pieces.
        if word_end - word_start > max_chars {
            let mut piece_start = word_start;
            while word_end - piece_start > max_chars {
                let cut = floor_char_boundary(text, piece_start + max_chars, piece_start);
                chunks.push(make_chunk(seq, text, piece_start, cut));
                seq += 1;
                piece_start = cut;
            }
            chunks.push(make_chunk(seq, text, piece_start, word_end));
            seq += 1;
            i += 1;
            continue;
        }

        // Greedily extend the chunk while the next word still fits.
        let chunk_start = word_start;
        let mut j = i;
        while j + 1 < words.len() && words[j + 1].1 - chunk_start <= max_chars {
            j += 1;
        }
        let chunk_end = words[j].1;
        chunks.push(make_chunk(seq, text, chunk_start, chunk_end));
        seq += 1;

        if j + 1 >= words.len() {
            break;
        }

        // Next chunk re-reads the trailing overlap window, starting on the
        // first word boundary inside it, but always moves forward.
        let overlap_from = chunk_end.saturating_sub(overlap_chars);
        let mut next = j + 1;
        while next > i + 1 && words[next - 1].0 >= overlap_from {
            next -= 1;
        }
        i = next;
    }

    chunks
}

fn make_chunk(seq: i64, text: &str, start: usize, end: usize) -> ChunkSpan {
    ChunkSpan {
        seq,
        text: text[start..end].to_string(),
        start,
        end,
    }
}

/// Byte ranges of whitespace-separated words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, idx));
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Largest char boundary `<= at`, but strictly greater than `floor` so
/// hard-splitting always advances.
fn floor_char_boundary(text: &str, at: usize, floor: usize) -> usize {
    let mut idx = at.min(text.len());
    while idx > floor && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx <= floor {
        idx = floor + 1;
        while idx < text.len() && !text.is_char_boundary(idx) {
            idx += 1;
        }
    }
    idx
}
