//! Text chunker. Splits input text into bounded-length, speakable pieces.
//!
//! Greedy bin-packing in reading order:
//!
//! 1. Split at sentence-terminal punctuation (`.`, `!`, `?` and runs of them),
//!    keeping the punctuation on the preceding sentence.
//! 2. Pack whole sentences into the running chunk while they fit.
//! 3. A sentence longer than the limit is split at `,` / `;` (punctuation
//!    kept); a clause that is still too long is split into words.
//!
//! Lengths are counted in characters.  A single word longer than the limit is
//! emitted whole as its own chunk; it is never truncated.
//!
//! The output is a pure function of `(text, max_chars)`, so a client can ask
//! for chunk `i` of the same text in separate requests.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default chunk length used by the generation endpoints.
pub const DEFAULT_MAX_CHARS: usize = 400;

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").expect("valid regex"));
static CLAUSE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;]").expect("valid regex"));

// ─────────────────────────────────────────────────────────────────────────────
// Splitting
// ─────────────────────────────────────────────────────────────────────────────

/// Split `text` after every match of `delim`, trimming each piece and
/// dropping the ones that are empty.
fn split_after<'a>(text: &'a str, delim: &Regex) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for m in delim.find_iter(text) {
        pieces.push(&text[start..m.end()]);
        start = m.end();
    }
    pieces.push(&text[start..]);

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ─────────────────────────────────────────────────────────────────────────────
// Packing
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates pieces into chunks joined by single spaces.
struct Packer {
    max_chars: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self { max_chars, chunks: Vec::new(), current: String::new(), current_len: 0 }
    }

    fn push(&mut self, piece: &str) {
        let len = char_len(piece);
        if self.current_len > 0 && self.current_len + 1 + len > self.max_chars {
            self.flush();
        }
        if self.current_len > 0 {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    fn flush(&mut self) {
        if self.current_len > 0 {
            self.chunks.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Empty or whitespace-only input yields no chunks; callers decide whether
/// that is an error.  `max_chars` of zero is treated as one.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut packer = Packer::new(max_chars);

    for sentence in split_after(text, &SENTENCE_END) {
        if char_len(sentence) <= max_chars {
            packer.push(sentence);
            continue;
        }
        for clause in split_after(sentence, &CLAUSE_END) {
            if char_len(clause) <= max_chars {
                packer.push(clause);
            } else {
                for word in clause.split_whitespace() {
                    packer.push(word);
                }
            }
        }
    }

    let chunks = packer.finish();
    tracing::debug!(chunks = chunks.len(), max_chars, "split text into chunks");
    chunks
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
