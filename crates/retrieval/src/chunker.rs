//! Token-bounded chunking with overlap.
//!
//! Text is cut into paragraphs, then sentences; a sentence too long for the
//! window falls back to words, and a word too long to raw byte slices on
//! char boundaries. Sizes use the same byte heuristic as
//! `ragdesk_core::token`, so a chunk never estimates above `chunk_size`.

use ragdesk_core::token::{BYTES_PER_TOKEN, truncate_to_tokens};

const SENTENCE_ENDS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_tokens: usize,
    max_bytes: usize,
    overlap_bytes: usize,
}

/// Smallest piece the packer places; never longer than the window.
struct Unit {
    text: String,
    opens_paragraph: bool,
}

impl Chunker {
    /// `overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_tokens: chunk_size,
            max_bytes: chunk_size * BYTES_PER_TOKEN,
            overlap_bytes: overlap.min(chunk_size - 1) * BYTES_PER_TOKEN,
        }
    }

    /// Split `text` into overlapping chunks. Whitespace runs collapse to a
    /// single space.
    pub fn split(&self, text: &str) -> Vec<String> {
        let units = self.units(text);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < units.len() {
            let mut end = start;
            let mut len = 0;
            while end < units.len() {
                let unit = &units[end];
                let extra = unit.text.len() + usize::from(end > start);
                if end > start {
                    let overflows = len + extra > self.max_bytes;
                    // a new paragraph starts a new chunk once this one is half full
                    let paragraph_break = unit.opens_paragraph && len * 2 >= self.max_bytes;
                    if overflows || paragraph_break {
                        break;
                    }
                }
                len += extra;
                end += 1;
            }

            chunks.push(
                units[start..end]
                    .iter()
                    .map(|u| u.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            );
            if end >= units.len() {
                break;
            }

            // Step back over trailing units that fit in the overlap
            let mut next = end;
            let mut overlap = 0;
            while next > start + 1 {
                let width = units[next - 1].text.len() + 1;
                if overlap + width > self.overlap_bytes {
                    break;
                }
                overlap += width;
                next -= 1;
            }
            start = next;
        }

        chunks
    }

    fn units(&self, text: &str) -> Vec<Unit> {
        let mut units = Vec::new();
        for paragraph in paragraphs(text) {
            let mut opens_paragraph = true;
            for sentence in sentences(&paragraph) {
                for piece in self.fit(sentence) {
                    units.push(Unit {
                        text: piece,
                        opens_paragraph,
                    });
                    opens_paragraph = false;
                }
            }
        }
        units
    }

    /// A sentence as-is when it fits, otherwise its words, cutting any
    /// word that alone exceeds the window.
    fn fit(&self, sentence: &str) -> Vec<String> {
        if sentence.len() <= self.max_bytes {
            return vec![sentence.to_string()];
        }

        let mut pieces = Vec::new();
        for word in sentence.split(' ') {
            let mut rest = word;
            while !rest.is_empty() {
                let mut head = truncate_to_tokens(rest, self.chunk_tokens);
                if head.is_empty() {
                    // window narrower than one char
                    let width = rest.chars().next().map_or(rest.len(), char::len_utf8);
                    head = &rest[..width];
                }
                pieces.push(head.to_string());
                rest = &rest[head.len()..];
            }
        }
        pieces
    }
}

/// Blank-line separated blocks with whitespace collapsed.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut words: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !words.is_empty() {
                out.push(words.join(" "));
                words.clear();
            }
        } else {
            words.extend(line.split_whitespace());
        }
    }
    if !words.is_empty() {
        out.push(words.join(" "));
    }
    out
}

/// Sentences of a collapsed paragraph. Latin terminators need a following
/// space (so `5.50` stays whole); CJK ones cut immediately.
fn sentences(paragraph: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !SENTENCE_ENDS.contains(&c) {
            continue;
        }
        let wide = !c.is_ascii();
        let at_break = match chars.peek() {
            None => true,
            Some((_, next)) => wide || *next == ' ',
        };
        if at_break {
            let end = i + c.len_utf8();
            let sentence = paragraph[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
