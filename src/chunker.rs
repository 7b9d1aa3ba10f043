//! Overlapping text chunker with a boundary-priority ladder.
//!
//! Splits extracted document text into [`Chunk`]s no longer than the
//! configured chunk size. The splitter walks a window over the text and
//! picks the coarsest boundary available inside it: structural headers,
//! then paragraph breaks, then line breaks, then word breaks, then raw
//! character breaks. Each chunk repeats the trailing `overlap` characters
//! of its predecessor so context survives the cut.

use crate::config::ChunkingConfig;
use crate::loader::ContentType;
use crate::models::Chunk;

/// A boundary candidate in the priority ladder.
struct Boundary {
    pattern: &'static str,
    /// Split after the pattern; when false, split just after the leading
    /// newline so the matched structure starts the next chunk.
    split_after: bool,
}

const PLAIN_BOUNDARIES: &[Boundary] = &[
    Boundary {
        pattern: "\n\n",
        split_after: true,
    },
    Boundary {
        pattern: "\n",
        split_after: true,
    },
    Boundary {
        pattern: " ",
        split_after: true,
    },
];

const MARKDOWN_BOUNDARIES: &[Boundary] = &[
    Boundary {
        pattern: "\n# ",
        split_after: false,
    },
    Boundary {
        pattern: "\n## ",
        split_after: false,
    },
    Boundary {
        pattern: "\n### ",
        split_after: false,
    },
    Boundary {
        pattern: "\n\n",
        split_after: true,
    },
    Boundary {
        pattern: "\n",
        split_after: true,
    },
    Boundary {
        pattern: " ",
        split_after: true,
    },
];

/// Content-type-aware splitting policy.
pub struct ChunkPolicy {
    pub chunk_size: usize,
    pub overlap: usize,
    boundaries: &'static [Boundary],
}

impl ChunkPolicy {
    /// Policy for the given content type. Markdown considers `#`/`##`/`###`
    /// headers before the plain-text ladder; PDF text uses the plain ladder.
    pub fn for_content_type(content_type: ContentType, config: &ChunkingConfig) -> Self {
        let boundaries = match content_type {
            ContentType::Markdown => MARKDOWN_BOUNDARIES,
            ContentType::PlainText | ContentType::Pdf => PLAIN_BOUNDARIES,
        };
        ChunkPolicy {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
            boundaries,
        }
    }
}

/// Split `text` into overlapping chunks with contiguous indices from 0.
pub fn split_text(text: &str, policy: &ChunkPolicy) -> Vec<Chunk> {
    debug_assert!(policy.overlap < policy.chunk_size);

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= policy.chunk_size {
        return vec![Chunk {
            index: 0,
            text: text.to_string(),
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < text.len() {
        let hard_end = floor_char_boundary(text, (start + policy.chunk_size).min(text.len()));
        let end = if hard_end == text.len() {
            hard_end
        } else {
            find_boundary(&text[start..hard_end], policy.boundaries, policy.overlap)
                .map(|off| start + off)
                .unwrap_or(hard_end)
        };

        let piece = &text[start..end];
        if !piece.trim().is_empty() {
            chunks.push(Chunk {
                index,
                text: piece.to_string(),
            });
            index += 1;
        }

        if end == text.len() {
            break;
        }

        let step = end - start;
        start = if step > policy.overlap {
            floor_char_boundary(text, end - policy.overlap)
        } else {
            // Step smaller than the overlap: advance without it to make progress.
            end
        };
    }

    chunks
}

/// Find a split offset inside `window`, trying boundaries coarse-to-fine.
/// Splits inside the leading overlap region are rejected so every chunk
/// advances past its predecessor.
fn find_boundary(window: &str, boundaries: &[Boundary], min_split: usize) -> Option<usize> {
    for b in boundaries {
        if let Some(pos) = window.rfind(b.pattern) {
            if pos == 0 {
                continue;
            }
            let split = if b.split_after {
                pos + b.pattern.len()
            } else {
                pos + 1
            };
            if split > min_split && split < window.len() {
                return Some(split);
            }
        }
    }
    None
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
