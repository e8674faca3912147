//! Local alignment of chunk sequences.
//!
//! Finds where a quoted block (`block`) reappears inside a larger text
//! (`base`). Skipping base chunks is cheap and skipping block chunks is
//! expensive, so the longest faithful quotation wins over a short exact
//! fragment. Chunks that are punctuation only are cheaper to skip on either
//! side.

use crate::chunk::ChunkedText;

const MATCH: f32 = 1.0;
const MATCH_IGNORING_PUNCTUATION: f32 = 0.8;
const MISMATCH: f32 = -1.0;
const SKIP_BASE: f32 = -0.5;
const SKIP_BLOCK: f32 = -2.0;
const SKIP_PUNCTUATION_BONUS: f32 = 0.4;

/// Best local match of a block inside a base text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    /// Best score divided by the number of block chunks; 1.0 for a complete
    /// gap-free match.
    pub similarity: f32,
    /// Byte offset in the base text where the match starts.
    pub start: usize,
    /// Byte offset in the base text where the match ends.
    pub end: usize,
}

impl Alignment {
    const NONE: Alignment = Alignment {
        similarity: 0.0,
        start: 0,
        end: 0,
    };
}

/// Locate `block` inside `base`.
///
/// Not symmetric: the score measures how much of `block` is recovered.
pub fn align(base: &ChunkedText, block: &ChunkedText) -> Alignment {
    let base_chunks = base.chunks();
    let block_chunks = block.chunks();
    let n = base_chunks.len();
    let m = block_chunks.len();
    if n == 0 || m == 0 {
        return Alignment::NONE;
    }

    let mut matrix = vec![vec![0f32; m]; n];
    let (mut best_i, mut best_j) = (0, 0);

    for i in 0..n {
        let base_chunk = &base_chunks[i];
        for j in 0..m {
            let block_chunk = &block_chunks[j];
            let mut top = SKIP_BASE;
            let mut left = SKIP_BLOCK;
            let mut diag = if base_chunk.norm_punct == block_chunk.norm_punct {
                MATCH
            } else if base_chunk.norm == block_chunk.norm {
                MATCH_IGNORING_PUNCTUATION
            } else {
                MISMATCH
            };

            if i > 0 {
                top += matrix[i - 1][j];
                if base_chunks[i - 1].is_punctuation_only() {
                    top += SKIP_PUNCTUATION_BONUS;
                }
            }
            if j > 0 {
                left += matrix[i][j - 1];
                if block_chunks[j - 1].is_punctuation_only() {
                    left += SKIP_PUNCTUATION_BONUS;
                }
            }
            if i > 0 && j > 0 {
                diag += matrix[i - 1][j - 1];
            }

            matrix[i][j] = 0f32.max(top).max(left).max(diag);
            // later cells win ties
            if matrix[i][j] >= matrix[best_i][best_j] {
                best_i = i;
                best_j = j;
            }
        }
    }

    let best = matrix[best_i][best_j];
    if best == 0.0 {
        return Alignment::NONE;
    }

    let (mut i, mut j) = (best_i, best_j);
    loop {
        let top = if i > 0 { matrix[i - 1][j] } else { 0.0 };
        let left = if j > 0 { matrix[i][j - 1] } else { 0.0 };
        let diag = if i > 0 && j > 0 {
            matrix[i - 1][j - 1]
        } else {
            0.0
        };
        let step = 0f32.max(top).max(left).max(diag);
        if step == 0.0 {
            break;
        } else if step == diag {
            i -= 1;
            j -= 1;
        } else if step == top {
            i -= 1;
        } else {
            j -= 1;
        }
    }

    Alignment {
        similarity: best / m as f32,
        start: base_chunks[i].start,
        end: base_chunks[best_i].end,
    }
}
