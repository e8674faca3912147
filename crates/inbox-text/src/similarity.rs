//! Chunk-level edit distance.

use crate::chunk::ChunkedText;

/// Similarity of two texts in `[0, 1]` from an edit distance over chunks.
///
/// Substituting a chunk costs 1, or 0.5 when only punctuation differs.
/// Inserting or deleting costs 1, or 0.5 for punctuation-only chunks.
/// The result is `1 - distance / max(len)`, symmetric, and 0 when either
/// side has no chunks.
pub fn similarity(a: &ChunkedText, b: &ChunkedText) -> f32 {
    let chunks1 = a.chunks();
    let chunks2 = b.chunks();
    let len1 = chunks1.len();
    let len2 = chunks2.len();
    if len1 == 0 || len2 == 0 {
        return 0.0;
    }

    let mut prev: Vec<f32> = (0..=len2).map(|j| j as f32).collect();
    let mut curr = vec![0f32; len2 + 1];

    for (i, c1) in chunks1.iter().enumerate() {
        curr[0] = (i + 1) as f32;
        for (j, c2) in chunks2.iter().enumerate() {
            let mut insertion = curr[j] + 1.0;
            if c2.is_punctuation_only() {
                insertion -= 0.5;
            }
            let mut deletion = prev[j + 1] + 1.0;
            if c1.is_punctuation_only() {
                deletion -= 0.5;
            }
            let substitution = if c1.norm_punct == c2.norm_punct {
                prev[j]
            } else if c1.norm == c2.norm {
                prev[j] + 0.5
            } else {
                prev[j] + 1.0
            };
            curr[j + 1] = insertion.min(deletion).min(substitution);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    1.0 - prev[len2] / len1.max(len2) as f32
}
