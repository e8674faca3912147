//! Whitespace chunking of mail bodies.

use crate::normalize::normalize;

/// A whitespace-delimited token of a source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    /// Normalized form without punctuation.
    pub norm: String,
    /// Normalized form with punctuation.
    pub norm_punct: String,
}

impl Chunk {
    /// The chunk consists of punctuation or symbols only (e.g. `>` or `!!`).
    pub fn is_punctuation_only(&self) -> bool {
        self.norm.is_empty()
    }
}

/// A source string together with its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedText {
    text: String,
    chunks: Vec<Chunk>,
}

impl ChunkedText {
    /// Split `text` on whitespace and normalize every chunk.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut chunks = Vec::new();
        let mut start = None;

        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    chunks.push(make_chunk(&text, s, i));
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            chunks.push(make_chunk(&text, s, text.len()));
        }

        Self { text, chunks }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Source text of a chunk.
    pub fn chunk_str(&self, chunk: &Chunk) -> &str {
        &self.text[chunk.start..chunk.end]
    }

    /// Source text between two byte offsets.
    pub fn span(&self, start: usize, end: usize) -> &str {
        &self.text[start..end]
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

fn make_chunk(text: &str, start: usize, end: usize) -> Chunk {
    let content = &text[start..end];
    Chunk {
        start,
        end,
        norm: normalize(content, false),
        norm_punct: normalize(content, true),
    }
}

/// Convenience for [`ChunkedText::new`].
pub fn chunk(text: &str) -> ChunkedText {
    ChunkedText::new(text)
}
