//! Overlapping text chunker.
//!
//! Splits document content into [`Chunk`]s of at most `chunk_size`
//! characters, each overlapping its predecessor by exactly
//! `chunk_overlap` characters. Lengths are measured in Unicode scalar
//! values, never bytes, so multi-byte text is never cut mid-character.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in `chunk_size`, it becomes the last chunk.
//! 2. Otherwise look for a break inside the window ending at
//!    `start + chunk_size`, preferring a paragraph break (`\n\n`), then a
//!    line break, then a space. The break must leave the chunk longer than
//!    `chunk_overlap` and at least half of `chunk_size`.
//! 3. With no usable break, cut hard at `chunk_size`.
//! 4. The next chunk starts `chunk_overlap` characters before the cut.
//!
//! Chunk text is never trimmed, so dropping the first `chunk_overlap`
//! characters of every chunk after the first and concatenating
//! reconstructs the content exactly.
//!
//! # Example
//!
//! ```rust
//! use repo_qa_core::chunk::Chunker;
//! use repo_qa_core::models::ChunkMetadata;
//!
//! let chunker = Chunker::new(1000, 200).unwrap();
//! let chunks = chunker.split("Hello world.\n\nSecond paragraph.", &ChunkMetadata::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, ChunkMetadata};

/// Break candidates in order of preference.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Splits content into overlapping, size-bounded chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Fails unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `content` into chunks carrying a copy of `metadata`.
    ///
    /// Empty content yields no chunks. Non-empty content never yields an
    /// empty chunk.
    pub fn split(&self, content: &str, metadata: &ChunkMetadata) -> Vec<Chunk> {
        // Byte offset of every char, plus the end of the string.
        let bounds: Vec<usize> = content
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(content.len()))
            .collect();
        let total = bounds.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < total {
            let end = if total - start <= self.chunk_size {
                total
            } else {
                self.break_point(content, &bounds, start)
            };
            chunks.push(make_chunk(
                chunks.len(),
                start,
                &content[bounds[start]..bounds[end]],
                metadata,
            ));
            if end == total {
                break;
            }
            start = end - self.chunk_overlap;
        }
        chunks
    }

    /// Char position at which to end the chunk that starts at `start`.
    fn break_point(&self, content: &str, bounds: &[usize], start: usize) -> usize {
        let hard = start + self.chunk_size;
        let floor = (start + self.chunk_overlap + 1).max(start + self.chunk_size / 2);
        let window = &content[bounds[start]..bounds[hard]];

        for sep in SEPARATORS {
            let Some(pos) = window.rfind(sep) else {
                continue;
            };
            let byte_end = bounds[start] + pos + sep.len();
            if let Ok(end) = bounds.binary_search(&byte_end) {
                if end >= floor {
                    return end;
                }
            }
        }
        hard
    }
}

fn make_chunk(index: usize, start: usize, text: &str, metadata: &ChunkMetadata) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        text: text.to_string(),
        index,
        start,
        hash,
        metadata: metadata.clone(),
    }
}

/// Rebuild the original content from chunks produced with `overlap`.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}
