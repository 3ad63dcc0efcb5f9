//! Fixed-size, overlapping splitting of extracted text into chunks.
//!
//! Sizes are measured in characters. Windows end at the last whitespace
//! before the size limit when one exists within [`BOUNDARY_LOOKBACK`]
//! characters, so words are rarely cut in half.

use serde::{Deserialize, Serialize};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// How far back from the size limit to look for a word boundary.
const BOUNDARY_LOOKBACK: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A window of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub document_id: String,
    pub text: String,
    /// Zero-based position of this chunk within the document.
    pub sequence: usize,
}

/// Split a document's text into chunks.
///
/// Whitespace-only windows are dropped and never consume a sequence number.
///
/// # Examples
///
/// ```
/// use docsift::chunking::{chunk_document, ChunkingConfig};
///
/// let config = ChunkingConfig { chunk_size: 1000, overlap: 200 };
///
/// let chunks = chunk_document("doc-1", "Hello, world!", &config);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// let text = "word ".repeat(500);
/// let chunks = chunk_document("doc-1", &text, &config);
/// assert!(chunks.len() >= 2);
/// assert!(chunks.iter().all(|c| c.document_id == "doc-1"));
/// ```
pub fn chunk_document(
    document_id: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    split_windows(text, config.chunk_size, config.overlap)
        .into_iter()
        .filter(|window| !window.trim().is_empty())
        .enumerate()
        .map(|(sequence, window)| Chunk {
            document_id: document_id.to_string(),
            text: window.to_string(),
            sequence,
        })
        .collect()
}

/// Split `text` into windows of at most `chunk_size` characters, each
/// starting `chunk_size - overlap` characters after the previous one.
/// The final window always reaches the end of the text.
pub fn split_windows(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    // char index -> byte index, with a sentinel for the end of the text
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    if char_count <= chunk_size {
        return vec![text];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let limit = (start + chunk_size).min(char_count);
        let end = if limit < char_count {
            word_boundary(text, &char_to_byte, start, limit)
        } else {
            limit
        };

        windows.push(&text[char_to_byte[start]..char_to_byte[end]]);

        if end >= char_count {
            break;
        }
        // Never step past the end of the window just emitted.
        start = (start + step).min(end);
    }

    windows
}

/// Last whitespace-delimited break in `(start, limit]`, looking back at most
/// [`BOUNDARY_LOOKBACK`] characters. Falls back to `limit`.
fn word_boundary(
    text: &str,
    char_to_byte: &[usize],
    start: usize,
    limit: usize,
) -> usize {
    let search_from = limit.saturating_sub(BOUNDARY_LOOKBACK).max(start + 1);
    let region = &text[char_to_byte[search_from]..char_to_byte[limit]];

    match region.rfind(char::is_whitespace) {
        Some(offset) => {
            let ws_byte = char_to_byte[search_from] + offset;
            // First char after the whitespace byte.
            char_to_byte.partition_point(|&b| b <= ws_byte)
        }
        None => limit,
    }
}
