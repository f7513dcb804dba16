//! Chunker
//!
//! Groups parsed messages into extraction chunks of bounded character
//! length with a small overlap, so knowledge spanning a chunk boundary is
//! seen by at least one extraction call. Each chunk remembers the byte
//! offset of its last message so the watcher can advance its file offset
//! exactly as far as extraction actually succeeded.

use crate::transcript::Message;

/// Default chunk size in characters
pub const DEFAULT_CHUNK_CHARS: usize = 12_000;

/// Overlap carried into the next chunk
pub const CHUNK_OVERLAP_CHARS: usize = 400;

/// One extraction chunk
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Rendered `role: text` lines
    pub text: String,
    /// Index range of the messages included (inclusive)
    pub first_message: usize,
    pub last_message: usize,
    /// Byte offset (within the parsed window) of the last included message
    pub byte_end: usize,
}

fn render(message: &Message) -> String {
    format!("{}: {}\n", message.role, message.text)
}

/// Chunk messages into bounded pieces with overlap.
///
/// A single oversized message still becomes its own (oversized) chunk
/// rather than being dropped.
pub fn chunk_messages(messages: &[Message], max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    if messages.is_empty() {
        return chunks;
    }

    let mut start = 0usize;
    while start < messages.len() {
        let mut text = String::new();
        let mut end = start;

        while end < messages.len() {
            let rendered = render(&messages[end]);
            if !text.is_empty() && text.len() + rendered.len() > max_chars {
                break;
            }
            text.push_str(&rendered);
            end += 1;
        }

        // end is exclusive here; the chunk covers [start, end)
        chunks.push(Chunk {
            text,
            first_message: messages[start].index,
            last_message: messages[end - 1].index,
            byte_end: messages[end - 1].byte_end,
        });

        if end >= messages.len() {
            break;
        }

        // Walk back far enough to carry ~overlap_chars into the next chunk
        let mut next_start = end;
        let mut carried = 0usize;
        while next_start > start + 1 && carried < overlap_chars {
            carried += render(&messages[next_start - 1]).len();
            next_start -= 1;
        }
        start = next_start;
    }

    chunks
}

// ============================================================================
// TESTS
// ============================================================================
