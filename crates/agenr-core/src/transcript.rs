//! Transcript parsing
//!
//! Session files are append-only JSONL message logs. Each line is one JSON
//! object carrying a role and text in one of a few shapes; anything
//! unparseable is skipped with a warning count. Only complete lines (ending
//! in a newline) are consumed, so a partially-flushed tail stays in place
//! for the next watch cycle.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One parsed message
#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    /// Position within the parsed window
    pub index: usize,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Byte offset of this message's line end within the parsed window
    pub byte_end: usize,
}

/// Result of parsing one window of transcript bytes
#[derive(Debug, Default)]
pub struct ParsedTranscript {
    pub messages: Vec<Message>,
    /// Bytes of the window covered by complete lines (offset advance bound)
    pub consumed_bytes: usize,
    /// Lines that did not parse into a message
    pub skipped_lines: usize,
}

/// Parse a window of raw transcript bytes into messages.
pub fn parse_transcript(raw: &str) -> ParsedTranscript {
    let mut parsed = ParsedTranscript::default();
    let mut cursor = 0usize;

    while let Some(newline) = raw[cursor..].find('\n') {
        let line_end = cursor + newline + 1;
        let line = raw[cursor..line_end - 1].trim();
        if !line.is_empty() {
            match parse_line(line) {
                Some((role, text, timestamp)) if !text.trim().is_empty() => {
                    parsed.messages.push(Message {
                        role,
                        index: parsed.messages.len(),
                        text,
                        timestamp,
                        byte_end: line_end,
                    });
                }
                _ => parsed.skipped_lines += 1,
            }
        }
        cursor = line_end;
        parsed.consumed_bytes = line_end;
    }

    parsed
}

/// Parse one JSONL line into (role, text, timestamp).
///
/// Accepted shapes:
/// - `{"role": "...", "content": "..."}` with content as a string
/// - `{"role": "...", "content": [{"type": "text", "text": "..."}]}`
/// - `{"type": "...", "message": { <either of the above> }}` (wrapped
///   session-event records)
/// - `text` as an alias for `content`
fn parse_line(line: &str) -> Option<(String, String, Option<DateTime<Utc>>)> {
    let value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;

    let timestamp = object
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    // Unwrap session-event envelopes
    let inner = object
        .get("message")
        .and_then(Value::as_object)
        .unwrap_or(object);

    let role = inner
        .get("role")
        .or_else(|| object.get("role"))
        .or_else(|| object.get("type"))
        .and_then(Value::as_str)?
        .to_string();

    let content = inner
        .get("content")
        .or_else(|| inner.get("text"))
        .or_else(|| object.get("content"))
        .or_else(|| object.get("text"))?;

    let text = flatten_content(content)?;
    Some((role, text, timestamp))
}

/// Flatten a content value (string or block array) into plain text
fn flatten_content(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                let text = match block.get("type").and_then(Value::as_str) {
                    Some("text") | None => block.get("text").and_then(Value::as_str),
                    // Tool traffic is noise for extraction
                    _ => None,
                };
                if let Some(text) = text {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
            if out.is_empty() { None } else { Some(out) }
        }
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
