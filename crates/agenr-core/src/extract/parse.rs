//! Extractor output parsing
//!
//! The extraction model is asked to call a `submit_knowledge` tool; when it
//! answers in prose instead, a top-level JSON array or a fenced block is
//! parsed from the text. Extractor JSON is tolerant dynamic input: known
//! field aliases are accepted, unknown fields dropped with a warning, and
//! entries whose content cannot be recovered are discarded.

use serde_json::Value;

use crate::llm::ChatResponse;
use crate::memory::{EntryType, Expiry, NewEntry, Scope};

/// Tool name the extraction prompt asks for
pub const SUBMIT_TOOL: &str = "submit_knowledge";

/// Parse the model's response into entries.
///
/// Preference order: `submit_knowledge` tool call, then a JSON array (bare
/// or fenced) in the assistant text.
pub fn parse_extraction(response: &ChatResponse) -> (Vec<NewEntry>, Vec<String>) {
    let mut warnings = Vec::new();

    if let Some(call) = response.tool_call(SUBMIT_TOOL) {
        let entries = entries_from_value(&call.arguments, &mut warnings);
        return (entries, warnings);
    }

    if let Some(value) = json_array_from_text(&response.text) {
        let entries = entries_from_value(&value, &mut warnings);
        return (entries, warnings);
    }

    if !response.text.trim().is_empty() {
        warnings.push("no submit_knowledge call and no parseable JSON in text".to_string());
    }
    (vec![], warnings)
}

/// Pull a JSON array out of assistant text: the whole text, a fenced
/// ```json block, or the first bracketed span.
fn json_array_from_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_array() || value.is_object() {
            return Some(value);
        }
    }

    // Fenced block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(value);
            }
        }
    }

    // First bracketed span
    let open = trimmed.find('[')?;
    let close = trimmed.rfind(']')?;
    if close > open {
        serde_json::from_str(&trimmed[open..=close]).ok()
    } else {
        None
    }
}

/// Convert a tool-args object or bare array into entries
fn entries_from_value(value: &Value, warnings: &mut Vec<String>) -> Vec<NewEntry> {
    let items: &Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("entries").and_then(Value::as_array) {
            Some(items) => items,
            None => {
                warnings.push("tool arguments missing 'entries' array".to_string());
                return vec![];
            }
        },
        _ => {
            warnings.push("extractor output is neither array nor object".to_string());
            return vec![];
        }
    };

    let mut entries = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match entry_from_item(item) {
            Some(entry) => entries.push(entry),
            None => warnings.push(format!("dropped entry {i}: no recoverable content")),
        }
    }
    entries
}

/// Field aliases accepted from the model:
/// `description|text|statement|knowledge -> content`, `name -> subject`,
/// plural type names mapped to singular.
fn entry_from_item(item: &Value) -> Option<NewEntry> {
    let object = item.as_object()?;

    let content = ["content", "description", "text", "statement", "knowledge"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();

    let subject = ["subject", "name"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| truncate_subject(&content));

    let entry_type = object
        .get("type")
        .and_then(Value::as_str)
        .map(singularize)
        .map(EntryType::parse_name)
        .unwrap_or_default();

    let importance = object
        .get("importance")
        .and_then(Value::as_i64)
        .unwrap_or(5)
        .clamp(1, 10);

    let expiry = object
        .get("expiry")
        .and_then(Value::as_str)
        .map(Expiry::parse_name)
        .unwrap_or_default();

    let scope = object
        .get("scope")
        .and_then(Value::as_str)
        .map(Scope::parse_name)
        .unwrap_or_default();

    let tags = object
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut entry = NewEntry::new(entry_type, subject, content);
    entry.importance = importance;
    entry.expiry = expiry;
    entry.scope = scope;
    entry.tags = tags;
    entry.canonical_key = object
        .get("canonical_key")
        .or_else(|| object.get("canonicalKey"))
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    entry.source_context = object
        .get("source_context")
        .or_else(|| object.get("sourceContext"))
        .and_then(Value::as_str)
        .map(String::from);

    if let Some(key) = &entry.canonical_key {
        if let Some((entity, attribute)) = key.split_once('/') {
            entry.subject_entity = Some(entity.to_string());
            entry.subject_attribute = Some(attribute.to_string());
        }
    }

    Some(entry)
}

fn singularize(type_name: &str) -> &str {
    match type_name.to_lowercase().as_str() {
        "facts" => "fact",
        "decisions" => "decision",
        "preferences" => "preference",
        "events" => "event",
        "todos" => "todo",
        "insights" => "insight",
        _ => type_name,
    }
}

fn truncate_subject(content: &str) -> String {
    content.split_whitespace().take(6).collect::<Vec<_>>().join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
