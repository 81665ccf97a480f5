//! Codec for stored connection keys
//!
//! Connection keys have been persisted in three shapes over time and all of
//! them are still read:
//!
//! 1. a JSON array of `"key=value"` strings (the current write format),
//! 2. a Postgres array literal, `{"k1=v1","k2=v2"}` or `{k1=v1,k2=v2}`,
//! 3. a JSON array of `{"key": .., "value": ..}` objects, or a plain JSON object.
//!
//! Entries split on the first `=`. Entries without `=` or with an empty key
//! are dropped. Anything unreadable decodes to an empty list.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::KeyValuePair;

/// Variables exposed to agent code and override templates
pub type VariableMap = BTreeMap<String, String>;

/// Storage encodings understood by [`parse_connection_key`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    /// `["k1=v1","k2=v2"]`
    JsonEntries,
    /// `{"k1=v1","k2=v2"}`
    PostgresArray,
    /// `[{"key":"k1","value":"v1"}]`
    JsonObjects,
}

/// Split a single `key=value` entry
fn split_entry(entry: &str) -> Option<KeyValuePair> {
    let (key, value) = entry.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some(KeyValuePair::new(key, value))
}

/// Parse already-separated `key=value` entries
pub fn parse_entries<S: AsRef<str>>(entries: &[S]) -> Vec<KeyValuePair> {
    entries
        .iter()
        .filter_map(|e| split_entry(e.as_ref()))
        .collect()
}

/// Decode a stored connection key in any supported encoding
pub fn parse_connection_key(raw: &str) -> Vec<KeyValuePair> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return parse_json(&value);
    }

    if raw.starts_with('{') && raw.ends_with('}') {
        let elements = split_postgres_array(&raw[1..raw.len() - 1]);
        return parse_entries(&elements);
    }

    tracing::debug!("Unrecognized connection key encoding, treating as empty");
    Vec::new()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_json(value: &Value) -> Vec<KeyValuePair> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(entry) => split_entry(entry),
                Value::Object(obj) => {
                    let key = obj.get("key").and_then(Value::as_str)?.trim();
                    let value = obj.get("value").and_then(scalar_to_string)?;
                    (!key.is_empty()).then(|| KeyValuePair::new(key, value))
                }
                _ => None,
            })
            .collect(),
        Value::Object(obj) => obj
            .iter()
            .filter(|(k, _)| !k.trim().is_empty())
            .filter_map(|(k, v)| scalar_to_string(v).map(|v| KeyValuePair::new(k.trim(), v)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Split the body of a Postgres array literal into its elements
fn split_postgres_array(body: &str) -> Vec<String> {
    let mut elements = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut element = String::new();
        if first == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            element.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => element.push(c),
                }
            }
            // Skip anything up to the separator
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
                element.push(c);
            }
            element = element.trim_end().to_string();
        }
        elements.push(element);
    }

    elements
}

fn quote_postgres(element: &str) -> String {
    let escaped = element.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Encode pairs in the requested storage shape
pub fn format_connection_key(pairs: &[KeyValuePair], encoding: KeyEncoding) -> String {
    match encoding {
        KeyEncoding::JsonEntries => {
            let entries: Vec<String> = pairs
                .iter()
                .map(|p| format!("{}={}", p.key, p.value))
                .collect();
            Value::from(entries).to_string()
        }
        KeyEncoding::PostgresArray => {
            let entries: Vec<String> = pairs
                .iter()
                .map(|p| quote_postgres(&format!("{}={}", p.key, p.value)))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        KeyEncoding::JsonObjects => {
            let objects: Vec<Value> = pairs
                .iter()
                .map(|p| serde_json::json!({ "key": p.key, "value": p.value }))
                .collect();
            Value::from(objects).to_string()
        }
    }
}

/// Build the variable map; later duplicates win
pub fn to_variable_map(pairs: &[KeyValuePair]) -> VariableMap {
    pairs
        .iter()
        .map(|p| (p.key.clone(), p.value.clone()))
        .collect()
}
