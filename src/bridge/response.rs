//! Turning a raw agent result into display text

use serde_json::Value;

use crate::domain::ResponseAdapter;

/// Keys probed, in order, by [`ResponseAdapter::Probe`]
pub const PROBE_KEYS: [&str; 4] = ["text", "message", "content", "response"];

pub const DEFAULT_FALLBACK: &str = "No response content";

/// Extract the display text from `value`
///
/// Plain strings pass through unchanged. Objects are read with `adapter`;
/// when nothing usable is found `fallback` is returned.
pub fn normalize(value: &Value, adapter: &ResponseAdapter, fallback: &str) -> String {
    if let Value::String(s) = value {
        return s.clone();
    }

    let found = match adapter {
        ResponseAdapter::Probe => PROBE_KEYS.iter().find_map(|key| match value.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }),
        ResponseAdapter::Field { path } => lookup(value, path).and_then(render),
    };

    found.unwrap_or_else(|| fallback.to_string())
}

/// Follow a dotted path; numeric segments index arrays
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe(value: Value) -> String {
        normalize(&value, &ResponseAdapter::Probe, DEFAULT_FALLBACK)
    }

    #[test]
    fn test_probe_order() {
        assert_eq!(probe(json!({"text": "x"})), "x");
        assert_eq!(probe(json!({"message": "y"})), "y");
        assert_eq!(probe(json!({"content": "c", "response": "r"})), "c");
        assert_eq!(probe(json!({"response": "r"})), "r");
        assert_eq!(probe(json!({"text": "t", "message": "m"})), "t");
    }

    #[test]
    fn test_plain_string_passes_through() {
        assert_eq!(probe(json!("hello")), "hello");
    }

    #[test]
    fn test_fallback() {
        assert_eq!(probe(json!({})), "No response content");
        assert_eq!(probe(json!({"other": 1})), "No response content");
        assert_eq!(probe(Value::Null), "No response content");
        assert_eq!(probe(json!({"text": ""})), "No response content");
        assert_eq!(probe(json!({"text": 5})), "No response content");
        assert_eq!(normalize(&json!({}), &ResponseAdapter::Probe, "nothing"), "nothing");
    }

    #[test]
    fn test_field_adapter() {
        let adapter = ResponseAdapter::Field {
            path: "choices.0.message.content".to_string(),
        };
        let value = json!({"choices": [{"message": {"content": "deep"}}]});
        assert_eq!(normalize(&value, &adapter, DEFAULT_FALLBACK), "deep");

        let value = json!({"choices": []});
        assert_eq!(normalize(&value, &adapter, DEFAULT_FALLBACK), DEFAULT_FALLBACK);

        let adapter = ResponseAdapter::Field {
            path: "data.count".to_string(),
        };
        assert_eq!(normalize(&json!({"data": {"count": 3}}), &adapter, DEFAULT_FALLBACK), "3");
    }
}
