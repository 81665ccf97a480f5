//! Override configuration parsing and `{{vars.<field>}}` substitution

use serde_json::Value;

use super::error::{BridgeError, BridgeResult};
use crate::access::VariableMap;

/// Normalize a stored override configuration
///
/// Agents may hold the override as an object or as a JSON string. The string
/// form must decode to an object.
pub fn parse_override_config(raw: Option<&Value>) -> BridgeResult<Option<Value>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(value @ Value::Object(_)) => Ok(Some(value)),
            Ok(_) => Err(BridgeError::Configuration(
                "override_config must be a JSON object".to_string(),
            )),
            Err(e) => Err(BridgeError::Configuration(format!(
                "override_config is not valid JSON: {}",
                e
            ))),
        },
        Some(value @ Value::Object(_)) => Ok(Some(value.clone())),
        Some(_) => Err(BridgeError::Configuration(
            "override_config must be a JSON object".to_string(),
        )),
    }
}

/// Replace `{{vars.name}}` in every string value
pub fn render_override_config(config: &Value, vars: &VariableMap) -> Value {
    match config {
        Value::String(s) => Value::String(render_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_override_config(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_override_config(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Substitute placeholders in one string; unknown names are kept verbatim
pub fn render_str(input: &str, vars: &VariableMap) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let placeholder = &rest[start..start + 2 + end + 2];
        let name = after[..end].trim().strip_prefix("vars.").map(str::trim);

        match name.and_then(|n| vars.get(n)) {
            Some(value) => out.push_str(value),
            None => out.push_str(placeholder),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> VariableMap {
        [("api_key", "sk-1"), ("region", "eu")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_accepts_object_and_string() {
        assert_eq!(parse_override_config(None).unwrap(), None);
        assert_eq!(parse_override_config(Some(&json!(""))).unwrap(), None);
        assert_eq!(
            parse_override_config(Some(&json!("{\"a\":1}"))).unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            parse_override_config(Some(&json!({"b": 2}))).unwrap(),
            Some(json!({"b": 2}))
        );
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(matches!(
            parse_override_config(Some(&json!("{not json"))),
            Err(BridgeError::Configuration(_))
        ));
        assert!(parse_override_config(Some(&json!("[1,2]"))).is_err());
        assert!(parse_override_config(Some(&json!(42))).is_err());
    }

    #[test]
    fn test_render_substitutes_nested_strings() {
        let config = json!({
            "openAIApiKey": "{{vars.api_key}}",
            "nested": {"url": "https://{{ vars.region }}.example.com", "n": 3},
            "list": ["{{vars.missing}}"]
        });
        let rendered = render_override_config(&config, &vars());
        assert_eq!(rendered["openAIApiKey"], "sk-1");
        assert_eq!(rendered["nested"]["url"], "https://eu.example.com");
        assert_eq!(rendered["nested"]["n"], 3);
        assert_eq!(rendered["list"][0], "{{vars.missing}}");
    }

    #[test]
    fn test_render_str_edge_cases() {
        let vars = vars();
        assert_eq!(render_str("no placeholders", &vars), "no placeholders");
        assert_eq!(render_str("{{other}}", &vars), "{{other}}");
        assert_eq!(render_str("open {{vars.api_key", &vars), "open {{vars.api_key");
        assert_eq!(render_str("{{vars.api_key}}{{vars.region}}", &vars), "sk-1eu");
    }
}
