//! Agent (model) definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Permission;

/// How an agent produces its answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentSource {
    /// Admin-authored JavaScript defining `query(data)`
    Code { code: String },
    /// Managed streaming prediction flow
    Chatflow { chatflow_id: String },
}

impl AgentSource {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentSource::Code { .. } => "code",
            AgentSource::Chatflow { .. } => "chatflow",
        }
    }
}

/// How a raw script result is turned into display text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseAdapter {
    /// Probe `text`, `message`, `content`, `response` in that order
    #[default]
    Probe,
    /// Read a dotted path such as `choices.0.message.content`
    Field { path: String },
}

/// A configured agent in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Requires a bound connection to the application referenced by `app_id`
    pub is_auth: bool,
    pub source: AgentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_config: Option<Value>,
    #[serde(default)]
    pub app_id: Option<i64>,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default)]
    pub response_adapter: ResponseAdapter,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable part of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_auth: bool,
    pub source: AgentSource,
    #[serde(default)]
    pub override_config: Option<Value>,
    #[serde(default)]
    pub app_id: Option<i64>,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default)]
    pub response_adapter: ResponseAdapter,
}

/// Agent seed file entry; `app` names the application instead of its id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    #[serde(flatten)]
    pub definition: AgentDefinition,
    #[serde(default)]
    pub app: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_is_tagged() {
        let source: AgentSource =
            serde_json::from_value(json!({"kind": "chatflow", "chatflow_id": "abc"})).unwrap();
        assert_eq!(source, AgentSource::Chatflow { chatflow_id: "abc".to_string() });
        assert_eq!(source.kind(), "chatflow");
    }

    #[test]
    fn test_definition_defaults() {
        let def: AgentDefinition = serde_json::from_value(json!({
            "name": "weather",
            "source": {"kind": "code", "code": "async function query(d) { return {text: 'hi'}; }"}
        }))
        .unwrap();
        assert!(def.permission.is_global());
        assert_eq!(def.response_adapter, ResponseAdapter::Probe);
        assert!(!def.is_auth);
        assert!(def.app_id.is_none());
    }

    #[test]
    fn test_seed_flattens_definition() {
        let seed: AgentSeed = serde_json::from_value(json!({
            "name": "mailer",
            "is_auth": true,
            "app": "Mailgun",
            "source": {"kind": "chatflow", "chatflow_id": "flow-1"},
            "response_adapter": {"type": "field", "path": "data.reply"}
        }))
        .unwrap();
        assert_eq!(seed.app.as_deref(), Some("Mailgun"));
        assert_eq!(
            seed.definition.response_adapter,
            ResponseAdapter::Field { path: "data.reply".to_string() }
        );
    }
}
