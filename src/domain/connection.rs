//! Per-user credential sets

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named secret of a connection
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

impl KeyValuePair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// Values are credentials; keep them out of logs.
impl fmt::Debug for KeyValuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValuePair")
            .field("key", &self.key)
            .field("value", &"***")
            .finish()
    }
}

/// A user's stored credentials for one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub user_id: String,
    pub app_id: i64,
    pub connection_name: String,
    pub connection_key: Vec<KeyValuePair>,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable part of a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInput {
    pub app_id: i64,
    pub connection_name: String,
    #[serde(default)]
    pub connection_key: Vec<KeyValuePair>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_value() {
        let pair = KeyValuePair::new("api_key", "sk-live-123");
        let rendered = format!("{:?}", pair);
        assert!(rendered.contains("api_key"));
        assert!(!rendered.contains("sk-live-123"));
    }
}
