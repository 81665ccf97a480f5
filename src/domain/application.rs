//! Application catalog entries

use serde::{Deserialize, Serialize};

/// An external API integration and the credential fields it requires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub auth_required: bool,
    /// Names of the secret keys a connection to this application must carry
    pub fields: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable part of an application, used for create/update and seed files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Application {
    /// Whether `key` is one of the declared credential fields
    pub fn declares(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f == key)
    }
}
