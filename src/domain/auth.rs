use serde::{Deserialize, Serialize};

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AuthMode {
    None,
    ApiKey,
    BearerToken,
}

/// A static API key and the identity it maps to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub mode: AuthMode,
    pub api_keys: Option<Vec<ApiKeyEntry>>,
    pub jwt_secret: Option<String>,
    pub jwt_algorithm: Option<String>,
    /// Roles granted to callers when auth is disabled
    #[serde(default = "default_anonymous_roles")]
    pub anonymous_roles: Vec<String>,
    /// With auth disabled, take identity from `x-user-id` / `x-user-roles`.
    /// Only safe behind a proxy that sets and strips those headers.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

fn default_anonymous_roles() -> Vec<String> {
    vec!["user".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AuthMode::None,
            api_keys: None,
            jwt_secret: None,
            jwt_algorithm: Some("HS256".to_string()),
            anonymous_roles: default_anonymous_roles(),
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub authenticated: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn anonymous(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            authenticated: false,
            user_id: user_id.into(),
            email: None,
            roles,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// Principal for this request, with the workspace already membership-checked
    pub fn principal(&self, current_workspace_id: Option<i64>) -> Principal {
        Principal {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            current_workspace_id,
            is_admin: self.is_admin(),
        }
    }
}

/// The authenticated user plus the workspace they are acting in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub current_workspace_id: Option<i64>,
    #[serde(default)]
    pub is_admin: bool,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            current_workspace_id: None,
            is_admin: false,
        }
    }

    pub fn in_workspace(mut self, workspace_id: i64) -> Self {
        self.current_workspace_id = Some(workspace_id);
        self
    }
}
