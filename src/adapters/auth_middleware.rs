use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::auth::{AuthConfig, AuthContext, AuthMode};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

pub struct AuthMiddleware {
    config: Arc<AuthConfig>,
}

pub type SharedAuthMiddleware = Arc<AuthMiddleware>;

impl AuthMiddleware {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self { config }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        if !self.config.enabled {
            return Ok(self.trusted_headers(headers));
        }

        match self.config.mode {
            AuthMode::None => Ok(self.trusted_headers(headers)),
            AuthMode::ApiKey => self.validate_api_key(headers),
            AuthMode::BearerToken => self.validate_bearer_token(headers),
        }
    }

    /// Caller identity when no credentials are checked
    ///
    /// Identity headers are ignored unless `trust_proxy_headers` is set;
    /// everyone is then the anonymous user with `anonymous_roles`.
    fn trusted_headers(&self, headers: &HeaderMap) -> AuthContext {
        if !self.config.trust_proxy_headers {
            return AuthContext::anonymous(ANONYMOUS_USER, self.config.anonymous_roles.clone());
        }

        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS_USER);

        let roles = headers
            .get(USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|roles| !roles.is_empty())
            .unwrap_or_else(|| self.config.anonymous_roles.clone());

        AuthContext::anonymous(user_id, roles)
    }

    fn validate_api_key(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let api_key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let entries = self
            .config
            .api_keys
            .as_ref()
            .ok_or(AuthError::ConfigurationError)?;

        let entry = entries
            .iter()
            .find(|e| e.key == api_key)
            .ok_or(AuthError::InvalidCredentials)?;

        Ok(AuthContext {
            authenticated: true,
            user_id: entry.user_id.clone(),
            email: entry.email.clone(),
            roles: if entry.roles.is_empty() {
                vec!["user".to_string()]
            } else {
                entry.roles.clone()
            },
        })
    }

    fn validate_bearer_token(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let auth_header = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidCredentials)?;

        let secret = self
            .config
            .jwt_secret
            .as_ref()
            .ok_or(AuthError::ConfigurationError)?;

        let algorithm = match self.config.jwt_algorithm.as_deref() {
            Some("HS384") => Algorithm::HS384,
            Some("HS512") => Algorithm::HS512,
            _ => Algorithm::HS256,
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;

        let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map_err(|e| {
                tracing::debug!("Rejected bearer token: {}", e);
                AuthError::InvalidCredentials
            })?;

        Ok(AuthContext {
            authenticated: true,
            user_id: token_data.claims.sub,
            email: token_data.claims.email,
            roles: token_data.claims.roles,
        })
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingCredentials,
    InvalidCredentials,
    ConfigurationError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingCredentials => (StatusCode::UNAUTHORIZED, "Missing credentials"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            AuthError::ConfigurationError => (StatusCode::INTERNAL_SERVER_ERROR, "Auth configuration error"),
        };

        (
            status,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

/// Resolves the caller and stores its [`AuthContext`] in request extensions
pub async fn auth_middleware(
    State(auth): State<SharedAuthMiddleware>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_context = auth.authenticate(request.headers()).await?;
    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::ApiKeyEntry;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn api_key_config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig {
            enabled: true,
            mode: AuthMode::ApiKey,
            api_keys: Some(vec![ApiKeyEntry {
                key: "test-key-123".to_string(),
                user_id: "alice".to_string(),
                email: Some("alice@example.com".to_string()),
                roles: vec!["admin".to_string()],
            }]),
            ..AuthConfig::default()
        })
    }

    #[tokio::test]
    async fn test_api_key_maps_to_user() {
        let middleware = AuthMiddleware::new(api_key_config());
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("test-key-123"));

        let ctx = middleware.authenticate(&headers).await.unwrap();
        assert!(ctx.authenticated);
        assert_eq!(ctx.user_id, "alice");
        assert!(ctx.is_admin());
    }

    #[tokio::test]
    async fn test_api_key_failure() {
        let middleware = AuthMiddleware::new(api_key_config());
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("wrong-key"));
        assert!(matches!(
            middleware.authenticate(&headers).await,
            Err(AuthError::InvalidCredentials)
        ));

        assert!(matches!(
            middleware.authenticate(&HeaderMap::new()).await,
            Err(AuthError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let config = Arc::new(AuthConfig {
            enabled: true,
            mode: AuthMode::BearerToken,
            jwt_secret: Some("secret".to_string()),
            ..AuthConfig::default()
        });
        let claims = Claims {
            sub: "bob".to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            email: None,
            roles: vec!["user".to_string()],
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();

        let middleware = AuthMiddleware::new(config);
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );

        let ctx = middleware.authenticate(&headers).await.unwrap();
        assert_eq!(ctx.user_id, "bob");
        assert!(!ctx.is_admin());

        headers.insert("authorization", HeaderValue::from_static("Bearer nope"));
        assert!(middleware.authenticate(&headers).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_auth_ignores_identity_headers_by_default() {
        let middleware = AuthMiddleware::new(Arc::new(AuthConfig::default()));

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("carol"));
        headers.insert(USER_ROLES_HEADER, HeaderValue::from_static("admin"));
        let ctx = middleware.authenticate(&headers).await.unwrap();
        assert_eq!(ctx.user_id, ANONYMOUS_USER);
        assert_eq!(ctx.roles, vec!["user".to_string()]);
        assert!(!ctx.is_admin());
    }

    #[tokio::test]
    async fn test_disabled_auth_trusts_proxy_headers_when_enabled() {
        let middleware = AuthMiddleware::new(Arc::new(AuthConfig {
            trust_proxy_headers: true,
            ..AuthConfig::default()
        }));

        let ctx = middleware.authenticate(&HeaderMap::new()).await.unwrap();
        assert!(!ctx.authenticated);
        assert_eq!(ctx.user_id, ANONYMOUS_USER);
        assert_eq!(ctx.roles, vec!["user".to_string()]);

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("carol"));
        headers.insert(USER_ROLES_HEADER, HeaderValue::from_static("user, admin"));
        let ctx = middleware.authenticate(&headers).await.unwrap();
        assert_eq!(ctx.user_id, "carol");
        assert!(ctx.is_admin());
    }
}
