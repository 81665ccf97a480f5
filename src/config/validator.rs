use std::collections::HashMap;
use thiserror::Error;

use crate::config::{RateLimitConfig, ServerSettings, Settings};
use crate::domain::auth::{AuthConfig, AuthMode};
use crate::domain::{AgentSeed, AgentSource, ApplicationDefinition};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        Self::validate_server(&settings.server, &mut errors);
        Self::validate_auth(&settings.auth, &mut errors);
        if let Some(rate_limit) = &settings.rate_limit {
            Self::validate_rate_limit(rate_limit, &mut errors);
        }
        if settings.database.url.is_empty() {
            errors.push(ValidationError::MissingField("database.url".to_string()));
        }
        Self::validate_applications(&settings.applications, &mut errors);
        Self::validate_agents(&settings.agents, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings, errors: &mut Vec<ValidationError>) {
        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }
    }

    fn validate_auth(auth: &AuthConfig, errors: &mut Vec<ValidationError>) {
        if !auth.enabled {
            return;
        }

        match auth.mode {
            AuthMode::ApiKey if auth.api_keys.as_ref().map_or(true, |k| k.is_empty()) => {
                errors.push(ValidationError::MissingField("auth.api_keys".to_string()));
            }
            AuthMode::BearerToken if auth.jwt_secret.as_deref().map_or(true, str::is_empty) => {
                errors.push(ValidationError::MissingField("auth.jwt_secret".to_string()));
            }
            _ => {}
        }
    }

    fn validate_rate_limit(rate_limit: &RateLimitConfig, errors: &mut Vec<ValidationError>) {
        if rate_limit.enabled && rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "rate_limit.requests_per_second".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
    }

    fn validate_applications(apps: &[ApplicationDefinition], errors: &mut Vec<ValidationError>) {
        let mut seen_names = HashMap::new();

        for (idx, app) in apps.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&app.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Application name '{}' appears at indices {} and {}",
                    app.name, prev_idx, idx
                )));
            }

            if app.name.is_empty() {
                errors.push(ValidationError::MissingField(format!("applications[{}].name", idx)));
            }

            let mut seen_fields = HashMap::new();
            for field in &app.fields {
                if field.trim().is_empty() || field.contains('=') {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("applications[{}].fields", idx),
                        reason: format!("'{}' is not a usable key name", field),
                    });
                }
                if seen_fields.insert(field, ()).is_some() {
                    errors.push(ValidationError::Duplicate(format!(
                        "Field '{}' declared twice by application '{}'",
                        field, app.name
                    )));
                }
            }
        }
    }

    fn validate_agents(agents: &[AgentSeed], errors: &mut Vec<ValidationError>) {
        let mut seen_names = HashMap::new();

        for (idx, seed) in agents.iter().enumerate() {
            let agent = &seed.definition;

            if let Some(prev_idx) = seen_names.insert(&agent.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Agent name '{}' appears at indices {} and {}",
                    agent.name, prev_idx, idx
                )));
            }

            if agent.name.is_empty() {
                errors.push(ValidationError::MissingField(format!("agents[{}].name", idx)));
            }

            match &agent.source {
                AgentSource::Code { code } if code.trim().is_empty() => {
                    errors.push(ValidationError::MissingField(format!("agents[{}].source.code", idx)));
                }
                AgentSource::Chatflow { chatflow_id } if chatflow_id.trim().is_empty() => {
                    errors.push(ValidationError::MissingField(format!(
                        "agents[{}].source.chatflow_id",
                        idx
                    )));
                }
                _ => {}
            }

            if agent.is_auth && seed.app.is_none() && agent.app_id.is_none() {
                errors.push(ValidationError::InvalidValue {
                    field: format!("agents[{}].app", idx),
                    reason: "Agents with is_auth must name an application".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentDefinition;

    fn seed(name: &str, source: AgentSource, is_auth: bool, app: Option<&str>) -> AgentSeed {
        AgentSeed {
            definition: AgentDefinition {
                name: name.to_string(),
                description: String::new(),
                icon: None,
                is_auth,
                source,
                override_config: None,
                app_id: None,
                permission: Default::default(),
                response_adapter: Default::default(),
            },
            app: app.map(str::to_string),
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(ConfigValidator::validate(&Settings::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        settings.agents.push(seed(
            "a",
            AgentSource::Code { code: "  ".to_string() },
            false,
            None,
        ));
        settings.agents.push(seed(
            "a",
            AgentSource::Chatflow { chatflow_id: "flow".to_string() },
            true,
            None,
        ));

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Duplicate(_))));
    }

    #[test]
    fn test_auth_mode_requires_credentials() {
        let mut settings = Settings::default();
        settings.auth.enabled = true;
        settings.auth.mode = AuthMode::BearerToken;
        settings.auth.jwt_secret = None;

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(errors[0].to_string().contains("auth.jwt_secret"));
    }

    #[test]
    fn test_bad_field_names() {
        let mut settings = Settings::default();
        settings.applications.push(ApplicationDefinition {
            name: "Mailgun".to_string(),
            description: None,
            logo: None,
            auth_required: true,
            fields: vec!["api_key".to_string(), "api_key".to_string(), "a=b".to_string()],
        });

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
