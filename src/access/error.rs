use thiserror::Error;

/// Errors raised while gating or binding an agent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Access denied to agent '{0}'")]
    AccessDenied(String),

    #[error("Agent '{0}' requires a connection; select one before chatting")]
    ConnectionRequired(String),

    #[error("Invalid connection binding: {0}")]
    InvalidBinding(String),

    #[error("Connection is missing fields required by '{application}': {}", missing.join(", "))]
    MissingFields {
        application: String,
        missing: Vec<String>,
    },
}

impl AccessError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::ConnectionRequired(_) => StatusCode::PRECONDITION_REQUIRED,
            Self::InvalidBinding(_) | Self::MissingFields { .. } => StatusCode::BAD_REQUEST,
        }
    }
}
