use axum::http::StatusCode;
use thiserror::Error;

use crate::access::AccessError;
use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Another turn for this chat has not finished yet
    #[error("A response is already being generated for chat {0}")]
    TurnInProgress(i64),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ChatError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        ChatError::NotFound { entity, id }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::TurnInProgress(_) => StatusCode::CONFLICT,
            ChatError::NotFound { .. } => StatusCode::NOT_FOUND,
            ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
            ChatError::Access(e) => e.status_code(),
            ChatError::Persistence(e) => e.status_code(),
        }
    }
}
