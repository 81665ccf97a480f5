//! Error types for agent invocation

use thiserror::Error;

/// Errors raised while invoking an agent
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    /// Agent is misconfigured; raised before any network call
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Agent code failed to parse, threw, or never settled
    #[error("Script error: {0}")]
    Script(String),

    /// Script tried to use a capability it is not granted
    #[error("Capability denied: {0}")]
    CapabilityDenied(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success response from the prediction service
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The stream reported an error or broke mid-way
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Unreadable response payload
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Network(format!("request timed out: {}", err))
        } else if let Some(status) = err.status() {
            BridgeError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            BridgeError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Parse(err.to_string())
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
