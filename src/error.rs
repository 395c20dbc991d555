//! Error types for the agent relay
//!
//! Structured error definitions use thiserror; anyhow errors coming out of
//! collaborator plumbing are folded into [`RelayError::Internal`].

use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Conflicting or malformed pagination parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Request body rejected before touching session state
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A message was sent while the agent is still running
    #[error("Agent is busy")]
    Busy,

    /// An answer was submitted but no question is waiting for one
    #[error("No active question")]
    NoActiveQuestion,

    /// A plan decision was submitted but no plan is waiting for one
    #[error("No active plan")]
    NoActivePlan,

    /// A subscriber's transport is closed or cannot keep up
    #[error("Subscriber gone: {0}")]
    SubscriberGone(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected failure in the collaborator or in formatting
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Stable machine-readable name, used in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidQuery(_) => "invalid_query",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Busy => "busy",
            RelayError::NoActiveQuestion => "no_active_question",
            RelayError::NoActivePlan => "no_active_plan",
            RelayError::SubscriberGone(_) => "subscriber_gone",
            RelayError::Config(_) => "config",
            RelayError::Io(_) => "io",
            RelayError::Serialization(_) => "serialization",
            RelayError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Convert anyhow::Error to RelayError
impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}
