//! Error types for prflow.

use thiserror::Error;

/// Main error type for prflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream API returned a non-success status or an unreadable body
    #[error("Upstream error: {status} - {message}")]
    Upstream { status: u16, message: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error (operation log mirror, lock poisoning)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Tool arguments failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// No configured instance matches the requested key
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// No tool is registered under the requested name
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build an upstream error from an HTTP status and response body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Produce an equivalent owned error.
    ///
    /// Used where one failure has to be handed to several waiters.
    pub fn replicate(&self) -> Self {
        match self {
            Self::Http(msg) => Self::Http(msg.clone()),
            Self::Upstream { status, message } => Self::Upstream {
                status: *status,
                message: message.clone(),
            },
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Storage(msg) => Self::Storage(msg.clone()),
            Self::Validation(msg) => Self::Validation(msg.clone()),
            Self::InstanceNotFound(key) => Self::InstanceNotFound(key.clone()),
            Self::ToolNotFound(name) => Self::ToolNotFound(name.clone()),
            Self::Serialization(e) => Self::Other(anyhow::anyhow!("Serialization error: {}", e)),
            Self::Other(e) => Self::Other(anyhow::anyhow!("{}", e)),
        }
    }
}

/// Result type alias for prflow operations.
pub type Result<T> = std::result::Result<T, Error>;
