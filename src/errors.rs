use std::fmt;

use thiserror::Error;

use crate::database::StoreError;
use crate::realtime::presence::PresenceError;

/// Coarse classification of a failure, mapped to HTTP codes by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Configuration,
    Connectivity,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Configuration => 400,
            ErrorKind::Connectivity => 502,
            ErrorKind::Unavailable => 400,
            ErrorKind::Internal => 500,
        }
    }

    pub fn error_name(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Configuration => "Configuration",
            ErrorKind::Connectivity => "Connectivity",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Internal => "InternalServerError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.error_name())
    }
}

/// Errors surfaced by the coordination core.
///
/// Router failures never appear here: a synchronize pass folds them into its
/// report because the registry stays authoritative.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown node, camera or viewer session.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate external id or primary stream path.
    #[error("{0}")]
    Conflict(String),

    /// The node has no reachable address configured.
    #[error("{0}")]
    Configuration(String),

    /// The node could not be reached during a synchronize pass.
    #[error("cannot reach node '{node}' at {address}: {reason}")]
    Connectivity {
        node: String,
        address: String,
        reason: String,
    },

    /// The node exists but cannot serve viewers right now.
    #[error("node '{node}' {reason}")]
    NodeUnavailable { node: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("presence store error: {0}")]
    Presence(#[from] PresenceError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Configuration(_) => ErrorKind::Configuration,
            CoreError::Connectivity { .. } => ErrorKind::Connectivity,
            CoreError::NodeUnavailable { .. } => ErrorKind::Unavailable,
            CoreError::Storage(StoreError::UniqueViolation(_)) => ErrorKind::Conflict,
            CoreError::Storage(_) | CoreError::Presence(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        CoreError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict(message.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
