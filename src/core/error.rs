use thiserror::Error;

/// Failures reported by a coordination service session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("Connection to the coordination service was lost")]
    ConnectionLoss,

    #[error("Session {0} has expired")]
    SessionExpired(u64),

    #[error("Node '{0}' does not exist")]
    NoNode(String),

    #[error("Node '{0}' already exists")]
    NodeExists(String),

    #[error("Node '{0}' has children")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Authentication failed for scheme '{0}'")]
    AuthFailed(String),

    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),
}

impl CoordinationError {
    /// Returns true for faults that a reconnect or a later attempt can clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLoss | Self::SessionExpired(_) | Self::Unavailable(_) | Self::Timeout(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("'{0}' is closed")]
    Closed(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, MasterError>;

impl<T> From<std::sync::PoisonError<T>> for MasterError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MasterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
