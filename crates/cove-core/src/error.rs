use cove_store::StoreError;
use thiserror::Error;

/// Domain error taxonomy. Every fallible model operation fails fast with
/// the most specific entry; the boundary layers map these to HTTP statuses
/// and gateway error events.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or malformed input, reported with a field-level message.
    #[error("{0}")]
    Validation(String),

    /// Referenced entity absent. Deliberately generic wording so callers
    /// cannot enumerate usernames or ids.
    #[error("not found")]
    NotFound,

    /// Caller lacks permission for the target entity.
    #[error("{0}")]
    Authorization(String),

    /// Duplicate relationship or stale state transition.
    #[error("{0}")]
    Conflict(String),

    /// Bad, missing, or expired credential. Closes live sessions.
    #[error("{0}")]
    Authentication(String),

    /// Persistence failure. Surfaced as a generic retryable error; the
    /// underlying cause is only ever logged.
    #[error("storage failure")]
    Storage(#[from] StoreError),

    /// A stored record failed to decode.
    #[error("storage failure")]
    Corrupt(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    /// Stable wire code for error events and response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound => "not_found",
            Self::Authorization(_) => "authorization",
            Self::Conflict(_) => "conflict",
            Self::Authentication(_) => "authentication",
            Self::Storage(_) | Self::Corrupt(_) => "storage",
        }
    }

    /// Storage errors close live sessions; everything else is recoverable
    /// and reported back to the originating connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Corrupt(_) | Self::Authentication(_))
    }
}
