//! Error types for the feed core.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`Gateway`](crate::gateway::Gateway).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// A uniqueness constraint rejected an insert.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("gateway request timed out")]
    Timeout,

    #[error("not authenticated")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    /// The gateway refused the input (validation).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("gateway error: {0}")]
    Backend(String),
}

impl GatewayError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, GatewayError::Conflict(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("must be logged in")]
    Unauthenticated,

    #[error("only the author can delete this post")]
    NotAuthor,

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("gateway call exceeded {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Gateway(GatewayError),
}

impl FeedError {
    /// Lift a gateway failure, reporting transport timeouts with the budget
    /// that was in force.
    pub(crate) fn from_gateway(err: GatewayError, budget: Duration) -> Self {
        match err {
            GatewayError::Timeout => FeedError::Timeout(budget),
            other => FeedError::Gateway(other),
        }
    }

    /// True for a uniqueness conflict surfaced by the gateway.
    pub fn is_conflict(&self) -> bool {
        matches!(self, FeedError::Gateway(err) if err.is_conflict())
    }
}

/// Failures of a key-value backend. These never escape filter persistence.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
