//! Change-feed client errors

use thiserror::Error;

use crate::position::Position;

/// Result type for change-feed client operations
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors reported by a change-feed client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Network or authentication failure while opening
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Read on an open stream failed
    #[error("Read failed: {0}")]
    Read(String),

    /// The source no longer holds history back to this position
    #[error("Resume position {0} is no longer available on the source")]
    PositionUnavailable(Position),

    /// The client was closed or its transport went away
    #[error("Change stream closed")]
    Closed,
}
