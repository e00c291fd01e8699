//! Error types for the session layer.

use tabletop_transport::ConnectionId;

/// Errors that can occur during session bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The username/password pair was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A connection id was registered twice.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}
