use crate::PeerId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The requested identifier is held by another live endpoint.
    #[error("peer id {0} is unavailable")]
    Unavailable(PeerId),

    /// No endpoint answered at the target identifier.
    #[error("peer {peer} is unreachable: {reason}")]
    Unreachable {
        /// Identifier that was dialed.
        peer: PeerId,
        /// Underlying cause.
        reason: String,
    },

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
