//! Unified error type for tabletop sessions.

use tabletop_persist::PersistError;
use tabletop_protocol::ProtocolError;
use tabletop_session::SessionError;
use tabletop_state::StateError;
use tabletop_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each wrapping variant lets `?` convert
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TabletopError {
    /// A transport-level error (open, connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The document rejected an operation or a snapshot.
    #[error(transparent)]
    State(#[from] StateError),

    /// Credentials or connection bookkeeping.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Storage, or a capture that does not parse.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// No capture for this session, or it expired.
    #[error("no saved session found for {0}")]
    SnapshotNotFound(String),

    /// The authority refused admission.
    #[error("join denied: {0}")]
    JoinDenied(String),

    /// The session task is no longer running.
    #[error("session stopped")]
    Stopped,

    /// The join exchange broke off before admission.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let tabletop_err: TabletopError = err.into();
        assert!(matches!(tabletop_err, TabletopError::Transport(_)));
        assert!(tabletop_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::AuthFailed("nope".into());
        let tabletop_err: TabletopError = err.into();
        assert!(matches!(tabletop_err, TabletopError::Session(_)));
    }

    #[test]
    fn test_from_state_error() {
        let err = StateError::ProtectedFogGroup(tabletop_protocol::GroupId::everyone());
        let tabletop_err: TabletopError = err.into();
        assert!(matches!(tabletop_err, TabletopError::State(_)));
    }

    #[test]
    fn test_snapshot_not_found_names_session() {
        let err = TabletopError::SnapshotNotFound("abc123".into());
        assert_eq!(err.to_string(), "no saved session found for abc123");
    }
}
