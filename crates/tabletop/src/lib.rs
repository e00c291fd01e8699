//! # Tabletop
//!
//! Authority-replicated peer-to-peer tabletop sessions.
//!
//! One participant, the authority, hosts the shared document: a map
//! grid, fog-of-war layers, tokens, images and the view. Guests connect
//! straight to it, ask to be admitted, receive the full document once
//! approved and then follow every change the authority makes. Guests
//! never write; the authority is the only source of truth.
//!
//! The authority captures the document to a key-value store as it goes,
//! so a restarted authority can [`rejoin`](AuthorityBuilder::rejoin) its
//! session, ideally under the same room code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tabletop::prelude::*;
//!
//! # async fn run() -> Result<(), TabletopError> {
//! let network = MemoryNetwork::new();
//! let creds = StaticCredentials::new("gm", "change-me");
//! let mut authority = AuthorityBuilder::new(network.clone(), MemoryStore::new(), creds)
//!     .create("gm", "change-me")
//!     .await?;
//! let room_code = authority.handle.session_id().clone();
//!
//! // Elsewhere, a guest asks to join and the authority's UI approves.
//! let guest = tokio::spawn(async move {
//!     join(&network, &room_code, "Ada", GridConfig::default()).await
//! });
//! if let Some(Notice::JoinRequested { requester_id, .. }) = authority.notices.recv().await {
//!     authority.handle.approve(&requester_id).await?;
//! }
//! let guest = guest.await.expect("join task panicked")?;
//! # let _ = guest;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - `tabletop-transport`: peer identifiers, connections, in-memory and
//!   WebSocket networks.
//! - `tabletop-protocol`: wire messages, envelopes, the snapshot layout.
//! - `tabletop-state`: the document, raster blobs, guest replica merging.
//! - `tabletop-session`: credentials, connection registry, admission.
//! - `tabletop-persist`: key-value stores, captures with expiry,
//!   export/import, lifecycle timers.

mod authority;
mod config;
mod connection;
mod error;
mod guest;

pub use authority::{
    Authority, AuthorityBuilder, AuthorityHandle, ConnectionSummary, DENIAL_REASON, Mutation,
    Notice, Outcome, RejoinOutcome,
};
pub use config::TabletopConfig;
pub use error::TabletopError;
pub use guest::{Guest, GuestHandle, GuestNotice, join};

pub use tabletop_persist as persist;
pub use tabletop_protocol as protocol;
pub use tabletop_session as session;
pub use tabletop_state as state;
pub use tabletop_transport as transport;

/// Installs a `tracing` subscriber that logs to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Calling this
/// more than once, or after another subscriber was installed, is a no-op.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

/// Convenience re-exports for hosting and joining sessions.
pub mod prelude {
    pub use crate::{
        Authority, AuthorityBuilder, AuthorityHandle, ConnectionSummary, Guest, GuestHandle,
        GuestNotice, Mutation, Notice, Outcome, RejoinOutcome, TabletopConfig, TabletopError,
        init_tracing, join,
    };
    pub use tabletop_persist::{FileStore, KeyValueStore, LifecycleConfig, MemoryStore};
    pub use tabletop_protocol::{Blob, CellKey, GroupId, Message, Snapshot, TokenId};
    pub use tabletop_session::{Authenticator, JoinRequest, SessionError, StaticCredentials};
    pub use tabletop_state::{
        BrushMode, Direction, FogBrush, GridConfig, Raster, SessionState,
    };
    #[cfg(feature = "websocket")]
    pub use tabletop_transport::WebSocketNetwork;
    pub use tabletop_transport::{MemoryNetwork, PeerId, PeerNetwork};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_tracing_twice_is_harmless() {
        super::init_tracing();
        super::init_tracing();
    }
}
