//! Peer transport contract for tabletop sessions.
//!
//! A session has no central server. The authority acquires a public
//! [`PeerId`] (the "room code") from a [`PeerNetwork`], guests connect to
//! that identifier, and both ends exchange ordered, reliable byte messages
//! over a [`Connection`].
//!
//! The contract is deliberately small:
//!
//! - [`PeerNetwork::open`] acquires an identifier, optionally a specific
//!   one, failing with [`TransportError::Unavailable`] when it is taken.
//! - [`PeerNetwork::connect`] dials another peer by identifier.
//! - [`Transport::accept`] yields inbound connections.
//! - [`Connection`] sends, receives and closes.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`,
//!   where the identifier is the `host:port` the authority listens on.
//!
//! [`MemoryNetwork`] is always available and is what the test suites use.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryNetwork, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketNetwork, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Counter for generating process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque, transport-assigned identifier for a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }

    /// Allocates the next process-unique id.
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Public identifier a peer is reachable at.
///
/// For the authority this is the session identifier guests type in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier (32 lowercase hex chars).
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Borrows the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A peer-to-peer network that hands out identifiers and dials peers.
///
/// All futures are `Send` so the session runtime can drive them from
/// spawned tasks without knowing the concrete network.
pub trait PeerNetwork: Send + Sync + 'static {
    /// Connection type shared by inbound and outbound channels.
    type Connection: Connection;
    /// Listening endpoint produced by [`PeerNetwork::open`].
    type Transport: Transport<Connection = Self::Connection>;

    /// Acquires an identifier and starts accepting connections on it.
    ///
    /// With `Some(id)` the caller asks for that exact identifier; if
    /// another live endpoint holds it the call fails with
    /// [`TransportError::Unavailable`]. With `None` a fresh one is chosen.
    fn open(
        &self,
        requested: Option<&PeerId>,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;

    /// Opens a bidirectional channel to the peer at `target`.
    fn connect(
        &self,
        target: &PeerId,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// Accepts new incoming connections on an acquired identifier.
pub trait Transport: Send + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// The identifier peers use to reach this endpoint.
    fn local_id(&self) -> &PeerId;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Stops accepting and releases the identifier.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A single ordered, reliable channel that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// Sends data to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection. The remote side observes a clean close.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
