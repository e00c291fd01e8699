//! In-process peer network.
//!
//! Every [`MemoryNetwork`] clone shares one hub that maps identifiers to
//! the accept queue of the endpoint holding them. Channels are unbounded
//! mpsc pairs, so delivery is ordered and reliable until either side
//! closes. An identifier becomes free again once its [`MemoryTransport`]
//! shuts down or is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, PeerId, PeerNetwork, Transport, TransportError};

/// Accept queue of one endpoint, tagged with the endpoint's generation.
struct Inbox {
    generation: u64,
    tx: mpsc::UnboundedSender<MemoryConnection>,
}

/// Shared in-process network. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<PeerId, Inbox>,
    generations: u64,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerNetwork for MemoryNetwork {
    type Connection = MemoryConnection;
    type Transport = MemoryTransport;

    async fn open(&self, requested: Option<&PeerId>) -> Result<MemoryTransport, TransportError> {
        let mut hub = self.hub.lock().await;

        let id = match requested {
            Some(id) => {
                // A closed inbox means the previous holder is gone.
                if hub.endpoints.get(id).is_some_and(|inbox| !inbox.tx.is_closed()) {
                    return Err(TransportError::Unavailable(id.clone()));
                }
                id.clone()
            }
            None => loop {
                let candidate = PeerId::random();
                if !hub.endpoints.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        hub.generations += 1;
        let generation = hub.generations;
        hub.endpoints.insert(id.clone(), Inbox { generation, tx });
        tracing::debug!(peer_id = %id, "memory endpoint opened");

        Ok(MemoryTransport {
            id,
            generation,
            incoming: rx,
            hub: Arc::clone(&self.hub),
        })
    }

    async fn connect(&self, target: &PeerId) -> Result<MemoryConnection, TransportError> {
        let hub = self.hub.lock().await;
        let inbox = hub.endpoints.get(target).ok_or_else(|| TransportError::Unreachable {
            peer: target.clone(),
            reason: "no endpoint with that id".into(),
        })?;

        let (local, remote) = MemoryConnection::pair();
        inbox.tx.send(remote).map_err(|_| TransportError::Unreachable {
            peer: target.clone(),
            reason: "endpoint stopped accepting".into(),
        })?;

        tracing::debug!(peer_id = %target, conn_id = %local.id, "memory connection dialed");
        Ok(local)
    }
}

/// Accept side of an acquired in-memory identifier.
pub struct MemoryTransport {
    id: PeerId,
    generation: u64,
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
    hub: Arc<Mutex<Hub>>,
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    fn local_id(&self) -> &PeerId {
        &self.id
    }

    async fn accept(&mut self) -> Result<MemoryConnection, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let mut hub = self.hub.lock().await;
        // A later endpoint may already have reclaimed the id.
        if hub
            .endpoints
            .get(&self.id)
            .is_some_and(|inbox| inbox.generation == self.generation)
        {
            hub.endpoints.remove(&self.id);
            tracing::debug!(peer_id = %self.id, "memory endpoint released");
        }
        Ok(())
    }
}

/// One end of an in-memory channel pair.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryConnection {
    fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(a_tx)),
            rx: Mutex::new(b_rx),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(b_tx)),
            rx: Mutex::new(a_rx),
        };
        (a, b)
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed("closed locally".into()))?;
        tx.send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("remote end dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping our sender ends the remote's receive stream.
        self.tx.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
