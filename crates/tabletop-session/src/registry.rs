//! The connection registry: every live guest channel on the authority.
//!
//! A record is created when a channel opens and destroyed when it
//! closes. Records start unapproved; only approved records receive
//! broadcast traffic.
//!
//! Outbound delivery goes through a per-connection unbounded queue that
//! a writer task drains, so sending never blocks the authority's event
//! loop. A failed send means the writer is gone; it is logged and the
//! fan-out moves on to the next record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tabletop_transport::ConnectionId;
use tokio::sync::mpsc;

use crate::SessionError;

/// An encoded message, shared between every recipient of a broadcast.
pub type Frame = Arc<[u8]>;

/// Instruction for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Send these bytes.
    Frame(Frame),
    /// Close the channel after everything queued before this.
    Close,
}

/// Channel sender for delivering outbound traffic to one connection.
pub type PeerSender = mpsc::UnboundedSender<Outbound>;

/// Role of a connected participant. Only guests connect to an authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Guest,
}

/// One live channel as the authority sees it.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    /// Bound on approval.
    pub display_name: Option<String>,
    pub role: Role,
    pub approved: bool,
    pub connected_at: Instant,
    sender: PeerSender,
}

impl ConnectionRecord {
    fn deliver(&self, outbound: Outbound) -> bool {
        match self.sender.send(outbound) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(conn_id = %self.id, "writer gone, dropping outbound frame");
                false
            }
        }
    }
}

/// All live connections, keyed by transport-assigned id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: BTreeMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unapproved record for a newly opened channel.
    pub fn register(&mut self, id: ConnectionId, sender: PeerSender) -> Result<(), SessionError> {
        if self.records.contains_key(&id) {
            return Err(SessionError::DuplicateConnection(id));
        }
        self.records.insert(
            id,
            ConnectionRecord {
                id,
                display_name: None,
                role: Role::Guest,
                approved: false,
                connected_at: Instant::now(),
                sender,
            },
        );
        tracing::debug!(conn_id = %id, total = self.records.len(), "connection registered");
        Ok(())
    }

    /// Removes a record. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        let record = self.records.remove(&id)?;
        tracing::debug!(conn_id = %id, total = self.records.len(), "connection unregistered");
        Some(record)
    }

    /// Marks a record approved and binds its display name.
    pub fn approve(&mut self, id: ConnectionId, display_name: &str) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.approved = true;
                record.display_name = Some(display_name.to_owned());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.values()
    }

    /// Every live connection, approved or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn approved_count(&self) -> usize {
        self.records.values().filter(|r| r.approved).count()
    }

    /// Sends a frame to every approved record. Returns how many accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        self.records
            .values()
            .filter(|r| r.approved)
            .filter(|r| r.deliver(Outbound::Frame(Arc::clone(frame))))
            .count()
    }

    /// Sends a frame to one record regardless of approval.
    pub fn send_to(&self, id: ConnectionId, frame: Frame) -> bool {
        self.records
            .get(&id)
            .is_some_and(|r| r.deliver(Outbound::Frame(frame)))
    }

    /// Asks the writer to close the channel and drops the record.
    pub fn close(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        let record = self.unregister(id)?;
        record.deliver(Outbound::Close);
        Some(record)
    }

    /// Closes every channel. Used on teardown.
    pub fn close_all(&mut self) {
        for (_, record) in std::mem::take(&mut self.records) {
            record.deliver(Outbound::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> Frame {
        Arc::from(bytes)
    }

    fn register(
        registry: &mut ConnectionRegistry,
        id: u64,
    ) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(ConnectionId::new(id), tx).unwrap();
        rx
    }

    #[test]
    fn test_register_creates_unapproved_record() {
        let mut registry = ConnectionRegistry::new();
        let _rx = register(&mut registry, 1);
        let record = registry.get(ConnectionId::new(1)).unwrap();
        assert!(!record.approved);
        assert_eq!(record.role, Role::Guest);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.approved_count(), 0);
    }

    #[test]
    fn test_register_twice_is_an_error() {
        let mut registry = ConnectionRegistry::new();
        let _rx = register(&mut registry, 1);
        let (tx, _rx2) = mpsc::unbounded_channel();
        let err = registry.register(ConnectionId::new(1), tx).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateConnection(_)));
    }

    #[test]
    fn test_broadcast_reaches_only_approved() {
        let mut registry = ConnectionRegistry::new();
        let mut approved = register(&mut registry, 1);
        let mut pending = register(&mut registry, 2);
        registry.approve(ConnectionId::new(1), "Ada");

        assert_eq!(registry.broadcast(&frame(b"fog")), 1);
        assert!(matches!(approved.try_recv(), Ok(Outbound::Frame(f)) if &*f == b"fog"));
        assert!(pending.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_survives_dead_writer() {
        let mut registry = ConnectionRegistry::new();
        let dead = register(&mut registry, 1);
        let mut alive = register(&mut registry, 2);
        registry.approve(ConnectionId::new(1), "Ada");
        registry.approve(ConnectionId::new(2), "Bo");
        drop(dead);

        assert_eq!(registry.broadcast(&frame(b"x")), 1);
        assert!(alive.try_recv().is_ok());
    }

    #[test]
    fn test_close_sends_close_and_removes() {
        let mut registry = ConnectionRegistry::new();
        let mut rx = register(&mut registry, 1);
        assert!(registry.send_to(ConnectionId::new(1), frame(b"bye")));
        registry.close(ConnectionId::new(1)).unwrap();

        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.unregister(ConnectionId::new(9)).is_none());
        assert!(!registry.approve(ConnectionId::new(9), "ghost"));
    }
}
