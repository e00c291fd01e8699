//! Admission control: pending join requests and their resolution.
//!
//! ```text
//! submit() ──→ [Requested] ──→ approve() ──→ record approved, snapshot sent
//!                    │
//!                    └───────→ deny() ────→ denial sent, channel closed
//! ```
//!
//! Both outcomes are terminal and remove the request. Resolving an id
//! that is not pending does nothing.
//!
//! A repeat request from the same requester id, or over the same
//! connection, replaces the earlier entry in place, so one guest never
//! shows up twice in the queue.

use std::time::Instant;

use tabletop_transport::ConnectionId;

use crate::{ConnectionRegistry, Frame};

/// A guest waiting to be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Identifier the guest reported for itself.
    pub requester_id: String,
    pub requester_name: String,
    /// Channel the request arrived on.
    pub connection: ConnectionId,
    pub requested_at: Instant,
}

/// Outcome of [`AdmissionQueue::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    New,
    /// An earlier request from the same requester was replaced.
    Replaced,
}

/// Pending join requests in arrival order.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    pending: Vec<JoinRequest>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a request, replacing any pending one from the same requester
    /// or the same connection.
    pub fn submit(&mut self, request: JoinRequest) -> Submitted {
        tracing::info!(
            requester_id = %request.requester_id,
            name = %request.requester_name,
            conn_id = %request.connection,
            "join requested"
        );
        let same = |r: &JoinRequest| {
            r.requester_id == request.requester_id || r.connection == request.connection
        };
        match self.pending.iter().position(same) {
            Some(index) => {
                // A request can collide with two entries (one per key); keep
                // only the first slot.
                let mut position = 0;
                self.pending.retain(|r| {
                    let keep = position <= index || !same(r);
                    position += 1;
                    keep
                });
                self.pending[index] = request;
                Submitted::Replaced
            }
            None => {
                self.pending.push(request);
                Submitted::New
            }
        }
    }

    pub fn pending(&self) -> &[JoinRequest] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Admits a requester.
    ///
    /// Marks the requester's connection approved, binds its display name
    /// and sends it the frame `welcome` builds (the full snapshot). The
    /// frame is only built when the request is actually pending.
    pub fn approve(
        &mut self,
        requester_id: &str,
        registry: &mut ConnectionRegistry,
        welcome: impl FnOnce(&JoinRequest) -> Frame,
    ) -> Option<JoinRequest> {
        let request = self.take(requester_id)?;
        if !registry.approve(request.connection, &request.requester_name) {
            tracing::debug!(requester_id, "requester left before approval");
            return None;
        }
        registry.send_to(request.connection, welcome(&request));
        tracing::info!(
            requester_id,
            name = %request.requester_name,
            approved = registry.approved_count(),
            "guest admitted"
        );
        Some(request)
    }

    /// Refuses a requester: sends `farewell`, then closes its channel.
    pub fn deny(
        &mut self,
        requester_id: &str,
        registry: &mut ConnectionRegistry,
        farewell: Frame,
    ) -> Option<JoinRequest> {
        let request = self.take(requester_id)?;
        registry.send_to(request.connection, farewell);
        registry.close(request.connection);
        tracing::info!(requester_id, name = %request.requester_name, "guest denied");
        Some(request)
    }

    /// Drops requests that arrived on a channel which has since closed.
    pub fn withdraw(&mut self, connection: ConnectionId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| r.connection != connection);
        before - self.pending.len()
    }

    fn take(&mut self, requester_id: &str) -> Option<JoinRequest> {
        let index = self
            .pending
            .iter()
            .position(|r| r.requester_id == requester_id)?;
        Some(self.pending.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::Outbound;

    fn request(requester: &str, conn: u64) -> JoinRequest {
        JoinRequest {
            requester_id: requester.into(),
            requester_name: format!("name-{requester}"),
            connection: ConnectionId::new(conn),
            requested_at: Instant::now(),
        }
    }

    fn setup() -> (
        AdmissionQueue,
        ConnectionRegistry,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let mut registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(ConnectionId::new(1), tx).unwrap();
        let mut queue = AdmissionQueue::new();
        queue.submit(request("g1", 1));
        (queue, registry, rx)
    }

    #[test]
    fn test_approve_flips_flag_and_sends_welcome_once() {
        let (mut queue, mut registry, mut rx) = setup();

        let approved = queue
            .approve("g1", &mut registry, |_| Arc::from(&b"snapshot"[..]))
            .unwrap();
        assert_eq!(approved.requester_id, "g1");
        assert!(queue.is_empty());

        let record = registry.get(ConnectionId::new(1)).unwrap();
        assert!(record.approved);
        assert_eq!(record.display_name.as_deref(), Some("name-g1"));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(f)) if &*f == b"snapshot"));

        // Second approval is a no-op.
        let mut built = false;
        assert!(
            queue
                .approve("g1", &mut registry, |_| {
                    built = true;
                    Arc::from(&b""[..])
                })
                .is_none()
        );
        assert!(!built);
    }

    #[test]
    fn test_deny_sends_reason_closes_and_never_approves() {
        let (mut queue, mut registry, mut rx) = setup();

        queue
            .deny("g1", &mut registry, Arc::from(&b"denied"[..]))
            .unwrap();
        assert!(queue.is_empty());
        assert!(registry.get(ConnectionId::new(1)).is_none());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
    }

    #[test]
    fn test_resolving_unknown_requester_keeps_queue() {
        let (mut queue, mut registry, _rx) = setup();
        assert!(queue.approve("nobody", &mut registry, |_| Arc::from(&b""[..])).is_none());
        assert!(queue.deny("nobody", &mut registry, Arc::from(&b""[..])).is_none());
        assert_eq!(queue.len(), 1);
        assert!(!registry.get(ConnectionId::new(1)).unwrap().approved);
    }

    #[test]
    fn test_repeat_request_replaces_in_place() {
        let mut queue = AdmissionQueue::new();
        assert_eq!(queue.submit(request("g1", 1)), Submitted::New);
        assert_eq!(queue.submit(request("g2", 2)), Submitted::New);
        assert_eq!(queue.submit(request("g1", 3)), Submitted::Replaced);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending()[0].connection, ConnectionId::new(3));
    }

    #[test]
    fn test_repeat_request_on_same_connection_replaces_in_place() {
        let mut queue = AdmissionQueue::new();
        assert_eq!(queue.submit(request("g1", 1)), Submitted::New);
        assert_eq!(queue.submit(request("g2", 2)), Submitted::New);
        assert_eq!(queue.submit(request("g1-renamed", 1)), Submitted::Replaced);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending()[0].requester_id, "g1-renamed");
        assert_eq!(queue.pending()[1].requester_id, "g2");
    }

    #[test]
    fn test_request_matching_two_entries_collapses_them() {
        let mut queue = AdmissionQueue::new();
        queue.submit(request("g1", 1));
        queue.submit(request("g2", 2));
        // Same requester as the first entry, same channel as the second.
        assert_eq!(queue.submit(request("g1", 2)), Submitted::Replaced);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending()[0].connection, ConnectionId::new(2));
    }

    #[test]
    fn test_one_connection_is_welcomed_once() {
        let (mut queue, mut registry, mut rx) = setup();
        queue.submit(request("g1-again", 1));
        assert_eq!(queue.len(), 1);

        assert!(queue.approve("g1", &mut registry, |_| Arc::from(&b"x"[..])).is_none());
        assert!(
            queue
                .approve("g1-again", &mut registry, |_| Arc::from(&b"snapshot"[..]))
                .is_some()
        );
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(f)) if &*f == b"snapshot"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_withdraw_drops_requests_from_closed_channel() {
        let mut queue = AdmissionQueue::new();
        queue.submit(request("g1", 1));
        queue.submit(request("g2", 2));
        assert_eq!(queue.withdraw(ConnectionId::new(1)), 1);
        assert_eq!(queue.pending()[0].requester_id, "g2");
    }
}
