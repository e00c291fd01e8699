//! Per-connection reader and writer tasks.
//!
//! Each live channel gets two tasks. The reader forwards inbound frames
//! to the owning actor as [`PeerEvent`]s and reports the close. The
//! writer drains the connection's outbound queue, so the actor never
//! awaits a send.

use std::sync::Arc;

use tabletop_session::{Outbound, PeerSender};
use tabletop_transport::{Connection, ConnectionId};
use tokio::sync::mpsc;

/// Something that happened on a connection.
#[derive(Debug)]
pub(crate) enum PeerEvent {
    Frame { conn_id: ConnectionId, data: Vec<u8> },
    Closed { conn_id: ConnectionId },
}

/// Spawns the reader and writer for `conn` and returns its outbound queue.
///
/// Dropping every clone of the returned sender, or queueing
/// [`Outbound::Close`], closes the connection after pending frames.
pub(crate) fn spawn_peer<C: Connection>(
    conn: C,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> PeerSender {
    let conn = Arc::new(conn);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(Arc::clone(&conn), rx));
    tokio::spawn(read_loop(conn, events));
    tx
}

async fn read_loop<C: Connection>(conn: Arc<C>, events: mpsc::UnboundedSender<PeerEvent>) {
    let conn_id = conn.id();
    loop {
        match conn.recv().await {
            Ok(Some(data)) => {
                tracing::trace!(%conn_id, bytes = data.len(), "frame received");
                if events.send(PeerEvent::Frame { conn_id, data }).is_err() {
                    // Owner is gone; nobody is listening.
                    return;
                }
            }
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed by peer");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        }
    }
    let _ = events.send(PeerEvent::Closed { conn_id });
}

async fn write_loop<C: Connection>(conn: Arc<C>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let conn_id = conn.id();
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Frame(frame) => {
                if let Err(e) = conn.send(&frame).await {
                    tracing::debug!(%conn_id, error = %e, "send failed, frame dropped");
                }
            }
            Outbound::Close => break,
        }
    }
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
}

#[cfg(test)]
mod tests {
    use tabletop_transport::{MemoryNetwork, PeerNetwork, Transport};

    use super::*;

    #[tokio::test]
    async fn test_reader_forwards_frames_then_close() {
        let network = MemoryNetwork::new();
        let mut transport = network.open(None).await.unwrap();
        let remote = network.connect(transport.local_id()).await.unwrap();
        let local = transport.accept().await.unwrap();
        let local_id = local.id();

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let _queue = spawn_peer(local, events_tx);

        remote.send(b"hello").await.unwrap();
        remote.close().await.unwrap();
        drop(remote);

        match events.recv().await.unwrap() {
            PeerEvent::Frame { conn_id, data } => {
                assert_eq!(conn_id, local_id);
                assert_eq!(data, b"hello");
            }
            other => panic!("expected frame, got {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            PeerEvent::Closed { conn_id } if conn_id == local_id
        ));
    }

    #[tokio::test]
    async fn test_writer_flushes_queue_before_close() {
        let network = MemoryNetwork::new();
        let mut transport = network.open(None).await.unwrap();
        let remote = network.connect(transport.local_id()).await.unwrap();
        let local = transport.accept().await.unwrap();

        let (events_tx, _events) = mpsc::unbounded_channel();
        let queue = spawn_peer(local, events_tx);
        queue.send(Outbound::Frame(Arc::from(&b"one"[..]))).unwrap();
        queue.send(Outbound::Frame(Arc::from(&b"two"[..]))).unwrap();
        queue.send(Outbound::Close).unwrap();

        assert_eq!(remote.recv().await.unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(remote.recv().await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(remote.recv().await.unwrap(), None);
    }
}
