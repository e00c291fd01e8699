//! The guest: a read-only projection of an authority's document.
//!
//! [`join`] dials the room code, asks to be admitted and waits. Once the
//! authority approves, the join snapshot is restored on the blocking pool
//! and a guest actor takes over the connection. It merges every
//! authority message into a [`Replica`] and runs raster decodes in a
//! [`JoinSet`] so the channel keeps draining while they work.

use tabletop_protocol::{Codec, Envelope, JsonCodec, Message};
use tabletop_session::{Outbound, PeerSender};
use tabletop_state::{DecodedBatch, GridConfig, PendingDecode, Receipt, Replica, SessionState};
use tabletop_transport::{PeerId, PeerNetwork};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::TabletopError;
use crate::connection::{PeerEvent, spawn_peer};

/// Events for the guest's UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestNotice {
    /// A message was merged into the replica.
    Updated { kind: &'static str },
    /// A full state sync finished loading.
    Resynced,
    /// The authority closed the channel or went away.
    Disconnected,
}

/// An admitted guest: its handle plus the notice stream.
pub struct Guest {
    pub handle: GuestHandle,
    pub notices: mpsc::UnboundedReceiver<GuestNotice>,
}

enum GuestCommand {
    State { reply: oneshot::Sender<SessionState> },
    Leave { reply: oneshot::Sender<()> },
}

/// Cheap, cloneable handle to a running guest.
#[derive(Clone)]
pub struct GuestHandle {
    peer_id: PeerId,
    sender: mpsc::Sender<GuestCommand>,
}

impl GuestHandle {
    /// The identifier this guest reported in its join request.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// A copy of the replica as merged so far.
    pub async fn state(&self) -> Result<SessionState, TabletopError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(GuestCommand::State { reply })
            .await
            .map_err(|_| TabletopError::Stopped)?;
        rx.await.map_err(|_| TabletopError::Stopped)
    }

    /// Closes the channel to the authority and stops the guest.
    pub async fn leave(&self) -> Result<(), TabletopError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(GuestCommand::Leave { reply })
            .await
            .map_err(|_| TabletopError::Stopped)?;
        rx.await.map_err(|_| TabletopError::Stopped)
    }
}

/// Connects to `room_code` and waits for the authority's decision.
///
/// Resolves once admitted, with the join snapshot already loaded. A
/// denial comes back as [`TabletopError::JoinDenied`]; a channel that
/// closes first as [`TabletopError::Handshake`]. Either way the guest is
/// back where it started. There is no timeout: admission waits on a
/// person, so callers that want one wrap this in `tokio::time::timeout`.
pub async fn join<N: PeerNetwork>(
    network: &N,
    room_code: &PeerId,
    name: &str,
    grid: GridConfig,
) -> Result<Guest, TabletopError> {
    let grid = grid.validated();
    let codec = JsonCodec;
    let peer_id = PeerId::random();

    let conn = network.connect(room_code).await?;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let outbound = spawn_peer(conn, events_tx);

    let request = Envelope::new(
        1,
        tabletop_persist::unix_millis(),
        Message::JoinRequest {
            name: name.to_owned(),
            peer_id: peer_id.to_string(),
        },
    );
    let frame = codec.encode(&request)?;
    outbound
        .send(Outbound::Frame(frame.into()))
        .map_err(|_| TabletopError::Handshake("connection closed before the join request".into()))?;
    tracing::info!(%room_code, %peer_id, name, "join requested");

    let (seq, snapshot) = loop {
        let Some(event) = events.recv().await else {
            return Err(TabletopError::Handshake("connection lost".into()));
        };
        let data = match event {
            PeerEvent::Frame { data, .. } => data,
            PeerEvent::Closed { .. } => {
                return Err(TabletopError::Handshake(
                    "authority closed the connection before answering".into(),
                ));
            }
        };
        let envelope: Envelope = match codec.decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable frame while waiting for admission");
                continue;
            }
        };
        match envelope.message {
            Message::JoinApproved { snapshot, .. } => break (envelope.seq, snapshot),
            Message::JoinDenied { reason } => {
                tracing::info!(%room_code, %reason, "join denied");
                return Err(TabletopError::JoinDenied(reason));
            }
            other => {
                tracing::debug!(kind = other.kind(), "message before admission ignored");
            }
        }
    };

    let state = tokio::task::spawn_blocking(move || SessionState::restore(&snapshot, grid))
        .await
        .map_err(|e| TabletopError::Handshake(format!("snapshot load aborted: {e}")))??;
    tracing::info!(%room_code, %peer_id, "joined session");

    let (command_tx, command_rx) = mpsc::channel(16);
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let actor = GuestActor {
        replica: Replica::new(state, seq),
        events,
        outbound,
        commands: command_rx,
        decodes: JoinSet::new(),
        notices: notice_tx,
        codec,
    };
    tokio::spawn(actor.run());

    Ok(Guest {
        handle: GuestHandle {
            peer_id,
            sender: command_tx,
        },
        notices: notice_rx,
    })
}

struct GuestActor {
    replica: Replica,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    outbound: PeerSender,
    commands: mpsc::Receiver<GuestCommand>,
    decodes: JoinSet<DecodedBatch>,
    notices: mpsc::UnboundedSender<GuestNotice>,
    codec: JsonCodec,
}

impl GuestActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(PeerEvent::Frame { data, .. }) => self.on_frame(&data),
                    Some(PeerEvent::Closed { .. }) | None => {
                        tracing::info!("authority connection closed");
                        let _ = self.notices.send(GuestNotice::Disconnected);
                        break;
                    }
                },
                Some(joined) = self.decodes.join_next() => match joined {
                    Ok(batch) => self.on_decoded(batch),
                    Err(e) => tracing::warn!(error = %e, "decode task failed"),
                },
                command = self.commands.recv() => match command {
                    Some(GuestCommand::State { reply }) => {
                        let _ = reply.send(self.replica.state().clone());
                    }
                    Some(GuestCommand::Leave { reply }) => {
                        let _ = self.outbound.send(Outbound::Close);
                        let _ = reply.send(());
                        break;
                    }
                    None => break,
                },
            }
        }
        self.decodes.abort_all();
        tracing::debug!("guest stopped");
    }

    fn on_frame(&mut self, data: &[u8]) {
        let envelope: Envelope = match self.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable frame dropped");
                return;
            }
        };
        let kind = envelope.message.kind();
        tracing::trace!(seq = envelope.seq, kind, "authority message");

        match self.replica.receive(envelope.seq, envelope.message) {
            Receipt::Applied => {
                let _ = self.notices.send(GuestNotice::Updated { kind });
            }
            Receipt::Deferred(pending) => self.spawn_decode(pending),
            Receipt::Queued => {}
            Receipt::Denied(reason) => {
                tracing::debug!(%reason, "denial after admission ignored");
            }
            Receipt::Ignored => {
                tracing::debug!(kind, "message not applicable to a guest");
            }
        }
    }

    fn on_decoded(&mut self, batch: DecodedBatch) {
        let was_loading = self.replica.is_loading();
        for pending in self.replica.complete(batch) {
            self.spawn_decode(pending);
        }
        if was_loading && !self.replica.is_loading() {
            let _ = self.notices.send(GuestNotice::Resynced);
        } else {
            let _ = self.notices.send(GuestNotice::Updated { kind: "decoded" });
        }
    }

    fn spawn_decode(&mut self, pending: PendingDecode) {
        tracing::trace!(seq = pending.seq(), "decode queued");
        self.decodes.spawn_blocking(move || pending.decode());
    }
}
