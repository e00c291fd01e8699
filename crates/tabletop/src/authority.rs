//! The authority: sole writer of the session document.
//!
//! One Tokio task owns everything mutable about a hosted session: the
//! [`SessionState`], the connection registry, the admission queue, the
//! snapshot archive and both lifecycle timers. The outside world talks
//! to it through an [`AuthorityHandle`] (commands with oneshot replies)
//! and hears back through [`Notice`]s.
//!
//! ```text
//!  acceptor task ──conn──┐
//!  reader tasks ──frame──┤
//!  AuthorityHandle ──cmd─┼──→ [ authority actor ] ──Outbound──→ writer tasks
//!  autosave tick ────────┤            │
//!  idle expiry ──────────┘            └──Notice──→ UI
//! ```
//!
//! Every event runs to completion before the next one is polled, so a
//! mutation is applied locally, then broadcast, then (if durable) saved,
//! with nothing interleaved.

use std::time::Duration;

use tabletop_persist::{
    AutosaveTimer, IdleTimer, KeyValueStore, PersistError, SnapshotArchive, export_session,
    import_session, unix_millis,
};
use tabletop_protocol::{Blob, CellKey, Codec, Envelope, GroupId, JsonCodec, Message, TokenId};
use tabletop_session::{
    AdmissionQueue, Authenticator, ConnectionRegistry, Frame, JoinRequest,
};
use tabletop_state::{Direction, FogBrush, Raster, SessionState};
use tabletop_transport::{
    Connection, ConnectionId, PeerId, PeerNetwork, Transport, TransportError,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{PeerEvent, spawn_peer};
use crate::{TabletopConfig, TabletopError};

/// Reason sent to refused guests.
pub const DENIAL_REASON: &str = "Join request denied";

/// Command channel size for the authority actor.
const COMMAND_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Public vocabulary
// ---------------------------------------------------------------------------

/// One authority-side edit of the document.
#[derive(Debug, Clone)]
pub enum Mutation {
    PaintCell { key: CellKey, image: Raster },
    ClearCell { key: CellKey },
    SetCellLock { key: CellKey, locked: bool },
    Navigate(Direction),
    CreateFogGroup { name: String },
    SwitchFogGroup(GroupId),
    DeleteFogGroup(GroupId),
    /// Stroke on the active fog group.
    PaintFog(FogBrush),
    ClearFogGroup(GroupId),
    ResetFogGroup(GroupId),
    CreateToken {
        glyph: String,
        color: String,
        owner: String,
    },
    RemoveStagingToken(TokenId),
    PlaceToken { id: TokenId, x: f64, y: f64 },
    MoveToken { id: TokenId, x: f64, y: f64 },
    RemoveToken(TokenId),
    ClearTokens,
    /// Drops an image onto the cursor cell.
    PlaceImage { src: Blob },
    ClearImages,
    SetZoom(f64),
    SetPan { x: f64, y: f64 },
    ResetView,
    ToggleGridSnap,
}

impl Mutation {
    /// Whether a successful edit should be captured right away rather
    /// than waiting for the next autosave tick.
    ///
    /// Freehand cell drawing and view changes are frequent and cheap to
    /// redo, so they ride on the autosave interval.
    pub fn is_durable(&self) -> bool {
        !matches!(
            self,
            Self::PaintCell { .. }
                | Self::ClearCell { .. }
                | Self::SetZoom(_)
                | Self::SetPan { .. }
                | Self::ResetView
        )
    }
}

/// What a [`Mutation`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Applied and queued for this many approved guests.
    Broadcast { recipients: usize },
    /// Applied; nothing to replicate.
    Local,
    /// The target did not exist; nothing changed.
    Unchanged,
    /// A staging token was created with this id.
    TokenCreated(TokenId),
    /// The cursor now sits on this cell.
    CursorMoved(CellKey),
    /// Grid snap is now on (`true`) or off.
    GridSnap(bool),
}

/// How a rejoin went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejoinOutcome {
    /// The previous identifier was free; guests can reach it as before.
    Resumed,
    /// The previous identifier was taken. The session now lives at
    /// `current`, which guests must learn out of band.
    Relocated { previous: PeerId, current: PeerId },
}

/// Events for the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    JoinRequested { requester_id: String, name: String },
    GuestJoined { conn_id: ConnectionId, name: String },
    GuestLeft { conn_id: ConnectionId, name: Option<String> },
    /// The idle window elapsed with nobody connected; the capture is gone.
    SnapshotEvicted { session_id: String },
    /// An imported document replaced the session state.
    StateRestored,
}

/// Read-only view of one registry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub display_name: Option<String>,
    pub approved: bool,
    pub connected_for: Duration,
}

/// A hosted session: its handle plus the notice stream.
pub struct Authority {
    pub handle: AuthorityHandle,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Creates or rejoins a hosted session.
///
/// ```rust,ignore
/// let authority = AuthorityBuilder::new(MemoryNetwork::new(), MemoryStore::new(), creds)
///     .config(TabletopConfig::default())
///     .create("gm", "secret")
///     .await?;
/// println!("room code: {}", authority.handle.session_id());
/// ```
pub struct AuthorityBuilder<N, S, A> {
    network: N,
    store: S,
    auth: A,
    config: TabletopConfig,
}

impl<N, S, A> AuthorityBuilder<N, S, A>
where
    N: PeerNetwork,
    S: KeyValueStore,
    A: Authenticator,
{
    pub fn new(network: N, store: S, auth: A) -> Self {
        Self {
            network,
            store,
            auth,
            config: TabletopConfig::default(),
        }
    }

    pub fn config(mut self, config: TabletopConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts a fresh session under a newly acquired identifier.
    pub async fn create(self, username: &str, password: &str) -> Result<Authority, TabletopError> {
        self.auth.authenticate(username, password).await?;
        let config = self.config.validated();

        let transport = self.network.open(None).await?;
        let state = SessionState::new(config.grid);
        tracing::info!(session_id = %transport.local_id(), "session created");
        Ok(spawn_authority(transport, self.store, config, state))
    }

    /// Restores a saved session and resumes hosting it.
    ///
    /// The capture must exist and be younger than the TTL. The session
    /// reopens under `session_id` when that identifier is free; when it
    /// is taken, under a fresh one, and the old capture is deleted.
    pub async fn rejoin(
        self,
        username: &str,
        password: &str,
        session_id: &str,
    ) -> Result<(Authority, RejoinOutcome), TabletopError> {
        self.auth.authenticate(username, password).await?;
        let config = self.config.validated();
        let archive = SnapshotArchive::new(self.store, &config.lifecycle);

        let persisted = archive
            .load(session_id, unix_millis())?
            .ok_or_else(|| TabletopError::SnapshotNotFound(session_id.to_owned()))?;
        let state = SessionState::restore(&persisted.snapshot, config.grid)?;

        let previous = PeerId::new(session_id);
        let (transport, outcome) = match self.network.open(Some(&previous)).await {
            Ok(transport) => (transport, RejoinOutcome::Resumed),
            Err(TransportError::Unavailable(_)) => {
                let transport = self.network.open(None).await?;
                let current = transport.local_id().clone();
                archive.delete(session_id)?;
                tracing::warn!(
                    %previous,
                    %current,
                    "session identifier unavailable, relocated"
                );
                (transport, RejoinOutcome::Relocated { previous, current })
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            session_id = %transport.local_id(),
            captured_at = persisted.timestamp,
            "session rejoined"
        );
        let authority = spawn_authority(transport, archive.into_store(), config, state);
        Ok((authority, outcome))
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Command {
    Mutate {
        mutation: Mutation,
        reply: oneshot::Sender<Result<Outcome, TabletopError>>,
    },
    Approve {
        requester_id: String,
        reply: oneshot::Sender<bool>,
    },
    Deny {
        requester_id: String,
        reply: oneshot::Sender<bool>,
    },
    PendingRequests {
        reply: oneshot::Sender<Vec<JoinRequest>>,
    },
    Connections {
        reply: oneshot::Sender<Vec<ConnectionSummary>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    Export {
        reply: oneshot::Sender<Result<String, TabletopError>>,
    },
    Import {
        document: String,
        reply: oneshot::Sender<Result<(), TabletopError>>,
    },
    Resync {
        reply: oneshot::Sender<usize>,
    },
    SaveNow {
        reply: oneshot::Sender<Result<(), TabletopError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to a running authority.
#[derive(Clone)]
pub struct AuthorityHandle {
    session_id: PeerId,
    sender: mpsc::Sender<Command>,
}

impl AuthorityHandle {
    /// The identifier guests connect to.
    pub fn session_id(&self) -> &PeerId {
        &self.session_id
    }

    /// Applies an edit, broadcasts it, and saves if it is durable.
    pub async fn mutate(&self, mutation: Mutation) -> Result<Outcome, TabletopError> {
        self.request(|reply| Command::Mutate { mutation, reply })
            .await?
    }

    /// Admits a pending requester. `false` if it was not pending.
    pub async fn approve(&self, requester_id: &str) -> Result<bool, TabletopError> {
        let requester_id = requester_id.to_owned();
        self.request(|reply| Command::Approve { requester_id, reply })
            .await
    }

    /// Refuses a pending requester and closes its channel.
    pub async fn deny(&self, requester_id: &str) -> Result<bool, TabletopError> {
        let requester_id = requester_id.to_owned();
        self.request(|reply| Command::Deny { requester_id, reply })
            .await
    }

    pub async fn pending_requests(&self) -> Result<Vec<JoinRequest>, TabletopError> {
        self.request(|reply| Command::PendingRequests { reply }).await
    }

    pub async fn connections(&self) -> Result<Vec<ConnectionSummary>, TabletopError> {
        self.request(|reply| Command::Connections { reply }).await
    }

    /// A copy of the current document.
    pub async fn state(&self) -> Result<SessionState, TabletopError> {
        self.request(|reply| Command::State { reply }).await
    }

    /// Renders the session as a standalone file.
    pub async fn export_session(&self) -> Result<String, TabletopError> {
        self.request(|reply| Command::Export { reply }).await?
    }

    /// Replaces the session from a file. On failure nothing changes.
    pub async fn import_session(&self, document: impl Into<String>) -> Result<(), TabletopError> {
        let document = document.into();
        self.request(|reply| Command::Import { document, reply })
            .await?
    }

    /// Sends the full document to every approved guest.
    pub async fn resync(&self) -> Result<usize, TabletopError> {
        self.request(|reply| Command::Resync { reply }).await
    }

    pub async fn save_now(&self) -> Result<(), TabletopError> {
        self.request(|reply| Command::SaveNow { reply }).await?
    }

    /// Saves, closes every connection and releases the identifier.
    pub async fn shutdown(&self) -> Result<(), TabletopError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TabletopError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| TabletopError::Stopped)?;
        reply_rx.await.map_err(|_| TabletopError::Stopped)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

fn spawn_authority<T, S>(
    transport: T,
    store: S,
    config: TabletopConfig,
    state: SessionState,
) -> Authority
where
    T: Transport,
    S: KeyValueStore,
{
    let session_id = transport.local_id().clone();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();

    let acceptor = tokio::spawn(accept_loop(transport, accepted_tx, stop_rx));

    let mut actor = AuthorityActor {
        session_id: session_id.to_string(),
        state,
        registry: ConnectionRegistry::new(),
        admission: AdmissionQueue::new(),
        archive: SnapshotArchive::new(store, &config.lifecycle),
        autosave: AutosaveTimer::new(config.lifecycle.autosave_interval),
        idle: IdleTimer::new(config.lifecycle.idle_eviction),
        evicted: false,
        seq: 0,
        codec: JsonCodec,
        commands: command_rx,
        accepted: accepted_rx,
        events: events_rx,
        events_tx,
        notices: notice_tx,
        stop_acceptor: Some(stop_tx),
        acceptor: Some(acceptor),
    };

    // Capture right away so a crash before the first tick can be rejoined.
    if let Err(e) = actor.save() {
        tracing::warn!(session_id = %actor.session_id, error = %e, "initial save failed");
    }
    actor.autosave.start();
    actor.idle.connections_changed(0);
    tokio::spawn(actor.run());

    Authority {
        handle: AuthorityHandle {
            session_id,
            sender: command_tx,
        },
        notices: notice_rx,
    }
}

/// Forwards accepted connections until told to stop, then releases the
/// identifier. Runs apart from the actor because an accept can be in the
/// middle of a handshake when the actor has other work.
async fn accept_loop<T: Transport>(
    mut transport: T,
    accepted: mpsc::UnboundedSender<T::Connection>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = transport.accept() => match result {
                Ok(conn) => {
                    if accepted.send(conn).is_err() {
                        break;
                    }
                }
                Err(TransportError::Shutdown) => break,
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            _ = &mut stop => break,
        }
    }
    if let Err(e) = transport.shutdown().await {
        tracing::debug!(error = %e, "transport shutdown failed");
    }
    tracing::debug!(peer_id = %transport.local_id(), "acceptor stopped");
}

struct AuthorityActor<C, S> {
    session_id: String,
    state: SessionState,
    registry: ConnectionRegistry,
    admission: AdmissionQueue,
    archive: SnapshotArchive<S>,
    autosave: AutosaveTimer,
    idle: IdleTimer,
    /// The idle window elapsed and the capture was deleted. Autosave is
    /// paused until a connection or an edit brings the session back.
    evicted: bool,
    /// Outbound envelope counter shared by every connection.
    seq: u64,
    codec: JsonCodec,
    commands: mpsc::Receiver<Command>,
    accepted: mpsc::UnboundedReceiver<C>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    notices: mpsc::UnboundedSender<Notice>,
    stop_acceptor: Option<oneshot::Sender<()>>,
    acceptor: Option<JoinHandle<()>>,
}

impl<C, S> AuthorityActor<C, S>
where
    C: Connection,
    S: KeyValueStore,
{
    async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "authority started");

        loop {
            tokio::select! {
                Some(conn) = self.accepted.recv() => self.on_accepted(conn),
                Some(event) = self.events.recv() => self.on_peer_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.on_command(command),
                    None => break,
                },
                _ = self.autosave.tick() => self.on_autosave(),
                _ = self.idle.expired() => self.on_idle_expired(),
            }
        }

        // Every handle dropped.
        self.teardown().await;
    }

    // -- connection lifecycle ------------------------------------------------

    fn on_accepted(&mut self, conn: C) {
        let conn_id = conn.id();
        let sender = spawn_peer(conn, self.events_tx.clone());
        if let Err(e) = self.registry.register(conn_id, sender) {
            tracing::warn!(%conn_id, error = %e, "dropping connection");
            return;
        }
        tracing::info!(%conn_id, connections = self.registry.len(), "guest connected");
        self.connections_changed();
        if self.evicted {
            self.resume();
        }
    }

    fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Frame { conn_id, data } => self.on_frame(conn_id, &data),
            PeerEvent::Closed { conn_id } => {
                let Some(record) = self.registry.unregister(conn_id) else {
                    return;
                };
                let withdrawn = self.admission.withdraw(conn_id);
                tracing::info!(
                    %conn_id,
                    withdrawn,
                    connections = self.registry.len(),
                    "guest disconnected"
                );
                if record.approved {
                    self.notify(Notice::GuestLeft {
                        conn_id,
                        name: record.display_name,
                    });
                }
                self.connections_changed();
            }
        }
    }

    fn on_frame(&mut self, conn_id: ConnectionId, data: &[u8]) {
        let envelope: Envelope = match self.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "undecodable frame dropped");
                return;
            }
        };

        if !envelope.message.is_guest_originated() {
            match envelope.message {
                Message::Unknown => tracing::debug!(%conn_id, "unknown message kind ignored"),
                other => tracing::warn!(
                    %conn_id,
                    kind = other.kind(),
                    "guest sent an authority-only message, dropped"
                ),
            }
            return;
        }
        let Message::JoinRequest { name, peer_id } = envelope.message else {
            return;
        };
        if self.registry.get(conn_id).is_some_and(|r| r.approved) {
            tracing::debug!(%conn_id, "join request from admitted guest ignored");
            return;
        }
        self.admission.submit(JoinRequest {
            requester_id: peer_id.clone(),
            requester_name: name.clone(),
            connection: conn_id,
            requested_at: std::time::Instant::now(),
        });
        self.notify(Notice::JoinRequested {
            requester_id: peer_id,
            name,
        });
    }

    fn connections_changed(&mut self) {
        self.idle.connections_changed(self.registry.len());
    }

    // -- commands -------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Mutate { mutation, reply } => {
                let _ = reply.send(self.mutate(mutation));
            }
            Command::Approve {
                requester_id,
                reply,
            } => {
                let _ = reply.send(self.approve(&requester_id));
            }
            Command::Deny {
                requester_id,
                reply,
            } => {
                let _ = reply.send(self.deny(&requester_id));
            }
            Command::PendingRequests { reply } => {
                let _ = reply.send(self.admission.pending().to_vec());
            }
            Command::Connections { reply } => {
                let summaries = self
                    .registry
                    .records()
                    .map(|r| ConnectionSummary {
                        id: r.id,
                        display_name: r.display_name.clone(),
                        approved: r.approved,
                        connected_for: r.connected_at.elapsed(),
                    })
                    .collect();
                let _ = reply.send(summaries);
            }
            Command::State { reply } => {
                let _ = reply.send(self.state.clone());
            }
            Command::Export { reply } => {
                let result = export_session(&self.state.snapshot(), unix_millis())
                    .map_err(TabletopError::from);
                let _ = reply.send(result);
            }
            Command::Import { document, reply } => {
                let _ = reply.send(self.import(&document));
            }
            Command::Resync { reply } => {
                let _ = reply.send(self.resync());
            }
            Command::SaveNow { reply } => {
                let _ = reply.send(self.save().map_err(TabletopError::from));
            }
            Command::Shutdown { reply } => {
                // The run loop intercepts shutdown before dispatching here.
                let _ = reply.send(());
            }
        }
    }

    fn mutate(&mut self, mutation: Mutation) -> Result<Outcome, TabletopError> {
        let durable = mutation.is_durable();
        let state = &mut self.state;

        let (message, outcome) = match mutation {
            Mutation::PaintCell { key, image } => (Some(state.paint_cell(key, image)?), None),
            Mutation::ClearCell { key } => match state.clear_cell(key)? {
                Some(message) => (Some(message), None),
                None => (None, Some(Outcome::Unchanged)),
            },
            Mutation::SetCellLock { key, locked } => (Some(state.set_cell_lock(key, locked)?), None),
            Mutation::Navigate(direction) => (None, Some(Outcome::CursorMoved(state.navigate(direction)))),
            Mutation::CreateFogGroup { name } => (Some(state.create_fog_group(&name)?), None),
            Mutation::SwitchFogGroup(id) => (Some(state.switch_fog_group(&id)?), None),
            Mutation::DeleteFogGroup(id) => (Some(state.delete_fog_group(&id)?), None),
            Mutation::PaintFog(brush) => (Some(state.paint_fog(brush)?), None),
            Mutation::ClearFogGroup(id) => (Some(state.clear_fog_group(&id)?), None),
            Mutation::ResetFogGroup(id) => (Some(state.reset_fog_group(&id)?), None),
            Mutation::CreateToken {
                glyph,
                color,
                owner,
            } => {
                let id = state.create_token(&glyph, &color, &owner);
                (None, Some(Outcome::TokenCreated(id)))
            }
            Mutation::RemoveStagingToken(id) => {
                let outcome = if state.remove_staging_token(id) {
                    Outcome::Local
                } else {
                    Outcome::Unchanged
                };
                (None, Some(outcome))
            }
            Mutation::PlaceToken { id, x, y } => (Some(state.place_token(id, x, y)?), None),
            Mutation::MoveToken { id, x, y } => match state.move_token(id, x, y) {
                Some(message) => (Some(message), None),
                None => (None, Some(Outcome::Unchanged)),
            },
            Mutation::RemoveToken(id) => match state.remove_token(id) {
                Some(message) => (Some(message), None),
                None => (None, Some(Outcome::Unchanged)),
            },
            Mutation::ClearTokens => (Some(state.clear_tokens()), None),
            Mutation::PlaceImage { src } => (Some(state.place_image(src)), None),
            Mutation::ClearImages => (Some(state.clear_images()), None),
            Mutation::SetZoom(zoom) => (Some(state.set_zoom(zoom)), None),
            Mutation::SetPan { x, y } => (Some(state.set_pan(x, y)), None),
            Mutation::ResetView => (Some(state.reset_view()), None),
            Mutation::ToggleGridSnap => (None, Some(Outcome::GridSnap(state.toggle_grid_snap()))),
        };

        if outcome == Some(Outcome::Unchanged) {
            return Ok(Outcome::Unchanged);
        }

        let outcome = match message {
            Some(message) => {
                tracing::debug!(kind = message.kind(), "broadcasting mutation");
                let recipients = self.broadcast(message)?;
                outcome.unwrap_or(Outcome::Broadcast { recipients })
            }
            None => outcome.unwrap_or(Outcome::Local),
        };

        if self.evicted {
            self.resume();
        } else if durable {
            self.save_logged();
        }
        Ok(outcome)
    }

    fn approve(&mut self, requester_id: &str) -> bool {
        let Some(request) = self
            .admission
            .pending()
            .iter()
            .find(|r| r.requester_id == requester_id)
        else {
            tracing::debug!(requester_id, "approve for unknown requester ignored");
            return false;
        };
        let name = request.requester_name.clone();
        let welcome = match self.encode(Message::JoinApproved {
            name,
            snapshot: Box::new(self.state.snapshot()),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(requester_id, error = %e, "could not encode join snapshot");
                return false;
            }
        };

        let Some(request) = self
            .admission
            .approve(requester_id, &mut self.registry, |_| welcome)
        else {
            return false;
        };
        self.notify(Notice::GuestJoined {
            conn_id: request.connection,
            name: request.requester_name,
        });
        true
    }

    fn deny(&mut self, requester_id: &str) -> bool {
        let farewell = match self.encode(Message::JoinDenied {
            reason: DENIAL_REASON.to_owned(),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(requester_id, error = %e, "could not encode denial");
                return false;
            }
        };
        let denied = self
            .admission
            .deny(requester_id, &mut self.registry, farewell)
            .is_some();
        if denied {
            self.connections_changed();
        }
        denied
    }

    fn import(&mut self, document: &str) -> Result<(), TabletopError> {
        let export = import_session(document)?;
        self.state.replace_from(&export.snapshot)?;
        tracing::info!(session_id = %self.session_id, "session imported");

        let recipients = self.resync();
        tracing::debug!(recipients, "import pushed to guests");
        self.save()?;
        self.notify(Notice::StateRestored);
        Ok(())
    }

    fn resync(&mut self) -> usize {
        let sync = Message::FullStateSync {
            snapshot: Box::new(self.state.snapshot()),
        };
        match self.broadcast(sync) {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!(error = %e, "could not encode full state sync");
                0
            }
        }
    }

    // -- lifecycle -----------------------------------------------------------

    fn on_autosave(&mut self) {
        tracing::trace!(session_id = %self.session_id, "autosave");
        self.save_logged();
    }

    fn on_idle_expired(&mut self) {
        if !self.registry.is_empty() {
            return;
        }
        match self.archive.delete(&self.session_id) {
            Ok(()) => {
                tracing::info!(session_id = %self.session_id, "idle session evicted");
                self.evicted = true;
                self.autosave.stop();
                self.notify(Notice::SnapshotEvicted {
                    session_id: self.session_id.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "eviction failed");
            }
        }
    }

    /// Brings an evicted session back: capture now, restart autosave.
    /// With nobody connected the idle window starts over, since the
    /// timer disarmed itself when it fired.
    fn resume(&mut self) {
        self.evicted = false;
        self.save_logged();
        self.autosave.start();
        if self.registry.is_empty() {
            self.idle.arm();
        }
        tracing::info!(session_id = %self.session_id, "session capture resumed");
    }

    async fn teardown(&mut self) {
        if !self.evicted {
            self.save_logged();
        }
        self.autosave.stop();
        self.idle.disarm();
        self.registry.close_all();
        if let Some(stop) = self.stop_acceptor.take() {
            let _ = stop.send(());
        }
        if let Some(acceptor) = self.acceptor.take() {
            if let Err(e) = acceptor.await {
                tracing::debug!(error = %e, "acceptor task failed");
            }
        }
        tracing::info!(session_id = %self.session_id, "authority stopped");
    }

    fn save(&self) -> Result<(), PersistError> {
        self.archive
            .save(&self.session_id, &self.state.snapshot(), unix_millis())
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(session_id = %self.session_id, error = %e, "save failed");
        }
    }

    // -- wire ------------------------------------------------------------------

    fn encode(&mut self, message: Message) -> Result<Frame, TabletopError> {
        self.seq += 1;
        let envelope = Envelope::new(self.seq, unix_millis(), message);
        let bytes = self.codec.encode(&envelope)?;
        Ok(Frame::from(bytes))
    }

    fn broadcast(&mut self, message: Message) -> Result<usize, TabletopError> {
        let frame = self.encode(message)?;
        Ok(self.registry.broadcast(&frame))
    }

    fn notify(&self, notice: Notice) {
        // The UI may not be listening; notices are advisory.
        let _ = self.notices.send(notice);
    }
}
