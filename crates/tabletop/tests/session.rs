//! End-to-end tests for hosting, admission, replication and rejoin over
//! the in-memory network.

use std::time::Duration;

use tabletop::persist::{SnapshotArchive, export_session, unix_millis};
use tabletop::prelude::*;
use tabletop::protocol::{Codec, Envelope, JsonCodec};
use tabletop::state::CELL_CHANNELS;
use tabletop::transport::{Connection, MemoryConnection};
use tabletop::{DENIAL_REASON, persist::PersistError};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

// =========================================================================
// Helpers
// =========================================================================

const USER: &str = "gm";
const PASS: &str = "secret";
const MINUTE_MS: u64 = 60_000;

fn grid() -> GridConfig {
    GridConfig {
        grid_size: 3,
        cell_size: 8,
    }
}

fn builder(
    network: &MemoryNetwork,
    store: &MemoryStore,
) -> AuthorityBuilder<MemoryNetwork, MemoryStore, StaticCredentials> {
    AuthorityBuilder::new(
        network.clone(),
        store.clone(),
        StaticCredentials::new(USER, PASS),
    )
    .config(TabletopConfig {
        grid: grid(),
        lifecycle: LifecycleConfig::default(),
    })
}

async fn wait_for(
    notices: &mut mpsc::UnboundedReceiver<Notice>,
    matches: impl Fn(&Notice) -> bool,
) -> Notice {
    loop {
        let notice = timeout(Duration::from_secs(5), notices.recv())
            .await
            .expect("timed out waiting for notice")
            .expect("notice channel closed");
        if matches(&notice) {
            return notice;
        }
    }
}

async fn next_join_request(notices: &mut mpsc::UnboundedReceiver<Notice>) -> String {
    match wait_for(notices, |n| matches!(n, Notice::JoinRequested { .. })).await {
        Notice::JoinRequested { requester_id, .. } => requester_id,
        _ => unreachable!(),
    }
}

/// Runs a guest join and approves it from the authority side.
async fn admit(network: &MemoryNetwork, authority: &mut Authority, name: &str) -> Guest {
    let room = authority.handle.session_id().clone();
    let net = network.clone();
    let name = name.to_owned();
    let pending = tokio::spawn(async move { join(&net, &room, &name, grid()).await });

    let requester = next_join_request(&mut authority.notices).await;
    assert!(authority.handle.approve(&requester).await.unwrap());
    timeout(Duration::from_secs(5), pending)
        .await
        .expect("join timed out")
        .unwrap()
        .unwrap()
}

/// Polls the guest's replica until `done` holds.
async fn eventually(guest: &GuestHandle, done: impl Fn(&SessionState) -> bool) -> SessionState {
    for _ in 0..200 {
        let state = guest.state().await.unwrap();
        if done(&state) {
            return state;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("guest replica never converged");
}

/// Opens a bare connection and sends a join request on it.
async fn raw_request(network: &MemoryNetwork, room: &PeerId, requester: &str) -> MemoryConnection {
    let conn = network.connect(room).await.unwrap();
    let frame = JsonCodec
        .encode(&Envelope::new(
            1,
            0,
            Message::JoinRequest {
                name: "Raw".into(),
                peer_id: requester.into(),
            },
        ))
        .unwrap();
    conn.send(&frame).await.unwrap();
    conn
}

async fn recv_message(conn: &MemoryConnection) -> Message {
    let data = timeout(Duration::from_secs(5), conn.recv())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .expect("connection closed");
    let envelope: Envelope = JsonCodec.decode(&data).unwrap();
    envelope.message
}

// =========================================================================
// Admission
// =========================================================================

#[tokio::test]
async fn test_late_guest_first_message_is_full_snapshot() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let handle = authority.handle.clone();

    let key = CellKey::new(1, 1);
    handle
        .mutate(Mutation::PaintCell {
            key,
            image: Raster::filled(8, 8, CELL_CHANNELS, 200),
        })
        .await
        .unwrap();
    handle
        .mutate(Mutation::SetCellLock { key, locked: true })
        .await
        .unwrap();
    let Outcome::TokenCreated(token_id) = handle
        .mutate(Mutation::CreateToken {
            glyph: "A".into(),
            color: "#ff0000".into(),
            owner: "Ada".into(),
        })
        .await
        .unwrap()
    else {
        panic!("expected a new token id");
    };
    handle
        .mutate(Mutation::PlaceToken {
            id: token_id,
            x: 3.0,
            y: 3.0,
        })
        .await
        .unwrap();

    let conn = raw_request(&network, handle.session_id(), "raw-1").await;
    assert_eq!(next_join_request(&mut authority.notices).await, "raw-1");
    assert!(handle.approve("raw-1").await.unwrap());

    match recv_message(&conn).await {
        Message::JoinApproved { name, snapshot } => {
            assert_eq!(name, "Raw");
            assert!(snapshot.grid_cells.contains_key(&key));
            assert_eq!(snapshot.locked_cells.get(&key), Some(&true));
            assert_eq!(snapshot.placed_tokens.len(), 1);
            assert_eq!(snapshot.placed_tokens[0].id, token_id);
            assert!(snapshot.staging_tokens.is_empty());
        }
        other => panic!("expected JoinApproved first, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unapproved_connection_gets_no_traffic() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();

    let conn = raw_request(&network, authority.handle.session_id(), "lurker").await;
    next_join_request(&mut authority.notices).await;
    let outcome = authority
        .handle
        .mutate(Mutation::SetZoom(2.0))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Broadcast { recipients: 0 });
    assert!(
        timeout(Duration::from_millis(50), conn.recv()).await.is_err(),
        "pending guest must not receive state"
    );
}

#[tokio::test]
async fn test_guest_edits_are_dropped() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let handle = authority.handle.clone();

    let Outcome::TokenCreated(id) = handle
        .mutate(Mutation::CreateToken {
            glyph: "K".into(),
            color: "#0000ff".into(),
            owner: "Ada".into(),
        })
        .await
        .unwrap()
    else {
        panic!("expected a new token id");
    };
    handle
        .mutate(Mutation::PlaceToken { id, x: 1.0, y: 1.0 })
        .await
        .unwrap();
    let before = handle.state().await.unwrap();

    let admitted = raw_request(&network, handle.session_id(), "raw-ok").await;
    next_join_request(&mut authority.notices).await;
    assert!(handle.approve("raw-ok").await.unwrap());
    assert!(matches!(recv_message(&admitted).await, Message::JoinApproved { .. }));
    let pending = raw_request(&network, handle.session_id(), "raw-wait").await;
    next_join_request(&mut authority.notices).await;

    for (seq, message) in [
        (2, Message::ClearTokens),
        (3, Message::TokenRemove { token_id: id }),
        (4, Message::ClearImages),
    ] {
        let frame = JsonCodec.encode(&Envelope::new(seq, 0, message)).unwrap();
        admitted.send(&frame).await.unwrap();
        pending.send(&frame).await.unwrap();
    }
    sleep(Duration::from_millis(50)).await;

    let after = handle.state().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.placed_tokens().len(), 1);
    assert_eq!(after.placed_tokens()[0].id, id);
    assert!(
        timeout(Duration::from_millis(50), admitted.recv()).await.is_err(),
        "nothing is rebroadcast for a dropped edit"
    );
}

#[tokio::test]
async fn test_deny_sends_reason_then_closes() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();

    let conn = raw_request(&network, authority.handle.session_id(), "raw-2").await;
    next_join_request(&mut authority.notices).await;
    assert!(authority.handle.deny("raw-2").await.unwrap());

    match recv_message(&conn).await {
        Message::JoinDenied { reason } => assert_eq!(reason, DENIAL_REASON),
        other => panic!("expected JoinDenied, got {other:?}"),
    }
    let closed = timeout(Duration::from_secs(5), conn.recv()).await.unwrap().unwrap();
    assert_eq!(closed, None);

    assert!(authority.handle.pending_requests().await.unwrap().is_empty());
    assert!(authority.handle.connections().await.unwrap().is_empty());
    // Resolving again is a silent no-op.
    assert!(!authority.handle.deny("raw-2").await.unwrap());
    assert!(!authority.handle.approve("raw-2").await.unwrap());
}

#[tokio::test]
async fn test_denied_guest_gets_join_denied_error() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();

    let room = authority.handle.session_id().clone();
    let net = network.clone();
    let pending = tokio::spawn(async move { join(&net, &room, "Bo", grid()).await });
    let requester = next_join_request(&mut authority.notices).await;
    authority.handle.deny(&requester).await.unwrap();

    let Err(err) = pending.await.unwrap() else {
        panic!("join should have been denied");
    };
    assert!(matches!(err, TabletopError::JoinDenied(reason) if reason == DENIAL_REASON));
}

#[tokio::test]
async fn test_repeat_request_replaces_pending_entry() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let room = authority.handle.session_id().clone();

    let _first = raw_request(&network, &room, "same").await;
    next_join_request(&mut authority.notices).await;
    let second = raw_request(&network, &room, "same").await;
    next_join_request(&mut authority.notices).await;

    let pending = authority.handle.pending_requests().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].connection, authority.handle.connections().await.unwrap()[1].id);

    authority.handle.approve("same").await.unwrap();
    assert!(matches!(recv_message(&second).await, Message::JoinApproved { .. }));
}

// =========================================================================
// Replication
// =========================================================================

#[tokio::test]
async fn test_guest_replica_converges_with_authority() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let guest = admit(&network, &mut authority, "Ada").await;
    let handle = authority.handle.clone();

    handle
        .mutate(Mutation::PaintCell {
            key: CellKey::new(0, 2),
            image: Raster::filled(8, 8, CELL_CHANNELS, 7),
        })
        .await
        .unwrap();
    handle
        .mutate(Mutation::CreateFogGroup {
            name: "Night Watch".into(),
        })
        .await
        .unwrap();
    handle
        .mutate(Mutation::PaintFog(FogBrush {
            x: 12.0,
            y: 12.0,
            radius: 4.0,
            mode: BrushMode::Reveal,
        }))
        .await
        .unwrap();
    handle
        .mutate(Mutation::SetCellLock {
            key: CellKey::new(2, 2),
            locked: true,
        })
        .await
        .unwrap();
    let Outcome::TokenCreated(id) = handle
        .mutate(Mutation::CreateToken {
            glyph: "G".into(),
            color: "#00ff00".into(),
            owner: "Ada".into(),
        })
        .await
        .unwrap()
    else {
        panic!("expected a new token id");
    };
    handle
        .mutate(Mutation::PlaceToken { id, x: 1.0, y: 1.0 })
        .await
        .unwrap();
    handle
        .mutate(Mutation::MoveToken {
            id,
            x: 20.0,
            y: 4.0,
        })
        .await
        .unwrap();
    handle
        .mutate(Mutation::PlaceImage {
            src: Blob::encode(b"not really a png"),
        })
        .await
        .unwrap();
    handle.mutate(Mutation::SetZoom(2.5)).await.unwrap();

    let expected = handle.state().await.unwrap();
    let replica = eventually(&guest.handle, |s| s == &expected).await;
    assert_eq!(replica.placed_tokens().len(), 1);
    assert!(replica.fog_group(&GroupId::new("night_watch")).is_some());
}

#[tokio::test]
async fn test_resync_restores_guest_after_drift() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let mut guest = admit(&network, &mut authority, "Ada").await;

    authority
        .handle
        .mutate(Mutation::ClearFogGroup(GroupId::everyone()))
        .await
        .unwrap();
    assert_eq!(authority.handle.resync().await.unwrap(), 1);

    let expected = authority.handle.state().await.unwrap();
    eventually(&guest.handle, |s| s == &expected).await;
    loop {
        let notice = timeout(Duration::from_secs(5), guest.notices.recv())
            .await
            .unwrap()
            .unwrap();
        if notice == GuestNotice::Resynced {
            break;
        }
    }
}

#[tokio::test]
async fn test_unknown_token_edits_are_noops() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let ghost = TokenId::new();

    let moved = authority
        .handle
        .mutate(Mutation::MoveToken {
            id: ghost,
            x: 1.0,
            y: 1.0,
        })
        .await
        .unwrap();
    assert_eq!(moved, Outcome::Unchanged);
    let removed = authority
        .handle
        .mutate(Mutation::RemoveToken(ghost))
        .await
        .unwrap();
    assert_eq!(removed, Outcome::Unchanged);

    let err = authority
        .handle
        .mutate(Mutation::PlaceToken {
            id: ghost,
            x: 0.0,
            y: 0.0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TabletopError::State(_)));
}

#[tokio::test]
async fn test_guest_leave_is_reported() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let guest = admit(&network, &mut authority, "Ada").await;

    let joined = wait_for(&mut authority.notices, |n| matches!(n, Notice::GuestJoined { .. })).await;
    guest.handle.leave().await.unwrap();
    let left = wait_for(&mut authority.notices, |n| matches!(n, Notice::GuestLeft { .. })).await;

    match (joined, left) {
        (
            Notice::GuestJoined { conn_id, name },
            Notice::GuestLeft {
                conn_id: left_id,
                name: left_name,
            },
        ) => {
            assert_eq!(conn_id, left_id);
            assert_eq!(left_name.as_deref(), Some(name.as_str()));
        }
        other => panic!("unexpected notices {other:?}"),
    }
    assert!(authority.handle.connections().await.unwrap().is_empty());
}

// =========================================================================
// Persistence and rejoin
// =========================================================================

fn seed(store: &MemoryStore, session_id: &str, age_ms: u64) -> SessionState {
    let mut seeded = SessionState::new(grid());
    seeded.set_cell_lock(CellKey::new(2, 0), true).unwrap();
    seeded.create_fog_group("Scouts").unwrap();
    let archive = SnapshotArchive::new(store.clone(), &LifecycleConfig::default());
    archive
        .save(session_id, &seeded.snapshot(), unix_millis() - age_ms)
        .unwrap();
    seeded
}

#[tokio::test]
async fn test_rejoin_restores_recent_capture_in_place() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let seeded = seed(&store, "abc123", 10 * MINUTE_MS);

    let (mut authority, outcome) = builder(&network, &store)
        .rejoin(USER, PASS, "abc123")
        .await
        .unwrap();
    assert_eq!(outcome, RejoinOutcome::Resumed);
    assert_eq!(authority.handle.session_id().as_str(), "abc123");
    assert_eq!(authority.handle.state().await.unwrap(), seeded);

    // Re-captured right away with a fresh timestamp.
    let archive = SnapshotArchive::new(store.clone(), &LifecycleConfig::default());
    let capture = archive.load("abc123", unix_millis()).unwrap().unwrap();
    assert!(unix_millis() - capture.timestamp < MINUTE_MS);

    // Broadcasts resume.
    let guest = admit(&network, &mut authority, "Ada").await;
    assert!(guest.handle.state().await.unwrap().is_locked(CellKey::new(2, 0)));
    let outcome = authority
        .handle
        .mutate(Mutation::SetCellLock {
            key: CellKey::new(0, 0),
            locked: true,
        })
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Broadcast { recipients: 1 });
    eventually(&guest.handle, |s| s.is_locked(CellKey::new(0, 0))).await;
}

#[tokio::test]
async fn test_rejoin_relocates_when_identifier_is_taken() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let seeded = seed(&store, "abc123", MINUTE_MS);
    let _squatter = network.open(Some(&PeerId::new("abc123"))).await.unwrap();

    let (authority, outcome) = builder(&network, &store)
        .rejoin(USER, PASS, "abc123")
        .await
        .unwrap();
    let RejoinOutcome::Relocated { previous, current } = outcome else {
        panic!("expected relocation");
    };
    assert_eq!(previous.as_str(), "abc123");
    assert_ne!(current, previous);
    assert_eq!(authority.handle.session_id(), &current);
    assert_eq!(authority.handle.state().await.unwrap(), seeded);

    assert!(!store.contains("tabletop_session_abc123"));
    assert!(store.contains(&format!("tabletop_session_{current}")));
}

#[tokio::test]
async fn test_rejoin_with_expired_capture_is_not_found() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    seed(&store, "abc123", 30 * MINUTE_MS);

    let Err(err) = builder(&network, &store).rejoin(USER, PASS, "abc123").await else {
        panic!("expired capture must not rejoin");
    };
    assert!(matches!(err, TabletopError::SnapshotNotFound(id) if id == "abc123"));
    assert!(!store.contains("tabletop_session_abc123"));
}

#[tokio::test]
async fn test_rejoin_rejects_bad_credentials() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    seed(&store, "abc123", MINUTE_MS);

    let Err(err) = builder(&network, &store).rejoin(USER, "wrong", "abc123").await else {
        panic!("bad credentials must not rejoin");
    };
    assert!(matches!(err, TabletopError::Session(SessionError::AuthFailed(_))));
    assert!(store.contains("tabletop_session_abc123"));
}

#[tokio::test]
async fn test_create_rejects_bad_credentials() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let result = builder(&network, &store).create("intruder", PASS).await;
    assert!(matches!(
        result,
        Err(TabletopError::Session(SessionError::AuthFailed(_)))
    ));
}

#[tokio::test]
async fn test_import_replaces_state_and_pushes_to_guests() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let mut authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let guest = admit(&network, &mut authority, "Ada").await;

    let mut imported = SessionState::new(grid());
    imported.create_fog_group("Party").unwrap();
    imported.set_cell_lock(CellKey::new(1, 2), true).unwrap();
    imported.set_zoom(0.5);
    let document = export_session(&imported.snapshot(), 1).unwrap();

    authority.handle.import_session(document).await.unwrap();
    assert_eq!(authority.handle.state().await.unwrap(), imported);
    wait_for(&mut authority.notices, |n| *n == Notice::StateRestored).await;
    eventually(&guest.handle, |s| s == &imported).await;

    let archive = SnapshotArchive::new(store.clone(), &LifecycleConfig::default());
    let capture = archive
        .load(authority.handle.session_id().as_str(), unix_millis())
        .unwrap()
        .unwrap();
    assert_eq!(capture.snapshot, imported.snapshot());
}

#[tokio::test]
async fn test_failed_import_leaves_state_untouched() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    authority
        .handle
        .mutate(Mutation::SetCellLock {
            key: CellKey::new(0, 1),
            locked: true,
        })
        .await
        .unwrap();
    let before = authority.handle.state().await.unwrap();

    let corrupt = authority.handle.import_session("{ nope").await.unwrap_err();
    assert!(matches!(
        corrupt,
        TabletopError::Persist(PersistError::Corrupt(_))
    ));
    let out_of_bounds = authority
        .handle
        .import_session(r#"{"lockedCells": {"9,9": true}}"#)
        .await
        .unwrap_err();
    assert!(matches!(out_of_bounds, TabletopError::State(_)));

    assert_eq!(authority.handle.state().await.unwrap(), before);
}

#[tokio::test]
async fn test_export_then_import_into_new_session() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let source = builder(&network, &store).create(USER, PASS).await.unwrap();
    source
        .handle
        .mutate(Mutation::CreateFogGroup {
            name: "Cellar".into(),
        })
        .await
        .unwrap();
    source
        .handle
        .mutate(Mutation::SwitchFogGroup(GroupId::new("cellar")))
        .await
        .unwrap();
    let document = source.handle.export_session().await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&document).unwrap();
    assert!(json["timestamp"].is_u64());
    assert_eq!(json["activeFogGroup"], "cellar");

    let target = builder(&network, &store).create(USER, PASS).await.unwrap();
    target.handle.import_session(document).await.unwrap();
    assert_eq!(
        target.handle.state().await.unwrap(),
        source.handle.state().await.unwrap()
    );
}

#[tokio::test]
async fn test_shutdown_saves_and_releases_identifier() {
    let network = MemoryNetwork::new();
    let store = MemoryStore::new();
    let authority = builder(&network, &store).create(USER, PASS).await.unwrap();
    let session_id = authority.handle.session_id().to_string();

    authority
        .handle
        .mutate(Mutation::SetPan { x: 40.0, y: -8.0 })
        .await
        .unwrap();
    authority.handle.shutdown().await.unwrap();
    assert!(matches!(
        authority.handle.state().await,
        Err(TabletopError::Stopped)
    ));

    let (resumed, outcome) = builder(&network, &store)
        .rejoin(USER, PASS, &session_id)
        .await
        .unwrap();
    assert_eq!(outcome, RejoinOutcome::Resumed);
    let view = resumed.handle.state().await.unwrap().view();
    assert_eq!((view.pan_x, view.pan_y), (40.0, -8.0));
}
