//! Convergence tests: a guest that applies exactly the messages the
//! authority broadcast, in order, ends up equal to the authority.

use tabletop_protocol::{Blob, CellKey, GroupId, Message, TokenId};
use tabletop_state::{
    BrushMode, Direction, FogBrush, GridConfig, Raster, Replica, SessionState,
};

fn grid() -> GridConfig {
    GridConfig {
        grid_size: 3,
        cell_size: 8,
    }
}

/// Runs `ops` against a fresh authority and mirrors every broadcast into
/// a fresh replica. Returns both for comparison.
fn replay(ops: impl FnOnce(&mut SessionState, &mut Vec<Message>)) -> (SessionState, Replica) {
    let mut authority = SessionState::new(grid());
    let mut outbox = Vec::new();
    ops(&mut authority, &mut outbox);

    let mut replica = Replica::new(SessionState::new(grid()), 0);
    for (i, msg) in outbox.into_iter().enumerate() {
        replica.apply(i as u64 + 1, msg).expect("no denial in stream");
    }
    (authority, replica)
}

/// Guests never see staging or the cursor, which are authority-local.
fn assert_converged(authority: &SessionState, replica: &Replica) {
    let guest = replica.state();
    assert_eq!(guest.grid_cells(), authority.grid_cells());
    assert_eq!(guest.locked_cells(), authority.locked_cells());
    assert_eq!(guest.fog_groups(), authority.fog_groups());
    assert_eq!(guest.active_fog_group(), authority.active_fog_group());
    assert_eq!(guest.placed_tokens(), authority.placed_tokens());
    assert_eq!(guest.placed_images(), authority.placed_images());
    assert_eq!(guest.view(), authority.view());
}

#[test]
fn test_mixed_mutation_sequence_converges() {
    let (authority, replica) = replay(|s, out| {
        out.push(s.paint_cell(CellKey::new(0, 0), Raster::filled(8, 8, 4, 10)).unwrap());
        out.push(s.paint_cell(CellKey::new(2, 1), Raster::filled(8, 8, 4, 20)).unwrap());
        out.push(s.paint_cell(CellKey::new(0, 0), Raster::filled(8, 8, 4, 30)).unwrap());
        out.extend(s.clear_cell(CellKey::new(2, 1)).unwrap());
        out.push(s.set_cell_lock(CellKey::new(1, 1), true).unwrap());
        out.push(s.set_cell_lock(CellKey::new(0, 2), true).unwrap());
        out.push(s.set_cell_lock(CellKey::new(1, 1), false).unwrap());

        out.push(s.create_fog_group("North Wing").unwrap());
        out.push(s.create_fog_group("Scouts").unwrap());
        out.push(s.switch_fog_group(&GroupId::new("north_wing")).unwrap());
        out.push(
            s.paint_fog(FogBrush {
                x: 7.0,
                y: 7.0,
                radius: 6.0,
                mode: BrushMode::Reveal,
            })
            .unwrap(),
        );
        out.push(
            s.paint_fog(FogBrush {
                x: 8.0,
                y: 8.0,
                radius: 2.0,
                mode: BrushMode::Hide,
            })
            .unwrap(),
        );
        out.push(s.clear_fog_group(&GroupId::everyone()).unwrap());
        out.push(s.delete_fog_group(&GroupId::new("scouts")).unwrap());

        let a = s.create_token("A", "#f00", "Ada");
        let b = s.create_token("B", "#0f0", "Bo");
        let c = s.create_token("C", "#00f", "Cy");
        out.push(s.place_token(a, 1.0, 1.0).unwrap());
        out.push(s.place_token(b, 17.0, 3.0).unwrap());
        out.extend(s.move_token(a, 22.0, 22.0));
        out.extend(s.remove_token(b));
        out.extend(s.move_token(TokenId::new(), 0.0, 0.0));
        s.toggle_grid_snap();
        out.push(s.place_token(c, 5.5, 6.5).unwrap());

        s.navigate(Direction::Down);
        out.push(s.place_image(Blob::encode(b"map-fragment")));
        out.push(s.set_zoom(2.25));
        out.push(s.set_pan(-40.0, 12.0));
    });

    assert_converged(&authority, &replica);
}

#[test]
fn test_clear_operations_converge() {
    let (authority, replica) = replay(|s, out| {
        let a = s.create_token("A", "#f00", "Ada");
        out.push(s.place_token(a, 0.0, 0.0).unwrap());
        out.push(s.place_image(Blob::encode(b"one")));
        out.push(s.place_image(Blob::encode(b"two")));
        out.push(s.clear_tokens());
        out.push(s.clear_images());
        out.push(s.reset_view());
    });

    assert_converged(&authority, &replica);
    assert!(replica.state().placed_tokens().is_empty());
    assert!(replica.state().placed_images().is_empty());
}

#[test]
fn test_placed_token_never_in_both_sequences_on_replica() {
    let mut authority = SessionState::new(grid());
    let id = authority.create_token("A", "#f00", "Ada");
    let snapshot = authority.snapshot();
    let place = authority.place_token(id, 0.0, 0.0).unwrap();

    // The guest joined while the token was still in staging.
    let restored = SessionState::restore(&snapshot, grid()).unwrap();
    let mut replica = Replica::new(restored, 1);
    assert_eq!(replica.state().staging_tokens().len(), 1);

    replica.apply(2, place).unwrap();
    assert!(replica.state().staging_tokens().is_empty());
    assert_eq!(replica.state().placed_tokens().len(), 1);
}

#[test]
fn test_token_move_for_unknown_id_is_noop() {
    let mut replica = Replica::new(SessionState::new(grid()), 0);
    let before = replica.state().clone();
    replica
        .apply(
            1,
            Message::TokenMove {
                token_id: TokenId::new(),
                x: 3.0,
                y: 4.0,
            },
        )
        .unwrap();
    assert_eq!(replica.state(), &before);
}

#[test]
fn test_unknown_message_is_ignored() {
    let mut replica = Replica::new(SessionState::new(grid()), 0);
    let before = replica.state().clone();
    replica.apply(1, Message::Unknown).unwrap();
    assert_eq!(replica.state(), &before);
}

#[test]
fn test_full_state_sync_matches_authority_exactly() {
    let mut authority = SessionState::new(grid());
    authority
        .paint_cell(CellKey::new(1, 1), Raster::filled(8, 8, 4, 99))
        .unwrap();
    authority.set_cell_lock(CellKey::new(1, 1), true).unwrap();
    authority.create_token("S", "#abc", "Sam");

    let mut replica = Replica::new(SessionState::new(grid()), 0);
    replica
        .apply(
            1,
            Message::FullStateSync {
                snapshot: Box::new(authority.snapshot()),
            },
        )
        .unwrap();
    assert_eq!(replica.state(), &authority);
}
