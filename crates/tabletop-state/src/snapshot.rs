//! Full-document capture and restoration.
//!
//! `restore` is all-or-nothing: it builds a complete new document and
//! only returns it once every field validated, so a corrupt capture or
//! import never leaves a half-applied state behind.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tabletop_protocol::{CellKey, FogGroupSnapshot, GroupId, Snapshot, Token};

use crate::model::clamp_zoom;
use crate::{FogGroup, GridConfig, Raster, SessionState, StateError, ViewState};

impl SessionState {
    /// Serializes the whole document. Rasters are encoded as blobs.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            grid_cells: self
                .grid_cells
                .iter()
                .map(|(key, raster)| (*key, raster.encode()))
                .collect(),
            locked_cells: self.locked_cells.iter().map(|key| (*key, true)).collect(),
            fog_groups: self
                .fog_groups
                .iter()
                .map(|(id, group)| {
                    let entry = FogGroupSnapshot {
                        name: group.name.clone(),
                        mask_blob: Some(group.mask.encode()),
                    };
                    (id.clone(), entry)
                })
                .collect(),
            active_fog_group: self.active_fog_group.clone(),
            staging_tokens: self.staging_tokens.clone(),
            placed_tokens: self.placed_tokens.clone(),
            placed_images: self.placed_images.clone(),
            zoom: self.view.zoom,
            pan_x: self.view.pan_x,
            pan_y: self.view.pan_y,
            cursor_cell: self.cursor.into(),
            grid_snap_enabled: self.grid_snap_enabled,
        }
    }

    /// Rebuilds a document from a capture, replacing every field.
    ///
    /// Repairs applied on the way in:
    /// - a missing `everyone` group is recreated fully hidden;
    /// - a group without a mask restores fully hidden;
    /// - an unknown active group falls back to `everyone`;
    /// - zoom and cursor are clamped into range.
    ///
    /// Cells outside the grid, rasters of the wrong shape and token ids
    /// that appear twice are rejected.
    pub fn restore(snapshot: &Snapshot, grid: GridConfig) -> Result<Self, StateError> {
        let grid = grid.validated();
        let cell_shape = Self::cell_shape(&grid);
        let fog_shape = Self::fog_shape(&grid);

        let mut grid_cells = BTreeMap::new();
        for (key, blob) in &snapshot.grid_cells {
            check_bounds(&grid, *key)?;
            grid_cells.insert(*key, Raster::decode_shaped(blob, cell_shape)?);
        }

        let mut locked_cells = BTreeSet::new();
        for (key, locked) in &snapshot.locked_cells {
            check_bounds(&grid, *key)?;
            if *locked {
                locked_cells.insert(*key);
            }
        }

        let mut fog_groups = BTreeMap::new();
        for (id, entry) in &snapshot.fog_groups {
            let mask = match &entry.mask_blob {
                Some(blob) => Raster::decode_shaped(blob, fog_shape)?,
                None => Self::hidden_mask(&grid),
            };
            let group = FogGroup {
                name: entry.name.clone(),
                mask,
            };
            fog_groups.insert(id.clone(), group);
        }
        fog_groups
            .entry(GroupId::everyone())
            .or_insert_with(|| FogGroup {
                name: Self::EVERYONE_NAME.to_owned(),
                mask: Self::hidden_mask(&grid),
            });

        let active_fog_group = if fog_groups.contains_key(&snapshot.active_fog_group) {
            snapshot.active_fog_group.clone()
        } else {
            GroupId::everyone()
        };

        let mut seen = HashSet::new();
        let staging_tokens = normalize_tokens(&snapshot.staging_tokens, false, &mut seen)?;
        let placed_tokens = normalize_tokens(&snapshot.placed_tokens, true, &mut seen)?;

        let pan_x = if snapshot.pan_x.is_finite() { snapshot.pan_x } else { 0.0 };
        let pan_y = if snapshot.pan_y.is_finite() { snapshot.pan_y } else { 0.0 };

        Ok(Self {
            grid,
            grid_cells,
            locked_cells,
            fog_groups,
            active_fog_group,
            staging_tokens,
            placed_tokens,
            placed_images: snapshot.placed_images.clone(),
            view: ViewState {
                zoom: clamp_zoom(snapshot.zoom),
                pan_x,
                pan_y,
            },
            cursor: grid.clamp_cell(CellKey::from(snapshot.cursor_cell)),
            grid_snap_enabled: snapshot.grid_snap_enabled,
        })
    }

    /// Replaces this document wholesale from a capture. On error `self`
    /// is untouched.
    pub fn replace_from(&mut self, snapshot: &Snapshot) -> Result<(), StateError> {
        *self = Self::restore(snapshot, self.grid)?;
        Ok(())
    }
}

fn check_bounds(grid: &GridConfig, key: CellKey) -> Result<(), StateError> {
    if grid.contains(key) {
        Ok(())
    } else {
        Err(StateError::CellOutOfBounds(key))
    }
}

fn normalize_tokens(
    tokens: &[Token],
    placed: bool,
    seen: &mut HashSet<tabletop_protocol::TokenId>,
) -> Result<Vec<Token>, StateError> {
    tokens
        .iter()
        .map(|token| {
            if !seen.insert(token.id) {
                return Err(StateError::DuplicateToken(token.id));
            }
            Ok(Token {
                placed,
                ..token.clone()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrushMode, FOG_HIDDEN, FogBrush};
    use tabletop_protocol::{Blob, CursorCell};

    fn grid() -> GridConfig {
        GridConfig {
            grid_size: 3,
            cell_size: 8,
        }
    }

    fn busy_state() -> SessionState {
        let mut s = SessionState::new(grid());
        s.paint_cell(CellKey::new(1, 1), Raster::filled(8, 8, 4, 77))
            .unwrap();
        s.set_cell_lock(CellKey::new(1, 1), true).unwrap();
        s.create_fog_group("Party A").unwrap();
        s.switch_fog_group(&GroupId::new("party_a")).unwrap();
        s.paint_fog(FogBrush {
            x: 5.0,
            y: 5.0,
            radius: 4.0,
            mode: BrushMode::Reveal,
        })
        .unwrap();
        let placed = s.create_token("A", "#f00", "Ada");
        s.create_token("B", "#0f0", "Bo");
        s.place_token(placed, 13.0, 2.0).unwrap();
        s.place_image(Blob::encode(b"img"));
        s.set_zoom(1.75);
        s.set_pan(-12.5, 40.0);
        s
    }

    #[test]
    fn test_restore_of_snapshot_round_trips() {
        let s = busy_state();
        let restored = SessionState::restore(&s.snapshot(), grid()).unwrap();
        assert_eq!(restored, s);
    }

    #[test]
    fn test_round_trip_survives_json() {
        let s = busy_state();
        let json = serde_json::to_string(&s.snapshot()).unwrap();
        let snapshot: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(SessionState::restore(&snapshot, grid()).unwrap(), s);
    }

    #[test]
    fn test_restore_repairs_missing_groups_and_defaults() {
        let snapshot = Snapshot {
            active_fog_group: GroupId::new("gone"),
            zoom: 50.0,
            cursor_cell: CursorCell { x: 9, y: 9 },
            ..Snapshot::default()
        };
        let s = SessionState::restore(&snapshot, grid()).unwrap();
        assert_eq!(s.active_fog_group(), &GroupId::everyone());
        let everyone = s.fog_group(&GroupId::everyone()).unwrap();
        assert!(everyone.mask.pixels().iter().all(|p| *p == FOG_HIDDEN));
        assert_eq!(s.view().zoom, crate::MAX_ZOOM);
        assert_eq!(s.cursor(), CellKey::new(2, 2));
    }

    #[test]
    fn test_restore_group_without_mask_is_hidden() {
        let mut snapshot = Snapshot::default();
        snapshot.fog_groups.insert(
            GroupId::new("party"),
            FogGroupSnapshot {
                name: "Party".into(),
                mask_blob: None,
            },
        );
        let s = SessionState::restore(&snapshot, grid()).unwrap();
        let party = s.fog_group(&GroupId::new("party")).unwrap();
        assert!(party.mask.pixels().iter().all(|p| *p == FOG_HIDDEN));
    }

    #[test]
    fn test_restore_rejects_token_in_both_sequences() {
        let s = busy_state();
        let mut snapshot = s.snapshot();
        let dup = snapshot.placed_tokens[0].clone();
        snapshot.staging_tokens.push(dup);
        let err = SessionState::restore(&snapshot, grid()).unwrap_err();
        assert!(matches!(err, StateError::DuplicateToken(_)));
    }

    #[test]
    fn test_restore_rejects_out_of_bounds_cell() {
        let mut snapshot = Snapshot::default();
        snapshot.locked_cells.insert(CellKey::new(7, 0), true);
        let err = SessionState::restore(&snapshot, grid()).unwrap_err();
        assert!(matches!(err, StateError::CellOutOfBounds(_)));
    }

    #[test]
    fn test_replace_from_leaves_state_untouched_on_error() {
        let mut s = busy_state();
        let before = s.clone();
        let mut snapshot = Snapshot::default();
        snapshot
            .grid_cells
            .insert(CellKey::new(0, 0), Blob::encode(b"garbage"));
        assert!(s.replace_from(&snapshot).is_err());
        assert_eq!(s, before);
    }
}
