//! Guest-side projection of the authority's document.
//!
//! A replica applies authority messages in the order the channel
//! delivers them. Cheap messages apply inline. Messages that carry
//! rasters, and wholesale snapshot loads, come back as a
//! [`PendingDecode`] so the caller can run the CPU-heavy part on a
//! blocking pool and hand the [`DecodedBatch`] back via
//! [`Replica::complete`].
//!
//! Decodes may finish in any order. Each raster entity remembers the
//! envelope `seq` of the write that produced it, and a completion older
//! than what the entity already holds is dropped. While a wholesale
//! snapshot is decoding, later messages are queued and replayed on top
//! of it, so nothing the authority sent after the snapshot is lost.

use std::collections::{HashMap, VecDeque};

use tabletop_protocol::{Blob, CellKey, GroupId, Message, Snapshot};

use crate::{GridConfig, Raster, SessionState, StateError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RasterKey {
    Cell(CellKey),
    Fog(GroupId),
}

/// What happened to a received message.
#[derive(Debug)]
pub enum Receipt {
    /// Merged into the replica.
    Applied,
    /// Needs decoding before it can merge.
    Deferred(PendingDecode),
    /// Held until an in-flight snapshot load completes.
    Queued,
    /// The authority refused admission.
    Denied(String),
    /// Not applicable to a guest replica.
    Ignored,
}

/// Decode work detached from the replica so it can run elsewhere.
#[derive(Debug)]
pub struct PendingDecode {
    seq: u64,
    grid: GridConfig,
    work: DecodeWork,
}

#[derive(Debug)]
enum DecodeWork {
    Rasters {
        cells: Vec<(CellKey, Blob)>,
        fogs: Vec<(GroupId, Option<String>, Blob)>,
    },
    Snapshot(Box<Snapshot>),
}

/// Result of [`PendingDecode::decode`].
#[derive(Debug)]
pub struct DecodedBatch {
    seq: u64,
    result: Decoded,
}

#[derive(Debug)]
enum Decoded {
    Rasters {
        cells: Vec<(CellKey, Raster)>,
        fogs: Vec<(GroupId, Option<String>, Raster)>,
    },
    State(Result<Box<SessionState>, StateError>),
}

impl PendingDecode {
    /// Sequence number of the message this work came from.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Decodes every raster. Corrupt entries are logged and skipped; the
    /// rest of the batch still applies.
    pub fn decode(self) -> DecodedBatch {
        let cell_shape = SessionState::cell_shape(&self.grid);
        let fog_shape = SessionState::fog_shape(&self.grid);
        let result = match self.work {
            DecodeWork::Rasters { cells, fogs } => Decoded::Rasters {
                cells: cells
                    .into_iter()
                    .filter_map(|(key, blob)| {
                        decode_logged(&blob, cell_shape, self.seq).map(|r| (key, r))
                    })
                    .collect(),
                fogs: fogs
                    .into_iter()
                    .filter_map(|(id, name, blob)| {
                        decode_logged(&blob, fog_shape, self.seq).map(|r| (id, name, r))
                    })
                    .collect(),
            },
            DecodeWork::Snapshot(snapshot) => {
                Decoded::State(SessionState::restore(&snapshot, self.grid).map(Box::new))
            }
        };
        DecodedBatch {
            seq: self.seq,
            result,
        }
    }
}

fn decode_logged(blob: &Blob, shape: (u32, u32, u8), seq: u64) -> Option<Raster> {
    match Raster::decode_shaped(blob, shape) {
        Ok(raster) => Some(raster),
        Err(e) => {
            tracing::warn!(seq, error = %e, "dropping undecodable raster");
            None
        }
    }
}

/// The guest's copy of the document plus merge bookkeeping.
#[derive(Debug, Clone)]
pub struct Replica {
    state: SessionState,
    applied: HashMap<RasterKey, u64>,
    /// Seq of the last wholesale replacement; older completions are stale.
    floor: u64,
    /// Seq of a snapshot load still decoding.
    loading: Option<u64>,
    backlog: VecDeque<(u64, Message)>,
    /// Activation received before its group finished decoding.
    pending_active: Option<GroupId>,
}

impl Replica {
    /// Wraps an already restored document (the join snapshot).
    pub fn new(state: SessionState, seq: u64) -> Self {
        Self {
            state,
            applied: HashMap::new(),
            floor: seq,
            loading: None,
            backlog: VecDeque::new(),
            pending_active: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// `true` while a wholesale load is decoding.
    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    /// Merges one authority message.
    pub fn receive(&mut self, seq: u64, message: Message) -> Receipt {
        if self.loading.is_some() && !is_wholesale(&message) {
            self.backlog.push_back((seq, message));
            return Receipt::Queued;
        }

        let grid = self.state.grid();
        match message {
            Message::JoinApproved { snapshot, .. } | Message::FullStateSync { snapshot } => {
                self.loading = Some(seq);
                // A newer snapshot makes anything queued behind the old one moot.
                self.backlog.clear();
                Receipt::Deferred(PendingDecode {
                    seq,
                    grid,
                    work: DecodeWork::Snapshot(snapshot),
                })
            }
            Message::JoinDenied { reason } => Receipt::Denied(reason),

            Message::GridUpdate { cells } => {
                let cells = cells
                    .into_iter()
                    .filter(|(key, _)| {
                        let inside = grid.contains(*key);
                        if !inside {
                            tracing::debug!(%key, "ignoring cell outside the grid");
                        }
                        inside
                    })
                    .collect();
                Receipt::Deferred(PendingDecode {
                    seq,
                    grid,
                    work: DecodeWork::Rasters {
                        cells,
                        fogs: Vec::new(),
                    },
                })
            }
            Message::FogUpdate { masks, mut names } => {
                let fogs = masks
                    .into_iter()
                    .map(|(id, blob)| {
                        let name = names.remove(&id);
                        (id, name, blob)
                    })
                    .collect();
                Receipt::Deferred(PendingDecode {
                    seq,
                    grid,
                    work: DecodeWork::Rasters {
                        cells: Vec::new(),
                        fogs,
                    },
                })
            }
            Message::FogRemove { group_id } => {
                if group_id.is_everyone() {
                    return Receipt::Ignored;
                }
                self.state.remove_fog(&group_id);
                if self.pending_active.as_ref() == Some(&group_id) {
                    self.pending_active = None;
                }
                self.applied.insert(RasterKey::Fog(group_id), seq);
                Receipt::Applied
            }
            Message::FogActivate { group_id } => {
                if self.state.activate_fog(&group_id) {
                    self.pending_active = None;
                } else {
                    self.pending_active = Some(group_id);
                }
                Receipt::Applied
            }
            Message::CellLock { key, locked } => {
                if !grid.contains(key) {
                    return Receipt::Ignored;
                }
                self.state.merge_lock(key, locked);
                Receipt::Applied
            }
            Message::TokenPlace { token } => {
                self.state.upsert_placed(token);
                Receipt::Applied
            }
            Message::TokenMove { token_id, x, y } => {
                if !self.state.move_placed(token_id, x, y) {
                    tracing::debug!(%token_id, "move for unknown token ignored");
                }
                Receipt::Applied
            }
            Message::TokenRemove { token_id } => {
                self.state.remove_placed(token_id);
                Receipt::Applied
            }
            Message::ClearTokens => {
                self.state.clear_tokens();
                Receipt::Applied
            }
            Message::ClearImages => {
                self.state.clear_images();
                Receipt::Applied
            }
            Message::ImagePlace { image } => {
                self.state.push_image(image);
                Receipt::Applied
            }
            Message::ZoomPanUpdate { zoom, pan_x, pan_y } => {
                self.state.set_view(zoom, pan_x, pan_y);
                Receipt::Applied
            }
            Message::JoinRequest { .. } | Message::Unknown => Receipt::Ignored,
        }
    }

    /// Merges finished decode work. Returns follow-up work produced by
    /// replaying messages that queued behind a snapshot load.
    pub fn complete(&mut self, batch: DecodedBatch) -> Vec<PendingDecode> {
        let seq = batch.seq;
        match batch.result {
            Decoded::Rasters { cells, fogs } => {
                if seq < self.floor {
                    tracing::trace!(seq, floor = self.floor, "discarding pre-snapshot decode");
                    return Vec::new();
                }
                for (key, raster) in cells {
                    if self.claim(RasterKey::Cell(key), seq) {
                        self.state.merge_cell(key, raster);
                    }
                }
                for (id, name, raster) in fogs {
                    if self.claim(RasterKey::Fog(id.clone()), seq) {
                        self.state.merge_fog(id.clone(), name, raster);
                        if self.pending_active.as_ref() == Some(&id) {
                            self.state.activate_fog(&id);
                            self.pending_active = None;
                        }
                    }
                }
                Vec::new()
            }
            Decoded::State(result) => {
                if self.loading != Some(seq) {
                    tracing::trace!(seq, "discarding superseded snapshot load");
                    return Vec::new();
                }
                self.loading = None;
                match result {
                    Ok(state) => {
                        self.state = *state;
                        self.applied.clear();
                        self.floor = seq;
                        self.pending_active = None;
                    }
                    Err(e) => {
                        tracing::warn!(seq, error = %e, "snapshot rejected, keeping current replica");
                    }
                }
                self.replay_backlog()
            }
        }
    }

    /// Merges a message and runs any decode inline. Convenient where the
    /// caller has no blocking pool, such as tests and tools.
    pub fn apply(&mut self, seq: u64, message: Message) -> Result<(), String> {
        let mut work = match self.receive(seq, message) {
            Receipt::Deferred(pending) => vec![pending],
            Receipt::Denied(reason) => return Err(reason),
            _ => Vec::new(),
        };
        while let Some(pending) = work.pop() {
            work.extend(self.complete(pending.decode()));
        }
        Ok(())
    }

    /// Records `seq` for the entity unless it already holds a newer write.
    fn claim(&mut self, key: RasterKey, seq: u64) -> bool {
        match self.applied.get(&key) {
            Some(latest) if *latest > seq => {
                tracing::trace!(seq, latest, "discarding stale raster");
                false
            }
            _ => {
                self.applied.insert(key, seq);
                true
            }
        }
    }

    fn replay_backlog(&mut self) -> Vec<PendingDecode> {
        let mut work = Vec::new();
        while let Some((seq, message)) = self.backlog.pop_front() {
            match self.receive(seq, message) {
                Receipt::Deferred(pending) => {
                    let wholesale = matches!(pending.work, DecodeWork::Snapshot(_));
                    work.push(pending);
                    if wholesale {
                        break;
                    }
                }
                Receipt::Denied(reason) => {
                    tracing::debug!(%reason, "late denial ignored");
                }
                _ => {}
            }
        }
        work
    }
}

fn is_wholesale(message: &Message) -> bool {
    matches!(
        message,
        Message::JoinApproved { .. } | Message::FullStateSync { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrushMode, FogBrush};

    fn grid() -> GridConfig {
        GridConfig {
            grid_size: 3,
            cell_size: 8,
        }
    }

    fn fresh() -> Replica {
        Replica::new(SessionState::new(grid()), 0)
    }

    fn decode_now(receipt: Receipt) -> DecodedBatch {
        match receipt {
            Receipt::Deferred(pending) => pending.decode(),
            other => panic!("expected deferred work, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_order_cell_decodes_keep_newest() {
        let mut authority = SessionState::new(grid());
        let key = CellKey::new(0, 0);
        let first = authority.paint_cell(key, Raster::filled(8, 8, 4, 1)).unwrap();
        let second = authority.paint_cell(key, Raster::filled(8, 8, 4, 2)).unwrap();

        let mut replica = fresh();
        let older = decode_now(replica.receive(1, first));
        let newer = decode_now(replica.receive(2, second));
        // Newer finishes first; the older completion must not win.
        replica.complete(newer);
        replica.complete(older);
        assert_eq!(replica.state().grid_cell(key), authority.grid_cell(key));
    }

    #[test]
    fn test_fog_remove_drops_inflight_mask() {
        let mut authority = SessionState::new(grid());
        let create = authority.create_fog_group("Scouts").unwrap();
        let id = GroupId::new("scouts");
        let remove = authority.delete_fog_group(&id).unwrap();

        let mut replica = fresh();
        let pending = decode_now(replica.receive(1, create));
        assert!(matches!(replica.receive(2, remove), Receipt::Applied));
        replica.complete(pending);
        assert!(replica.state().fog_group(&id).is_none());
    }

    #[test]
    fn test_activation_waits_for_group_decode() {
        let mut authority = SessionState::new(grid());
        let create = authority.create_fog_group("Scouts").unwrap();
        let id = GroupId::new("scouts");
        let activate = authority.switch_fog_group(&id).unwrap();

        let mut replica = fresh();
        let pending = decode_now(replica.receive(1, create));
        replica.receive(2, activate);
        assert_eq!(replica.state().active_fog_group(), &GroupId::everyone());
        replica.complete(pending);
        assert_eq!(replica.state().active_fog_group(), &id);
        assert_eq!(replica.state().fog_group(&id).unwrap().name, "Scouts");
    }

    #[test]
    fn test_messages_behind_snapshot_are_replayed() {
        let mut authority = SessionState::new(grid());
        let id = authority.create_token("A", "#fff", "Ada");
        authority.place_token(id, 0.0, 0.0).unwrap();
        let sync = Message::FullStateSync {
            snapshot: Box::new(authority.snapshot()),
        };
        let moved = authority.move_token(id, 20.0, 20.0).unwrap();

        let mut replica = fresh();
        let load = decode_now(replica.receive(5, sync));
        assert!(replica.is_loading());
        assert!(matches!(replica.receive(6, moved), Receipt::Queued));
        let follow_ups = replica.complete(load);
        assert!(follow_ups.is_empty());
        assert_eq!(replica.state(), &authority);
    }

    #[test]
    fn test_stale_decode_before_snapshot_is_discarded() {
        let mut authority = SessionState::new(grid());
        let key = CellKey::new(2, 2);
        let paint = authority.paint_cell(key, Raster::filled(8, 8, 4, 5)).unwrap();
        authority.clear_cell(key).unwrap();
        let sync = Message::FullStateSync {
            snapshot: Box::new(authority.snapshot()),
        };

        let mut replica = fresh();
        let early = decode_now(replica.receive(1, paint));
        let load = decode_now(replica.receive(2, sync));
        replica.complete(load);
        replica.complete(early);
        assert_eq!(replica.state(), &authority);
    }

    #[test]
    fn test_corrupt_raster_is_skipped_not_fatal() {
        let mut replica = fresh();
        let mut cells = std::collections::BTreeMap::new();
        cells.insert(CellKey::new(0, 0), Blob::encode(b"junk"));
        replica.apply(1, Message::GridUpdate { cells }).unwrap();
        assert!(replica.state().grid_cells().is_empty());
    }

    #[test]
    fn test_denial_surfaces_reason() {
        let mut replica = fresh();
        let err = replica
            .apply(
                1,
                Message::JoinDenied {
                    reason: "no".into(),
                },
            )
            .unwrap_err();
        assert_eq!(err, "no");
    }

    #[test]
    fn test_fog_brush_replicates() {
        let mut authority = SessionState::new(grid());
        let stroke = authority
            .paint_fog(FogBrush {
                x: 10.0,
                y: 10.0,
                radius: 5.0,
                mode: BrushMode::Reveal,
            })
            .unwrap();
        let mut replica = fresh();
        replica.apply(1, stroke).unwrap();
        assert_eq!(replica.state(), &authority);
    }
}
