//! The replication message set.
//!
//! Only [`Message::JoinRequest`] travels guest → authority. Every other
//! kind is authority-originated; guests apply them to their replica and
//! never emit them. This one-writer rule is what keeps replicas free of
//! write-write conflicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Blob, CellKey, GroupId, PlacedImage, Snapshot, Token, TokenId};

/// One replication message.
///
/// Internally tagged: `{"type": "tokenMove", "tokenId": "...", "x": 1.0, "y": 2.0}`.
/// A tag this build does not know decodes to [`Message::Unknown`] so older
/// peers ignore newer kinds instead of dropping the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    /// Guest asks to be admitted.
    JoinRequest { name: String, peer_id: String },

    /// Admission granted; the guest replaces its replica wholesale.
    JoinApproved { name: String, snapshot: Box<Snapshot> },

    /// Admission refused; the authority closes the channel after sending.
    JoinDenied { reason: String },

    /// Whole-cell replacement of the named cells.
    GridUpdate { cells: BTreeMap<CellKey, Blob> },

    /// Whole-mask replacement of the named fog groups. Unknown ids create
    /// the group, named from `names` when present.
    FogUpdate {
        masks: BTreeMap<GroupId, Blob>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        names: BTreeMap<GroupId, String>,
    },

    /// A fog group was deleted.
    FogRemove { group_id: GroupId },

    /// The active fog group changed.
    FogActivate { group_id: GroupId },

    CellLock { key: CellKey, locked: bool },

    /// Upsert into the placed sequence by id.
    TokenPlace { token: Token },

    TokenMove { token_id: TokenId, x: f64, y: f64 },

    TokenRemove { token_id: TokenId },

    ClearTokens,

    ClearImages,

    /// Append to the placed images.
    ImagePlace { image: PlacedImage },

    /// Guests overwrite their view unconditionally.
    ZoomPanUpdate { zoom: f64, pan_x: f64, pan_y: f64 },

    /// Out-of-band resync; the guest replaces its replica wholesale.
    FullStateSync { snapshot: Box<Snapshot> },

    /// Any tag this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRequest { .. } => "joinRequest",
            Self::JoinApproved { .. } => "joinApproved",
            Self::JoinDenied { .. } => "joinDenied",
            Self::GridUpdate { .. } => "gridUpdate",
            Self::FogUpdate { .. } => "fogUpdate",
            Self::FogRemove { .. } => "fogRemove",
            Self::FogActivate { .. } => "fogActivate",
            Self::CellLock { .. } => "cellLock",
            Self::TokenPlace { .. } => "tokenPlace",
            Self::TokenMove { .. } => "tokenMove",
            Self::TokenRemove { .. } => "tokenRemove",
            Self::ClearTokens => "clearTokens",
            Self::ClearImages => "clearImages",
            Self::ImagePlace { .. } => "imagePlace",
            Self::ZoomPanUpdate { .. } => "zoomPanUpdate",
            Self::FullStateSync { .. } => "fullStateSync",
            Self::Unknown => "unknown",
        }
    }

    /// `true` for the only kind a guest may send.
    pub fn is_guest_originated(&self) -> bool {
        matches!(self, Self::JoinRequest { .. })
    }
}

/// A sequenced frame carrying one [`Message`].
///
/// `seq` increases monotonically per sender. Guests use it to discard
/// raster decodes that finish after a newer write to the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    /// Sender wall-clock time, unix millis.
    pub timestamp: u64,
    pub message: Message,
}

impl Envelope {
    pub fn new(seq: u64, timestamp: u64, message: Message) -> Self {
        Self {
            seq,
            timestamp,
            message,
        }
    }
}
