//! Shared vocabulary of the tabletop state document.
//!
//! Everything here is plain data that appears on the wire, in persisted
//! captures, and in exported session files. Field names serialize in
//! camelCase so all three share one layout.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Globally unique token identifier, assigned by the authority.
///
/// Random v4 UUIDs keep identifiers unique across authority restarts
/// without persisting a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub Uuid);

impl TokenId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.0)
    }
}

/// Address of one grid cell.
///
/// Serializes as the string `"x,y"` so it can key JSON objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub x: u32,
    pub y: u32,
}

impl CellKey {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for CellKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidCellKey(s.to_owned());
        let (x, y) = s.split_once(',').ok_or_else(invalid)?;
        let x = x.trim().parse().map_err(|_| invalid())?;
        let y = y.trim().parse().map_err(|_| invalid())?;
        Ok(Self { x, y })
    }
}

impl Serialize for CellKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a fog group, derived from its display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Id of the group that always exists and cannot be deleted.
    pub const EVERYONE: &'static str = "everyone";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The undeletable default group.
    pub fn everyone() -> Self {
        Self(Self::EVERYONE.to_owned())
    }

    /// Derives an id from a display name: trimmed, lowercased, with each
    /// whitespace run collapsed to `_`. Returns `None` for a blank name.
    pub fn from_name(name: &str) -> Option<Self> {
        let id = name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("_");
        (!id.is_empty()).then_some(Self(id))
    }

    pub fn is_everyone(&self) -> bool {
        self.0 == Self::EVERYONE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::everyone()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Self-contained binary payload carried as base64 text.
///
/// The protocol does not interpret the bytes; raster encoding lives in
/// the state crate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blob(String);

impl Blob {
    /// Encodes raw bytes.
    pub fn encode(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Decodes back to raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>, ProtocolError> {
        STANDARD
            .decode(&self.0)
            .map_err(|e| ProtocolError::InvalidBlob(e.to_string()))
    }

    /// Length of the encoded text.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Blob {
    fn from(encoded: String) -> Self {
        Self(encoded)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} chars)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A game piece. Lives either in staging (not yet on the map) or placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: TokenId,
    pub glyph: String,
    pub color: String,
    pub owner_name: String,
    pub x: f64,
    pub y: f64,
    pub placed: bool,
}

/// An image dropped onto the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedImage {
    pub src: Blob,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub origin_cell: CellKey,
}

/// Navigation cursor position in cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorCell {
    pub x: u32,
    pub y: u32,
}

impl Default for CursorCell {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

impl From<CursorCell> for CellKey {
    fn from(c: CursorCell) -> Self {
        CellKey::new(c.x, c.y)
    }
}

impl From<CellKey> for CursorCell {
    fn from(k: CellKey) -> Self {
        CursorCell { x: k.x, y: k.y }
    }
}

/// Persisted form of a fog group. A missing mask restores fully hidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FogGroupSnapshot {
    pub name: String,
    #[serde(default)]
    pub mask_blob: Option<Blob>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Full serialized copy of the state document.
///
/// Used verbatim for join approval, full resync, persisted captures and
/// exported session files. Missing fields fall back to the defaults of a
/// fresh session, so older or hand-edited documents still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub grid_cells: BTreeMap<CellKey, Blob>,
    pub locked_cells: BTreeMap<CellKey, bool>,
    pub fog_groups: BTreeMap<GroupId, FogGroupSnapshot>,
    pub active_fog_group: GroupId,
    pub staging_tokens: Vec<Token>,
    pub placed_tokens: Vec<Token>,
    pub placed_images: Vec<PlacedImage>,
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
    pub cursor_cell: CursorCell,
    pub grid_snap_enabled: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            grid_cells: BTreeMap::new(),
            locked_cells: BTreeMap::new(),
            fog_groups: BTreeMap::new(),
            active_fog_group: GroupId::everyone(),
            staging_tokens: Vec::new(),
            placed_tokens: Vec::new(),
            placed_images: Vec::new(),
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
            cursor_cell: CursorCell::default(),
            grid_snap_enabled: true,
        }
    }
}
