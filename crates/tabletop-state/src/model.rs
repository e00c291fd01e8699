//! The canonical state document and its authority operations.
//!
//! Every authority operation follows the same shape: validate, mutate
//! the document, then return the message that mirrors the mutation to
//! guests (`None` when nothing changed or the change is authority-local).
//! Guests replay those messages through the `merge_*` primitives below,
//! which is why authority and replica converge.

use std::collections::{BTreeMap, BTreeSet};

use tabletop_protocol::{Blob, CellKey, GroupId, Message, PlacedImage, Token, TokenId};

use crate::raster::{CELL_CHANNELS, FOG_CHANNELS, FOG_HIDDEN, FOG_REVEALED};
use crate::{DEFAULT_ZOOM, GridConfig, MAX_ZOOM, MIN_ZOOM, Raster, StateError};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// A named visibility mask over the whole map.
#[derive(Debug, Clone, PartialEq)]
pub struct FogGroup {
    pub name: String,
    pub mask: Raster,
}

/// Zoom and pan of the shared view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }
}

/// Cursor navigation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    /// Back to the middle of the grid.
    Center,
}

/// Whether a fog stroke uncovers or covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushMode {
    Reveal,
    Hide,
}

/// One fog stroke in map pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FogBrush {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub mode: BrushMode,
}

/// Clamps a zoom factor into range; non-finite values reset to default.
pub(crate) fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_finite() {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        DEFAULT_ZOOM
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The shared tabletop document.
///
/// Invariants:
/// - the `everyone` fog group always exists and the active group exists;
/// - a token id is in at most one of staging and placed;
/// - cell keys and the cursor lie inside the grid;
/// - zoom lies in `[MIN_ZOOM, MAX_ZOOM]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub(crate) grid: GridConfig,
    pub(crate) grid_cells: BTreeMap<CellKey, Raster>,
    pub(crate) locked_cells: BTreeSet<CellKey>,
    pub(crate) fog_groups: BTreeMap<GroupId, FogGroup>,
    pub(crate) active_fog_group: GroupId,
    pub(crate) staging_tokens: Vec<Token>,
    pub(crate) placed_tokens: Vec<Token>,
    pub(crate) placed_images: Vec<PlacedImage>,
    pub(crate) view: ViewState,
    pub(crate) cursor: CellKey,
    pub(crate) grid_snap_enabled: bool,
}

impl SessionState {
    /// Display name of the default fog group.
    pub const EVERYONE_NAME: &'static str = "Everyone";

    /// A fresh session: empty grid, one fully hidden `everyone` group.
    pub fn new(grid: GridConfig) -> Self {
        let grid = grid.validated();
        let mut fog_groups = BTreeMap::new();
        fog_groups.insert(
            GroupId::everyone(),
            FogGroup {
                name: Self::EVERYONE_NAME.to_owned(),
                mask: Self::hidden_mask(&grid),
            },
        );
        Self {
            grid,
            grid_cells: BTreeMap::new(),
            locked_cells: BTreeSet::new(),
            fog_groups,
            active_fog_group: GroupId::everyone(),
            staging_tokens: Vec::new(),
            placed_tokens: Vec::new(),
            placed_images: Vec::new(),
            view: ViewState::default(),
            cursor: grid.default_cursor(),
            grid_snap_enabled: true,
        }
    }

    pub(crate) fn hidden_mask(grid: &GridConfig) -> Raster {
        Raster::filled(grid.extent(), grid.extent(), FOG_CHANNELS, FOG_HIDDEN)
    }

    pub(crate) fn cell_shape(grid: &GridConfig) -> (u32, u32, u8) {
        (grid.cell_size, grid.cell_size, CELL_CHANNELS)
    }

    pub(crate) fn fog_shape(grid: &GridConfig) -> (u32, u32, u8) {
        (grid.extent(), grid.extent(), FOG_CHANNELS)
    }

    // -- Accessors ----------------------------------------------------------

    pub fn grid(&self) -> GridConfig {
        self.grid
    }

    pub fn grid_cell(&self, key: CellKey) -> Option<&Raster> {
        self.grid_cells.get(&key)
    }

    pub fn grid_cells(&self) -> &BTreeMap<CellKey, Raster> {
        &self.grid_cells
    }

    pub fn is_locked(&self, key: CellKey) -> bool {
        self.locked_cells.contains(&key)
    }

    pub fn locked_cells(&self) -> &BTreeSet<CellKey> {
        &self.locked_cells
    }

    pub fn fog_groups(&self) -> &BTreeMap<GroupId, FogGroup> {
        &self.fog_groups
    }

    pub fn fog_group(&self, id: &GroupId) -> Option<&FogGroup> {
        self.fog_groups.get(id)
    }

    pub fn active_fog_group(&self) -> &GroupId {
        &self.active_fog_group
    }

    pub fn staging_tokens(&self) -> &[Token] {
        &self.staging_tokens
    }

    pub fn placed_tokens(&self) -> &[Token] {
        &self.placed_tokens
    }

    pub fn placed_token(&self, id: TokenId) -> Option<&Token> {
        self.placed_tokens.iter().find(|t| t.id == id)
    }

    pub fn placed_images(&self) -> &[PlacedImage] {
        &self.placed_images
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn cursor(&self) -> CellKey {
        self.cursor
    }

    pub fn grid_snap_enabled(&self) -> bool {
        self.grid_snap_enabled
    }

    fn check_cell(&self, key: CellKey) -> Result<(), StateError> {
        if self.grid.contains(key) {
            Ok(())
        } else {
            Err(StateError::CellOutOfBounds(key))
        }
    }

    // -- Grid cells ---------------------------------------------------------

    /// Replaces a cell's drawing wholesale.
    pub fn paint_cell(&mut self, key: CellKey, image: Raster) -> Result<Message, StateError> {
        self.check_cell(key)?;
        image.expect_shape(Self::cell_shape(&self.grid))?;
        let blob = image.encode();
        self.merge_cell(key, image);
        Ok(Message::GridUpdate {
            cells: BTreeMap::from([(key, blob)]),
        })
    }

    /// Clears a drawn cell to transparent. Cells never drawn stay absent.
    pub fn clear_cell(&mut self, key: CellKey) -> Result<Option<Message>, StateError> {
        self.check_cell(key)?;
        let Some(raster) = self.grid_cells.get_mut(&key) else {
            return Ok(None);
        };
        raster.fill(0);
        Ok(Some(Message::GridUpdate {
            cells: BTreeMap::from([(key, raster.encode())]),
        }))
    }

    pub fn set_cell_lock(&mut self, key: CellKey, locked: bool) -> Result<Message, StateError> {
        self.check_cell(key)?;
        self.merge_lock(key, locked);
        Ok(Message::CellLock { key, locked })
    }

    /// Moves the cursor one cell, stopping at the edges. Authority-local.
    pub fn navigate(&mut self, direction: Direction) -> CellKey {
        let last = self.grid.grid_size.saturating_sub(1);
        let c = &mut self.cursor;
        match direction {
            Direction::Up => c.y = c.y.saturating_sub(1),
            Direction::Down => c.y = (c.y + 1).min(last),
            Direction::Left => c.x = c.x.saturating_sub(1),
            Direction::Right => c.x = (c.x + 1).min(last),
            Direction::Center => *c = CellKey::new(last / 2, last / 2),
        }
        self.cursor
    }

    // -- Fog ----------------------------------------------------------------

    /// Creates a fully hidden group. The id is derived from `name`.
    pub fn create_fog_group(&mut self, name: &str) -> Result<Message, StateError> {
        let id = GroupId::from_name(name)
            .ok_or_else(|| StateError::InvalidFogGroupName(name.to_owned()))?;
        if self.fog_groups.contains_key(&id) {
            return Err(StateError::DuplicateFogGroup(id));
        }
        let name = name.trim().to_owned();
        let mask = Self::hidden_mask(&self.grid);
        let blob = mask.encode();
        self.fog_groups.insert(
            id.clone(),
            FogGroup {
                name: name.clone(),
                mask,
            },
        );
        Ok(Message::FogUpdate {
            masks: BTreeMap::from([(id.clone(), blob)]),
            names: BTreeMap::from([(id, name)]),
        })
    }

    pub fn switch_fog_group(&mut self, id: &GroupId) -> Result<Message, StateError> {
        if !self.activate_fog(id) {
            return Err(StateError::UnknownFogGroup(id.clone()));
        }
        Ok(Message::FogActivate {
            group_id: id.clone(),
        })
    }

    /// Deletes a group; the active group falls back to `everyone`.
    pub fn delete_fog_group(&mut self, id: &GroupId) -> Result<Message, StateError> {
        if id.is_everyone() {
            return Err(StateError::ProtectedFogGroup(id.clone()));
        }
        if !self.fog_groups.contains_key(id) {
            return Err(StateError::UnknownFogGroup(id.clone()));
        }
        self.remove_fog(id);
        Ok(Message::FogRemove {
            group_id: id.clone(),
        })
    }

    /// Applies one brush stroke to the active group.
    pub fn paint_fog(&mut self, brush: FogBrush) -> Result<Message, StateError> {
        let value = match brush.mode {
            BrushMode::Reveal => FOG_REVEALED,
            BrushMode::Hide => FOG_HIDDEN,
        };
        let id = self.active_fog_group.clone();
        self.fill_fog(&id, |mask| mask.fill_circle(brush.x, brush.y, brush.radius, value))
            .ok_or(StateError::UnknownFogGroup(id))
    }

    /// Reveals a whole group.
    pub fn clear_fog_group(&mut self, id: &GroupId) -> Result<Message, StateError> {
        self.fill_fog(id, |mask| mask.fill(FOG_REVEALED))
            .ok_or_else(|| StateError::UnknownFogGroup(id.clone()))
    }

    /// Hides a whole group again.
    pub fn reset_fog_group(&mut self, id: &GroupId) -> Result<Message, StateError> {
        self.fill_fog(id, |mask| mask.fill(FOG_HIDDEN))
            .ok_or_else(|| StateError::UnknownFogGroup(id.clone()))
    }

    fn fill_fog(&mut self, id: &GroupId, edit: impl FnOnce(&mut Raster)) -> Option<Message> {
        let group = self.fog_groups.get_mut(id)?;
        edit(&mut group.mask);
        Some(Message::FogUpdate {
            masks: BTreeMap::from([(id.clone(), group.mask.encode())]),
            names: BTreeMap::new(),
        })
    }

    // -- Tokens -------------------------------------------------------------

    /// Adds a token to staging. Staging is authority-local until placed.
    pub fn create_token(
        &mut self,
        glyph: impl Into<String>,
        color: impl Into<String>,
        owner_name: impl Into<String>,
    ) -> TokenId {
        let id = TokenId::new();
        self.staging_tokens.push(Token {
            id,
            glyph: glyph.into(),
            color: color.into(),
            owner_name: owner_name.into(),
            x: 0.0,
            y: 0.0,
            placed: false,
        });
        id
    }

    /// Drops a token from staging without placing it.
    pub fn remove_staging_token(&mut self, id: TokenId) -> bool {
        let before = self.staging_tokens.len();
        self.staging_tokens.retain(|t| t.id != id);
        self.staging_tokens.len() != before
    }

    /// Moves a token from staging onto the map, snapping when enabled.
    ///
    /// This is the only transition between the sequences and it happens
    /// once: a token already placed is no longer in staging.
    pub fn place_token(&mut self, id: TokenId, x: f64, y: f64) -> Result<Message, StateError> {
        let index = self
            .staging_tokens
            .iter()
            .position(|t| t.id == id)
            .ok_or(StateError::UnknownToken(id))?;
        let mut token = self.staging_tokens.remove(index);
        (token.x, token.y) = self.position(x, y);
        token.placed = true;
        self.upsert_placed(token.clone());
        Ok(Message::TokenPlace { token })
    }

    /// Moves a placed token. Unknown ids are a no-op.
    pub fn move_token(&mut self, id: TokenId, x: f64, y: f64) -> Option<Message> {
        let (x, y) = self.position(x, y);
        self.move_placed(id, x, y)
            .then_some(Message::TokenMove { token_id: id, x, y })
    }

    /// Removes a placed token. Unknown ids are a no-op.
    pub fn remove_token(&mut self, id: TokenId) -> Option<Message> {
        self.remove_placed(id)
            .then_some(Message::TokenRemove { token_id: id })
    }

    /// Empties both token sequences.
    pub fn clear_tokens(&mut self) -> Message {
        self.staging_tokens.clear();
        self.placed_tokens.clear();
        Message::ClearTokens
    }

    fn position(&self, x: f64, y: f64) -> (f64, f64) {
        if self.grid_snap_enabled {
            self.grid.snap(x, y)
        } else {
            (x, y)
        }
    }

    // -- Images -------------------------------------------------------------

    /// Places an image over the cursor cell at cell size.
    pub fn place_image(&mut self, src: Blob) -> Message {
        let cell = self.grid.cell_size as f64;
        let image = PlacedImage {
            src,
            x: self.cursor.x as f64 * cell,
            y: self.cursor.y as f64 * cell,
            width: cell,
            height: cell,
            rotation: 0.0,
            origin_cell: self.cursor,
        };
        self.placed_images.push(image.clone());
        Message::ImagePlace { image }
    }

    pub fn clear_images(&mut self) -> Message {
        self.placed_images.clear();
        Message::ClearImages
    }

    // -- View ---------------------------------------------------------------

    pub fn set_zoom(&mut self, zoom: f64) -> Message {
        self.view.zoom = clamp_zoom(zoom);
        self.view_message()
    }

    pub fn set_pan(&mut self, pan_x: f64, pan_y: f64) -> Message {
        if pan_x.is_finite() && pan_y.is_finite() {
            self.view.pan_x = pan_x;
            self.view.pan_y = pan_y;
        }
        self.view_message()
    }

    pub fn reset_view(&mut self) -> Message {
        self.view = ViewState::default();
        self.view_message()
    }

    fn view_message(&self) -> Message {
        Message::ZoomPanUpdate {
            zoom: self.view.zoom,
            pan_x: self.view.pan_x,
            pan_y: self.view.pan_y,
        }
    }

    /// Flips grid snapping and returns the new setting. Authority-local.
    pub fn toggle_grid_snap(&mut self) -> bool {
        self.grid_snap_enabled = !self.grid_snap_enabled;
        self.grid_snap_enabled
    }

    // -- Merge primitives shared with the replica ---------------------------

    pub(crate) fn merge_cell(&mut self, key: CellKey, image: Raster) {
        self.grid_cells.insert(key, image);
    }

    pub(crate) fn merge_lock(&mut self, key: CellKey, locked: bool) {
        if locked {
            self.locked_cells.insert(key);
        } else {
            self.locked_cells.remove(&key);
        }
    }

    /// Replaces a group's mask, creating the group when unknown.
    pub(crate) fn merge_fog(&mut self, id: GroupId, name: Option<String>, mask: Raster) {
        match self.fog_groups.get_mut(&id) {
            Some(group) => {
                group.mask = mask;
                if let Some(name) = name {
                    group.name = name;
                }
            }
            None => {
                let name = name.unwrap_or_else(|| id.to_string());
                self.fog_groups.insert(id, FogGroup { name, mask });
            }
        }
    }

    pub(crate) fn remove_fog(&mut self, id: &GroupId) {
        if id.is_everyone() {
            return;
        }
        self.fog_groups.remove(id);
        if &self.active_fog_group == id {
            self.active_fog_group = GroupId::everyone();
        }
    }

    pub(crate) fn activate_fog(&mut self, id: &GroupId) -> bool {
        if !self.fog_groups.contains_key(id) {
            return false;
        }
        self.active_fog_group = id.clone();
        true
    }

    /// Inserts into placed by id, replacing an existing entry in place.
    pub(crate) fn upsert_placed(&mut self, token: Token) {
        self.staging_tokens.retain(|t| t.id != token.id);
        match self.placed_tokens.iter_mut().find(|t| t.id == token.id) {
            Some(existing) => *existing = token,
            None => self.placed_tokens.push(token),
        }
    }

    pub(crate) fn move_placed(&mut self, id: TokenId, x: f64, y: f64) -> bool {
        match self.placed_tokens.iter_mut().find(|t| t.id == id) {
            Some(token) => {
                token.x = x;
                token.y = y;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_placed(&mut self, id: TokenId) -> bool {
        let before = self.placed_tokens.len();
        self.placed_tokens.retain(|t| t.id != id);
        self.placed_tokens.len() != before
    }

    pub(crate) fn push_image(&mut self, image: PlacedImage) {
        self.placed_images.push(image);
    }

    pub(crate) fn set_view(&mut self, zoom: f64, pan_x: f64, pan_y: f64) {
        self.view.zoom = clamp_zoom(zoom);
        self.view.pan_x = pan_x;
        self.view.pan_y = pan_y;
    }
}
